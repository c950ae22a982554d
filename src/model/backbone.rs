//! Backbone seam.
//!
//! The encoder treats the pretrained sequence model as an opaque capability:
//! anything that turns a `[B, L]` series into per-layer hidden states can be
//! plugged in through [`SequenceBackbone`], and constructed through a
//! [`BackboneLoader`].
//!
//! - [`patch`] — a small patch-embedding backbone with checkpoint resolution

pub mod patch;

use candle_core::{Device, Tensor};

use crate::{Error, Result};

/// A sequence model exposing its intermediate hidden states.
pub trait SequenceBackbone {
    /// Run a forward pass and return every layer's hidden states.
    ///
    /// Input: `[B, L]` raw series. Each returned layer is `[B, S, hidden_size]`
    /// where `S` is the number of positions the backbone emits.
    fn forward_hidden_states(&self, sequence: &Tensor) -> Result<HiddenStates>;

    /// Width of the emitted hidden states.
    fn hidden_size(&self) -> usize;

    /// Number of raw samples consumed per emitted position. The input must
    /// carry at least this many samples.
    fn input_token_len(&self) -> usize;
}

impl<B: SequenceBackbone + ?Sized> SequenceBackbone for Box<B> {
    fn forward_hidden_states(&self, sequence: &Tensor) -> Result<HiddenStates> {
        (**self).forward_hidden_states(sequence)
    }

    fn hidden_size(&self) -> usize {
        (**self).hidden_size()
    }

    fn input_token_len(&self) -> usize {
        (**self).input_token_len()
    }
}

/// Resolves a backbone identifier into a ready-to-run backbone on `device`.
pub trait BackboneLoader {
    type Backbone: SequenceBackbone;

    fn load(&self, identifier: &str, device: &Device) -> Result<Self::Backbone>;
}

/// Hidden states of every layer, embedding output first, final layer last.
#[derive(Debug, Clone)]
pub struct HiddenStates(Vec<Tensor>);

impl HiddenStates {
    pub fn new(layers: Vec<Tensor>) -> Self {
        Self(layers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<&Tensor> {
        self.0.get(index)
    }

    /// Final layer's hidden states.
    pub fn last(&self) -> Result<&Tensor> {
        self.0
            .last()
            .ok_or_else(|| Error::ShapeMismatch("backbone returned no hidden states".into()))
    }

    /// Take ownership of the final layer, dropping the others.
    pub fn into_last(mut self) -> Result<Tensor> {
        self.0
            .pop()
            .ok_or_else(|| Error::ShapeMismatch("backbone returned no hidden states".into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.0.iter()
    }
}

impl From<Vec<Tensor>> for HiddenStates {
    fn from(layers: Vec<Tensor>) -> Self {
        Self(layers)
    }
}
