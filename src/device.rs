//! Explicit compute-device selection.
//!
//! The encoder never chooses a device on its own; callers resolve one here
//! (or build a [`Device`] themselves) and pass it in.

use candle_core::Device;

use crate::{Error, Result};

/// Parse a device designator: `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`.
///
/// Fails with [`Error::Device`] when the designator is unknown or the backend
/// is not available (not compiled in, or no such ordinal).
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_ascii_lowercase();
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal = ordinal
                .parse::<usize>()
                .map_err(|_| Error::Device(format!("invalid device ordinal in '{spec}'")))?;
            (kind, ordinal)
        }
        None => (spec.as_str(), 0),
    };

    match kind {
        "cpu" if ordinal == 0 => Ok(Device::Cpu),
        "cuda" | "gpu" => Device::new_cuda(ordinal)
            .map_err(|e| Error::Device(format!("cuda:{ordinal} unavailable: {e}"))),
        "metal" | "mps" => Device::new_metal(ordinal)
            .map_err(|e| Error::Device(format!("metal:{ordinal} unavailable: {e}"))),
        _ => Err(Error::Device(format!(
            "unknown device '{spec}' (expected cpu, cuda[:N] or metal[:N])"
        ))),
    }
}

/// Short human-readable label for logs.
pub fn device_label(device: &Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(_) => "cuda".to_string(),
        Device::Metal(_) => "metal".to_string(),
    }
}
