use crate::core::{InferenceError, Result};
use candle_core::Device;

/// Loads a device to be used for the model.
/// If `index` is `Some(i)` it will attempt to load the specified CUDA device.
/// When `None` it defaults to CUDA device 0 if available and otherwise falls back
/// to CPU.
pub fn load_device_with(index: Option<usize>) -> Result<Device> {
    let device = match index {
        Some(i) => Device::new_cuda(i),
        None => Device::cuda_if_available(0),
    };
    device.map_err(|e| InferenceError::load(format!("failed to open device: {e}")))
}

/// Selects CUDA 0 if available and otherwise falls back to CPU.
pub fn load_device() -> Result<Device> {
    load_device_with(None)
}

/// Request for a specific device, used by pipeline builders.
#[derive(Clone, Debug, Default)]
pub enum DeviceRequest {
    /// Use CUDA if available, otherwise CPU (default behavior).
    #[default]
    Default,
    /// Force CPU even if CUDA is available.
    Cpu,
    /// Select a specific CUDA device by index.
    Cuda(usize),
    /// Provide an already constructed device.
    Explicit(Device),
}

impl DeviceRequest {
    /// Resolve the request into an actual [`Device`].
    pub fn resolve(self) -> Result<Device> {
        match self {
            DeviceRequest::Default => load_device_with(None),
            DeviceRequest::Cpu => Ok(Device::Cpu),
            DeviceRequest::Cuda(i) => load_device_with(Some(i)),
            DeviceRequest::Explicit(d) => Ok(d),
        }
    }
}

impl std::str::FromStr for DeviceRequest {
    type Err = InferenceError;

    /// Parses `auto`, `cpu`, `cuda` or `cuda:<index>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "" | "auto" => Ok(DeviceRequest::Default),
            "cpu" => Ok(DeviceRequest::Cpu),
            "cuda" => Ok(DeviceRequest::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DeviceRequest::Cuda)
                .ok_or_else(|| {
                    InferenceError::load(format!(
                        "invalid device '{other}'. Expected auto, cpu or cuda:<index>"
                    ))
                }),
        }
    }
}

/// Trait providing convenience methods for pipeline builders to select a device.
pub trait DeviceSelectable: Sized {
    /// Returns a mutable reference to the builder's internal [`DeviceRequest`].
    fn device_request_mut(&mut self) -> &mut DeviceRequest;

    /// Force the pipeline to run on CPU.
    fn cpu(mut self) -> Self {
        *self.device_request_mut() = DeviceRequest::Cpu;
        self
    }

    /// Select a specific CUDA device by index.
    fn cuda_device(mut self, index: usize) -> Self {
        *self.device_request_mut() = DeviceRequest::Cuda(index);
        self
    }

    /// Provide an explicit [`Device`].
    fn device(mut self, device: Device) -> Self {
        *self.device_request_mut() = DeviceRequest::Explicit(device);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_names() {
        assert!(matches!("auto".parse::<DeviceRequest>(), Ok(DeviceRequest::Default)));
        assert!(matches!("CPU".parse::<DeviceRequest>(), Ok(DeviceRequest::Cpu)));
        assert!(matches!("cuda".parse::<DeviceRequest>(), Ok(DeviceRequest::Cuda(0))));
        assert!(matches!("cuda:2".parse::<DeviceRequest>(), Ok(DeviceRequest::Cuda(2))));
        assert!("tpu".parse::<DeviceRequest>().is_err());
        assert!("cuda:x".parse::<DeviceRequest>().is_err());
    }

    #[test]
    fn cpu_request_resolves_to_cpu() {
        assert!(DeviceRequest::Cpu.resolve().unwrap().is_cpu());
    }
}
