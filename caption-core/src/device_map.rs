use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

/// The hardware the model tensors live on during inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl ComputeDevice {
    /// Probes the available backends once. Accelerators win over the CPU unless the
    /// map forces CPU.
    pub fn probe(device_map: DeviceMap) -> Self {
        match device_map {
            DeviceMap::ForceCpu => Self::Cpu,
            DeviceMap::Ordinal(ordinal) if cuda_is_available() => Self::Cuda(ordinal),
            DeviceMap::Ordinal(ordinal) if metal_is_available() => Self::Metal(ordinal),
            DeviceMap::Ordinal(_) => {
                #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
                {
                    tracing::info!(
                        "running on CPU, to run on GPU(metal), build with `--features metal`"
                    );
                }
                #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
                {
                    tracing::info!("running on CPU, to run on GPU, build with `--features cuda`");
                }
                Self::Cpu
            }
        }
    }

    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    pub fn to_device(self) -> candle_core::Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal),
            Self::Metal(ordinal) => Device::new_metal(ordinal),
        }
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Self::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_cpu_never_probes_accelerators() {
        let device = ComputeDevice::probe(DeviceMap::ForceCpu);
        assert_eq!(device, ComputeDevice::Cpu);
        assert!(!device.is_accelerator());
        assert!(device.to_device().unwrap().is_cpu());
    }

    #[test]
    fn display_names_the_ordinal() {
        assert_eq!(ComputeDevice::Cuda(1).to_string(), "cuda:1");
        assert_eq!(ComputeDevice::Metal(0).to_string(), "metal:0");
        assert_eq!(ComputeDevice::Cpu.to_string(), "cpu");
    }
}
