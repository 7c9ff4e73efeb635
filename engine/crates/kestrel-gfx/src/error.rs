use ash::vk;

/// GFX 层的错误
///
/// 设备丢失与显存耗尽都是致命错误，上层只负责传播，不做恢复。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call failed: {0}")]
    Vk(vk::Result),

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("timed out waiting for the device")]
    Timeout,

    #[error("no suitable physical device")]
    NoSuitableDevice,

    #[error("failed to load vulkan: {0}")]
    Loading(String),

    #[error("allocation handle is unknown or already released")]
    UnknownAllocation,
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT => Self::Timeout,
            other => Self::Vk(other),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_result_maps_to_fatal_kinds() {
        assert!(matches!(GfxError::from(vk::Result::ERROR_DEVICE_LOST), GfxError::DeviceLost));
        assert!(matches!(GfxError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), GfxError::OutOfDeviceMemory));
        assert!(matches!(GfxError::from(vk::Result::TIMEOUT), GfxError::Timeout));
        assert!(matches!(
            GfxError::from(vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
            GfxError::Vk(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
        ));
    }
}
