use ash::vk;
use thiserror::Error;

/// GFX 层的错误类型
///
/// 所有的 Vulkan 调用失败都会带上调用名，方便定位
#[derive(Error, Debug)]
pub enum GfxError {
    #[error("failed to load the vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{call} failed: {result:?}")]
    Vk { call: &'static str, result: vk::Result },

    #[error("required instance layer is not available: {0}")]
    LayerNotPresent(String),

    #[error("required instance extension is not available: {0}")]
    ExtensionNotPresent(String),

    #[error("no physical device exposes a compute-capable queue family with vulkan {required_major}.{required_minor}")]
    NoComputeDevice { required_major: u32, required_minor: u32 },

    #[error("debug name contains an interior nul byte: {0:?}")]
    InvalidName(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 设备丢失之后，这个 device 上的所有对象都不可再使用
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            GfxError::Vk {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        )
    }

    /// fence 等待超时
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GfxError::Vk {
                result: vk::Result::TIMEOUT,
                ..
            }
        )
    }

    #[inline]
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            GfxError::Vk { result, .. } => Some(*result),
            _ => None,
        }
    }
}

/// 为 `VkResult` 附加调用名，类似 `anyhow::Context`
pub trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    fn vk_context(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::Vk { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_context_keeps_call_name() {
        let res: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = res.vk_context("vkAllocateMemory").unwrap_err();

        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(err.to_string().contains("vkAllocateMemory"));
        assert!(!err.is_device_lost());
    }

    #[test]
    fn test_device_lost_and_timeout() {
        let lost = GfxError::Vk {
            call: "vkQueueSubmit2",
            result: vk::Result::ERROR_DEVICE_LOST,
        };
        assert!(lost.is_device_lost());
        assert!(!lost.is_timeout());

        let timeout = GfxError::Vk {
            call: "vkWaitForFences",
            result: vk::Result::TIMEOUT,
        };
        assert!(timeout.is_timeout());
        assert!(GfxError::LayerNotPresent("VK_LAYER_KHRONOS_validation".into()).vk_result().is_none());
    }
}
