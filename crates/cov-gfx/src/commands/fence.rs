use std::{rc::Rc, time::Duration};

use ash::vk;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// # Destroy
/// 需要手动 destroy
pub struct GfxFence {
    fence: vk::Fence,
    gfx_device: Rc<GfxDevice>,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(gfx_device: Rc<GfxDevice>, signaled: bool, debug_name: &str) -> GfxResult<Self> {
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe {
            gfx_device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None).vk_context("vkCreateFence")?
        };

        let fence = Self { fence, gfx_device };
        fence.gfx_device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.gfx_device.destroy_fence(self.fence, None);
        }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，最多等待 `timeout`
    ///
    /// 超时返回 `vk::Result::TIMEOUT`，此时 fence 仍然可能被 queue 使用，不能销毁
    #[inline]
    pub fn wait(&self, timeout: Duration) -> GfxResult<()> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        unsafe {
            self.gfx_device
                .wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns)
                .vk_context("vkWaitForFences")
        }
    }

    /// 非阻塞地查询 fence 的状态
    #[inline]
    pub fn is_signaled(&self) -> GfxResult<bool> {
        unsafe { self.gfx_device.get_fence_status(self.fence).vk_context("vkGetFenceStatus") }
    }

    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        unsafe { self.gfx_device.reset_fences(std::slice::from_ref(&self.fence)).vk_context("vkResetFences") }
    }
}
