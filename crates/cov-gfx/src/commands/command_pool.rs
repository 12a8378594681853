use std::rc::Rc;

use ash::vk;

use crate::{
    commands::command_queue::GfxQueueFamily,
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    _queue_family: GfxQueueFamily,
    gfx_device: Rc<GfxDevice>,

    _debug_name: String,
    valid: bool,
}
// init & destory
impl GfxCommandPool {
    #[inline]
    pub fn new(
        gfx_device: Rc<GfxDevice>,
        queue_family: GfxQueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let pool = unsafe {
            gfx_device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .queue_family_index(queue_family.queue_family_index)
                        .flags(flags),
                    None,
                )
                .vk_context("vkCreateCommandPool")?
        };

        let command_pool = Self {
            handle: pool,
            _queue_family: queue_family,
            gfx_device,
            _debug_name: debug_name.to_string(),
            valid: true,
        };
        command_pool.gfx_device.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    /// 重复调用是安全的
    pub fn destroy(&mut self) {
        if !self.valid {
            return;
        }
        unsafe {
            self.gfx_device.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl GfxCommandPool {
    /// getter
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn gfx_device(&self) -> &Rc<GfxDevice> {
        &self.gfx_device
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "CommandPool must be destroyed manually.");
        log::info!("Dropping CommandPool: {}", self._debug_name);
    }
}
