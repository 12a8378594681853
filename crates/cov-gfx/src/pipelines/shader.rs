use std::rc::Rc;

use ash::vk;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct ShaderModule {
    handle: vk::ShaderModule,
    gfx_device: Rc<GfxDevice>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
impl ShaderModule {
    /// # param
    /// * code - 已经校验过的 SPIR-V words
    pub fn new(gfx_device: Rc<GfxDevice>, code: &[u32], debug_name: &str) -> GfxResult<Self> {
        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(code);

        let handle = unsafe {
            gfx_device.create_shader_module(&shader_module_info, None).vk_context("vkCreateShaderModule")?
        };
        let shader_module = Self {
            handle,
            gfx_device,

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        shader_module.gfx_device.set_debug_name(&shader_module, debug_name);
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(mut self) {
        unsafe {
            self.gfx_device.destroy_shader_module(self.handle, None);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for ShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "ShaderModule must be destroyed manually before drop.");
    }
}
impl DebugType for ShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
