use ash::vk;
#[cfg(debug_assertions)]
use std::cell::Cell;
use std::{ffi::CString, ops::Deref};

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API，以及可选的 debug utils 函数指针。
/// 这些函数指针在应用生命周期中保持不变，可以安全共享。
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 调试工具扩展 API，instance 没有开启 VK_EXT_debug_utils 时为 None
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,

    #[cfg(debug_assertions)]
    destroyed: Cell<bool>,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_create_info: &[vk::DeviceQueueCreateInfo],
        debug_utils_enabled: bool,
    ) -> GfxResult<Self> {
        // barrier 和 submit 都使用 synchronization2
        let mut vk13_features = Self::physical_device_vk13_features();

        let device_create_info =
            vk::DeviceCreateInfo::default().queue_create_infos(queue_create_info).push_next(&mut vk13_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None).vk_context("vkCreateDevice")? };

        let debug_utils = debug_utils_enabled.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        Ok(Self {
            device,
            debug_utils,

            #[cfg(debug_assertions)]
            destroyed: Cell::new(false),
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");

        #[cfg(debug_assertions)]
        self.destroyed.set(true);

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 创建过程的辅助函数
impl GfxDevice {
    /// 必要的 vulkan 1.3 features
    fn physical_device_vk13_features() -> vk::PhysicalDeviceVulkan13Features<'static> {
        vk::PhysicalDeviceVulkan13Features::default().synchronization2(true)
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }
}

// tools
impl GfxDevice {
    /// debug utils 不可用时什么都不做
    #[inline]
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: impl AsRef<str>) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name.as_ref()) else {
            log::warn!("skip debug name with interior nul: {:?}", name.as_ref());
            return;
        };
        unsafe {
            if let Err(e) = debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            ) {
                log::warn!("vkSetDebugUtilsObjectNameEXT failed: {:?}", e);
            }
        }
    }

    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        let debug_name = format!("{}::{}", T::debug_type_name(), name.as_ref());
        self.set_object_debug_name(handle.vk_handle(), debug_name);
    }

    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle().vk_context("vkDeviceWaitIdle") }
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.get(), "GfxDevice must be destroyed before being dropped.");
    }
}
impl DebugType for GfxDevice {
    fn debug_type_name() -> &'static str {
        "GfxDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.device.handle()
    }
}
