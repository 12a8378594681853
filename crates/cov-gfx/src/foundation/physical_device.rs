use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::command_queue::GfxQueueFamily,
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    init_info::GfxInitInfo,
};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    pub(crate) _mem_props: vk::PhysicalDeviceMemoryProperties,

    /// 第一个支持 compute 的 queue family
    pub(crate) compute_queue_family: GfxQueueFamily,
}

impl GfxPhysicalDevice {
    /// 选择一张可以执行 compute 的显卡
    ///
    /// 显卡需要满足：
    /// - 存在支持 COMPUTE 的 queue family
    /// - 支持的 vulkan 版本不低于 `init_info.vk_version`
    ///
    /// 默认选择第一个满足条件的显卡；`prefer_discrete_gpu` 时优先选择独立显卡
    pub fn pick(instance: &ash::Instance, init_info: &GfxInitInfo) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices().vk_context("vkEnumeratePhysicalDevices")? };

        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| GfxPhysicalDevice::new(*pdevice, instance))
            .filter(|pdevice| pdevice.api_version() >= init_info.vk_version)
            .collect_vec();

        let chosen = if init_info.prefer_discrete_gpu {
            // 优先使用独立显卡
            candidates.into_iter().find_or_first(GfxPhysicalDevice::is_descrete_gpu)
        } else {
            candidates.into_iter().next()
        };

        let chosen = chosen.ok_or(GfxError::NoComputeDevice {
            required_major: vk::api_version_major(init_info.vk_version),
            required_minor: vk::api_version_minor(init_info.vk_version),
        })?;
        log::info!("use gpu: {:?}, compute queue family:\n{:#?}", chosen.name(), chosen.compute_queue_family);
        Ok(chosen)
    }

    /// 没有 compute queue family 的显卡直接跳过
    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", physical_device_name);

            // 找到所有的队列信息并打印出来
            let queue_familiy_props = instance.get_physical_device_queue_family_properties(pdevice);
            log::debug!("physical device: queue family props:\n{:#?}", queue_familiy_props);

            let compute_queue_family = Self::find_queue_family(
                &queue_familiy_props,
                "compute".to_string(),
                vk::QueueFlags::COMPUTE,
                vk::QueueFlags::empty(),
            );
            let Some(compute_queue_family) = compute_queue_family else {
                log::warn!("gpu {:?} has no compute queue family, skipped", physical_device_name);
                return None;
            };

            Some(Self {
                _mem_props: instance.get_physical_device_memory_properties(pdevice),
                vk_handle: pdevice,
                basic_props,
                compute_queue_family,
            })
        }
    }

    /// 找到符合条件的 queue family
    fn find_queue_family(
        queue_familiy_props: &[vk::QueueFamilyProperties],
        name: String,
        include_flags: vk::QueueFlags,
        exclude_flags: vk::QueueFlags,
    ) -> Option<GfxQueueFamily> {
        queue_familiy_props
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_flags.contains(include_flags) && (props.queue_flags & exclude_flags).is_empty()
            })
            .map(|(family_idx, props)| GfxQueueFamily {
                name,
                queue_family_index: family_idx as u32,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            })
    }

    pub fn destroy(self) {
        // 无需销毁
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn api_version(&self) -> u32 {
        self.basic_props.api_version
    }

    #[inline]
    pub fn compute_queue_family(&self) -> &GfxQueueFamily {
        &self.compute_queue_family
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    #[inline]
    pub fn max_compute_work_group_count(&self) -> glam::UVec3 {
        glam::UVec3::from_array(self.basic_props.limits.max_compute_work_group_count)
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.basic_props.device_name.as_ptr()) }.to_string_lossy().into_owned()
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_find_first_compute_family() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let found = GfxPhysicalDevice::find_queue_family(
            &props,
            "compute".to_string(),
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::empty(),
        )
        .unwrap();
        assert_eq!(found.queue_family_index, 1);

        let compute_only = GfxPhysicalDevice::find_queue_family(
            &props,
            "compute-only".to_string(),
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS,
        )
        .unwrap();
        assert_eq!(compute_only.queue_family_index, 2);
    }

    #[test]
    fn test_no_compute_family() {
        let props = [family(vk::QueueFlags::TRANSFER)];
        assert!(
            GfxPhysicalDevice::find_queue_family(&props, "compute".to_string(), vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())
                .is_none()
        );
    }
}
