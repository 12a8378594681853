use std::rc::Rc;

use ash::vk;

use crate::{
    commands::command_queue::GfxQueue,
    error::GfxResult,
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, mem_allocator::GfxMemAllocator,
        physical_device::GfxPhysicalDevice,
    },
    init_info::GfxInitInfo,
};

/// 一个可以执行 compute 的 vulkan 上下文
///
/// 不是全局单例，由上层显式持有，可以同时存在多个
pub struct GfxCore {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) vk_entry: ash::Entry,

    pub(crate) instance: GfxInstance,
    pub(crate) physical_device: GfxPhysicalDevice,

    /// 多个组件需要共享相同的设备函数指针（GfxQueue、GfxCommandBuffer 等）
    pub(crate) gfx_device: Rc<GfxDevice>,

    /// 需要先于 device 销毁
    pub(crate) allocator: Rc<GfxMemAllocator>,

    /// 只有开启 validation 时才存在
    pub(crate) debug_msger: Option<GfxDebugMsger>,

    pub(crate) compute_queue: GfxQueue,
}

// 创建与销毁
impl GfxCore {
    pub fn new(init_info: &GfxInitInfo) -> GfxResult<Self> {
        let vk_entry = unsafe { ash::Entry::load()? };

        // 后续步骤失败时，需要销毁 instance
        let instance = scopeguard::guard(GfxInstance::new(&vk_entry, init_info)?, GfxInstance::destroy);
        // 声明在 instance 之后，失败时先于 instance drop，由 GfxDebugMsger 的 Drop 销毁
        let debug_msger = if init_info.enable_validation {
            Some(GfxDebugMsger::new(&vk_entry, instance.ash_instance())?)
        } else {
            None
        };

        let physical_device = GfxPhysicalDevice::pick(instance.ash_instance(), init_info)?;
        let compute_family = physical_device.compute_queue_family.clone();

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(compute_family.queue_family_index)
            .queue_priorities(&queue_priorities)];

        let gfx_device = GfxDevice::new(
            instance.ash_instance(),
            physical_device.vk_handle,
            &queue_create_infos,
            instance.debug_utils_enabled(),
        )?;
        let gfx_device = scopeguard::guard(Rc::new(gfx_device), |device| device.destroy());

        let allocator = GfxMemAllocator::new(
            instance.ash_instance(),
            physical_device.vk_handle,
            &gfx_device,
            init_info.vk_version,
        )?;

        let gfx_device = scopeguard::ScopeGuard::into_inner(gfx_device);
        let instance = scopeguard::ScopeGuard::into_inner(instance);

        let compute_queue = GfxQueue {
            vk_queue: unsafe { gfx_device.get_device_queue(compute_family.queue_family_index, 0) },
            queue_family: compute_family,
            gfx_device: gfx_device.clone(),
        };

        // 在 device 以及 debug_utils 之前创建的 vk::Handle
        {
            gfx_device.set_object_debug_name(instance.vk_instance(), "GfxInstance");
            gfx_device.set_object_debug_name(physical_device.vk_handle, "GfxPhysicalDevice");

            gfx_device.set_object_debug_name(gfx_device.vk_handle(), "GfxDevice");
            gfx_device.set_object_debug_name(compute_queue.vk_queue, "GfxQueue-compute");
        }

        Ok(Self {
            vk_entry,
            instance,
            physical_device,
            gfx_device,
            allocator: Rc::new(allocator),
            debug_msger,
            compute_queue,
        })
    }

    /// 调用前需要保证所有 buffer，pipeline，command pool 都已经销毁
    pub fn destroy(self) {
        let Self {
            vk_entry,
            instance,
            physical_device,
            gfx_device,
            allocator,
            debug_msger,
            compute_queue,
        } = self;

        if let Err(e) = gfx_device.wait_idle() {
            log::error!("failed to wait device idle before destroy: {}", e);
        }
        drop(compute_queue);

        match Rc::try_unwrap(allocator) {
            Ok(allocator) => allocator.destroy(),
            Err(_) => log::error!("GfxMemAllocator is still referenced when GfxCore is destroyed"),
        }
        gfx_device.destroy();
        if let Some(debug_msger) = debug_msger {
            debug_msger.destroy();
        }
        physical_device.destroy();
        instance.destroy();

        drop(vk_entry);
    }
}

// getters
impl GfxCore {
    #[inline]
    pub fn gfx_device(&self) -> &Rc<GfxDevice> {
        &self.gfx_device
    }

    #[inline]
    pub fn allocator(&self) -> &Rc<GfxMemAllocator> {
        &self.allocator
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn compute_queue(&self) -> &GfxQueue {
        &self.compute_queue
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }
}
