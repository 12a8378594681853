use std::rc::Rc;

use ash::vk;
use vk_mem::Alloc;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice, mem_allocator::GfxMemAllocator},
};

/// buffer 所在的内存位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// host visible，可以 map 之后由 CPU 读写
    Host,
    /// device local，只能通过 transfer 命令访问
    Device,
}

/// storage buffer 封装，内存由 vma 分配
///
/// 所有 buffer 都带有 STORAGE | TRANSFER_SRC | TRANSFER_DST 的 usage，
/// 既可以作为 copy 的两端，也可以绑定到 compute shader
///
/// # Destroy
/// 需要手动调用 `destroy`
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    location: MemoryLocation,

    allocator: Rc<GfxMemAllocator>,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// 创建与销毁
impl GfxBuffer {
    pub fn new(
        gfx_device: &GfxDevice,
        allocator: Rc<GfxMemAllocator>,
        size: vk::DeviceSize,
        location: MemoryLocation,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(Self::usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = Self::allocation_ci(location);

        let (handle, allocation) =
            unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci).vk_context("vmaCreateBuffer")? };

        let buffer = Self {
            handle,
            allocation,
            size,
            location,
            allocator,
            debug_name: debug_name.as_ref().to_string(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        gfx_device.set_debug_name(&buffer, debug_name);
        Ok(buffer)
    }

    pub fn destroy(mut self) {
        log::debug!("destroying buffer: {}", self.debug_name);
        unsafe {
            self.allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }

    #[inline]
    fn usage() -> vk::BufferUsageFlags {
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
    }

    fn allocation_ci(location: MemoryLocation) -> vk_mem::AllocationCreateInfo {
        match location {
            MemoryLocation::Host => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
                ..Default::default()
            },
            MemoryLocation::Device => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
        }
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

// tools
impl GfxBuffer {
    /// 通过 mmap 将 `data` 写到 buffer 的起始位置，写完之后 flush
    ///
    /// 调用者需要保证 `data.len() <= self.size()`，并且 buffer 位于 host 内存中
    pub fn write_by_mmap(&mut self, data: &[u8]) -> GfxResult<()> {
        debug_assert_eq!(self.location, MemoryLocation::Host);
        debug_assert!(data.len() as vk::DeviceSize <= self.size);
        unsafe {
            let ptr = self.allocator.map_memory(&mut self.allocation).vk_context("vmaMapMemory")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            let flushed =
                self.allocator.flush_allocation(&self.allocation, 0, data.len() as vk::DeviceSize);
            self.allocator.unmap_memory(&mut self.allocation);
            flushed.vk_context("vmaFlushAllocation")
        }
    }

    /// 先 invalidate，再通过 mmap 把 buffer 起始位置的数据读到 `data` 中
    pub fn read_by_mmap(&mut self, data: &mut [u8]) -> GfxResult<()> {
        debug_assert_eq!(self.location, MemoryLocation::Host);
        debug_assert!(data.len() as vk::DeviceSize <= self.size);
        unsafe {
            let ptr = self.allocator.map_memory(&mut self.allocation).vk_context("vmaMapMemory")?;
            let invalidated =
                self.allocator.invalidate_allocation(&self.allocation, 0, data.len() as vk::DeviceSize);
            if invalidated.is_ok() {
                std::ptr::copy_nonoverlapping(ptr as *const u8, data.as_mut_ptr(), data.len());
            }
            self.allocator.unmap_memory(&mut self.allocation);
            invalidated.vk_context("vmaInvalidateAllocation")
        }
    }
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxBuffer {} must be destroyed manually before drop.", self.debug_name);
    }
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
