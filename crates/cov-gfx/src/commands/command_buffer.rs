use std::{ffi::CString, rc::Rc};

use ash::vk;

use crate::{
    basic::color::LabelColor,
    commands::{barrier::GfxBufferBarrier, command_pool::GfxCommandPool},
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// 命令缓冲封装
///
/// 封装 Vulkan CommandBuffer，提供 compute 所需的命令录制接口：
/// 数据传输、屏障、管线绑定、dispatch 以及调试标签。
///
/// 由 command pool 统一释放，不需要单独 destroy
///
/// # 使用示例
/// ```ignore
/// let cmd = GfxCommandBuffer::new(&pool, "cov-batch")?;
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "cov-batch")?;
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
/// cmd.cmd_dispatch(glam::uvec3(4, 1, 1));
/// cmd.end()?;
/// ```
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    _command_pool_handle: vk::CommandPool,
    gfx_device: Rc<GfxDevice>,
}
// new & init
impl GfxCommandBuffer {
    pub fn new(command_pool: &GfxCommandPool, debug_name: &str) -> GfxResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let gfx_device = command_pool.gfx_device().clone();
        let command_buffers =
            unsafe { gfx_device.allocate_command_buffers(&info).vk_context("vkAllocateCommandBuffers")? };
        let cmd_buffer = GfxCommandBuffer {
            vk_handle: command_buffers[0],
            _command_pool_handle: command_pool.handle(),
            gfx_device,
        };
        cmd_buffer.gfx_device.set_debug_name(&cmd_buffer, debug_name);
        Ok(cmd_buffer)
    }
}
// Basic 命令
impl GfxCommandBuffer {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) -> GfxResult<()> {
        unsafe {
            self.gfx_device
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))
                .vk_context("vkBeginCommandBuffer")?;
        }
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制 command
    ///
    /// 结束 debug label
    #[inline]
    pub fn end(&self) -> GfxResult<()> {
        self.end_label();
        unsafe { self.gfx_device.end_command_buffer(self.vk_handle).vk_context("vkEndCommandBuffer") }
    }

    /// 需要 command pool 带有 RESET_COMMAND_BUFFER flag
    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        unsafe {
            self.gfx_device
                .reset_command_buffer(self.vk_handle, vk::CommandBufferResetFlags::empty())
                .vk_context("vkResetCommandBuffer")
        }
    }
}
// getters
impl GfxCommandBuffer {
    /// getter
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}
// 数据传输类型
impl GfxCommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.gfx_device.cmd_copy_buffer(self.vk_handle, src, dst, regions);
        }
    }
}
// compute 类型的命令
impl GfxCommandBuffer {
    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.gfx_device.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.gfx_device.cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
            );
        }
    }

    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        unsafe {
            self.gfx_device.cmd_dispatch(self.vk_handle, group_cnt.x, group_cnt.y, group_cnt.z);
        }
    }
}
// 同步命令
impl GfxCommandBuffer {
    /// - command type: synchronization
    /// - supported queue types: transfer, graphics, compute
    #[inline]
    pub fn buffer_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect::<Vec<_>>();
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            self.gfx_device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}
// debug 相关命令
impl GfxCommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = self.gfx_device.debug_utils() else {
            return;
        };
        // 必须总是开始一个 label，和 end_label 成对
        let name = label_cstring(label_name);
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        if let Some(debug_utils) = self.gfx_device.debug_utils() {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.vk_handle);
            }
        }
    }
}

/// label 名中的 nul 字节会被替换为空格
pub(crate) fn label_cstring(label_name: &str) -> CString {
    CString::new(label_name.replace('\0', " ")).unwrap_or_default()
}

impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_name_with_nul_is_kept() {
        assert_eq!(label_cstring("upload").as_bytes(), b"upload");
        assert_eq!(label_cstring("a\0b").as_bytes(), b"a b");
        assert!(label_cstring("").as_bytes().is_empty());
    }
}
