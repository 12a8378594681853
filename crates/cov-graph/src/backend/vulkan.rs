use std::time::Duration;

use ash::vk;
use cov_gfx::{
    basic::color::LabelColor,
    commands::{
        barrier::GfxBufferBarrier, command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence,
        submit_info::GfxSubmitInfo,
    },
    gfx_core::GfxCore,
    init_info::GfxInitInfo,
    pipelines::compute_pipeline::{GfxComputePipeline, GfxComputePipelineCreateInfo},
    resources::{
        buffer::{GfxBuffer, MemoryLocation},
        handles::{ComputePipelineKey, GfxBufferKey},
    },
};
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    backend::{BackendLimits, ComputeBackend, ComputePipelineDesc},
    command::{PassKind, RecordedCommand},
    error::{GraphError, GraphResult},
};

/// 基于 cov-gfx 的 backend
///
/// 所有 buffer 和 pipeline 都保存在 SlotMap 中，外部只持有 key。
/// 同一时间最多只有一个批次在 GPU 上执行。
pub struct VulkanBackend {
    buffers: SlotMap<GfxBufferKey, GfxBuffer>,
    pipelines: SlotMap<ComputePipelineKey, GfxComputePipeline>,

    command_pool: Option<GfxCommandPool>,
    command_buffer: Option<GfxCommandBuffer>,
    /// 等待超时的批次，下一次提交之前需要先等待它结束
    pending_fence: Option<GfxFence>,

    limits: BackendLimits,

    /// 需要最后销毁
    core: Option<GfxCore>,
}

// 创建与销毁
impl VulkanBackend {
    pub fn new(init_info: &GfxInitInfo) -> GraphResult<Self> {
        let core = scopeguard::guard(GfxCore::new(init_info)?, GfxCore::destroy);

        let limits = BackendLimits {
            max_compute_work_group_count: core.physical_device().max_compute_work_group_count(),
        };
        let command_pool = GfxCommandPool::new(
            core.gfx_device().clone(),
            core.compute_queue().queue_family().clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            "cov-compute-pool",
        )?;

        log::info!(
            "vulkan backend on {}, max workgroup count {}",
            core.physical_device().name(),
            limits.max_compute_work_group_count
        );

        Ok(Self {
            buffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            command_pool: Some(command_pool),
            command_buffer: None,
            pending_fence: None,
            limits,
            core: Some(scopeguard::ScopeGuard::into_inner(core)),
        })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// getters
impl VulkanBackend {
    #[inline]
    pub fn core(&self) -> Option<&GfxCore> {
        self.core.as_ref()
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }
}

// tools
impl VulkanBackend {
    #[inline]
    fn live_core(&self) -> GraphResult<&GfxCore> {
        self.core.as_ref().ok_or(GraphError::Destroyed)
    }

    /// 等待上一个超时的批次
    fn wait_pending(&mut self, timeout: Duration) -> GraphResult<()> {
        let Some(fence) = self.pending_fence.take() else {
            return Ok(());
        };
        match fence.wait(timeout) {
            Ok(()) => {
                fence.destroy();
                Ok(())
            }
            Err(e) => {
                let err = GraphError::lift(e, timeout);
                if matches!(err, GraphError::Timeout { .. }) {
                    self.pending_fence = Some(fence);
                } else {
                    fence.destroy();
                }
                Err(err)
            }
        }
    }
}

fn buffer_handle(buffers: &SlotMap<GfxBufferKey, GfxBuffer>, key: GfxBufferKey) -> GraphResult<vk::Buffer> {
    buffers.get(key).map(|b| b.handle()).ok_or(GraphError::StaleHandle("buffer"))
}

impl ComputeBackend for VulkanBackend {
    type Buffer = GfxBufferKey;
    type Pipeline = ComputePipelineKey;

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&mut self, size: u64, location: MemoryLocation, name: &str) -> GraphResult<Self::Buffer> {
        let core = self.live_core()?;
        let buffer = GfxBuffer::new(core.gfx_device(), core.allocator().clone(), size, location, name)?;
        Ok(self.buffers.insert(buffer))
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        match self.buffers.remove(buffer) {
            Some(buffer) => buffer.destroy(),
            None => log::warn!("destroy a stale buffer key {:?}", buffer),
        }
    }

    fn write_host(&mut self, buffer: Self::Buffer, data: &[u8]) -> GraphResult<()> {
        let buffer = self.buffers.get_mut(buffer).ok_or(GraphError::StaleHandle("buffer"))?;
        debug_assert_eq!(buffer.location(), MemoryLocation::Host);
        buffer.write_by_mmap(data)?;
        Ok(())
    }

    fn read_host(&mut self, buffer: Self::Buffer, data: &mut [u8]) -> GraphResult<()> {
        let buffer = self.buffers.get_mut(buffer).ok_or(GraphError::StaleHandle("buffer"))?;
        debug_assert_eq!(buffer.location(), MemoryLocation::Host);
        buffer.read_by_mmap(data)?;
        Ok(())
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<Self::Buffer>) -> GraphResult<Self::Pipeline> {
        let storage_buffers =
            desc.bindings.iter().map(|key| buffer_handle(&self.buffers, *key)).collect::<GraphResult<Vec<_>>>()?;
        let spec_map_entries = desc.spec_constants.map_entries();

        let ci = GfxComputePipelineCreateInfo {
            shader_code: desc.shader,
            entry_point: desc.entry_point,
            spec_map_entries: &spec_map_entries,
            spec_data: desc.spec_constants.data(),
            storage_buffers: &storage_buffers,
            debug_name: desc.label,
        };
        let pipeline = GfxComputePipeline::new(self.live_core()?.gfx_device().clone(), &ci)?;
        Ok(self.pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline) {
        match self.pipelines.remove(pipeline) {
            Some(pipeline) => pipeline.destroy(),
            None => log::warn!("destroy a stale pipeline key {:?}", pipeline),
        }
    }

    fn submit(
        &mut self,
        commands: &[RecordedCommand<Self::Buffer, Self::Pipeline>],
        timeout: Duration,
    ) -> GraphResult<()> {
        self.wait_pending(timeout)?;

        let core = self.core.as_ref().ok_or(GraphError::Destroyed)?;
        let command_pool = self.command_pool.as_ref().ok_or(GraphError::Destroyed)?;
        if self.command_buffer.is_none() {
            self.command_buffer = Some(GfxCommandBuffer::new(command_pool, "cov-batch")?);
        }
        let cmd = self.command_buffer.as_ref().ok_or(GraphError::Destroyed)?;

        cmd.reset()?;
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "cov-batch")?;

        let mut dispatched = Vec::new();
        for command in commands {
            match command {
                RecordedCommand::BeginPass { name, kind, .. } => {
                    let color = match kind {
                        PassKind::Compute => LabelColor::COLOR_PASS,
                        PassKind::Transfer => LabelColor::COLOR_TRANSFER,
                    };
                    cmd.begin_label(name, color);
                }
                RecordedCommand::EndPass => cmd.end_label(),
                RecordedCommand::PipelineBarrier { barriers, .. } => {
                    let buffer_barriers = barriers
                        .iter()
                        .map(|b| {
                            Ok(GfxBufferBarrier::new().whole_buffer(buffer_handle(&self.buffers, b.buffer)?).mask(b.mask))
                        })
                        .collect::<GraphResult<Vec<_>>>()?;
                    cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), &buffer_barriers);
                }
                RecordedCommand::CopyBuffer { src, dst, size } => {
                    let region = vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: *size,
                    };
                    cmd.cmd_copy_buffer(
                        buffer_handle(&self.buffers, *src)?,
                        buffer_handle(&self.buffers, *dst)?,
                        std::slice::from_ref(&region),
                    );
                }
                RecordedCommand::Dispatch {
                    pipeline, group_count, ..
                } => {
                    let pipeline_key = *pipeline;
                    let pipeline = self.pipelines.get(pipeline_key).ok_or(GraphError::StaleHandle("pipeline"))?;
                    cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.handle());
                    if !pipeline.descriptor_sets().is_empty() {
                        cmd.bind_descriptor_sets(
                            vk::PipelineBindPoint::COMPUTE,
                            pipeline.layout(),
                            0,
                            pipeline.descriptor_sets(),
                            &[],
                        );
                    }
                    cmd.cmd_dispatch(*group_count);
                    dispatched.push(pipeline_key);
                }
            }
        }
        cmd.end()?;

        // 录制结束之后 shader module 和 layout 就不再需要了
        for key in dispatched.into_iter().unique() {
            if let Some(pipeline) = self.pipelines.get_mut(key) {
                pipeline.release_build_objects();
            }
        }

        let fence = GfxFence::new(core.gfx_device().clone(), false, "cov-batch")?;
        let submit_info = GfxSubmitInfo::new(&[cmd]);
        if let Err(e) = core.compute_queue().submit(std::slice::from_ref(&submit_info), Some(&fence)) {
            fence.destroy();
            return Err(GraphError::lift(e, timeout));
        }

        match fence.wait(timeout) {
            Ok(()) => {
                fence.destroy();
                Ok(())
            }
            Err(e) => {
                let err = GraphError::lift(e, timeout);
                if matches!(err, GraphError::Timeout { .. }) {
                    log::warn!("batch not finished after {:?}, keep waiting on next submit", timeout);
                    self.pending_fence = Some(fence);
                } else {
                    fence.destroy();
                }
                Err(err)
            }
        }
    }

    fn destroy_command_pool(&mut self) {
        if let Some(core) = self.core.as_ref() {
            if let Err(e) = core.gfx_device().wait_idle() {
                log::error!("wait idle before destroying command pool: {}", e);
            }
        }
        if let Some(fence) = self.pending_fence.take() {
            fence.destroy();
        }
        self.command_buffer = None;
        if let Some(mut command_pool) = self.command_pool.take() {
            command_pool.destroy();
        }
    }

    fn shutdown(&mut self) {
        if self.core.is_none() {
            return;
        }
        self.destroy_command_pool();

        if !self.buffers.is_empty() || !self.pipelines.is_empty() {
            log::warn!(
                "shutdown with {} buffers and {} pipelines still alive",
                self.buffers.len(),
                self.pipelines.len()
            );
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        for (_, pipeline) in self.pipelines.drain() {
            pipeline.destroy();
        }

        if let Some(core) = self.core.take() {
            core.destroy();
        }
        log::info!("vulkan backend shut down");
    }
}
