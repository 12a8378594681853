//! 纯 CPU 的 backend
//!
//! device buffer 也是普通的字节数组，copy 在 `submit` 时按顺序执行；
//! barrier 只统计数量，dispatch 只记录下来，不会执行任何 shader 代码。

use std::time::Duration;

use slotmap::SlotMap;

use crate::{
    backend::{BackendLimits, ComputeBackend, ComputePipelineDesc, MemoryLocation},
    command::RecordedCommand,
    error::{GraphError, GraphResult},
};

slotmap::new_key_type! {
    pub struct HostBufferKey;
    pub struct HostPipelineKey;
}

struct HostBuffer {
    data: Vec<u8>,
    location: MemoryLocation,
    name: String,
}

struct HostPipeline {
    label: String,
    bindings: Vec<HostBufferKey>,
}

/// 可以注入的提交失败
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectedFailure {
    Timeout,
    DeviceLost,
}

/// 一次成功提交的统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub commands: usize,
    pub copies: usize,
    pub pipeline_barriers: usize,
    pub buffer_barriers: usize,
    pub dispatches: usize,
    /// 按顺序执行的 dispatch 对应的 pipeline label
    pub dispatch_labels: Vec<String>,
}

#[derive(Default)]
pub struct HostBackend {
    buffers: SlotMap<HostBufferKey, HostBuffer>,
    pipelines: SlotMap<HostPipelineKey, HostPipeline>,
    limits: BackendLimits,

    submissions: Vec<SubmissionRecord>,
    invalid_destroys: usize,

    failing_pipelines: Vec<String>,
    next_submit_failure: Option<InjectedFailure>,

    command_pool_destroyed: bool,
    shut_down: bool,
}

// 创建与销毁
impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: BackendLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }
}

// getters
impl HostBackend {
    #[inline]
    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// 对不存在的 handle 调用 destroy 的次数，正常情况下应当为 0
    #[inline]
    pub fn invalid_destroy_count(&self) -> usize {
        self.invalid_destroys
    }

    #[inline]
    pub fn is_command_pool_destroyed(&self) -> bool {
        self.command_pool_destroyed
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// 直接查看任意 buffer 的内容
    pub fn buffer_data(&self, buffer: HostBufferKey) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.data.as_slice())
    }

    pub fn pipeline_bindings(&self, pipeline: HostPipelineKey) -> Option<&[HostBufferKey]> {
        self.pipelines.get(pipeline).map(|p| p.bindings.as_slice())
    }
}

// 测试用的故障注入
impl HostBackend {
    /// 之后创建 label 为 `label` 的 pipeline 都会失败
    pub fn fail_pipeline(&mut self, label: impl Into<String>) {
        self.failing_pipelines.push(label.into());
    }

    /// 下一次 submit 失败，之后恢复正常
    pub fn fail_next_submit(&mut self, failure: InjectedFailure) {
        self.next_submit_failure = Some(failure);
    }
}

// tools
impl HostBackend {
    #[inline]
    fn ensure_alive(&self) -> GraphResult<()> {
        if self.shut_down { Err(GraphError::Destroyed) } else { Ok(()) }
    }

    fn host_buffer_mut(&mut self, buffer: HostBufferKey) -> GraphResult<&mut HostBuffer> {
        let buffer = self.buffers.get_mut(buffer).ok_or(GraphError::StaleHandle("buffer"))?;
        debug_assert_eq!(buffer.location, MemoryLocation::Host, "{} is not a host buffer", buffer.name);
        Ok(buffer)
    }

    fn copy(&mut self, src: HostBufferKey, dst: HostBufferKey, size: u64) -> GraphResult<()> {
        let size = size as usize;
        let bytes = {
            let src = self.buffers.get(src).ok_or(GraphError::StaleHandle("buffer"))?;
            src.data.get(..size).ok_or(GraphError::StaleHandle("copy region"))?.to_vec()
        };
        let dst = self.buffers.get_mut(dst).ok_or(GraphError::StaleHandle("buffer"))?;
        dst.data.get_mut(..size).ok_or(GraphError::StaleHandle("copy region"))?.copy_from_slice(&bytes);
        Ok(())
    }
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBufferKey;
    type Pipeline = HostPipelineKey;

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&mut self, size: u64, location: MemoryLocation, name: &str) -> GraphResult<Self::Buffer> {
        self.ensure_alive()?;
        let len = usize::try_from(size).map_err(|_| GraphError::OutOfMemory { size })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| GraphError::OutOfMemory { size })?;
        data.resize(len, 0);
        Ok(self.buffers.insert(HostBuffer {
            data,
            location,
            name: name.to_string(),
        }))
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        if self.buffers.remove(buffer).is_none() {
            log::warn!("destroy a stale buffer key {:?}", buffer);
            self.invalid_destroys += 1;
        }
    }

    fn write_host(&mut self, buffer: Self::Buffer, data: &[u8]) -> GraphResult<()> {
        let buffer = self.host_buffer_mut(buffer)?;
        let dst = buffer.data.get_mut(..data.len()).ok_or(GraphError::StaleHandle("host write region"))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_host(&mut self, buffer: Self::Buffer, data: &mut [u8]) -> GraphResult<()> {
        let buffer = self.host_buffer_mut(buffer)?;
        let src = buffer.data.get(..data.len()).ok_or(GraphError::StaleHandle("host read region"))?;
        data.copy_from_slice(src);
        Ok(())
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<Self::Buffer>) -> GraphResult<Self::Pipeline> {
        self.ensure_alive()?;
        if self.failing_pipelines.iter().any(|label| label == desc.label) {
            return Err(GraphError::InvalidSpirv(format!("pipeline \"{}\" rejected by the host backend", desc.label)));
        }
        for buffer in desc.bindings {
            if !self.buffers.contains_key(*buffer) {
                return Err(GraphError::StaleHandle("buffer"));
            }
        }
        Ok(self.pipelines.insert(HostPipeline {
            label: desc.label.to_string(),
            bindings: desc.bindings.to_vec(),
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline) {
        if self.pipelines.remove(pipeline).is_none() {
            log::warn!("destroy a stale pipeline key {:?}", pipeline);
            self.invalid_destroys += 1;
        }
    }

    fn submit(
        &mut self,
        commands: &[RecordedCommand<Self::Buffer, Self::Pipeline>],
        timeout: Duration,
    ) -> GraphResult<()> {
        self.ensure_alive()?;
        if self.command_pool_destroyed {
            return Err(GraphError::Destroyed);
        }
        match self.next_submit_failure.take() {
            Some(InjectedFailure::Timeout) => return Err(GraphError::Timeout { timeout }),
            Some(InjectedFailure::DeviceLost) => return Err(GraphError::DeviceLost),
            None => {}
        }

        let mut record = SubmissionRecord {
            commands: commands.len(),
            ..SubmissionRecord::default()
        };
        for command in commands {
            match command {
                RecordedCommand::BeginPass { .. } | RecordedCommand::EndPass => {}
                RecordedCommand::PipelineBarrier { barriers, .. } => {
                    for barrier in barriers {
                        if !self.buffers.contains_key(barrier.buffer) {
                            return Err(GraphError::StaleHandle("buffer"));
                        }
                    }
                    record.pipeline_barriers += 1;
                    record.buffer_barriers += barriers.len();
                }
                RecordedCommand::CopyBuffer { src, dst, size } => {
                    self.copy(*src, *dst, *size)?;
                    record.copies += 1;
                }
                RecordedCommand::Dispatch {
                    pipeline, group_count, ..
                } => {
                    let pipeline = self.pipelines.get(*pipeline).ok_or(GraphError::StaleHandle("pipeline"))?;
                    log::trace!("host dispatch \"{}\" {}", pipeline.label, group_count);
                    record.dispatches += 1;
                    record.dispatch_labels.push(pipeline.label.clone());
                }
            }
        }

        log::debug!("host submission #{}: {:?}", self.submissions.len(), record);
        self.submissions.push(record);
        Ok(())
    }

    fn destroy_command_pool(&mut self) {
        self.command_pool_destroyed = true;
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if !self.buffers.is_empty() || !self.pipelines.is_empty() {
            log::warn!(
                "shutdown with {} buffers and {} pipelines still alive",
                self.buffers.len(),
                self.pipelines.len()
            );
        }
        self.buffers.clear();
        self.pipelines.clear();
        self.shut_down = true;
    }
}
