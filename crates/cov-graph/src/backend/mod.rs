//! instance 和具体 GPU API 之间的接口
//!
//! instance 只通过 [`ComputeBackend`] 访问设备：
//! - [`vulkan::VulkanBackend`]：基于 cov-gfx 的真实实现
//! - [`host::HostBackend`]：纯 CPU 的实现，用于测试和没有 GPU 的环境

pub mod host;
pub mod vulkan;

use std::{ffi::CStr, fmt::Debug, time::Duration};

pub use cov_gfx::resources::buffer::MemoryLocation;

use crate::{command::RecordedCommand, compute_pass::SpecConstants, error::GraphResult};

/// 设备限制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendLimits {
    pub max_compute_work_group_count: glam::UVec3,
}

impl Default for BackendLimits {
    /// Vulkan 要求的最小值
    fn default() -> Self {
        Self {
            max_compute_work_group_count: glam::UVec3::splat(65535),
        }
    }
}

/// 创建 compute pipeline 所需的信息
///
/// `bindings` 中第 i 个 buffer 绑定在 set i 的 binding 0 上，顺序是先 inputs 后 outputs
pub struct ComputePipelineDesc<'a, B> {
    pub label: &'a str,
    pub shader: &'a [u32],
    pub entry_point: &'a CStr,
    pub spec_constants: &'a SpecConstants,
    pub bindings: &'a [B],
}

pub trait ComputeBackend {
    type Buffer: Copy + Eq + Debug;
    type Pipeline: Copy + Eq + Debug;

    fn limits(&self) -> BackendLimits;

    fn create_buffer(&mut self, size: u64, location: MemoryLocation, name: &str) -> GraphResult<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// 写到 host buffer 的起始位置，`data` 不会超过 buffer 大小
    fn write_host(&mut self, buffer: Self::Buffer, data: &[u8]) -> GraphResult<()>;
    /// 从 host buffer 的起始位置读取，`data` 不会超过 buffer 大小
    fn read_host(&mut self, buffer: Self::Buffer, data: &mut [u8]) -> GraphResult<()>;

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc<Self::Buffer>) -> GraphResult<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    /// 录制并提交一个批次，阻塞直到完成或者超时
    fn submit(
        &mut self,
        commands: &[RecordedCommand<Self::Buffer, Self::Pipeline>],
        timeout: Duration,
    ) -> GraphResult<()>;

    /// 等待所有已提交的工作结束，然后释放 command pool；重复调用是安全的
    fn destroy_command_pool(&mut self);

    /// 释放设备；之后不能再调用任何方法
    fn shutdown(&mut self);
}
