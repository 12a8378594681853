use ash::vk;
use cov_gfx::commands::barrier::GfxBarrierMask;

use crate::handles::{MappingId, PassId};

/// pass 的类型，决定 debug label 的颜色
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Transfer,
    Compute,
}

/// 已经解析到具体 buffer 的 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedBarrier<B> {
    pub buffer: B,
    pub mapping: MappingId,
    pub mask: GfxBarrierMask,
}

/// finalize 产生的命令，由 backend 按顺序回放
///
/// 泛型参数是 backend 的 buffer handle 和 pipeline handle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand<B, P> {
    BeginPass {
        pass: PassId,
        name: String,
        kind: PassKind,
    },
    EndPass,
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
        barriers: Vec<ResolvedBarrier<B>>,
    },
    /// 从 offset 0 开始拷贝 `size` 字节
    CopyBuffer {
        src: B,
        dst: B,
        size: vk::DeviceSize,
    },
    Dispatch {
        pass: PassId,
        pipeline: P,
        group_count: glam::UVec3,
    },
}

impl<B, P> RecordedCommand<B, P> {
    #[inline]
    pub fn is_barrier(&self) -> bool {
        matches!(self, RecordedCommand::PipelineBarrier { .. })
    }

    #[inline]
    pub fn is_copy(&self) -> bool {
        matches!(self, RecordedCommand::CopyBuffer { .. })
    }

    #[inline]
    pub fn is_dispatch(&self) -> bool {
        matches!(self, RecordedCommand::Dispatch { .. })
    }
}
