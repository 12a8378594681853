//! Barrier 描述与分组
//!
//! 每个 barrier 只描述 "哪个 mapping 的哪一端，从什么状态到什么状态"，
//! 真正的 buffer handle 在录制命令时才解析。

use ash::vk;
use cov_gfx::commands::barrier::GfxBarrierMask;
use itertools::Itertools;

use crate::{handles::MappingId, state::BufferState};

/// mapping 中的哪一个 buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreSide {
    /// host visible 的 buffer
    Host,
    /// device local 的 buffer
    Device,
}

/// barrier 所处理的 hazard 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hazard {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
}

/// barrier 的来源：等待的是 transfer 命令还是 compute shader
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BarrierOrigin {
    Transfer,
    Compute,
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferBarrierDesc {
    pub mapping: MappingId,
    pub side: StoreSide,
    /// 源状态
    pub src_state: BufferState,
    /// 目标状态
    pub dst_state: BufferState,
}

impl BufferBarrierDesc {
    /// 创建新的缓冲区 barrier 描述
    ///
    /// `src_state` 的 access 只包含需要 available 的写操作
    pub fn new(mapping: MappingId, side: StoreSide, src_state: BufferState, dst_state: BufferState) -> Self {
        Self {
            mapping,
            side,
            src_state,
            dst_state,
        }
    }

    pub fn hazard(&self) -> Hazard {
        if self.src_state.access == vk::AccessFlags2::NONE {
            Hazard::WriteAfterRead
        } else if self.dst_state.is_read() {
            Hazard::ReadAfterWrite
        } else {
            Hazard::WriteAfterWrite
        }
    }

    /// 源 stage 包含 compute shader 时归为 compute 来源
    pub fn origin(&self) -> BarrierOrigin {
        if self.src_state.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER) {
            BarrierOrigin::Compute
        } else {
            BarrierOrigin::Transfer
        }
    }

    /// 转换为 GfxBarrierMask
    pub fn to_mask(&self) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage: self.src_state.stage,
            dst_stage: self.dst_state.stage,
            src_access: self.src_state.src_access(),
            dst_access: self.dst_state.access,
        }
    }
}

/// Pass 执行前需要的 Barrier 集合
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassBarriers {
    /// 缓冲区 barriers，按照产生的顺序
    pub buffer_barriers: Vec<BufferBarrierDesc>,
}

impl PassBarriers {
    /// 创建空的 barrier 集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加缓冲区 barrier
    pub fn add_buffer_barrier(&mut self, barrier: BufferBarrierDesc) {
        self.buffer_barriers.push(barrier);
    }

    pub fn extend(&mut self, barriers: impl IntoIterator<Item = BufferBarrierDesc>) {
        self.buffer_barriers.extend(barriers);
    }

    /// 检查是否有 barrier
    pub fn has_barriers(&self) -> bool {
        !self.buffer_barriers.is_empty()
    }

    /// 获取缓冲区 barrier 数量
    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }

    /// 涉及某个 mapping 的所有 barrier
    pub fn for_mapping(&self, mapping: MappingId) -> impl Iterator<Item = &BufferBarrierDesc> {
        self.buffer_barriers.iter().filter(move |b| b.mapping == mapping)
    }
}

/// 同一个 pipeline barrier 命令中的一组 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierGroup<'a> {
    pub origin: BarrierOrigin,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub barriers: Vec<&'a BufferBarrierDesc>,
}

/// 按照来源分组，transfer 来源在前，compute 来源在后
///
/// 组内保持 barrier 原本的顺序；没有 barrier 时返回空
pub fn group_by_origin(barriers: &[BufferBarrierDesc]) -> Vec<BarrierGroup<'_>> {
    barriers
        .iter()
        .into_group_map_by(|b| b.origin())
        .into_iter()
        .sorted_by_key(|(origin, _)| *origin)
        .map(|(origin, barriers)| BarrierGroup {
            origin,
            src_stage: barriers.iter().fold(vk::PipelineStageFlags2::empty(), |acc, b| acc | b.src_state.stage),
            dst_stage: barriers.iter().fold(vk::PipelineStageFlags2::empty(), |acc, b| acc | b.dst_state.stage),
            barriers,
        })
        .collect_vec()
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn ids(n: usize) -> Vec<MappingId> {
        let mut map = SlotMap::<MappingId, ()>::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_hazard_kind() {
        let m = ids(1)[0];
        let raw = BufferBarrierDesc::new(
            m,
            StoreSide::Device,
            BufferState::STORAGE_WRITE_COMPUTE,
            BufferState::STORAGE_READ_COMPUTE,
        );
        assert_eq!(raw.hazard(), Hazard::ReadAfterWrite);
        assert_eq!(raw.origin(), BarrierOrigin::Compute);

        let waw =
            BufferBarrierDesc::new(m, StoreSide::Device, BufferState::TRANSFER_DST, BufferState::STORAGE_WRITE_COMPUTE);
        assert_eq!(waw.hazard(), Hazard::WriteAfterWrite);
        assert_eq!(waw.origin(), BarrierOrigin::Transfer);

        let war = BufferBarrierDesc::new(
            m,
            StoreSide::Device,
            BufferState::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::NONE),
            BufferState::TRANSFER_DST,
        );
        assert_eq!(war.hazard(), Hazard::WriteAfterRead);
    }

    #[test]
    fn test_to_mask() {
        let m = ids(1)[0];
        let mask = BufferBarrierDesc::new(
            m,
            StoreSide::Device,
            BufferState::STORAGE_READ_WRITE_COMPUTE,
            BufferState::STORAGE_READ_COMPUTE,
        )
        .to_mask();
        assert_eq!(mask.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(mask.dst_access, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert_eq!(mask.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
    }

    #[test]
    fn test_group_transfer_first() {
        let m = ids(3);
        let barriers = vec![
            BufferBarrierDesc::new(
                m[0],
                StoreSide::Device,
                BufferState::STORAGE_WRITE_COMPUTE,
                BufferState::STORAGE_READ_COMPUTE,
            ),
            BufferBarrierDesc::new(m[1], StoreSide::Device, BufferState::TRANSFER_DST, BufferState::STORAGE_READ_COMPUTE),
            BufferBarrierDesc::new(
                m[2],
                StoreSide::Device,
                BufferState::STORAGE_WRITE_COMPUTE,
                BufferState::STORAGE_READ_COMPUTE,
            ),
        ];

        let groups = group_by_origin(&barriers);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].origin, BarrierOrigin::Transfer);
        assert_eq!(groups[0].src_stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(groups[0].barriers.iter().map(|b| b.mapping).collect_vec(), vec![m[1]]);

        assert_eq!(groups[1].origin, BarrierOrigin::Compute);
        assert_eq!(groups[1].dst_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(groups[1].barriers.iter().map(|b| b.mapping).collect_vec(), vec![m[0], m[2]]);
    }

    #[test]
    fn test_no_barriers_no_groups() {
        assert!(group_by_origin(&[]).is_empty());
        assert!(!PassBarriers::new().has_barriers());
    }
}
