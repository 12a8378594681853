//! 单个批次的命令录制
//!
//! 按照 pass 的声明顺序做 hazard 分析，生成 barrier，更新 mapping 的状态，
//! 并输出与 backend 无关的命令列表。这里不调用任何 GPU API。

use std::fmt::Debug;

use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    barrier::{BufferBarrierDesc, PassBarriers, StoreSide, group_by_origin},
    command::{PassKind, RecordedCommand, ResolvedBarrier},
    compute_pass::ComputePassDecl,
    error::{GraphError, GraphResult},
    handles::{MappingId, PassId},
    mapping::MemMapping,
    state::{AccessStage, AccessTracker, BufferState},
    transfer_pass::{TransferDirection, TransferOp},
};

pub(crate) struct BatchRecorder<'m, B, P> {
    mappings: &'m mut SlotMap<MappingId, MemMapping<B>>,
    commands: Vec<RecordedCommand<B, P>>,
}

impl<'m, B: Copy + Eq + Debug, P: Copy + Debug> BatchRecorder<'m, B, P> {
    pub(crate) fn new(mappings: &'m mut SlotMap<MappingId, MemMapping<B>>) -> Self {
        // 上一个批次的 host 访问在 fence 等待之后都已经完成
        for (_, mapping) in mappings.iter_mut() {
            mapping.host_tracker = AccessTracker::default();
        }
        Self {
            mappings,
            commands: Vec::new(),
        }
    }

    pub(crate) fn record_transfer(
        &mut self,
        pass: PassId,
        name: &str,
        ops: &[TransferOp],
    ) -> GraphResult<PassBarriers> {
        let mut pass_barriers = PassBarriers::new();
        self.commands.push(RecordedCommand::BeginPass {
            pass,
            name: name.to_string(),
            kind: PassKind::Transfer,
        });

        // 每个操作之前单独插入 barrier，同一个 pass 内的操作之间也可能存在 hazard
        for op in ops {
            let (src_side, dst_side, stage) = match op.direction {
                TransferDirection::ToDevice => (StoreSide::Host, StoreSide::Device, AccessStage::TransferWrite),
                TransferDirection::FromDevice => (StoreSide::Device, StoreSide::Host, AccessStage::TransferRead),
            };

            let mut op_barriers = Vec::new();
            op_barriers.extend(self.access(op.mapping, src_side, BufferState::TRANSFER_SRC)?);
            op_barriers.extend(self.access(op.mapping, dst_side, BufferState::TRANSFER_DST)?);
            self.emit_barriers(&op_barriers)?;

            let mapping = self.mapping_mut(op.mapping)?;
            mapping.set_stage(stage);
            let copy = RecordedCommand::CopyBuffer {
                src: mapping.buffer(src_side),
                dst: mapping.buffer(dst_side),
                size: mapping.size(),
            };
            log::debug!("[{}] {:?} \"{}\", {} bytes", name, op.direction, mapping.name(), mapping.size());
            self.commands.push(copy);

            pass_barriers.extend(op_barriers);
        }

        self.commands.push(RecordedCommand::EndPass);
        Ok(pass_barriers)
    }

    pub(crate) fn record_compute(
        &mut self,
        pass: PassId,
        name: &str,
        decl: &ComputePassDecl,
        pipeline: P,
    ) -> GraphResult<PassBarriers> {
        let accesses = decl.accesses();

        let mut barriers = Vec::new();
        for (mapping_id, required) in &accesses {
            let mapping = self.mapping_mut(*mapping_id)?;
            if decl.inputs.contains(mapping_id) && mapping.stage() == AccessStage::Unknown {
                log::warn!("pass \"{}\" reads mapping \"{}\" that no earlier pass has written", name, mapping.name());
            }
            barriers.extend(self.access(*mapping_id, StoreSide::Device, *required)?);
        }
        for (mapping_id, required) in &accesses {
            let stage = if required.is_write() { AccessStage::ComputeWrite } else { AccessStage::ComputeRead };
            self.mapping_mut(*mapping_id)?.set_stage(stage);
        }

        self.commands.push(RecordedCommand::BeginPass {
            pass,
            name: name.to_string(),
            kind: PassKind::Compute,
        });
        self.emit_barriers(&barriers)?;
        self.commands.push(RecordedCommand::Dispatch {
            pass,
            pipeline,
            group_count: decl.workgroup_dims,
        });
        self.commands.push(RecordedCommand::EndPass);
        log::debug!("[{}] dispatch {} with {} barriers", name, decl.workgroup_dims, barriers.len());

        let mut pass_barriers = PassBarriers::new();
        pass_barriers.extend(barriers);
        Ok(pass_barriers)
    }

    /// 批次结束时，被 `from_device` 写过的 host buffer 需要对 CPU 可见
    pub(crate) fn finish(mut self) -> GraphResult<Vec<RecordedCommand<B, P>>> {
        let mapping_ids =
            self.mappings.iter().filter(|(_, m)| m.host_tracker.has_write()).map(|(id, _)| id).collect_vec();
        let mut host_barriers = Vec::new();
        for mapping_id in mapping_ids {
            host_barriers.extend(self.access(mapping_id, StoreSide::Host, BufferState::HOST_READ)?);
        }
        self.emit_barriers(&host_barriers)?;
        Ok(self.commands)
    }
}

// tools
impl<B: Copy + Eq + Debug, P: Copy + Debug> BatchRecorder<'_, B, P> {
    #[inline]
    fn mapping_mut(&mut self, id: MappingId) -> GraphResult<&mut MemMapping<B>> {
        self.mappings.get_mut(id).ok_or(GraphError::UnknownMapping(id))
    }

    fn access(
        &mut self,
        id: MappingId,
        side: StoreSide,
        required: BufferState,
    ) -> GraphResult<Option<BufferBarrierDesc>> {
        let mapping = self.mapping_mut(id)?;
        Ok(mapping.tracker_mut(side).access(required).map(|(src, dst)| BufferBarrierDesc::new(id, side, src, dst)))
    }

    /// 按来源分组，每组一个 pipeline barrier 命令
    fn emit_barriers(&mut self, barriers: &[BufferBarrierDesc]) -> GraphResult<()> {
        for group in group_by_origin(barriers) {
            let resolved = group
                .barriers
                .iter()
                .map(|b| {
                    let mapping = self.mappings.get(b.mapping).ok_or(GraphError::UnknownMapping(b.mapping))?;
                    Ok(ResolvedBarrier {
                        buffer: mapping.buffer(b.side),
                        mapping: b.mapping,
                        mask: b.to_mask(),
                    })
                })
                .collect::<GraphResult<Vec<_>>>()?;
            self.commands.push(RecordedCommand::PipelineBarrier {
                src_stage: group.src_stage,
                dst_stage: group.dst_stage,
                barriers: resolved,
            });
        }
        Ok(())
    }
}
