use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    backend::{BackendLimits, ComputeBackend, ComputePipelineDesc, MemoryLocation},
    barrier::PassBarriers,
    command::RecordedCommand,
    compute_pass::{ComputePassBuilder, ComputePassDecl},
    config::InstanceConfig,
    error::{GraphError, GraphResult},
    handles::{MappingId, PassId},
    mapping::{MappingSnapshot, MemMapping},
    recorder::BatchRecorder,
    state::{format_access_flags, format_pipeline_stage},
    transfer_pass::{TransferOp, TransferPassBuilder},
};

/// 当前批次的录制状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferStatus {
    /// 还没有声明任何 pass
    Unrecorded,
    /// 已经声明了 pass，尚未 finalize
    Recording,
    /// 命令已经录制完成
    Ended,
}

/// `execute` 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// `batch` 从 0 开始计数
    Submitted { batch: usize, commands: usize },
    /// 没有新的批次，什么都没有提交
    NothingToSubmit,
}

/// 已经声明，等待 finalize 的 pass
pub(crate) enum PassDecl {
    Transfer(Vec<TransferOp>),
    Compute(ComputePassDecl),
}

struct PassNode<P> {
    name: String,
    decl: PassDecl,
    pipeline: Option<P>,
    /// finalize 之后才有值
    barriers: Option<PassBarriers>,
}

/// 所有 mapping 和 pass 的所有者
///
/// 一个 Instance 同一时间只有一个批次：声明 pass，`finalize` 统一录制，`execute` 提交并等待。
/// 提交之后再声明 pass 会开始一个新的批次，mapping 的状态在批次之间保留。
///
/// # 使用示例
/// ```ignore
/// let a = instance.add_mem_mapping(16)?;
/// instance.write_pod(a, &[1.1f32, 2.2, 3.3, 4.4])?;
/// instance.add_transfer_pass().to_device(a).build()?;
/// instance.execute()?;
/// ```
///
/// # Destroy
/// `destroy` 可以重复调用，drop 时也会自动调用
pub struct Instance<B: ComputeBackend> {
    backend: B,
    config: InstanceConfig,

    mappings: SlotMap<MappingId, MemMapping<B::Buffer>>,
    passes: SlotMap<PassId, PassNode<B::Pipeline>>,

    /// 当前批次的 pass，按照声明顺序
    pending: Vec<PassId>,
    commands: Vec<RecordedCommand<B::Buffer, B::Pipeline>>,
    status: CommandBufferStatus,
    batch_submitted: bool,
    submission_count: usize,
    /// 只增不减，用于默认的 pass 名
    declared_pass_count: usize,

    /// device lost 之后不再接受任何工作
    poisoned: bool,
    destroyed: bool,
}

// 创建与销毁
impl<B: ComputeBackend> Instance<B> {
    pub fn new(backend: B, config: InstanceConfig) -> Self {
        Self {
            backend,
            config,
            mappings: SlotMap::with_key(),
            passes: SlotMap::with_key(),
            pending: Vec::new(),
            commands: Vec::new(),
            status: CommandBufferStatus::Unrecorded,
            batch_submitted: false,
            submission_count: 0,
            declared_pass_count: 0,
            poisoned: false,
            destroyed: false,
        }
    }

    /// 释放所有 mapping 和 pipeline，再关闭 backend
    ///
    /// 重复调用是安全的
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        // 等待 GPU 空闲
        self.backend.destroy_command_pool();

        for (_, mapping) in self.mappings.drain() {
            let (host, device) = mapping.into_buffers();
            self.backend.destroy_buffer(host);
            self.backend.destroy_buffer(device);
        }
        for (_, node) in self.passes.drain() {
            if let Some(pipeline) = node.pipeline {
                self.backend.destroy_pipeline(pipeline);
            }
        }
        self.pending.clear();
        self.commands.clear();

        self.backend.shutdown();
        self.destroyed = true;
        log::info!("instance destroyed after {} submissions", self.submission_count);
    }
}

impl<B: ComputeBackend> Drop for Instance<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

// getters
impl<B: ComputeBackend> Instance<B> {
    #[inline]
    pub fn status(&self) -> CommandBufferStatus {
        self.status
    }

    #[inline]
    pub fn submission_count(&self) -> usize {
        self.submission_count
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[inline]
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn limits(&self) -> BackendLimits {
        self.backend.limits()
    }

    pub fn mapping(&self, id: MappingId) -> GraphResult<&MemMapping<B::Buffer>> {
        self.mappings.get(id).ok_or(GraphError::UnknownMapping(id))
    }

    #[inline]
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn pass_name(&self, id: PassId) -> Option<&str> {
        self.passes.get(id).map(|node| node.name.as_str())
    }

    /// pass 所在的批次 finalize 之后才有值
    pub fn pass_barriers(&self, id: PassId) -> Option<&PassBarriers> {
        self.passes.get(id).and_then(|node| node.barriers.as_ref())
    }

    /// 最近一次 finalize 的命令
    #[inline]
    pub fn recorded_commands(&self) -> &[RecordedCommand<B::Buffer, B::Pipeline>] {
        &self.commands
    }
}

// mapping
impl<B: ComputeBackend> Instance<B> {
    pub fn add_mem_mapping(&mut self, size: u64) -> GraphResult<MappingId> {
        let name = format!("mapping#{}", self.mappings.len());
        self.add_named_mem_mapping(size, name)
    }

    /// 同时创建 host buffer 和 device buffer，其中一个失败时都不会保留
    pub fn add_named_mem_mapping(&mut self, size: u64, name: impl Into<String>) -> GraphResult<MappingId> {
        self.ensure_usable()?;
        if size == 0 {
            return Err(GraphError::ZeroSizeMapping);
        }
        let name = name.into();

        let host = self.backend.create_buffer(size, MemoryLocation::Host, &format!("{}-host", name))?;
        let device = match self.backend.create_buffer(size, MemoryLocation::Device, &format!("{}-device", name)) {
            Ok(device) => device,
            Err(e) => {
                self.backend.destroy_buffer(host);
                return Err(e);
            }
        };

        log::debug!("add mapping \"{}\", {} bytes", name, size);
        Ok(self.mappings.insert(MemMapping::new(name, size, host, device)))
    }

    /// 写入 host buffer 的起始位置
    pub fn copy_from(&mut self, id: MappingId, data: &[u8]) -> GraphResult<()> {
        self.ensure_usable()?;
        let mapping = self.mappings.get(id).ok_or(GraphError::UnknownMapping(id))?;
        mapping.check_copy_len(id, data.len())?;
        self.backend.write_host(mapping.host_buffer(), data)
    }

    /// 从 host buffer 的起始位置读取
    pub fn copy_to(&mut self, id: MappingId, data: &mut [u8]) -> GraphResult<()> {
        self.ensure_usable()?;
        let mapping = self.mappings.get(id).ok_or(GraphError::UnknownMapping(id))?;
        mapping.check_copy_len(id, data.len())?;
        self.backend.read_host(mapping.host_buffer(), data)
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&mut self, id: MappingId, data: &[T]) -> GraphResult<()> {
        self.copy_from(id, bytemuck::cast_slice(data))
    }

    #[inline]
    pub fn read_pod<T: bytemuck::Pod>(&mut self, id: MappingId, data: &mut [T]) -> GraphResult<()> {
        self.copy_to(id, bytemuck::cast_slice_mut(data))
    }
}

// pass
impl<B: ComputeBackend> Instance<B> {
    pub fn add_transfer_pass(&mut self) -> TransferPassBuilder<'_, B> {
        TransferPassBuilder::new(self)
    }

    pub fn add_compute_pass(&mut self) -> ComputePassBuilder<'_, B> {
        ComputePassBuilder::new(self)
    }

    pub(crate) fn default_pass_name(&self, kind: &str) -> String {
        format!("{}#{}", kind, self.declared_pass_count)
    }

    /// 登记一个已经校验过的 pass
    ///
    /// 已经录制但还没有提交的批次不能再添加 pass；提交之后添加 pass 会开始新的批次
    pub(crate) fn declare_pass(&mut self, name: String, decl: PassDecl) -> GraphResult<PassId> {
        self.ensure_usable()?;
        match self.status {
            CommandBufferStatus::Ended if !self.batch_submitted => return Err(GraphError::RecordingClosed),
            CommandBufferStatus::Ended | CommandBufferStatus::Unrecorded => {
                self.commands.clear();
                self.batch_submitted = false;
                self.status = CommandBufferStatus::Recording;
            }
            CommandBufferStatus::Recording => {}
        }

        log::debug!("declare pass \"{}\"", name);
        self.declared_pass_count += 1;
        let id = self.passes.insert(PassNode {
            name,
            decl,
            pipeline: None,
            barriers: None,
        });
        self.pending.push(id);
        Ok(id)
    }
}

// 录制与提交
impl<B: ComputeBackend> Instance<B> {
    /// 按声明顺序录制当前批次
    ///
    /// 失败时整个批次被丢弃：为它创建的 pipeline 被销毁，mapping 的状态恢复到录制之前
    pub fn finalize(&mut self) -> GraphResult<()> {
        self.ensure_usable()?;
        if self.status != CommandBufferStatus::Recording {
            return Ok(());
        }

        let snapshots = self.mappings.iter().map(|(id, mapping)| (id, mapping.snapshot())).collect_vec();
        match self.record_pending() {
            Ok(commands) => {
                log::info!("finalize batch: {} passes, {} commands", self.pending.len(), commands.len());
                self.commands = commands;
                self.pending.clear();
                self.status = CommandBufferStatus::Ended;
                self.batch_submitted = false;
                if self.config.print_execution_plan {
                    self.print_execution_plan();
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("discard batch of {} passes: {}", self.pending.len(), e);
                self.discard_pending(snapshots);
                Err(e)
            }
        }
    }

    /// 提交当前批次并等待完成
    ///
    /// 同一个批次只会提交一次，重复调用返回 [`Submission::NothingToSubmit`]
    pub fn execute(&mut self) -> GraphResult<Submission> {
        self.ensure_usable()?;
        if self.status == CommandBufferStatus::Recording {
            self.finalize()?;
        }
        if self.status == CommandBufferStatus::Unrecorded {
            log::warn!("execute without any pass, nothing to submit");
            return Ok(Submission::NothingToSubmit);
        }
        if self.batch_submitted {
            log::warn!("batch already submitted, declare new passes before executing again");
            return Ok(Submission::NothingToSubmit);
        }

        let batch = self.submission_count;
        match self.backend.submit(&self.commands, self.config.fence_timeout) {
            Ok(()) => {
                self.batch_submitted = true;
                self.submission_count += 1;
                log::info!("batch {} finished, {} commands", batch, self.commands.len());
                Ok(Submission::Submitted {
                    batch,
                    commands: self.commands.len(),
                })
            }
            Err(e) => {
                if e.is_fatal_to_instance() {
                    log::error!("batch {} failed, instance is no longer usable: {}", batch, e);
                    self.poisoned = true;
                } else if matches!(e, GraphError::Timeout { .. }) {
                    // 批次已经在 GPU 上，不能再次提交
                    log::warn!("batch {} timed out: {}", batch, e);
                    self.batch_submitted = true;
                    self.submission_count += 1;
                }
                Err(e)
            }
        }
    }

    /// 以表格形式输出最近一次 finalize 的执行计划
    pub fn print_execution_plan(&self) {
        let order = self
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginPass { pass, .. } => Some(*pass),
                _ => None,
            })
            .collect_vec();

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              Compute Batch Execution Plan                        ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Execution Order: [{}]",
            order.len(),
            order.iter().filter_map(|id| self.pass_name(*id)).join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (index, pass_id) in order.iter().enumerate() {
            let Some(node) = self.passes.get(*pass_id) else {
                continue;
            };

            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Pass: \"{}\"", index + 1, order.len(), node.name);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            match &node.decl {
                PassDecl::Transfer(ops) => {
                    for op in ops {
                        log::info!("│   ⇄ {:?} \"{}\"", op.direction, self.mapping_name(op.mapping));
                    }
                }
                PassDecl::Compute(decl) => {
                    if !decl.inputs.is_empty() {
                        log::info!("│ Inputs:");
                        for mapping in &decl.inputs {
                            log::info!("│   📖 \"{}\"", self.mapping_name(*mapping));
                        }
                    }
                    if !decl.outputs.is_empty() {
                        log::info!("│ Outputs:");
                        for mapping in &decl.outputs {
                            log::info!("│   ✏️  \"{}\"", self.mapping_name(*mapping));
                        }
                    }
                    log::info!("│ Workgroups: {}", decl.workgroup_dims);
                }
            }

            match node.barriers.as_ref().filter(|b| b.has_barriers()) {
                Some(barriers) => {
                    log::info!("├─────────────────────────────────────────────────────────────────┤");
                    log::info!("│ Barriers: {} buffer", barriers.buffer_barrier_count());
                    for barrier in &barriers.buffer_barriers {
                        log::info!(
                            "│   🔒 {:?} \"{}\" ({:?}):",
                            barrier.side,
                            self.mapping_name(barrier.mapping),
                            barrier.hazard()
                        );
                        log::info!(
                            "│       Stage:  {} → {}",
                            format_pipeline_stage(barrier.src_state.stage),
                            format_pipeline_stage(barrier.dst_state.stage)
                        );
                        log::info!(
                            "│       Access: {} → {}",
                            format_access_flags(barrier.src_state.src_access()),
                            format_access_flags(barrier.dst_state.access)
                        );
                    }
                }
                None => log::info!("│ No barriers required"),
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        // 最后一个 pass 之后的 barrier 都是 host 可见性
        let host_barriers = self
            .commands
            .iter()
            .rev()
            .take_while(|c| c.is_barrier())
            .map(|c| match c {
                RecordedCommand::PipelineBarrier { barriers, .. } => barriers.len(),
                _ => 0,
            })
            .sum::<usize>();
        log::info!("");
        log::info!("Host visibility barriers: {}", host_barriers);
    }
}

// tools
impl<B: ComputeBackend> Instance<B> {
    fn ensure_usable(&self) -> GraphResult<()> {
        if self.destroyed {
            Err(GraphError::Destroyed)
        } else if self.poisoned {
            Err(GraphError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn mapping_name(&self, id: MappingId) -> &str {
        self.mappings.get(id).map(|m| m.name()).unwrap_or("<unknown>")
    }

    fn record_pending(&mut self) -> GraphResult<Vec<RecordedCommand<B::Buffer, B::Pipeline>>> {
        // 先创建所有 pipeline，descriptor set 直接绑定 device buffer
        for &pass_id in &self.pending {
            let node = self.passes.get_mut(pass_id).ok_or(GraphError::UnknownPass(pass_id))?;
            let PassDecl::Compute(decl) = &node.decl else {
                continue;
            };
            let bindings = decl
                .bindings()
                .map(|m| self.mappings.get(m).map(|m| m.device_buffer()).ok_or(GraphError::UnknownMapping(m)))
                .collect::<GraphResult<Vec<_>>>()?;
            let desc = ComputePipelineDesc {
                label: &node.name,
                shader: &decl.shader,
                entry_point: &decl.entry_point,
                spec_constants: &decl.spec_constants,
                bindings: &bindings,
            };
            let pipeline = self.backend.create_compute_pipeline(&desc)?;
            node.pipeline = Some(pipeline);
        }

        let mut recorder = BatchRecorder::new(&mut self.mappings);
        for &pass_id in &self.pending {
            let node = self.passes.get_mut(pass_id).ok_or(GraphError::UnknownPass(pass_id))?;
            let barriers = match &node.decl {
                PassDecl::Transfer(ops) => recorder.record_transfer(pass_id, &node.name, ops)?,
                PassDecl::Compute(decl) => {
                    let pipeline = node.pipeline.ok_or(GraphError::StaleHandle("pipeline"))?;
                    recorder.record_compute(pass_id, &node.name, decl, pipeline)?
                }
            };
            node.barriers = Some(barriers);
        }
        recorder.finish()
    }

    fn discard_pending(&mut self, snapshots: Vec<(MappingId, MappingSnapshot)>) {
        for pass_id in self.pending.drain(..) {
            let Some(node) = self.passes.remove(pass_id) else {
                continue;
            };
            if let Some(pipeline) = node.pipeline {
                self.backend.destroy_pipeline(pipeline);
            }
        }
        for (id, snapshot) in snapshots {
            if let Some(mapping) = self.mappings.get_mut(id) {
                mapping.restore(snapshot);
            }
        }
        self.commands.clear();
        self.status = CommandBufferStatus::Unrecorded;
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use cov_crate_tools::init_log::try_init_log;

    use super::*;
    use crate::{
        backend::host::{HostBackend, InjectedFailure},
        barrier::{Hazard, StoreSide},
        compute_pass::tests::spirv_header_bytes,
        state::AccessStage,
    };

    fn instance() -> Instance<HostBackend> {
        try_init_log(log::LevelFilter::Debug);
        Instance::new(HostBackend::new(), InstanceConfig::default())
    }

    fn compute(
        instance: &mut Instance<HostBackend>,
        name: &str,
        inputs: &[MappingId],
        outputs: &[MappingId],
    ) -> PassId {
        instance
            .add_compute_pass()
            .name(name)
            .set_inputs(inputs.iter().copied())
            .set_outputs(outputs.iter().copied())
            .set_workgroup_dims(4, 1, 1)
            .load_bin_shader(&spirv_header_bytes())
            .unwrap()
            .build()
            .unwrap()
    }

    fn barrier_command_count(instance: &Instance<HostBackend>) -> usize {
        instance.recorded_commands().iter().filter(|c| c.is_barrier()).count()
    }

    #[test]
    fn test_add_mapping() {
        let mut instance = instance();
        assert!(matches!(instance.add_mem_mapping(0), Err(GraphError::ZeroSizeMapping)));
        assert_eq!(instance.backend().live_buffer_count(), 0);

        let a = instance.add_mem_mapping(16).unwrap();
        let b = instance.add_named_mem_mapping(32, "weights").unwrap();
        assert_eq!(instance.mapping(a).unwrap().size(), 16);
        assert_eq!(instance.mapping(a).unwrap().stage(), AccessStage::Unknown);
        assert_eq!(instance.mapping(b).unwrap().name(), "weights");
        assert_eq!(instance.backend().live_buffer_count(), 4);

        let foreign = Instance::new(HostBackend::new(), InstanceConfig::default()).add_mem_mapping(4).unwrap();
        let mut other = self::instance();
        assert!(matches!(other.mapping(foreign), Err(GraphError::UnknownMapping(_))));
        assert!(matches!(other.copy_from(foreign, &[1]), Err(GraphError::UnknownMapping(_))));
    }

    #[test]
    fn test_copy_bounds_checked_before_access() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let host = instance.mapping(a).unwrap().host_buffer();

        assert!(matches!(
            instance.copy_from(a, &[0xff; 17]),
            Err(GraphError::CopyOutOfBounds {
                requested: 17,
                size: 16,
                ..
            })
        ));
        assert_eq!(instance.backend().buffer_data(host), Some(&[0u8; 16][..]));

        let mut out = [0xaau8; 17];
        assert!(matches!(instance.copy_to(a, &mut out), Err(GraphError::CopyOutOfBounds { .. })));
        assert_eq!(out, [0xaa; 17]);

        assert!(matches!(instance.copy_from(a, &[]), Err(GraphError::EmptyCopy { .. })));
        assert!(matches!(instance.copy_to(a, &mut []), Err(GraphError::EmptyCopy { .. })));

        // 多出一个 f32
        assert!(matches!(instance.write_pod(a, &[0f32; 5]), Err(GraphError::CopyOutOfBounds { .. })));
    }

    #[test]
    fn test_round_trip_without_compute() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let input = [1.1f32, 2.2, 3.3, 4.4];
        instance.write_pod(a, &input).unwrap();

        instance.add_transfer_pass().to_device(a).build().unwrap();
        assert!(matches!(instance.execute().unwrap(), Submission::Submitted { batch: 0, .. }));
        assert_eq!(instance.mapping(a).unwrap().stage(), AccessStage::TransferWrite);

        let device = instance.mapping(a).unwrap().device_buffer();
        assert_eq!(instance.backend().buffer_data(device), Some(bytemuck::cast_slice::<f32, u8>(&input)));

        let mut output = [0f32; 4];
        instance.read_pod(a, &mut output).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_round_trip_through_device() {
        for n in [1usize, 64, 256] {
            let mut instance = instance();
            let a = instance.add_mem_mapping(256).unwrap();
            let sink = instance.add_mem_mapping(4).unwrap();
            let data = (0..n).map(|i| (i * 7 + 3) as u8).collect_vec();

            instance.copy_from(a, &data).unwrap();
            instance.add_transfer_pass().to_device(a).build().unwrap();
            compute(&mut instance, "identity", &[a], &[sink]);
            instance.execute().unwrap();

            // 清空 host 端，确认数据确实来自 device
            instance.copy_from(a, &vec![0; n]).unwrap();
            instance.add_transfer_pass().from_device(a).build().unwrap();
            instance.execute().unwrap();

            let mut out = vec![0u8; n];
            instance.copy_to(a, &mut out).unwrap();
            assert_eq!(out, data, "round trip of {} bytes", n);
            assert_eq!(instance.submission_count(), 2);
        }
    }

    #[test]
    fn test_chained_compute_emits_one_barrier() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let b = instance.add_mem_mapping(16).unwrap();
        let c = instance.add_mem_mapping(16).unwrap();
        let d = instance.add_mem_mapping(16).unwrap();

        let first = compute(&mut instance, "first", &[a, b], &[c]);
        let second = compute(&mut instance, "second", &[c], &[d]);
        instance.execute().unwrap();

        assert!(!instance.pass_barriers(first).unwrap().has_barriers());
        let barriers = instance.pass_barriers(second).unwrap();
        let on_c = barriers.for_mapping(c).collect_vec();
        assert_eq!(on_c.len(), 1);
        assert_eq!(on_c[0].side, StoreSide::Device);
        assert_eq!(on_c[0].to_mask().src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(on_c[0].to_mask().dst_access, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert_eq!(barriers.buffer_barrier_count(), 1);

        assert_eq!(barrier_command_count(&instance), 1);
        assert_eq!(instance.backend().submissions()[0].dispatch_labels, vec!["first", "second"]);
    }

    #[test]
    fn test_unwritten_input_emits_no_barrier() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let out = instance.add_mem_mapping(16).unwrap();

        let pass = compute(&mut instance, "lonely", &[a], &[out]);
        instance.execute().unwrap();

        assert!(!instance.pass_barriers(pass).unwrap().has_barriers());
        assert_eq!(barrier_command_count(&instance), 0);
        assert_eq!(instance.backend().submissions()[0].buffer_barriers, 0);
    }

    #[test]
    fn test_execute_twice_submits_once() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).build().unwrap();

        assert!(matches!(instance.execute().unwrap(), Submission::Submitted { batch: 0, .. }));
        assert_eq!(instance.execute().unwrap(), Submission::NothingToSubmit);
        assert_eq!(instance.submission_count(), 1);
        assert_eq!(instance.backend().submissions().len(), 1);
        assert_eq!(instance.status(), CommandBufferStatus::Ended);
    }

    #[test]
    fn test_read_barrier_depends_on_previous_stage() {
        let mut instance = instance();
        let uploaded = instance.add_mem_mapping(16).unwrap();
        let computed = instance.add_mem_mapping(16).unwrap();
        let read = instance.add_mem_mapping(16).unwrap();
        let downloaded = instance.add_mem_mapping(16).unwrap();
        let unknown = instance.add_mem_mapping(16).unwrap();
        let sink = instance.add_mem_mapping(16).unwrap();

        instance.add_transfer_pass().to_device(uploaded).from_device(downloaded).build().unwrap();
        compute(&mut instance, "producer", &[read], &[computed]);
        let consumer = compute(&mut instance, "consumer", &[uploaded, computed, read, downloaded, unknown], &[sink]);
        instance.finalize().unwrap();

        let barriers = instance.pass_barriers(consumer).unwrap();
        for written in [uploaded, computed] {
            let hits = barriers.for_mapping(written).collect_vec();
            assert_eq!(hits.len(), 1);
            assert!(hits[0].dst_state.access.contains(vk::AccessFlags2::SHADER_STORAGE_READ));
        }
        for untouched in [read, downloaded, unknown] {
            assert_eq!(barriers.for_mapping(untouched).count(), 0);
        }
    }

    #[test]
    fn test_output_becomes_compute_write() {
        let mut instance = instance();
        let uploaded = instance.add_mem_mapping(16).unwrap();
        let read = instance.add_mem_mapping(16).unwrap();
        let fresh = instance.add_mem_mapping(16).unwrap();
        let sink = instance.add_mem_mapping(16).unwrap();

        instance.add_transfer_pass().to_device(uploaded).build().unwrap();
        compute(&mut instance, "reader", &[read], &[sink]);
        compute(&mut instance, "writer", &[], &[uploaded, read, fresh]);
        instance.finalize().unwrap();

        for id in [uploaded, read, fresh, sink] {
            assert_eq!(instance.mapping(id).unwrap().stage(), AccessStage::ComputeWrite);
        }
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let b = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).build().unwrap();
        compute(&mut instance, "pass", &[a], &[b]);
        instance.execute().unwrap();
        assert_eq!(instance.backend().live_pipeline_count(), 1);

        instance.destroy();
        instance.destroy();

        assert!(instance.is_destroyed());
        let backend = instance.backend();
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_pipeline_count(), 0);
        assert_eq!(backend.invalid_destroy_count(), 0);
        assert!(backend.is_command_pool_destroyed());
        assert!(backend.is_shut_down());

        assert!(matches!(instance.add_mem_mapping(4), Err(GraphError::Destroyed)));
        assert!(matches!(instance.execute(), Err(GraphError::Destroyed)));
    }

    #[test]
    fn test_status_transitions() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        assert_eq!(instance.status(), CommandBufferStatus::Unrecorded);
        assert_eq!(instance.execute().unwrap(), Submission::NothingToSubmit);

        instance.add_transfer_pass().to_device(a).build().unwrap();
        assert_eq!(instance.status(), CommandBufferStatus::Recording);
        // 声明时不会录制任何命令
        assert!(instance.recorded_commands().is_empty());

        instance.finalize().unwrap();
        assert_eq!(instance.status(), CommandBufferStatus::Ended);
        assert!(matches!(
            instance.add_transfer_pass().from_device(a).build(),
            Err(GraphError::RecordingClosed)
        ));

        instance.execute().unwrap();
        let download = instance.add_transfer_pass().from_device(a).build().unwrap();
        assert_eq!(instance.status(), CommandBufferStatus::Recording);
        assert!(matches!(instance.execute().unwrap(), Submission::Submitted { batch: 1, .. }));
        assert_eq!(instance.submission_count(), 2);

        // 第二个批次中 device 端的写入来自上一个批次
        let barriers = instance.pass_barriers(download).unwrap();
        assert_eq!(barriers.for_mapping(a).filter(|b| b.hazard() == Hazard::ReadAfterWrite).count(), 1);
        assert_eq!(instance.mapping(a).unwrap().stage(), AccessStage::TransferRead);
    }

    #[test]
    fn test_failed_finalize_discards_batch() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let b = instance.add_mem_mapping(16).unwrap();
        instance.backend_mut().fail_pipeline("broken");

        instance.add_transfer_pass().to_device(a).build().unwrap();
        let good = compute(&mut instance, "good", &[a], &[b]);
        compute(&mut instance, "broken", &[b], &[a]);

        assert!(instance.execute().is_err());
        assert_eq!(instance.status(), CommandBufferStatus::Unrecorded);
        assert_eq!(instance.backend().live_pipeline_count(), 0);
        assert_eq!(instance.backend().submissions().len(), 0);
        assert!(instance.pass_name(good).is_none());
        assert_eq!(instance.mapping(a).unwrap().stage(), AccessStage::Unknown);
        assert_eq!(instance.mapping(b).unwrap().stage(), AccessStage::Unknown);

        // 被丢弃之后可以重新声明
        instance.add_transfer_pass().to_device(a).build().unwrap();
        let retry = compute(&mut instance, "good", &[a], &[b]);
        instance.execute().unwrap();
        assert_eq!(instance.pass_barriers(retry).unwrap().for_mapping(a).count(), 1);
    }

    #[test]
    fn test_timeout_marks_batch_submitted() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).build().unwrap();
        instance.backend_mut().fail_next_submit(InjectedFailure::Timeout);

        let err = instance.execute().unwrap_err();
        assert!(matches!(err, GraphError::Timeout { timeout } if timeout == instance.config().fence_timeout));
        assert!(!instance.is_poisoned());
        assert_eq!(instance.execute().unwrap(), Submission::NothingToSubmit);

        instance.add_transfer_pass().from_device(a).build().unwrap();
        assert!(matches!(instance.execute().unwrap(), Submission::Submitted { .. }));
    }

    #[test]
    fn test_device_lost_poisons_instance() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).build().unwrap();
        instance.backend_mut().fail_next_submit(InjectedFailure::DeviceLost);

        let err = instance.execute().unwrap_err();
        assert!(err.is_fatal_to_instance());
        assert!(instance.is_poisoned());
        assert!(matches!(instance.add_mem_mapping(4), Err(GraphError::DeviceLost)));
        assert!(matches!(instance.copy_from(a, &[1]), Err(GraphError::DeviceLost)));

        // 仍然可以正常释放
        instance.destroy();
        assert_eq!(instance.backend().live_buffer_count(), 0);
    }

    #[test]
    fn test_compute_pass_validation() {
        let limits = BackendLimits {
            max_compute_work_group_count: glam::uvec3(8, 8, 1),
        };
        let mut instance = Instance::new(HostBackend::with_limits(limits), InstanceConfig::default());
        let a = instance.add_mem_mapping(16).unwrap();

        let err = instance.add_compute_pass().name("no_shader").set_inputs([a]).build().unwrap_err();
        assert!(matches!(err, GraphError::MissingShader { pass } if pass == "no_shader"));

        let err = instance
            .add_compute_pass()
            .set_workgroup_dims(0, 1, 1)
            .load_bin_shader(&spirv_header_bytes())
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidWorkgroupDims { .. }));

        let err = instance
            .add_compute_pass()
            .set_workgroup_dims(8, 8, 2)
            .load_bin_shader(&spirv_header_bytes())
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::WorkgroupDimsExceedLimit { limit, .. } if limit == glam::uvec3(8, 8, 1)
        ));

        let err = instance.add_compute_pass().load_bin_shader(&[1, 2, 3]).err();
        assert!(matches!(err, Some(GraphError::InvalidSpirv(_))));

        let err = instance.add_compute_pass().load_shader_from_file("does/not/exist.spv").err();
        assert!(matches!(err, Some(GraphError::ShaderIo { .. })));

        // 失败的构建不会改变状态
        assert_eq!(instance.status(), CommandBufferStatus::Unrecorded);
    }

    #[test]
    fn test_bindings_keep_duplicates() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).build().unwrap();
        let pass = compute(&mut instance, "in_place", &[a, a], &[a]);
        instance.finalize().unwrap();

        let pipeline = instance
            .recorded_commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::Dispatch { pipeline, .. } => Some(*pipeline),
                _ => None,
            })
            .unwrap();
        let device = instance.mapping(a).unwrap().device_buffer();
        assert_eq!(instance.backend().pipeline_bindings(pipeline), Some(&[device, device, device][..]));
        assert_eq!(instance.pass_barriers(pass).unwrap().buffer_barrier_count(), 1);
    }

    #[test]
    fn test_download_makes_host_visible() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().from_device(a).build().unwrap();
        instance.execute().unwrap();

        match instance.recorded_commands().last() {
            Some(RecordedCommand::PipelineBarrier { dst_stage, barriers, .. }) => {
                assert_eq!(*dst_stage, vk::PipelineStageFlags2::HOST);
                assert_eq!(barriers[0].buffer, instance.mapping(a).unwrap().host_buffer());
            }
            other => panic!("unexpected last command: {:?}", other),
        }
    }

    #[test]
    fn test_print_execution_plan() {
        let mut instance = Instance::new(
            HostBackend::new(),
            InstanceConfig {
                print_execution_plan: true,
                ..InstanceConfig::default()
            },
        );
        try_init_log(log::LevelFilter::Info);
        let a = instance.add_named_mem_mapping(16, "a").unwrap();
        let b = instance.add_named_mem_mapping(16, "b").unwrap();
        instance.add_transfer_pass().name("upload").to_device(a).build().unwrap();
        compute(&mut instance, "double", &[a], &[b]);
        instance.add_transfer_pass().name("download").from_device(b).build().unwrap();
        instance.execute().unwrap();

        assert_eq!(instance.backend().submissions()[0].copies, 2);
        assert_eq!(instance.backend().submissions()[0].dispatches, 1);
    }

    #[test]
    fn test_huge_mapping_is_an_error() {
        let mut instance = instance();
        instance.add_mem_mapping(16).unwrap();

        assert!(matches!(instance.add_mem_mapping(u64::MAX), Err(GraphError::OutOfMemory { .. })));
        assert_eq!(instance.backend().live_buffer_count(), 2);
        assert_eq!(instance.mapping_count(), 1);
    }

    #[test]
    fn test_upload_read_on_device_still_syncs_compute() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let sink = instance.add_mem_mapping(16).unwrap();
        instance.add_transfer_pass().to_device(a).from_device(a).build().unwrap();
        instance.execute().unwrap();
        assert_eq!(instance.mapping(a).unwrap().stage(), AccessStage::TransferRead);

        // transfer 读取之前的 barrier 只覆盖了 transfer stage
        let pass = compute(&mut instance, "reader", &[a], &[sink]);
        instance.execute().unwrap();
        let hits = instance.pass_barriers(pass).unwrap().for_mapping(a).collect_vec();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hazard(), Hazard::ReadAfterWrite);
        assert_eq!(hits[0].dst_state.stage, vk::PipelineStageFlags2::COMPUTE_SHADER);

        // 同一个 stage 再次读取不需要 barrier
        let again = compute(&mut instance, "reader_again", &[a], &[sink]);
        instance.execute().unwrap();
        assert_eq!(instance.pass_barriers(again).unwrap().for_mapping(a).count(), 0);
    }

    #[test]
    fn test_default_names_stay_unique_after_discard() {
        let mut instance = instance();
        let a = instance.add_mem_mapping(16).unwrap();
        let b = instance.add_mem_mapping(16).unwrap();

        let upload = instance.add_transfer_pass().to_device(a).build().unwrap();
        instance.execute().unwrap();

        instance.backend_mut().fail_pipeline("broken");
        instance.add_transfer_pass().to_device(b).build().unwrap();
        instance.add_compute_pass().name("broken").load_bin_shader(&spirv_header_bytes()).unwrap().build().unwrap();
        assert!(instance.execute().is_err());

        let after = instance.add_transfer_pass().to_device(b).build().unwrap();
        assert_eq!(instance.pass_name(upload), Some("transfer#0"));
        assert_eq!(instance.pass_name(after), Some("transfer#3"));
    }
}
