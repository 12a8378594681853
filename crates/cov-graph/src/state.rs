//! 资源状态定义
//!
//! 对外暴露的是 mapping 的 [`AccessStage`]：最近一次使用它的 pass 类型。
//! 内部用 [`BufferState`] 封装 Vulkan 的 pipeline stage 和 access mask，
//! 并由 [`AccessTracker`] 记录每个 buffer 上尚未同步的读写，用于自动计算 barrier。

use ash::vk;

/// mapping 最近一次被使用的方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessStage {
    /// 从未被任何 pass 使用
    #[default]
    Unknown,
    /// `from_device` 读取了 device 端的数据
    TransferRead,
    /// `to_device` 写入了 device 端的数据
    TransferWrite,
    /// 作为 compute pass 的输入
    ComputeRead,
    /// 作为 compute pass 的输出
    ComputeWrite,
}

impl AccessStage {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, AccessStage::TransferWrite | AccessStage::ComputeWrite)
    }

    /// 对应的 buffer 状态，`Unknown` 没有对应的状态
    pub fn buffer_state(self) -> Option<BufferState> {
        match self {
            AccessStage::Unknown => None,
            AccessStage::TransferRead => Some(BufferState::TRANSFER_SRC),
            AccessStage::TransferWrite => Some(BufferState::TRANSFER_DST),
            AccessStage::ComputeRead => Some(BufferState::STORAGE_READ_COMPUTE),
            AccessStage::ComputeWrite => Some(BufferState::STORAGE_WRITE_COMPUTE),
        }
    }
}

/// 缓冲区资源状态
///
/// 描述缓冲区在某个操作中的使用方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferState {
    /// Pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
}

impl Default for BufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl BufferState {
    /// 创建自定义状态
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    // ============ 预定义状态常量 ============

    /// 未定义状态
    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    /// 传输源
    pub const TRANSFER_SRC: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);

    /// 传输目标
    pub const TRANSFER_DST: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    /// 存储缓冲区读取（计算着色器）
    pub const STORAGE_READ_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_READ);

    /// 存储缓冲区写入（计算着色器）
    pub const STORAGE_WRITE_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE);

    /// 存储缓冲区读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
    );

    /// CPU 在 fence 之后读取
    pub const HOST_READ: Self = Self::new(vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_READ);

    // ============ 辅助方法 ============

    /// 写操作的 access flags
    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::HOST_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    /// 读操作的 access flags
    const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
            | vk::AccessFlags2::TRANSFER_READ.as_raw()
            | vk::AccessFlags2::HOST_READ.as_raw()
            | vk::AccessFlags2::MEMORY_READ.as_raw(),
    );

    /// 检查是否为写操作
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    /// 检查是否包含读操作
    #[inline]
    pub fn is_read(&self) -> bool {
        self.access.intersects(Self::READ_ACCESS)
    }

    /// 获取用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !Self::READ_ACCESS
    }
}

/// 单个 buffer 上尚未同步的访问
///
/// - `last_write`：最近一次写入
/// - `visible_to`：最近一次写入已经通过 barrier 对哪些 stage 可见
/// - `read_stages`：最近一次写入之后，有哪些 stage 读取过
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct AccessTracker {
    last_write: Option<BufferState>,
    visible_to: vk::PipelineStageFlags2,
    read_stages: vk::PipelineStageFlags2,
}

impl AccessTracker {
    /// 以 `required` 访问 buffer，返回需要插入的 barrier 的 (src, dst) 状态
    ///
    /// - 读之前有未对该 stage 可见的写入：memory barrier
    /// - 写之前有写入且之后没有读：memory barrier
    /// - 写之前有读：execution barrier，src access 为空
    /// - 首次使用，或者读之后再读：不需要 barrier
    pub(crate) fn access(&mut self, required: BufferState) -> Option<(BufferState, BufferState)> {
        let unsynced_write = self.last_write.filter(|_| !self.visible_to.contains(required.stage));
        let after_reads = required.is_write() && !self.read_stages.is_empty();

        let barrier = match self.last_write {
            Some(write) if (required.is_read() && unsynced_write.is_some())
                || (required.is_write() && self.read_stages.is_empty()) =>
            {
                let mut src_stage = write.stage;
                if after_reads {
                    src_stage |= self.read_stages;
                }
                Some((BufferState::new(src_stage, write.src_access()), required))
            }
            _ if after_reads => Some((BufferState::new(self.read_stages, vk::AccessFlags2::NONE), required)),
            _ => None,
        };

        if required.is_write() {
            self.last_write = Some(required);
            self.visible_to = vk::PipelineStageFlags2::empty();
            self.read_stages = vk::PipelineStageFlags2::empty();
        } else {
            if barrier.is_some() {
                self.visible_to |= required.stage;
            }
            self.read_stages |= required.stage;
        }

        barrier
    }

    #[inline]
    pub(crate) fn has_write(&self) -> bool {
        self.last_write.is_some()
    }
}

/// 格式化 PipelineStageFlags2 为可读字符串
pub fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    let mut stages = Vec::new();

    if stage.contains(vk::PipelineStageFlags2::TOP_OF_PIPE) {
        stages.push("TOP_OF_PIPE");
    }
    if stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER) {
        stages.push("COMPUTE_SHADER");
    }
    if stage.contains(vk::PipelineStageFlags2::TRANSFER) {
        stages.push("TRANSFER");
    }
    if stage.contains(vk::PipelineStageFlags2::HOST) {
        stages.push("HOST");
    }
    if stage.contains(vk::PipelineStageFlags2::ALL_COMMANDS) {
        stages.push("ALL_COMMANDS");
    }

    if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
pub fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }

    let mut flags = Vec::new();

    if access.contains(vk::AccessFlags2::SHADER_STORAGE_READ) {
        flags.push("STORAGE_READ");
    }
    if access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE) {
        flags.push("STORAGE_WRITE");
    }
    if access.contains(vk::AccessFlags2::TRANSFER_READ) {
        flags.push("TRANSFER_READ");
    }
    if access.contains(vk::AccessFlags2::TRANSFER_WRITE) {
        flags.push("TRANSFER_WRITE");
    }
    if access.contains(vk::AccessFlags2::HOST_READ) {
        flags.push("HOST_READ");
    }
    if access.contains(vk::AccessFlags2::HOST_WRITE) {
        flags.push("HOST_WRITE");
    }
    if access.contains(vk::AccessFlags2::MEMORY_READ) {
        flags.push("MEMORY_READ");
    }
    if access.contains(vk::AccessFlags2::MEMORY_WRITE) {
        flags.push("MEMORY_WRITE");
    }

    if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
}
