use crate::{
    backend::ComputeBackend,
    error::GraphResult,
    handles::{MappingId, PassId},
    instance::{Instance, PassDecl},
};

/// host 和 device 之间的拷贝方向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    /// host buffer -> device buffer
    ToDevice,
    /// device buffer -> host buffer
    FromDevice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferOp {
    pub direction: TransferDirection,
    pub mapping: MappingId,
}

/// transfer pass 的构建器
///
/// 操作按照声明顺序执行，每个操作都是整个 mapping 的拷贝
///
/// # 使用示例
/// ```ignore
/// instance.add_transfer_pass().to_device(a).to_device(b).build()?;
/// ```
pub struct TransferPassBuilder<'a, B: ComputeBackend> {
    instance: &'a mut Instance<B>,
    name: Option<String>,
    ops: Vec<TransferOp>,
}

impl<'a, B: ComputeBackend> TransferPassBuilder<'a, B> {
    pub(crate) fn new(instance: &'a mut Instance<B>) -> Self {
        Self {
            instance,
            name: None,
            ops: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_device(mut self, mapping: MappingId) -> Self {
        self.ops.push(TransferOp {
            direction: TransferDirection::ToDevice,
            mapping,
        });
        self
    }

    pub fn from_device(mut self, mapping: MappingId) -> Self {
        self.ops.push(TransferOp {
            direction: TransferDirection::FromDevice,
            mapping,
        });
        self
    }

    pub fn build(self) -> GraphResult<PassId> {
        let name = self.name.unwrap_or_else(|| self.instance.default_pass_name("transfer"));

        for op in &self.ops {
            self.instance.mapping(op.mapping)?;
        }
        if self.ops.is_empty() {
            log::warn!("transfer pass \"{}\" has no operation", name);
        }

        self.instance.declare_pass(name, PassDecl::Transfer(self.ops))
    }
}
