use std::{path::PathBuf, time::Duration};

use cov_gfx::error::GfxError;
use thiserror::Error;

use crate::handles::{MappingId, PassId};

/// cov-graph 的错误类型
///
/// 分为三类：
/// - 调用方的配置错误（size 为 0，越界拷贝，缺少 shader 等），在调用处直接拒绝
/// - pass 级别的失败（shader 非法，pipeline 创建失败），只影响当前批次
/// - instance 级别的失败（device lost），之后 instance 不再接受任何工作
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("mapping size must be greater than zero")]
    ZeroSizeMapping,

    #[error("failed to allocate {size} bytes")]
    OutOfMemory { size: u64 },

    #[error("copy with an empty buffer on mapping {mapping:?}")]
    EmptyCopy { mapping: MappingId },

    #[error("copy of {requested} bytes exceeds mapping {mapping:?} of {size} bytes")]
    CopyOutOfBounds {
        mapping: MappingId,
        requested: u64,
        size: u64,
    },

    #[error("unknown mapping {0:?}")]
    UnknownMapping(MappingId),

    #[error("unknown pass {0:?}")]
    UnknownPass(PassId),

    #[error("compute pass \"{pass}\" has no shader")]
    MissingShader { pass: String },

    #[error("invalid SPIR-V binary: {0}")]
    InvalidSpirv(String),

    #[error("failed to read shader file {path:?}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("entry point contains an interior nul byte: {0:?}")]
    InvalidEntryPoint(String),

    #[error("specialization constant {0} is already defined")]
    DuplicateSpecConstant(u32),

    #[error("workgroup dims {dims} must be at least 1 in every dimension")]
    InvalidWorkgroupDims { dims: glam::UVec3 },

    #[error("workgroup dims {dims} exceed the device limit {limit}")]
    WorkgroupDimsExceedLimit { dims: glam::UVec3, limit: glam::UVec3 },

    #[error("the recorded batch has not been executed yet, no pass can be added to it")]
    RecordingClosed,

    #[error("submission did not finish within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("the device was lost, the instance can not be used anymore")]
    DeviceLost,

    #[error("the instance has been destroyed")]
    Destroyed,

    #[error("backend handle is stale: {0}")]
    StaleHandle(&'static str),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    /// device lost 之后，这个 instance 上的所有对象都不可再使用；
    /// 其余错误只影响当前的 pass 或者批次
    pub fn is_fatal_to_instance(&self) -> bool {
        match self {
            GraphError::DeviceLost => true,
            GraphError::Gfx(e) => e.is_device_lost(),
            _ => false,
        }
    }

    /// 将 gfx 层的错误映射为更具体的 graph 错误
    pub(crate) fn lift(e: GfxError, timeout: Duration) -> Self {
        if e.is_device_lost() {
            GraphError::DeviceLost
        } else if e.is_timeout() {
            GraphError::Timeout { timeout }
        } else {
            GraphError::Gfx(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;

    #[test]
    fn test_device_lost_is_fatal() {
        assert!(GraphError::DeviceLost.is_fatal_to_instance());

        let lost = GraphError::Gfx(GfxError::Vk {
            call: "vkQueueSubmit2",
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        assert!(lost.is_fatal_to_instance());

        assert!(!GraphError::MissingShader { pass: "p".into() }.is_fatal_to_instance());
        assert!(!GraphError::Timeout { timeout: Duration::from_secs(1) }.is_fatal_to_instance());
    }

    #[test]
    fn test_lift_gfx_error() {
        let timeout = Duration::from_millis(5);
        let lifted = GraphError::lift(
            GfxError::Vk {
                call: "vkWaitForFences",
                result: vk::Result::TIMEOUT,
            },
            timeout,
        );
        assert!(matches!(lifted, GraphError::Timeout { timeout: t } if t == timeout));

        let lifted = GraphError::lift(
            GfxError::Vk {
                call: "vkWaitForFences",
                result: vk::Result::ERROR_DEVICE_LOST,
            },
            timeout,
        );
        assert!(matches!(lifted, GraphError::DeviceLost));

        let lifted = GraphError::lift(GfxError::LayerNotPresent("x".into()), timeout);
        assert!(matches!(lifted, GraphError::Gfx(_)));
    }
}
