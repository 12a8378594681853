//! 基于 Vulkan compute 的 pass 编排层
//!
//! 使用流程：
//!
//! 1. 创建 runtime：`Runtime::init("app")`
//! 2. 创建 instance：`runtime.new_instance()?`
//! 3. 声明 mapping：`instance.add_mem_mapping(size)?`
//! 4. 声明 pass：`instance.add_transfer_pass()` / `instance.add_compute_pass()`
//! 5. 提交并等待：`instance.execute()?`
//! 6. 通过 mapping 读回结果：`instance.copy_to(mapping, &mut out)?`
//!
//! pass 只在声明时记录意图，`Instance::finalize` 按声明顺序统一做 hazard 分析和命令录制。

pub mod backend;
pub mod barrier;
pub mod command;
pub mod compute_pass;
pub mod config;
pub mod error;
pub mod handles;
pub mod instance;
pub mod mapping;
pub mod runtime;
pub mod state;
pub mod transfer_pass;

mod recorder;

pub use backend::{BackendLimits, ComputeBackend, host::HostBackend, vulkan::VulkanBackend};
pub use compute_pass::{ComputePassBuilder, SpecConstants};
pub use config::{InstanceConfig, RuntimeConfig};
pub use error::{GraphError, GraphResult};
pub use handles::{MappingId, PassId};
pub use instance::{CommandBufferStatus, Instance, Submission};
pub use runtime::Runtime;
pub use state::AccessStage;
pub use transfer_pass::TransferPassBuilder;
