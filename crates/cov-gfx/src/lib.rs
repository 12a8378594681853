//! Vulkan compute 的薄封装层
//!
//! 提供 instance，device，queue，command buffer，storage buffer 以及 compute pipeline 的封装。
//! 没有全局单例：所有对象通过 `Rc<GfxDevice>` 访问设备函数，上层持有 [`gfx_core::GfxCore`]。

pub mod basic;
pub mod commands;
pub mod error;
pub mod foundation;
pub mod gfx_core;
pub mod init_info;
pub mod pipelines;
pub mod resources;
