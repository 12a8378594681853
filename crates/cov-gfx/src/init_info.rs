use std::ffi::CStr;

use ash::vk;

/// 创建 [`crate::gfx_core::GfxCore`] 所需的参数
#[derive(Clone, Debug)]
pub struct GfxInitInfo {
    pub app_name: String,
    pub engine_name: String,

    /// synchronization2 和 queue_submit2 需要 1.3
    pub vk_version: u32,

    /// 开启后必须能找到 validation layer，否则创建失败
    pub enable_validation: bool,
    /// 优先使用独立显卡；关闭时使用第一个满足条件的显卡
    pub prefer_discrete_gpu: bool,
}

impl GfxInitInfo {
    pub const VALIDATION_LAYER_NAME: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            engine_name: "No Engine".to_string(),
            vk_version: vk::API_VERSION_1_3,
            enable_validation: false,
            prefer_discrete_gpu: false,
        }
    }

    /// 需要开启的 instance layers
    pub fn instance_layers(&self) -> Vec<&'static CStr> {
        if self.enable_validation { vec![Self::VALIDATION_LAYER_NAME] } else { Vec::new() }
    }
}
