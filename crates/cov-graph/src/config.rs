use std::time::Duration;

use ash::vk;
use cov_gfx::init_info::GfxInitInfo;

/// 单个 Instance 的运行参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    /// `execute` 等待 fence 的最长时间
    pub fence_timeout: Duration,
    /// finalize 之后是否输出执行计划
    pub print_execution_plan: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(30),
            print_execution_plan: false,
        }
    }
}

/// Runtime 的参数，决定 vulkan instance 以及 device 如何创建
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub app_name: String,
    pub engine_name: String,
    pub api_version: u32,
    pub enable_validation: bool,
    pub prefer_discrete_gpu: bool,
    /// 由这个 runtime 创建的所有 Instance 共用
    pub instance: InstanceConfig,
}

impl RuntimeConfig {
    pub const ENV_VALIDATION: &'static str = "COV_VALIDATION";
    pub const ENV_PREFER_DISCRETE_GPU: &'static str = "COV_PREFER_DISCRETE_GPU";
    pub const ENV_FENCE_TIMEOUT_MS: &'static str = "COV_FENCE_TIMEOUT_MS";
    pub const ENV_PRINT_PLAN: &'static str = "COV_PRINT_PLAN";

    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            engine_name: "No Engine".to_string(),
            api_version: vk::API_VERSION_1_3,
            enable_validation: false,
            prefer_discrete_gpu: false,
            instance: InstanceConfig::default(),
        }
    }

    /// 默认参数，再用环境变量覆盖
    pub fn from_env(app_name: impl Into<String>) -> Self {
        Self::from_lookup(app_name, |key| std::env::var(key).ok())
    }

    /// 无法解析的值会被忽略，并输出警告
    pub fn from_lookup(app_name: impl Into<String>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(app_name);

        if let Some(v) = lookup(Self::ENV_VALIDATION).and_then(|v| parse_flag(Self::ENV_VALIDATION, &v)) {
            config.enable_validation = v;
        }
        if let Some(v) =
            lookup(Self::ENV_PREFER_DISCRETE_GPU).and_then(|v| parse_flag(Self::ENV_PREFER_DISCRETE_GPU, &v))
        {
            config.prefer_discrete_gpu = v;
        }
        if let Some(v) = lookup(Self::ENV_PRINT_PLAN).and_then(|v| parse_flag(Self::ENV_PRINT_PLAN, &v)) {
            config.instance.print_execution_plan = v;
        }
        if let Some(raw) = lookup(Self::ENV_FENCE_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.instance.fence_timeout = Duration::from_millis(ms),
                Err(e) => log::warn!("ignore {}={:?}: {}", Self::ENV_FENCE_TIMEOUT_MS, raw, e),
            }
        }

        config
    }

    pub fn gfx_init_info(&self) -> GfxInitInfo {
        GfxInitInfo {
            app_name: self.app_name.clone(),
            engine_name: self.engine_name.clone(),
            vk_version: self.api_version,
            enable_validation: self.enable_validation,
            prefer_discrete_gpu: self.prefer_discrete_gpu,
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("ignore {}={:?}: expected a boolean", key, raw);
            None
        }
    }
}
