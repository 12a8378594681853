use crate::{
    backend::{host::HostBackend, vulkan::VulkanBackend},
    config::RuntimeConfig,
    error::GraphResult,
    instance::Instance,
};

/// 创建 Instance 的入口
///
/// 只保存配置，不持有任何设备；每个 Vulkan Instance 拥有各自的 device 和 queue，
/// 因此多个 runtime 或者多个 Instance 可以同时存在。
#[derive(Clone, Debug)]
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    /// 默认配置，并应用 `COV_*` 环境变量
    pub fn init(app_name: impl Into<String>) -> Self {
        Self::with_config(RuntimeConfig::from_env(app_name))
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        log::info!(
            "runtime \"{}\": validation {}, prefer discrete gpu {}",
            config.app_name,
            config.enable_validation,
            config.prefer_discrete_gpu
        );
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// 创建 vulkan instance，挑选物理设备，再创建 device，allocator 以及 command pool
    pub fn new_instance(&self) -> GraphResult<Instance<VulkanBackend>> {
        let backend = VulkanBackend::new(&self.config.gfx_init_info())?;
        Ok(Instance::new(backend, self.config.instance.clone()))
    }

    /// 不需要 GPU 的 Instance，compute pass 不会执行 shader
    pub fn new_host_instance(&self) -> Instance<HostBackend> {
        Instance::new(HostBackend::new(), self.config.instance.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::InstanceConfig;

    #[test]
    fn test_host_instance_uses_runtime_config() {
        let mut config = RuntimeConfig::new("runtime-test");
        config.instance = InstanceConfig {
            fence_timeout: Duration::from_millis(10),
            print_execution_plan: false,
        };
        let runtime = Runtime::with_config(config);

        let first = runtime.new_host_instance();
        let second = runtime.new_host_instance();
        assert_eq!(first.config().fence_timeout, Duration::from_millis(10));
        assert_eq!(second.config(), first.config());
        assert_eq!(runtime.config().app_name, "runtime-test");
    }

    #[test]
    fn test_independent_host_instances() {
        let runtime = Runtime::with_config(RuntimeConfig::new("runtime-test"));
        let mut first = runtime.new_host_instance();
        let mut second = runtime.new_host_instance();

        first.add_mem_mapping(8).unwrap();
        let b = second.add_mem_mapping(8).unwrap();
        first.destroy();

        assert!(first.is_destroyed());
        assert!(!second.is_destroyed());
        second.copy_from(b, &[1, 2]).unwrap();
        second.add_transfer_pass().to_device(b).build().unwrap();
        assert!(second.execute().is_ok());
    }
}
