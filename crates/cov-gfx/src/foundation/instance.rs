use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::GfxDebugMsger,
    init_info::GfxInitInfo,
};

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    ///
    /// 生命周期由手动控制，需要调用 `destroy`
    pub(crate) ash_instance: ash::Instance,

    /// 是否开启了 VK_EXT_debug_utils，决定了 debug name 和 label 是否可用
    pub(crate) debug_utils_enabled: bool,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(vk_entry: &ash::Entry, init_info: &GfxInitInfo) -> GfxResult<Self> {
        let app_name = CString::new(init_info.app_name.as_str())
            .map_err(|_| GfxError::InvalidName(init_info.app_name.clone()))?;
        let engine_name = CString::new(init_info.engine_name.as_str())
            .map_err(|_| GfxError::InvalidName(init_info.engine_name.clone()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(init_info.vk_version) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_c_str())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let layer_exts = LayerExtensions::enumerate(vk_entry)?;

        let enabled_layers = Self::get_layers(&layer_exts, &init_info.instance_layers())?;
        let mut enabled_layers_str = String::new();
        for layer in &enabled_layers {
            enabled_layers_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) }));
        }
        log::info!("instance layers: {}", enabled_layers_str);

        // debug utils 不是必须的，有就开启
        let debug_utils_enabled = layer_exts.has_ext(ash::ext::debug_utils::NAME);
        let mut enabled_extensions = Vec::new();
        if debug_utils_enabled {
            enabled_extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        } else if init_info.enable_validation {
            return Err(GfxError::ExtensionNotPresent(ash::ext::debug_utils::NAME.to_string_lossy().into_owned()));
        }
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，捕获 instance 创建过程中的消息
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        if init_info.enable_validation {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None).vk_context("vkCreateInstance")? };

        Ok(Self {
            ash_instance: handle,
            debug_utils_enabled,
        })
    }

    pub fn destroy(self) {
        log::info!("Destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getter
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }

    #[inline]
    pub fn debug_utils_enabled(&self) -> bool {
        self.debug_utils_enabled
    }
}

// 构造过程
impl GfxInstance {
    /// 检查所需的 layer 是否都受支持
    ///
    /// # return
    /// 缺失任意一个 layer 时返回 `LayerNotPresent`
    fn get_layers(layer_exts: &LayerExtensions, required: &[&'static CStr]) -> GfxResult<Vec<*const c_char>> {
        if let Some(missing) = required.iter().find(|layer| !layer_exts.has_layer(layer)) {
            return Err(GfxError::LayerNotPresent(missing.to_string_lossy().into_owned()));
        }
        Ok(required.iter().map(|layer| layer.as_ptr()).collect_vec())
    }
}

/// 当前 vulkan loader 提供的 instance layers 以及 instance extensions
pub struct LayerExtensions {
    layers: Vec<String>,
    extensions: Vec<String>,
}

impl LayerExtensions {
    pub fn enumerate(vk_entry: &ash::Entry) -> GfxResult<Self> {
        let all_layer_props = unsafe {
            vk_entry.enumerate_instance_layer_properties().vk_context("vkEnumerateInstanceLayerProperties")?
        };
        let all_ext_props = unsafe {
            vk_entry
                .enumerate_instance_extension_properties(None)
                .vk_context("vkEnumerateInstanceExtensionProperties")?
        };

        let layers = all_layer_props
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect_vec();
        let extensions = all_ext_props
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect_vec();
        log::debug!("available instance layers: {:?}", layers);
        log::debug!("available instance extensions: {:?}", extensions);

        Ok(Self { layers, extensions })
    }

    #[inline]
    pub fn has_layer(&self, layer: &CStr) -> bool {
        let layer = layer.to_string_lossy();
        self.layers.iter().any(|l| *l == layer)
    }

    #[inline]
    pub fn has_ext(&self, ext: &CStr) -> bool {
        let ext = ext.to_string_lossy();
        self.extensions.iter().any(|e| *e == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_exts() -> LayerExtensions {
        LayerExtensions {
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            extensions: vec!["VK_EXT_debug_utils".to_string(), "VK_KHR_surface".to_string()],
        }
    }

    #[test]
    fn test_has_layer_and_ext() {
        let le = layer_exts();
        assert!(le.has_layer(GfxInitInfo::VALIDATION_LAYER_NAME));
        assert!(!le.has_layer(c"VK_LAYER_LUNARG_api_dump"));
        assert!(le.has_ext(ash::ext::debug_utils::NAME));
        assert!(!le.has_ext(c"VK_KHR_swapchain"));
    }

    #[test]
    fn test_missing_layer_is_reported() {
        let le = LayerExtensions {
            layers: vec![],
            extensions: vec![],
        };
        let err = GfxInstance::get_layers(&le, &[GfxInitInfo::VALIDATION_LAYER_NAME]).unwrap_err();
        assert!(matches!(err, GfxError::LayerNotPresent(name) if name == "VK_LAYER_KHRONOS_validation"));

        assert!(GfxInstance::get_layers(&le, &[]).unwrap().is_empty());
    }
}
