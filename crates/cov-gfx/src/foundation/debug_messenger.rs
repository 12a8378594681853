use std::ffi::CStr;

use ash::vk;

use crate::error::{GfxResult, VkResultExt};

pub struct GfxDebugMsger {
    pub vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    pub vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_entry, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = unsafe {
            loader.create_debug_utils_messenger(&create_info, None).vk_context("vkCreateDebugUtilsMessengerEXT")?
        };

        Ok(Self {
            vk_debug_utils_instance: loader,
            vk_debug_utils_messenger: debug_messenger,
        })
    }

    pub fn destroy(self) {
        // 触发 drop 进行销毁
    }
}

impl Drop for GfxDebugMsger {
    fn drop(&mut self) {
        unsafe {
            log::info!("Destroying GfxDebugMsger");
            self.vk_debug_utils_instance.destroy_debug_utils_messenger(self.vk_debug_utils_messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
/// 由 validation layer 调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format!("[{:?}]\n{}\n", message_type, format_layer_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{}", format_msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{}", format_msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("{}", format_msg);
        }
        _ => log::debug!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 新版本的 validation layer 会输出 json 格式的消息
///
/// 提取 json 里面的 MainMessage 字段，这个字段里面有换行符，需要单独输出；
/// 不是 json 的消息原样返回
fn format_layer_message(msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let mut json_obj = json_value.as_mut().ok().and_then(|v| v.as_object_mut());
    let main_msg_value = json_obj.as_mut().and_then(|obj| obj.remove("MainMessage"));
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();

    match json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()) {
        Some(total_msg_str) => format!("{}\n{}", total_msg_str, main_msg_str),
        None => msg.to_string(),
    }
}

// 构造过程辅助函数
impl GfxDebugMsger {
    pub const fn debug_msg_type() -> vk::DebugUtilsMessageTypeFlagsEXT {
        vk::DebugUtilsMessageTypeFlagsEXT::from_raw(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL.as_raw()
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION.as_raw()
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE.as_raw(),
        )
    }

    pub const fn debug_msg_severity() -> vk::DebugUtilsMessageSeverityFlagsEXT {
        vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw()
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw(),
        )
    }

    /// 用于创建 debug messenger 的结构体
    ///
    /// 也会挂到 InstanceCreateInfo 上，用来捕获 instance 创建和销毁过程中的消息
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(Self::debug_msg_severity())
            .message_type(Self::debug_msg_type())
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_is_kept() {
        assert_eq!(format_layer_message("vkCreateBuffer: size is zero"), "vkCreateBuffer: size is zero");
    }

    #[test]
    fn test_json_main_message_is_split_out() {
        let msg = r#"{"MessageID":"0x1234","MainMessage":"line one\nline two"}"#;
        let formatted = format_layer_message(msg);

        assert!(formatted.contains("\"MessageID\""));
        assert!(!formatted.contains("MainMessage"));
        assert!(formatted.ends_with("line one\nline two"));
    }
}
