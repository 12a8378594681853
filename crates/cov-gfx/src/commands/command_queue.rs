use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    basic::color::LabelColor,
    commands::{command_buffer::label_cstring, fence::GfxFence, submit_info::GfxSubmitInfo},
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

#[derive(Clone, Debug)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// # destroy
///
/// GfxQueue 在 GfxDevice 销毁时会被销毁
pub struct GfxQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: GfxQueueFamily,
    pub(crate) gfx_device: Rc<GfxDevice>,
}
impl DebugType for GfxQueue {
    fn debug_type_name() -> &'static str {
        "GfxQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_queue
    }
}

// getter
impl GfxQueue {
    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }
}

// tools
impl GfxQueue {
    pub fn submit(&self, batches: &[GfxSubmitInfo], fence: Option<&GfxFence>) -> GfxResult<()> {
        let _label = QueueLabelScope::new(self, "cov-submit");
        unsafe {
            // batches 的存在是有必要的，submit_infos 引用的 batches 的内存
            let batches = batches.iter().map(|b| b.submit_info()).collect_vec();
            self.gfx_device
                .queue_submit2(self.vk_queue, &batches, fence.map_or(vk::Fence::null(), |f| f.handle()))
                .vk_context("vkQueueSubmit2")
        }
    }

    /// 等价于在一个 fence 上等待队列中所有的提交
    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.gfx_device.queue_wait_idle(self.vk_queue).vk_context("vkQueueWaitIdle") }
    }
}

/// queue 上的 debug label，离开作用域时结束
struct QueueLabelScope<'a> {
    queue: &'a GfxQueue,
    active: bool,
}

impl<'a> QueueLabelScope<'a> {
    fn new(queue: &'a GfxQueue, label_name: &str) -> Self {
        let Some(debug_utils) = queue.gfx_device.debug_utils() else {
            return Self { queue, active: false };
        };
        let name = label_cstring(label_name);
        unsafe {
            debug_utils.queue_begin_debug_utils_label(
                queue.vk_queue,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(LabelColor::COLOR_CMD.into()),
            );
        }
        Self { queue, active: true }
    }
}

impl Drop for QueueLabelScope<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(debug_utils) = self.queue.gfx_device.debug_utils() {
            unsafe { debug_utils.queue_end_debug_utils_label(self.queue.vk_queue) };
        }
    }
}
