use slotmap::new_key_type;

// 后端内部使用的 key，对外只暴露为不透明的 handle
new_key_type! {
    /// GfxBuffer 在 slotmap 中的 key
    pub struct GfxBufferKey;
    /// GfxComputePipeline 在 slotmap 中的 key
    pub struct ComputePipelineKey;
}
