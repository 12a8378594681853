use slotmap::new_key_type;

new_key_type! {
    /// Instance 内 mapping 的 handle
    pub struct MappingId;
    /// Instance 内 pass 的 handle，transfer pass 和 compute pass 共用
    pub struct PassId;
}
