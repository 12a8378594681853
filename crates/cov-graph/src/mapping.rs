use crate::{
    barrier::StoreSide,
    error::{GraphError, GraphResult},
    handles::MappingId,
    state::{AccessStage, AccessTracker},
};

/// 一对大小相同的 host visible buffer 和 device local buffer
///
/// host buffer 用于 CPU 读写，device buffer 绑定在 compute shader 上，两者之间通过 transfer pass 拷贝。
/// 由 Instance 独占，外部只持有 [`MappingId`]。
pub struct MemMapping<B> {
    name: String,
    size: u64,
    host: B,
    device: B,

    /// 最近一次使用这个 mapping 的 pass 类型
    stage: AccessStage,

    pub(crate) device_tracker: AccessTracker,
    pub(crate) host_tracker: AccessTracker,
}

/// 用于 finalize 失败时回滚
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MappingSnapshot {
    stage: AccessStage,
    device_tracker: AccessTracker,
    host_tracker: AccessTracker,
}

// 创建与销毁
impl<B: Copy> MemMapping<B> {
    pub(crate) fn new(name: String, size: u64, host: B, device: B) -> Self {
        Self {
            name,
            size,
            host,
            device,
            stage: AccessStage::Unknown,
            device_tracker: AccessTracker::default(),
            host_tracker: AccessTracker::default(),
        }
    }

    /// 返回需要释放的 (host, device)
    pub(crate) fn into_buffers(self) -> (B, B) {
        (self.host, self.device)
    }
}

// getters
impl<B: Copy> MemMapping<B> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn stage(&self) -> AccessStage {
        self.stage
    }

    #[inline]
    pub fn host_buffer(&self) -> B {
        self.host
    }

    #[inline]
    pub fn device_buffer(&self) -> B {
        self.device
    }

    #[inline]
    pub fn buffer(&self, side: StoreSide) -> B {
        match side {
            StoreSide::Host => self.host,
            StoreSide::Device => self.device,
        }
    }
}

// tools
impl<B: Copy> MemMapping<B> {
    #[inline]
    pub(crate) fn set_stage(&mut self, stage: AccessStage) {
        self.stage = stage;
    }

    #[inline]
    pub(crate) fn tracker_mut(&mut self, side: StoreSide) -> &mut AccessTracker {
        match side {
            StoreSide::Host => &mut self.host_tracker,
            StoreSide::Device => &mut self.device_tracker,
        }
    }

    pub(crate) fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            stage: self.stage,
            device_tracker: self.device_tracker,
            host_tracker: self.host_tracker,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: MappingSnapshot) {
        self.stage = snapshot.stage;
        self.device_tracker = snapshot.device_tracker;
        self.host_tracker = snapshot.host_tracker;
    }

    /// 拷贝之前的检查，在访问任何内存之前完成
    pub(crate) fn check_copy_len(&self, id: MappingId, len: usize) -> GraphResult<()> {
        if len == 0 {
            return Err(GraphError::EmptyCopy { mapping: id });
        }
        let requested = len as u64;
        if requested > self.size {
            return Err(GraphError::CopyOutOfBounds {
                mapping: id,
                requested,
                size: self.size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::state::BufferState;

    fn mapping_id() -> MappingId {
        SlotMap::<MappingId, ()>::with_key().insert(())
    }

    #[test]
    fn test_copy_len_bounds() {
        let id = mapping_id();
        let mapping = MemMapping::new("m".to_string(), 16, 0u32, 1u32);

        assert!(mapping.check_copy_len(id, 1).is_ok());
        assert!(mapping.check_copy_len(id, 16).is_ok());
        assert!(matches!(mapping.check_copy_len(id, 0), Err(GraphError::EmptyCopy { .. })));
        assert!(matches!(
            mapping.check_copy_len(id, 17),
            Err(GraphError::CopyOutOfBounds {
                requested: 17,
                size: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut mapping = MemMapping::new("m".to_string(), 4, 0u32, 1u32);
        let snapshot = mapping.snapshot();

        mapping.set_stage(AccessStage::ComputeWrite);
        mapping.tracker_mut(StoreSide::Device).access(BufferState::STORAGE_WRITE_COMPUTE);
        assert_ne!(mapping.snapshot(), snapshot);

        mapping.restore(snapshot);
        assert_eq!(mapping.stage(), AccessStage::Unknown);
        assert_eq!(mapping.snapshot(), snapshot);
        assert_eq!(mapping.buffer(StoreSide::Device), 1);
    }
}
