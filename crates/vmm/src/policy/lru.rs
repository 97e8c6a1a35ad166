//! 精确 LRU 置换

use crate::FrameId;
use crate::frame_table::FrameTable;

/// 在可换出帧中选择时间戳最小的一个，相同时取编号最小者
pub(super) fn select_victim(frames: &FrameTable, protect: Option<FrameId>) -> Option<FrameId> {
    frames
        .iter()
        .filter(|&(id, _)| frames.is_evictable(id, protect))
        .min_by_key(|&(id, f)| (f.last_used, id))
        .map(|(id, _)| id)
}
