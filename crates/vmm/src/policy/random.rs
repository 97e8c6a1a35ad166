//! 随机置换

use crate::FrameId;
use crate::frame_table::FrameTable;
use rand::Rng;
use rand::rngs::SmallRng;

/// 均匀随机抽取帧号，抽到共享帧或受保护帧就重抽
pub(super) fn select_victim(
    rng: &mut SmallRng,
    frames: &FrameTable,
    protect: Option<FrameId>,
) -> Option<FrameId> {
    let n = frames.len();
    if !(0..n).any(|id| frames.is_evictable(id, protect)) {
        return None;
    }
    loop {
        let candidate = rng.gen_range(0..n);
        if frames.is_evictable(candidate, protect) {
            return Some(candidate);
        }
    }
}
