//! 时钟置换（二次机会）
//!
//! 扫描指针依次检查每个帧：共享帧和受保护帧原样跳过；
//! 引用位为 1 的帧清零后跳过，获得第二次机会；
//! 第一个引用位已经为 0 的可换出帧就是牺牲帧，指针停在它之后。
//! 牺牲帧的引用位由随后的分配重新置位。

use crate::FrameId;
use crate::frame_table::FrameTable;

pub(super) fn select_victim(
    hand: &mut FrameId,
    frames: &mut FrameTable,
    protect: Option<FrameId>,
) -> Option<FrameId> {
    let n = frames.len();
    if n == 0 {
        return None;
    }
    // 一圈清零、第二圈必然命中；再多一步仍未命中说明没有可换出的帧
    for _ in 0..=2 * n {
        let candidate = *hand % n;
        *hand = (candidate + 1) % n;
        if !frames.is_evictable(candidate, protect) {
            continue;
        }
        if frames.clear_referenced(candidate) {
            log::trace!("vmm: clock gives frame {} a second chance", candidate);
            continue;
        }
        return Some(candidate);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referenced(frames: &FrameTable, id: FrameId) -> bool {
        frames.get(id).is_some_and(|f| f.referenced)
    }

    #[test]
    fn test_second_chance() {
        let mut frames = FrameTable::new(4);
        for id in 0..4 {
            frames.assign(id, 1, id);
        }
        let mut hand = 0;
        // 全部被引用：第一圈全部清零，回到 0 号帧
        assert_eq!(select_victim(&mut hand, &mut frames, None), Some(0));
        assert_eq!(hand, 1);
        assert!((1..4).all(|id| !referenced(&frames, id)));

        // 再次访问 1 号帧，它应当被跳过
        frames.assign(0, 1, 0);
        frames.touch(1);
        assert_eq!(select_victim(&mut hand, &mut frames, None), Some(2));
        assert!(!referenced(&frames, 1));
        assert_eq!(hand, 3);
    }

    #[test]
    fn test_skips_shared_and_protected_untouched() {
        let mut frames = FrameTable::new(3);
        for id in 0..3 {
            frames.assign(id, 1, id);
        }
        frames.mark_shared(0);
        let mut hand = 0;
        assert_eq!(select_victim(&mut hand, &mut frames, Some(1)), Some(2));
        // 共享帧和受保护帧的引用位保持不变
        assert!(referenced(&frames, 0));
        assert!(referenced(&frames, 1));
        assert_eq!(hand, 0);
    }

    #[test]
    fn test_no_candidate() {
        let mut frames = FrameTable::new(2);
        frames.assign(0, 1, 0);
        frames.assign(1, 1, 1);
        frames.mark_shared(0);
        let mut hand = 0;
        assert_eq!(select_victim(&mut hand, &mut frames, Some(1)), None);
    }
}
