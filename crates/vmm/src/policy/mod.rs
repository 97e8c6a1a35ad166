//! 页面置换策略
//!
//! 整个运行期间只使用一种策略，因此用一个带状态的枚举表示，
//! 通过 [`ReplacementPolicy::find_free`] 和 [`ReplacementPolicy::select_victim`]
//! 两个入口分派。
//!
//! ## 空闲帧
//!
//! - 不置换：按单调递增的 `next_free` 计数器分配；计数器用完后，
//!   再扫描被进程退出释放的帧。
//! - 其余策略：取编号最小的空闲帧。
//!
//! ## 牺牲帧
//!
//! 只有在没有空闲帧时才选择牺牲帧。共享帧和调用方保护的帧永远不会被选中。
//! 选中的帧可能仍有属主，由调用方负责让属主先换出。

mod clock;
mod lru;
mod random;

use crate::config::PolicyKind;
use crate::error::{VmError, VmResult};
use crate::frame_table::FrameTable;
use crate::FrameId;
use rand::SeedableRng;
use rand::rngs::SmallRng;

/// 页面置换策略及其状态
#[derive(Debug, Clone)]
pub enum ReplacementPolicy {
    /// 不置换
    NoReplacement {
        /// 下一个从未分配过的帧
        next_free: FrameId,
    },
    /// 随机置换
    Random {
        /// 随机数发生器
        rng: SmallRng,
    },
    /// 时钟（二次机会）
    ClockLru {
        /// 扫描指针，指向下一个要检查的帧
        hand: FrameId,
    },
    /// 精确 LRU
    ExactLru,
}

impl ReplacementPolicy {
    /// 创建策略，`seed` 只对随机策略有效
    pub fn new(kind: PolicyKind, seed: u64) -> Self {
        match kind {
            PolicyKind::NoReplacement => ReplacementPolicy::NoReplacement { next_free: 0 },
            PolicyKind::Random => ReplacementPolicy::Random {
                rng: SmallRng::seed_from_u64(seed),
            },
            PolicyKind::ClockLru => ReplacementPolicy::ClockLru { hand: 0 },
            PolicyKind::ExactLru => ReplacementPolicy::ExactLru,
        }
    }

    /// 策略种类
    pub fn kind(&self) -> PolicyKind {
        match self {
            ReplacementPolicy::NoReplacement { .. } => PolicyKind::NoReplacement,
            ReplacementPolicy::Random { .. } => PolicyKind::Random,
            ReplacementPolicy::ClockLru { .. } => PolicyKind::ClockLru,
            ReplacementPolicy::ExactLru => PolicyKind::ExactLru,
        }
    }

    /// 是否会换出页面
    pub fn replaces(&self) -> bool {
        !matches!(self, ReplacementPolicy::NoReplacement { .. })
    }

    /// 找一个空闲帧
    pub fn find_free(&mut self, frames: &FrameTable) -> Option<FrameId> {
        match self {
            ReplacementPolicy::NoReplacement { next_free } => {
                while *next_free < frames.len() {
                    let frame = *next_free;
                    *next_free += 1;
                    if frames.get(frame).is_some_and(|f| f.is_free()) {
                        return Some(frame);
                    }
                }
                frames.first_free()
            }
            _ => frames.first_free(),
        }
    }

    /// 所有帧都被占用时选择牺牲帧
    pub fn select_victim(
        &mut self,
        frames: &mut FrameTable,
        protect: Option<FrameId>,
    ) -> VmResult<FrameId> {
        let victim = match self {
            ReplacementPolicy::NoReplacement { .. } => return Err(VmError::OutOfPhysicalMemory),
            ReplacementPolicy::Random { rng } => random::select_victim(rng, frames, protect),
            ReplacementPolicy::ClockLru { hand } => clock::select_victim(hand, frames, protect),
            ReplacementPolicy::ExactLru => lru::select_victim(frames, protect),
        };
        match victim {
            Some(frame) => {
                log::trace!("vmm: {:?} picked victim frame {}", self.kind(), frame);
                Ok(frame)
            }
            None => {
                log::error!("vmm: {:?} found no evictable frame", self.kind());
                Err(VmError::NoEvictableFrame)
            }
        }
    }

    /// 能否再挂载 `pages` 个共享页
    ///
    /// 不置换时需要足够的空闲帧；其余策略必须至少留下一个非共享帧用于置换。
    pub fn can_attach(&self, frames: &FrameTable, pages: usize) -> bool {
        if self.replaces() {
            frames.shared_count() + pages < frames.len()
        } else {
            frames.free_count() >= pages
        }
    }
}
