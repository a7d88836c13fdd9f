//! 时间线驱逐策略
//!
//! 块数超过上限时：保留全部活跃块，剩余容量留给最近的已完成块，
//! 结果按创建时间排序。活跃块数超过上限时时间线允许暂时超限。

use infinitty_core::Block;

/// 执行驱逐
///
/// # 返回
/// `(保留的块, 被驱逐的块)`
pub fn evict(blocks: Vec<Block>, cap: usize) -> (Vec<Block>, Vec<Block>) {
    if blocks.len() <= cap {
        return (blocks, Vec::new());
    }

    // 创建时间相同时按原位置区分先后
    let (active, mut completed): (Vec<_>, Vec<_>) = blocks
        .into_iter()
        .enumerate()
        .partition(|(_, block)| block.is_active());

    let room = cap.saturating_sub(active.len());
    completed.sort_by_key(|(idx, block)| (block.created_at(), *idx));
    let kept_completed = completed.split_off(completed.len().saturating_sub(room));

    let mut kept: Vec<(usize, Block)> = active.into_iter().chain(kept_completed).collect();
    kept.sort_by_key(|(idx, block)| (block.created_at(), *idx));

    let kept = kept.into_iter().map(|(_, b)| b).collect();
    let evicted = completed.into_iter().map(|(_, b)| b).collect();
    (kept, evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infinitty_core::{AgentBackend, AiResponseBlock, CommandBlock};

    fn command(created_at: i64, running: bool) -> Block {
        let mut block = CommandBlock::new(format!("echo {created_at}"), "/");
        block.created_at = created_at;
        block.is_running = running;
        Block::Command(block)
    }

    #[test]
    fn test_under_cap_is_untouched() {
        let blocks = vec![command(2, false), command(1, false)];
        let (kept, evicted) = evict(blocks.clone(), 5);
        assert_eq!(kept, blocks);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_keeps_most_recent_completed() {
        let blocks: Vec<Block> = (0..10).map(|i| command(i, false)).collect();
        let (kept, evicted) = evict(blocks, 4);
        let times: Vec<i64> = kept.iter().map(Block::created_at).collect();
        assert_eq!(times, vec![6, 7, 8, 9]);
        assert_eq!(evicted.len(), 6);
    }

    #[test]
    fn test_active_blocks_survive() {
        let mut blocks: Vec<Block> = (0..6).map(|i| command(i, false)).collect();
        let mut streaming = AiResponseBlock::streaming("q", "m", AgentBackend::Persistent);
        streaming.created_at = 0;
        blocks.insert(0, Block::AiResponse(streaming.clone()));

        let (kept, _) = evict(blocks, 3);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].id(), streaming.id);
        let times: Vec<i64> = kept.iter().map(Block::created_at).collect();
        assert_eq!(times, vec![0, 4, 5]);
    }

    #[test]
    fn test_active_over_cap_exceeds_limit() {
        let blocks: Vec<Block> = (0..5).map(|i| command(i, true)).collect();
        let (kept, evicted) = evict(blocks, 2);
        assert_eq!(kept.len(), 5);
        assert!(evicted.is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_blocks() -> impl Strategy<Value = Vec<(i64, bool)>> {
            prop::collection::vec((0i64..50, prop::bool::weighted(0.2)), 0..80)
        }

        proptest! {
            #[test]
            fn prop_active_blocks_never_evicted(spec in arb_blocks(), cap in 0usize..40) {
                let blocks: Vec<Block> = spec.iter().map(|(t, a)| command(*t, *a)).collect();
                let active_ids: Vec<String> = blocks
                    .iter()
                    .filter(|b| b.is_active())
                    .map(|b| b.id().to_string())
                    .collect();

                let (kept, evicted) = evict(blocks.clone(), cap);

                for id in &active_ids {
                    prop_assert!(kept.iter().any(|b| b.id() == id));
                }
                prop_assert!(kept.len() <= cap.max(active_ids.len()));
                prop_assert_eq!(kept.len() + evicted.len(), blocks.len());
                prop_assert!(evicted.iter().all(|b| !b.is_active()));
            }

            #[test]
            fn prop_keeps_n_most_recent_sorted(n in 1usize..60, cap in 1usize..30) {
                let blocks: Vec<Block> = (0..n as i64).map(|i| command(i, false)).collect();
                let (kept, _) = evict(blocks.clone(), cap);

                let expected: Vec<&str> = blocks
                    .iter()
                    .skip(n.saturating_sub(cap))
                    .map(Block::id)
                    .collect();
                let actual: Vec<&str> = kept.iter().map(Block::id).collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
