//! 时间线虚拟化
//!
//! 只渲染视口附近的块：按块类型估算高度、计算累计偏移、二分查找可见范围，
//! 并维护贴底滚动状态。
//!
//! ## 功能
//! - 高度估算（AI 响应按文本长度）
//! - 累计偏移（每次时间线变化重算一次）
//! - 可见范围 = 与 `[scroll_top - buffer, scroll_top + height + buffer]` 相交的块
//! - 贴底模式与"跳到底部"提示

use std::ops::Range;

use serde::{Deserialize, Serialize};

use infinitty_core::config::VirtualizerConfig;
use infinitty_core::Block;

const COMMAND_HEIGHT: f64 = 120.0;
const INTERACTIVE_HEIGHT: f64 = 420.0;
const DISMISSED_INTERACTIVE_HEIGHT: f64 = 48.0;
const MESSAGE_HEIGHT: f64 = 48.0;
const TOOL_OUTPUT_HEIGHT: f64 = 96.0;
const AI_BASE_HEIGHT: f64 = 96.0;
const AI_CHARS_PER_LINE: usize = 100;
const AI_LINE_HEIGHT: f64 = 22.0;

/// 估算块高度（像素）
pub fn estimate_height(block: &Block) -> f64 {
    match block {
        Block::Command(_) => COMMAND_HEIGHT,
        Block::Interactive(b) if b.dismissed => DISMISSED_INTERACTIVE_HEIGHT,
        Block::Interactive(_) => INTERACTIVE_HEIGHT,
        Block::AiResponse(b) => {
            let chars = b.response.chars().count();
            let lines = chars.div_ceil(AI_CHARS_PER_LINE);
            AI_BASE_HEIGHT + lines as f64 * AI_LINE_HEIGHT
        }
        Block::Error(_) | Block::System(_) => MESSAGE_HEIGHT,
        Block::ToolOutput(_) => TOOL_OUTPUT_HEIGHT,
    }
}

/// 时间线变化后的滚动动作
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScrollAction {
    /// 贴底模式：滚动到新的底部
    ScrollTo { top: f64 },
    /// 用户在浏览历史：显示"跳到底部"
    ShowJumpToBottom,
    None,
}

/// 虚拟化器
#[derive(Debug, Clone)]
pub struct Virtualizer {
    buffer: f64,
    threshold: f64,
    /// offsets[i] 为第 i 个块的起始位置，最后一项为总高度
    offsets: Vec<f64>,
    scroll_top: f64,
    viewport_height: f64,
    sticky: bool,
    show_jump: bool,
}

impl Default for Virtualizer {
    fn default() -> Self {
        Self::new(&VirtualizerConfig::default())
    }
}

impl Virtualizer {
    pub fn new(config: &VirtualizerConfig) -> Self {
        Self {
            buffer: config.buffer_px.max(0.0),
            threshold: config.near_bottom_threshold_px.max(0.0),
            offsets: vec![0.0],
            scroll_top: 0.0,
            viewport_height: 0.0,
            sticky: true,
            show_jump: false,
        }
    }

    /// 使用估算高度重算偏移
    pub fn set_blocks(&mut self, blocks: &[Block]) {
        self.set_heights(blocks.iter().map(estimate_height));
    }

    /// 使用给定高度重算偏移
    pub fn set_heights<I>(&mut self, heights: I)
    where
        I: IntoIterator<Item = f64>,
    {
        let mut offsets = vec![0.0];
        let mut total = 0.0;
        for h in heights {
            total += h.max(0.0);
            offsets.push(total);
        }
        self.offsets = offsets;
    }

    pub fn total_height(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 第 i 个块的起始位置
    pub fn offset_of(&self, index: usize) -> Option<f64> {
        (index < self.len()).then(|| self.offsets[index])
    }

    /// 可见范围（半开区间）
    pub fn visible_range(&self, scroll_top: f64, viewport_height: f64) -> Range<usize> {
        let n = self.len();
        if n == 0 {
            return 0..0;
        }
        let top = scroll_top - self.buffer;
        let bottom = scroll_top + viewport_height.max(0.0) + self.buffer;

        // 第一个结束位置大于 top 的块
        let start = self.offsets[1..].partition_point(|end| *end <= top);
        // 第一个起始位置不小于 bottom 的块
        let end = self.offsets[..n].partition_point(|begin| *begin < bottom);
        start.min(end)..end
    }

    /// 当前视口的可见范围
    pub fn current_range(&self) -> Range<usize> {
        self.visible_range(self.scroll_top, self.viewport_height)
    }

    fn bottom_top(&self) -> f64 {
        (self.total_height() - self.viewport_height).max(0.0)
    }

    fn is_near_bottom(&self) -> bool {
        self.bottom_top() - self.scroll_top <= self.threshold
    }

    /// 用户滚动
    pub fn on_scroll(&mut self, scroll_top: f64, viewport_height: f64) {
        self.scroll_top = scroll_top.max(0.0);
        self.viewport_height = viewport_height.max(0.0);
        self.sticky = self.is_near_bottom();
        if self.sticky {
            self.show_jump = false;
        }
    }

    /// 时间线变化（追加、更新、流式增长）
    pub fn on_timeline_changed(&mut self, blocks: &[Block]) -> ScrollAction {
        self.set_blocks(blocks);
        if self.sticky {
            self.scroll_top = self.bottom_top();
            self.show_jump = false;
            ScrollAction::ScrollTo {
                top: self.scroll_top,
            }
        } else if self.bottom_top() > self.scroll_top {
            self.show_jump = true;
            ScrollAction::ShowJumpToBottom
        } else {
            ScrollAction::None
        }
    }

    /// 点击"跳到底部"
    pub fn jump_to_bottom(&mut self) -> f64 {
        self.sticky = true;
        self.show_jump = false;
        self.scroll_top = self.bottom_top();
        self.scroll_top
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn shows_jump_to_bottom(&self) -> bool {
        self.show_jump
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infinitty_core::{AgentBackend, AiResponseBlock, InteractiveBlock};

    fn uniform(n: usize, h: f64) -> Virtualizer {
        let mut v = Virtualizer::default();
        v.set_heights(std::iter::repeat(h).take(n));
        v
    }

    #[test]
    fn test_estimates_by_kind() {
        let mut ai = AiResponseBlock::streaming("q", "m", AgentBackend::Persistent);
        let empty = estimate_height(&Block::AiResponse(ai.clone()));
        ai.response = "x".repeat(250);
        let long = estimate_height(&Block::AiResponse(ai));
        assert_eq!(empty, AI_BASE_HEIGHT);
        assert_eq!(long, AI_BASE_HEIGHT + 3.0 * AI_LINE_HEIGHT);

        let mut inter = InteractiveBlock::new("vim", "/");
        assert_eq!(estimate_height(&Block::Interactive(inter.clone())), INTERACTIVE_HEIGHT);
        inter.dismissed = true;
        assert!(estimate_height(&Block::Interactive(inter)) < INTERACTIVE_HEIGHT);
    }

    #[test]
    fn test_visible_range_at_top_includes_buffer() {
        // 10 个 100px 的块，视口 100px，缓冲 500px：覆盖 [-500, 600]
        let v = uniform(10, 100.0);
        let range = v.visible_range(0.0, 100.0);
        assert_eq!(range, 0..6);
        assert!(range.contains(&0));
    }

    #[test]
    fn test_visible_range_in_middle() {
        let v = uniform(100, 100.0);
        // [2000, 3600] → 块 20..36
        assert_eq!(v.visible_range(2500.0, 600.0), 20..36);
    }

    #[test]
    fn test_visible_range_past_end_and_empty() {
        let v = uniform(5, 100.0);
        assert_eq!(v.visible_range(10_000.0, 100.0), 5..5);
        assert_eq!(Virtualizer::default().visible_range(0.0, 100.0), 0..0);
    }

    #[test]
    fn test_offsets() {
        let mut v = Virtualizer::default();
        v.set_heights([10.0, 20.0, 30.0]);
        assert_eq!(v.total_height(), 60.0);
        assert_eq!(v.offset_of(2), Some(30.0));
        assert_eq!(v.offset_of(3), None);
    }

    #[test]
    fn test_sticky_follows_new_content() {
        let mut v = uniform(10, 100.0);
        v.on_scroll(500.0, 500.0);
        assert!(v.is_sticky());

        let blocks: Vec<Block> = (0..12).map(|i| Block::system(format!("m{i}"))).collect();
        let action = v.on_timeline_changed(&blocks);
        let expected = 12.0 * MESSAGE_HEIGHT - 500.0;
        assert_eq!(action, ScrollAction::ScrollTo { top: expected.max(0.0) });
        assert!(!v.shows_jump_to_bottom());
    }

    #[test]
    fn test_scrolled_up_shows_jump_affordance() {
        let mut v = uniform(20, 100.0);
        v.on_scroll(0.0, 500.0);
        assert!(!v.is_sticky());

        let blocks: Vec<Block> = (0..30).map(|i| Block::system(format!("m{i}"))).collect();
        assert_eq!(v.on_timeline_changed(&blocks), ScrollAction::ShowJumpToBottom);
        assert!(v.shows_jump_to_bottom());
        assert_eq!(v.scroll_top(), 0.0);

        let top = v.jump_to_bottom();
        assert_eq!(top, 30.0 * MESSAGE_HEIGHT - 500.0);
        assert!(v.is_sticky());
        assert!(!v.shows_jump_to_bottom());
    }

    #[test]
    fn test_near_bottom_threshold() {
        let mut v = uniform(20, 100.0);
        // 底部位置 1500，阈值 100
        v.on_scroll(1420.0, 500.0);
        assert!(v.is_sticky());
        v.on_scroll(1350.0, 500.0);
        assert!(!v.is_sticky());
    }
}
