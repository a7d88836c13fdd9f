//! 会话注册表
//!
//! 持久化键 → 时间线。切换标签页等界面重建不会丢失时间线，
//! 只有显式关闭才删除。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use super::store::Timeline;

/// 会话注册表
pub struct SessionRegistry {
    max_blocks: usize,
    timelines: RwLock<HashMap<String, Arc<Timeline>>>,
}

impl SessionRegistry {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            max_blocks,
            timelines: RwLock::new(HashMap::new()),
        }
    }

    /// 获取或创建时间线
    ///
    /// # 参数
    /// - `cwd`: 新建时使用的初始目录
    pub fn get_or_create(&self, key: &str, cwd: impl Into<PathBuf>) -> Arc<Timeline> {
        if let Some(timeline) = self.timelines.read().get(key) {
            return timeline.clone();
        }
        let mut timelines = self.timelines.write();
        timelines
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::info!("[SessionRegistry] 创建时间线: key={}", key);
                Arc::new(Timeline::new(key, cwd, self.max_blocks))
            })
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Timeline>> {
        self.timelines.read().get(key).cloned()
    }

    /// 删除时间线
    pub fn remove(&self, key: &str) -> Option<Arc<Timeline>> {
        let removed = self.timelines.write().remove(key);
        if removed.is_some() {
            tracing::info!("[SessionRegistry] 删除时间线: key={}", key);
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.timelines.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.timelines.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.timelines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.read().is_empty()
    }
}
