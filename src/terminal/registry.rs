//! 进程句柄注册表
//!
//! 按块 ID 管理运行中的 PTY 句柄。
//!
//! ## 功能
//! - 按 block_id 注册 / 查找 / 删除句柄
//! - 写入与调整大小前先确认句柄仍在注册表中
//! - 终止并移除句柄

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::connections::{PtyHandle, TermSize};
use super::error::TerminalError;

/// 进程句柄注册表
///
/// 使用 HashMap + RwLock 实现线程安全的句柄管理。
pub struct ProcessRegistry {
    /// 句柄映射表: block_id -> PtyHandle
    handles: RwLock<HashMap<String, Arc<dyn PtyHandle>>>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// 注册句柄
    ///
    /// # 返回
    /// 如果已存在同 block_id 的句柄，返回旧句柄
    pub async fn register(
        &self,
        block_id: String,
        handle: Arc<dyn PtyHandle>,
    ) -> Option<Arc<dyn PtyHandle>> {
        let mut handles = self.handles.write().await;
        handles.insert(block_id, handle)
    }

    /// 获取句柄
    pub async fn get(&self, block_id: &str) -> Option<Arc<dyn PtyHandle>> {
        let handles = self.handles.read().await;
        handles.get(block_id).cloned()
    }

    /// 删除句柄
    pub async fn remove(&self, block_id: &str) -> Option<Arc<dyn PtyHandle>> {
        let mut handles = self.handles.write().await;
        handles.remove(block_id)
    }

    /// 检查句柄是否存在
    pub async fn contains(&self, block_id: &str) -> bool {
        let handles = self.handles.read().await;
        handles.contains_key(block_id)
    }

    /// 获取所有块 ID
    pub async fn list_block_ids(&self) -> Vec<String> {
        let handles = self.handles.read().await;
        handles.keys().cloned().collect()
    }

    /// 获取句柄数量
    pub async fn len(&self) -> usize {
        let handles = self.handles.read().await;
        handles.len()
    }

    /// 检查注册表是否为空
    pub async fn is_empty(&self) -> bool {
        let handles = self.handles.read().await;
        handles.is_empty()
    }

    /// 写入数据
    ///
    /// # 返回
    /// - `Err(TerminalError::ProcessNotFound)`: 句柄已被移除
    pub async fn write(&self, block_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        let handle = self
            .get(block_id)
            .await
            .ok_or_else(|| TerminalError::ProcessNotFound(block_id.to_string()))?;
        handle.write(data)
    }

    /// 调整终端大小
    pub async fn resize(&self, block_id: &str, size: TermSize) -> Result<(), TerminalError> {
        let handle = self
            .get(block_id)
            .await
            .ok_or_else(|| TerminalError::ProcessNotFound(block_id.to_string()))?;
        handle.resize(size)
    }

    /// 终止并移除句柄
    ///
    /// # 返回
    /// 句柄存在且进程仍在运行时返回 true
    pub async fn kill(&self, block_id: &str) -> bool {
        match self.remove(block_id).await {
            Some(handle) => {
                let alive = handle.is_alive();
                if alive {
                    handle.kill();
                }
                tracing::info!(
                    "[ProcessRegistry] 移除进程: block_id={}, alive={}",
                    block_id,
                    alive
                );
                alive
            }
            None => false,
        }
    }

    /// 终止并清空所有句柄
    pub async fn kill_all(&self) {
        let mut handles = self.handles.write().await;
        for (block_id, handle) in handles.drain() {
            if handle.is_alive() {
                tracing::info!("[ProcessRegistry] 终止进程: block_id={}", block_id);
                handle.kill();
            }
        }
    }
}
