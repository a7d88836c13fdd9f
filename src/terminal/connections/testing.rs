//! 测试用的脚本化 PTY
//!
//! 按预设脚本发送输出与退出事件，记录写入与终止调用。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    PtyEvent, PtyHandle, PtySpawnRequest, PtySpawner, SpawnedPty, TermSize,
    PTY_EVENT_CHANNEL_CAPACITY,
};
use crate::terminal::error::TerminalError;

/// 终止后发送的退出码
pub const KILLED_EXIT_CODE: i32 = 137;

/// 一步脚本
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Output(&'static str),
    Sleep(Duration),
    Exit(i32),
}

/// 脚本化 PTY 启动器
#[derive(Default)]
pub struct ScriptedPtySpawner {
    script: Vec<ScriptStep>,
    fail: bool,
    pub requests: Mutex<Vec<PtySpawnRequest>>,
    pub handles: Mutex<Vec<Arc<ScriptedPty>>>,
    pub spawn_count: AtomicUsize,
}

impl ScriptedPtySpawner {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// 每次启动都失败
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn last_request(&self) -> Option<PtySpawnRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn last_handle(&self) -> Option<Arc<ScriptedPty>> {
        self.handles.lock().last().cloned()
    }
}

impl PtySpawner for ScriptedPtySpawner {
    fn spawn(&self, request: PtySpawnRequest) -> Result<SpawnedPty, TerminalError> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if self.fail {
            return Err(TerminalError::PtyCreationFailed(
                "No such file or directory (os error 2)".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(PTY_EVENT_CHANNEL_CAPACITY);
        let handle = Arc::new(ScriptedPty {
            tx: tx.clone(),
            alive: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
        });
        self.handles.lock().push(handle.clone());

        let script = self.script.clone();
        let runner = handle.clone();
        tokio::spawn(async move {
            for step in script {
                if !runner.is_alive() {
                    return;
                }
                match step {
                    ScriptStep::Output(text) => {
                        let _ = tx.send(PtyEvent::Data(text.as_bytes().to_vec())).await;
                    }
                    ScriptStep::Sleep(d) => tokio::time::sleep(d).await,
                    ScriptStep::Exit(code) => {
                        runner.alive.store(false, Ordering::SeqCst);
                        let _ = tx.send(PtyEvent::Exit(code)).await;
                        return;
                    }
                }
            }
        });

        Ok(SpawnedPty { handle, events: rx })
    }
}

/// 脚本化 PTY 句柄
pub struct ScriptedPty {
    tx: mpsc::Sender<PtyEvent>,
    alive: AtomicBool,
    pub killed: AtomicBool,
    pub written: Mutex<Vec<u8>>,
    pub sizes: Mutex<Vec<TermSize>>,
}

impl ScriptedPty {
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl PtyHandle for ScriptedPty {
    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if !self.is_alive() {
            return Err(TerminalError::ProcessExited);
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.sizes.lock().push(size);
        Ok(())
    }

    fn kill(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.killed.store(true, Ordering::SeqCst);
            let _ = self.tx.try_send(PtyEvent::Exit(KILLED_EXIT_CODE));
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
