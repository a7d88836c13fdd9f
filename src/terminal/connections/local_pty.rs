//! 本地 PTY 连接实现
//!
//! 基于 portable-pty 启动本地子进程，输出由独立线程读取后写入事件通道。
//!
//! ## 功能
//! - 创建 PTY 并在其中启动命令
//! - 读取线程：输出 → `PtyEvent::Data`，EOF 后等待进程并发送 `PtyEvent::Exit`
//! - 写入、调整大小、终止

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use super::{
    PtyEvent, PtyHandle, PtySpawnRequest, PtySpawner, SpawnedPty, TermSize,
    PTY_EVENT_CHANNEL_CAPACITY,
};
use crate::terminal::error::TerminalError;

/// 本地 PTY 启动器
#[derive(Debug, Default, Clone)]
pub struct LocalPtySpawner;

impl LocalPtySpawner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(request: &PtySpawnRequest) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&request.shell);
        for arg in &request.args {
            cmd.arg(arg);
        }
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl PtySpawner for LocalPtySpawner {
    fn spawn(&self, request: PtySpawnRequest) -> Result<SpawnedPty, TerminalError> {
        tracing::info!(
            "[LocalPty] 创建进程: block_id={}, shell={}, cwd={}, size={}x{}",
            request.label,
            request.shell,
            request.cwd.display(),
            request.size.cols,
            request.size.rows
        );

        let pair = native_pty_system()
            .openpty(to_pty_size(request.size))
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(Self::build_command(&request))
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;
        // 释放 slave 端，子进程退出后读取端才能收到 EOF
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::PtyCreationFailed(e.to_string()))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let exited = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(PTY_EVENT_CHANNEL_CAPACITY);

        spawn_output_reader(request.label.clone(), reader, child, tx, exited.clone());

        let handle = LocalPty {
            label: request.label,
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            exited,
            pid,
        };

        Ok(SpawnedPty {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

fn to_pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// 启动输出读取线程
fn spawn_output_reader(
    label: String,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::Sender<PtyEvent>,
    exited: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buffer = [0u8; 4096];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(PtyEvent::Data(buffer[..n].to_vec())).is_err() {
                        tracing::debug!("[LocalPty] 事件接收端已关闭: block_id={}", label);
                        break;
                    }
                }
                Err(e) => {
                    // Linux 上子进程退出后读取返回 EIO
                    tracing::debug!("[LocalPty] 读取结束: block_id={}, error={}", label, e);
                    break;
                }
            }
        }

        let exit_code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(e) => {
                tracing::warn!("[LocalPty] 等待进程失败: block_id={}, error={}", label, e);
                1
            }
        };
        exited.store(true, Ordering::SeqCst);
        tracing::info!(
            "[LocalPty] 进程已退出: block_id={}, exit_code={}",
            label,
            exit_code
        );
        let _ = tx.blocking_send(PtyEvent::Exit(exit_code));
    });
}

/// 本地 PTY 句柄
pub struct LocalPty {
    label: String,
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl PtyHandle for LocalPty {
    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(TerminalError::ProcessExited);
        }
        let mut writer = self.writer.lock();
        writer
            .write_all(data)
            .map_err(|e| TerminalError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TerminalError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.master
            .lock()
            .resize(to_pty_size(size))
            .map_err(|e| TerminalError::ResizeFailed(e.to_string()))?;
        tracing::debug!(
            "[LocalPty] 调整大小: block_id={}, size={}x{}",
            self.label,
            size.cols,
            size.rows
        );
        Ok(())
    }

    fn kill(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!("[LocalPty] 终止进程: block_id={}", self.label);
        if let Err(e) = self.killer.lock().kill() {
            tracing::warn!("[LocalPty] 终止失败: block_id={}, error={}", self.label, e);
        }
    }

    fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
