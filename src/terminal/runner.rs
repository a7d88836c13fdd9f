//! 一次性命令执行器
//!
//! 每条命令启动一个独立 PTY，按分类决定输出处理方式。
//!
//! ## 功能
//! - simple 模式：累积原始输出，按固定间隔合并刷新清洗后的文本到命令块
//! - interactive 模式：原始输出逐条通过事件总线转发给界面终端
//! - 成功的 `cd <path>` 更新时间线目录并发送目录切换事件
//! - 启动失败记录为退出码 1
//! - 块完成后的迟到输出被丢弃

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use infinitty_core::config::RunnerConfig;
use infinitty_core::{Block, BlockId, CommandBlock, InteractiveBlock};
use infinitty_infra::OutputSanitizer;

use super::classify::{parse_cd_target, resolve_cd_path, CommandClassifier, CommandMode};
use super::connections::{PtyEvent, PtyHandle, PtySpawnRequest, PtySpawner, TermSize};
use super::error::TerminalError;
use super::events::{DirectoryChangedEvent, EngineEvent, EventBus};
use super::registry::ProcessRegistry;
use super::shell_env::{command_env, login_shell_path, resolve_shell, ShellType};
use crate::timeline::Timeline;

/// 启动失败时写入块的提示
pub const SPAWN_FAILED_MESSAGE: &str = "命令启动失败";

/// 启动失败与事件通道异常关闭时的退出码
const FAILURE_EXIT_CODE: i32 = 1;

/// 一次执行的句柄
pub struct CommandHandle {
    pub block_id: BlockId,
    pub mode: CommandMode,
    task: Option<JoinHandle<()>>,
}

impl CommandHandle {
    /// 等待输出处理结束
    pub async fn wait(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                tracing::warn!("[CommandRunner] 输出任务异常结束: block_id={}, error={}", self.block_id, e);
            }
        }
    }

    /// 输出处理是否已结束
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

/// 命令执行器
pub struct CommandRunner {
    config: RunnerConfig,
    classifier: CommandClassifier,
    sanitizer: Arc<OutputSanitizer>,
    spawner: Arc<dyn PtySpawner>,
    processes: Arc<ProcessRegistry>,
    events: EventBus,
    /// 固定 PATH（跳过登录 shell 捕获）
    fixed_path: Option<String>,
}

impl CommandRunner {
    pub fn new(
        config: RunnerConfig,
        spawner: Arc<dyn PtySpawner>,
        processes: Arc<ProcessRegistry>,
        events: EventBus,
    ) -> Self {
        let sanitizer = OutputSanitizer::new(&config.prompt_pattern).unwrap_or_else(|e| {
            tracing::warn!(
                "[CommandRunner] 提示符正则无效，使用默认值: pattern={}, error={}",
                config.prompt_pattern,
                e
            );
            OutputSanitizer::default()
        });
        Self {
            classifier: CommandClassifier::new(config.simple_commands.iter().cloned()),
            sanitizer: Arc::new(sanitizer),
            config,
            spawner,
            processes,
            events,
            fixed_path: None,
        }
    }

    /// 使用固定 PATH
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.fixed_path = Some(path.into());
        self
    }

    pub fn classify(&self, command: &str) -> CommandMode {
        self.classifier.classify(command)
    }

    pub fn dismiss_exit_code(&self) -> i32 {
        self.config.dismiss_exit_code
    }

    /// 执行命令
    ///
    /// 追加块后立即返回，输出在后台任务中处理。
    ///
    /// # 返回
    /// - `Ok(CommandHandle)`: 新块的 ID 与后台任务
    /// - `Err(TerminalError::EmptyCommand)`: 命令为空
    pub async fn run(
        &self,
        timeline: Arc<Timeline>,
        command: &str,
    ) -> Result<CommandHandle, TerminalError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(TerminalError::EmptyCommand);
        }

        let mode = self.classify(command);
        let cwd = effective_cwd(&timeline.cwd());
        let shell = resolve_shell(self.config.shell.as_deref());
        let path = self.path_for(&shell).await;

        let block: Block = match mode {
            CommandMode::Simple => CommandBlock::new(command, cwd.clone()).into(),
            CommandMode::Interactive => InteractiveBlock::new(command, cwd.clone()).into(),
        };
        let block_id = block.id().to_string();
        timeline.append(block);

        tracing::info!(
            "[CommandRunner] 执行命令: key={}, block_id={}, mode={:?}, cwd={:?}",
            timeline.key(),
            block_id,
            mode,
            cwd
        );

        let request = PtySpawnRequest {
            label: block_id.clone(),
            args: ShellType::from_path(&shell).command_args(command),
            shell,
            cwd: cwd.clone(),
            env: command_env(path.as_deref()),
            size: TermSize {
                rows: self.config.rows,
                cols: self.config.cols,
            },
        };

        let spawned = match self.spawner.spawn(request) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(
                    "[CommandRunner] 启动失败: block_id={}, command={}, error={}",
                    block_id,
                    command,
                    e
                );
                record_spawn_failure(&timeline, &block_id);
                return Ok(CommandHandle {
                    block_id,
                    mode,
                    task: None,
                });
            }
        };

        self.processes
            .register(block_id.clone(), spawned.handle.clone())
            .await;

        let task = match mode {
            CommandMode::Simple => {
                let run = SimpleRun {
                    timeline,
                    block_id: block_id.clone(),
                    command: command.to_string(),
                    cwd,
                    sanitizer: self.sanitizer.clone(),
                    processes: self.processes.clone(),
                    events: self.events.clone(),
                    flush_interval: Duration::from_millis(self.config.flush_interval_ms),
                };
                tokio::spawn(run.consume(spawned.handle, spawned.events))
            }
            CommandMode::Interactive => {
                let run = InteractiveRun {
                    timeline,
                    block_id: block_id.clone(),
                    processes: self.processes.clone(),
                    events: self.events.clone(),
                };
                tokio::spawn(run.forward(spawned.events))
            }
        };

        Ok(CommandHandle {
            block_id,
            mode,
            task: Some(task),
        })
    }

    async fn path_for(&self, shell: &str) -> Option<String> {
        if let Some(path) = &self.fixed_path {
            return Some(path.clone());
        }
        let shell = shell.to_string();
        match tokio::task::spawn_blocking(move || login_shell_path(&shell)).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("[CommandRunner] 获取登录 PATH 失败: {}", e);
                std::env::var("PATH").ok()
            }
        }
    }
}

/// 目录不存在时退回主目录
fn effective_cwd(cwd: &Path) -> PathBuf {
    if cwd.is_dir() {
        return cwd.to_path_buf();
    }
    let fallback = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    tracing::warn!(
        "[CommandRunner] 工作目录不存在，使用 {:?}: cwd={:?}",
        fallback,
        cwd
    );
    fallback
}

fn record_spawn_failure(timeline: &Timeline, block_id: &str) {
    timeline.complete(block_id, |block| {
        let now = Utc::now().timestamp_millis();
        match block {
            Block::Command(b) => {
                b.output = SPAWN_FAILED_MESSAGE.to_string();
                b.exit_code = Some(FAILURE_EXIT_CODE);
                b.is_running = false;
                b.ended_at = Some(now);
            }
            Block::Interactive(b) => {
                b.exit_code = Some(FAILURE_EXIT_CODE);
                b.is_running = false;
            }
            _ => {}
        }
    });
}

/// simple 模式的输出处理
struct SimpleRun {
    timeline: Arc<Timeline>,
    block_id: BlockId,
    command: String,
    cwd: PathBuf,
    sanitizer: Arc<OutputSanitizer>,
    processes: Arc<ProcessRegistry>,
    events: EventBus,
    flush_interval: Duration,
}

impl SimpleRun {
    async fn consume(self, handle: Arc<dyn PtyHandle>, mut events: mpsc::Receiver<PtyEvent>) {
        // 任务被取消时终止进程
        let guard = scopeguard::guard(handle, |handle| {
            if handle.is_alive() {
                handle.kill();
            }
        });

        let mut raw: Vec<u8> = Vec::new();
        let mut flush_at: Option<Instant> = None;

        let exit_code = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PtyEvent::Data(bytes)) => {
                        raw.extend_from_slice(&bytes);
                        if flush_at.is_none() {
                            flush_at = Some(Instant::now() + self.flush_interval);
                        }
                    }
                    Some(PtyEvent::Exit(code)) => break code,
                    None => {
                        tracing::warn!("[CommandRunner] 事件通道关闭但未收到退出码: block_id={}", self.block_id);
                        break FAILURE_EXIT_CODE;
                    }
                },
                _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    flush_at = None;
                    let output = self.render(&raw);
                    if !self.timeline.update_command(&self.block_id, |b| b.output = output) {
                        tracing::debug!("[CommandRunner] 块已完成，停止刷新: block_id={}", self.block_id);
                        self.processes.remove(&self.block_id).await;
                        return;
                    }
                }
            }
        };

        let _ = scopeguard::ScopeGuard::into_inner(guard);
        self.processes.remove(&self.block_id).await;
        self.finish(&raw, exit_code);
    }

    fn render(&self, raw: &[u8]) -> String {
        self.sanitizer
            .clean(&String::from_utf8_lossy(raw), &self.command)
    }

    fn finish(&self, raw: &[u8], exit_code: i32) {
        let output = self.render(raw);
        let completed = self.timeline.complete(&self.block_id, |block| {
            if let Some(b) = block.as_command_mut() {
                b.output = output;
                b.exit_code = Some(exit_code);
                b.is_running = false;
                b.ended_at = Some(Utc::now().timestamp_millis());
            }
        });

        tracing::info!(
            "[CommandRunner] 命令结束: block_id={}, exit_code={}, recorded={}",
            self.block_id,
            exit_code,
            completed
        );

        if completed && exit_code == 0 {
            self.track_cd();
        }
    }

    fn track_cd(&self) {
        let Some(target) = parse_cd_target(&self.command) else {
            return;
        };
        let home = dirs::home_dir();
        let Some(path) = resolve_cd_path(&target, &self.cwd, home.as_deref()) else {
            return;
        };
        tracing::info!(
            "[CommandRunner] 目录切换: key={}, path={:?}",
            self.timeline.key(),
            path
        );
        self.timeline.set_cwd(path.clone());
        self.events
            .emit(EngineEvent::DirectoryChanged(DirectoryChangedEvent {
                persist_key: self.timeline.key().to_string(),
                path,
            }));
    }
}

/// interactive 模式的输出转发
struct InteractiveRun {
    timeline: Arc<Timeline>,
    block_id: BlockId,
    processes: Arc<ProcessRegistry>,
    events: EventBus,
}

impl InteractiveRun {
    async fn forward(self, mut events: mpsc::Receiver<PtyEvent>) {
        let persist_key = self.timeline.key().to_string();
        let exit_code = loop {
            match events.recv().await {
                Some(PtyEvent::Data(data)) => {
                    if self.timeline.is_completed(&self.block_id) {
                        continue;
                    }
                    self.events.emit(EngineEvent::InteractiveOutput {
                        persist_key: persist_key.clone(),
                        block_id: self.block_id.clone(),
                        data,
                    });
                }
                Some(PtyEvent::Exit(code)) => break code,
                None => break FAILURE_EXIT_CODE,
            }
        };

        self.processes.remove(&self.block_id).await;
        let recorded = self.timeline.complete(&self.block_id, |block| {
            if let Some(b) = block.as_interactive_mut() {
                b.exit_code = Some(exit_code);
                b.is_running = false;
            }
        });
        tracing::info!(
            "[CommandRunner] 交互进程退出: block_id={}, exit_code={}, recorded={}",
            self.block_id,
            exit_code,
            recorded
        );
        self.events.emit(EngineEvent::ProcessExited {
            persist_key,
            block_id: self.block_id.clone(),
            exit_code: Some(exit_code),
        });
    }
}
