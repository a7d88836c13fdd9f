//! 一次性代理会话管理器
//!
//! 每个回合启动一个新的代理子进程，读取其 JSONL 输出直到进程退出。
//!
//! ## 功能
//! - 按模型、工作目录、审批策略、沙箱参数启动进程
//! - 逐行解析事件并转换为块
//! - 进程退出：成功时发送统计 + 结束，失败时发送错误（含 stderr 末尾）+ 结束
//! - 丢弃流即终止子进程

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use infinitty_core::config::OneShotAgentConfig;
use infinitty_core::{AgentBackend, Chunk, TurnStats};
use infinitty_infra::{parse_line, LineBuffer};

use super::jsonl_events::parse_event;
use super::{AgentSession, ChunkStream, TurnRequest};

const READ_BUFFER_SIZE: usize = 8192;

/// 错误信息中保留的 stderr 行数
const STDERR_TAIL_LINES: usize = 20;

/// 一次性代理会话管理器
#[derive(Clone)]
pub struct OneShotAgentManager {
    config: Arc<OneShotAgentConfig>,
}

impl OneShotAgentManager {
    pub fn new(config: OneShotAgentConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn command(&self, request: &TurnRequest) -> Command {
        let config = &self.config;
        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.extra_args)
            .arg("--ask-for-approval")
            .arg(&config.approval_policy)
            .arg("exec")
            .arg("-s")
            .arg(&config.sandbox)
            .arg("--json")
            .arg("--skip-git-repo-check")
            .arg("-m")
            .arg(&request.model)
            .arg("-C")
            .arg(&request.cwd)
            .arg(&request.prompt);
        cmd.current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentSession for OneShotAgentManager {
    fn backend(&self) -> AgentBackend {
        AgentBackend::OneShot
    }

    fn stream_turn(&self, request: TurnRequest) -> ChunkStream {
        let mut cmd = self.command(&request);
        let binary = self.config.binary.clone();
        let provider = self.config.provider.clone();

        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!("[OneShotAgent] 启动失败: binary={}, error={}", binary, e);
                    yield Chunk::error(format!("代理进程启动失败: {}: {}", binary, e));
                    yield Chunk::done();
                    return;
                }
            };
            tracing::info!(
                "[OneShotAgent] 启动回合: pid={:?}, model={}, cwd={:?}",
                child.id(),
                request.model,
                request.cwd
            );

            let stderr_task = child.stderr.take().map(|stderr| {
                tokio::spawn(async move {
                    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.trim().is_empty() {
                            continue;
                        }
                        tracing::debug!("[OneShotAgent] stderr: {}", line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    tail.into_iter().collect::<Vec<_>>().join("\n")
                })
            });

            let mut stats = TurnStats::default();
            if let Some(mut stdout) = child.stdout.take() {
                let mut lines = LineBuffer::new();
                let mut buf = vec![0u8; READ_BUFFER_SIZE];
                let mut ended = false;
                while !ended {
                    let mut batch = match stdout.read(&mut buf).await {
                        Ok(0) => {
                            ended = true;
                            lines.finish().into_iter().collect()
                        }
                        Ok(n) => lines.push(&buf[..n]),
                        Err(e) => {
                            tracing::warn!("[OneShotAgent] 读取 stdout 失败: {}", e);
                            ended = true;
                            lines.finish().into_iter().collect()
                        }
                    };
                    for line in batch.drain(..) {
                        let Some(event) = parse_line("OneShotAgent", &line) else {
                            continue;
                        };
                        for chunk in parse_event(&event) {
                            match chunk {
                                Chunk::Stats(s) => stats.merge(s),
                                // 结束块在进程退出后统一发送
                                Chunk::Done { .. } => {}
                                Chunk::Error { message } => {
                                    tracing::warn!("[OneShotAgent] 回合错误: {}", message);
                                    yield Chunk::Error { message };
                                    return;
                                }
                                other => yield other,
                            }
                        }
                    }
                }
            }

            let status = child.wait().await;
            let stderr_tail = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };

            match status {
                Ok(status) if status.success() => {
                    stats.duration_ms = stats
                        .duration_ms
                        .or(Some(started.elapsed().as_millis() as u64));
                    stats.model = stats.model.or(Some(request.model.clone()));
                    stats.provider = stats.provider.or(Some(provider));
                    tracing::info!(
                        "[OneShotAgent] 回合完成: duration_ms={:?}, tokens={:?}",
                        stats.duration_ms,
                        stats.total_tokens()
                    );
                    yield Chunk::Stats(stats);
                    yield Chunk::done();
                }
                Ok(status) => {
                    let code = status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    tracing::warn!("[OneShotAgent] 进程异常退出: code={}", code);
                    let message = if stderr_tail.is_empty() {
                        format!("代理进程退出码 {}", code)
                    } else {
                        format!("代理进程退出码 {}: {}", code, stderr_tail)
                    };
                    yield Chunk::error(message);
                    yield Chunk::done();
                }
                Err(e) => {
                    tracing::error!("[OneShotAgent] 等待进程失败: {}", e);
                    yield Chunk::error(e.to_string());
                    yield Chunk::done();
                }
            }
        })
    }
}
