//! 常驻代理会话管理器
//!
//! 维持一个长期运行的代理子进程，通过 stdin / stdout 上的 stream-json 行协议通信。
//!
//! ## 功能
//! - 模型、工作目录或思考预算变化时重建进程；进程退出后下次回合重建
//! - 回合串行：同一时刻只有一个回合持有连接
//! - 读取任务把事件交给等待者队列，回合循环按 FIFO 取出
//! - 每次等待超时合成 `Done { timed_out: true }`
//! - 回合开始时丢弃上一回合遗留的缓冲事件
//! - 回合被放弃、超时或以错误事件结束后，下次回合重建进程

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use infinitty_core::config::PersistentAgentConfig;
use infinitty_core::{AgentBackend, Chunk};
use infinitty_infra::{parse_line, LineBuffer, WaitOutcome, WaitQueue};

use super::error::AgentError;
use super::stream_json::parse_event;
use super::{AgentSession, ChunkStream, TurnRequest};

const READ_BUFFER_SIZE: usize = 8192;

/// 决定是否复用进程的参数
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionKey {
    model: String,
    cwd: PathBuf,
    thinking_budget: Option<u32>,
}

impl ConnectionKey {
    fn from_request(request: &TurnRequest) -> Self {
        Self {
            model: request.model.clone(),
            cwd: request.cwd.clone(),
            thinking_budget: request.options.thinking_budget,
        }
    }
}

/// 一个存活的代理进程
struct Connection {
    key: ConnectionKey,
    child: Child,
    stdin: ChildStdin,
    queue: Arc<WaitQueue<Chunk>>,
    reader: JoinHandle<()>,
    /// 上一回合没有收到 `result` 结束块
    turn_in_flight: bool,
}

impl Connection {
    fn spawn(config: &PersistentAgentConfig, key: ConnectionKey) -> Result<Self, AgentError> {
        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.extra_args)
            .arg("-p")
            .args(["--input-format", "stream-json"])
            .args(["--output-format", "stream-json"])
            .arg("--verbose")
            .arg("--model")
            .arg(&key.model);
        if let Some(mode) = config.permission_mode.as_deref().filter(|m| !m.is_empty()) {
            cmd.args(["--permission-mode", mode]);
        }
        if let Some(budget) = key.thinking_budget {
            cmd.env("MAX_THINKING_TOKENS", budget.to_string());
        }
        cmd.current_dir(&key.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::SpawnFailed(format!("{}: {}", config.binary, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::SpawnFailed("stdin 不可用".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::SpawnFailed("stdout 不可用".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!("[PersistentAgent] stderr: {}", line);
                    }
                }
            });
        }

        let queue = Arc::new(WaitQueue::new());
        let reader = tokio::spawn(read_stdout(stdout, queue.clone()));

        tracing::info!(
            "[PersistentAgent] 启动代理进程: pid={:?}, model={}, cwd={:?}, thinking_budget={:?}",
            child.id(),
            key.model,
            key.cwd,
            key.thinking_budget
        );

        Ok(Self {
            key,
            child,
            stdin,
            queue,
            reader,
            turn_in_flight: false,
        })
    }

    fn is_alive(&mut self) -> bool {
        !self.queue.is_closed() && matches!(self.child.try_wait(), Ok(None))
    }

    fn is_reusable_for(&mut self, key: &ConnectionKey) -> bool {
        &self.key == key && !self.turn_in_flight && self.is_alive()
    }

    async fn send_user_message(&mut self, prompt: &str) -> Result<(), AgentError> {
        let message = serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": prompt},
        });
        let mut line = serde_json::to_string(&message)
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn shutdown(mut self) {
        self.queue.close();
        self.reader.abort();
        if let Err(e) = self.child.kill().await {
            tracing::debug!("[PersistentAgent] 终止进程失败: {}", e);
        }
        tracing::info!("[PersistentAgent] 代理进程已关闭: model={}", self.key.model);
    }
}

/// 读取 stdout，按行解析并交给等待者队列
async fn read_stdout(mut stdout: ChildStdout, queue: Arc<WaitQueue<Chunk>>) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    dispatch_line(&line, &queue);
                }
            }
            Err(e) => {
                tracing::warn!("[PersistentAgent] 读取 stdout 失败: {}", e);
                break;
            }
        }
    }
    if let Some(line) = lines.finish() {
        dispatch_line(&line, &queue);
    }
    tracing::info!("[PersistentAgent] 代理进程输出结束");
    queue.close();
}

fn dispatch_line(line: &str, queue: &WaitQueue<Chunk>) {
    if let Some(event) = parse_line("PersistentAgent", line) {
        for chunk in parse_event(&event) {
            queue.push(chunk);
        }
    }
}

/// 常驻代理会话管理器
#[derive(Clone)]
pub struct PersistentAgentManager {
    config: Arc<PersistentAgentConfig>,
    wait_timeout: Duration,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl PersistentAgentManager {
    pub fn new(config: PersistentAgentConfig) -> Self {
        let wait_timeout = Duration::from_secs(config.wait_timeout_secs);
        Self {
            config: Arc::new(config),
            wait_timeout,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// 覆盖每次等待的超时
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// 当前是否有存活的进程
    pub async fn is_connected(&self) -> bool {
        match self.connection.lock().await.as_mut() {
            Some(conn) => conn.is_alive(),
            None => false,
        }
    }
}

#[async_trait]
impl AgentSession for PersistentAgentManager {
    fn backend(&self) -> AgentBackend {
        AgentBackend::Persistent
    }

    fn stream_turn(&self, request: TurnRequest) -> ChunkStream {
        let config = self.config.clone();
        let wait_timeout = self.wait_timeout;
        let connection = self.connection.clone();

        Box::pin(async_stream::stream! {
            let mut guard = connection.lock_owned().await;
            let key = ConnectionKey::from_request(&request);

            let reusable = match guard.as_mut() {
                Some(conn) => conn.is_reusable_for(&key),
                None => false,
            };
            if !reusable {
                if let Some(old) = guard.take() {
                    old.shutdown().await;
                }
                match Connection::spawn(&config, key) {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) => {
                        tracing::error!("[PersistentAgent] {}", e);
                        yield Chunk::error(e.to_string());
                        yield Chunk::done();
                        return;
                    }
                }
            }

            let mut discard = false;
            if let Some(conn) = guard.as_mut() {
                let stale = conn.queue.clear();
                if stale > 0 {
                    tracing::debug!("[PersistentAgent] 丢弃遗留事件: count={}", stale);
                }
                conn.turn_in_flight = true;

                if let Err(e) = conn.send_user_message(&request.prompt).await {
                    tracing::error!("[PersistentAgent] 发送消息失败: {}", e);
                    discard = true;
                    yield Chunk::error(e.to_string());
                } else {
                    loop {
                        match conn.queue.next(wait_timeout).await {
                            WaitOutcome::Item(chunk) => {
                                let terminal = chunk.is_terminal();
                                // 错误事件之后代理仍可能补发该回合的 result
                                let settled = matches!(chunk, Chunk::Done { .. });
                                yield chunk;
                                if terminal {
                                    conn.turn_in_flight = !settled;
                                    break;
                                }
                            }
                            WaitOutcome::TimedOut => {
                                tracing::warn!(
                                    "[PersistentAgent] 等待事件超时: timeout={:?}",
                                    wait_timeout
                                );
                                yield Chunk::timed_out();
                                break;
                            }
                            WaitOutcome::Closed => {
                                tracing::warn!("[PersistentAgent] 代理进程在回合中退出");
                                discard = true;
                                yield Chunk::error(AgentError::ProcessExited.to_string());
                                break;
                            }
                        }
                    }
                }
            }

            if discard {
                if let Some(conn) = guard.take() {
                    conn.shutdown().await;
                }
            }
        })
    }

    async fn shutdown(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::TurnOptions;
    use futures::StreamExt;

    // ============================================================================
    // 辅助函数
    // ============================================================================

    /// 每收到一行输入：回显进程 PID 与参数，然后发送结果事件
    const ECHO_AGENT: &str = r#"
while IFS= read -r line; do
  printf '%s\n' '{"type":"system","subtype":"init"}'
  printf 'not json\n'
  printf '{"type":"assistant","message":{"content":[{"type":"text","text":"pid=%s args=%s"}]}}\n' "$$" "$*"
  printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"duration_ms":5,"usage":{"input_tokens":3,"output_tokens":1}}'
done
"#;

    /// 读取输入但从不回复
    const SILENT_AGENT: &str = "while IFS= read -r line; do :; done";

    /// 读取一行后退出
    const EXITING_AGENT: &str = "IFS= read -r line; exit 0";

    /// 一次完整的工具调用回合
    const TOOL_AGENT: &str = r#"
while IFS= read -r line; do
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Listing"}]}}'
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}'
  printf '%s\n' '{"type":"tool_result","tool_use_id":"toolu_1","content":"a.txt"}'
  printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"duration_ms":9,"total_cost_usd":0.01,"usage":{"input_tokens":5,"output_tokens":7}}'
done
"#;

    /// 第一个进程的第一回合以错误事件结束，稍后补发该回合的 result
    fn fail_once_agent(marker: &std::path::Path) -> String {
        format!(
            r#"
first=1
while IFS= read -r line; do
  if [ "$first" = 1 ] && [ ! -e '{marker}' ]; then
    first=0
    : > '{marker}'
    printf '%s\n' '{{"type":"error","message":"boom"}}'
    sleep 0.3
    printf '%s\n' '{{"type":"result","subtype":"success","is_error":false}}'
  else
    printf '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"pid=%s"}}]}}}}\n' "$$"
    printf '%s\n' '{{"type":"result","subtype":"success","is_error":false}}'
  fi
done
"#,
            marker = marker.display()
        )
    }

    fn manager(script: &str) -> PersistentAgentManager {
        PersistentAgentManager::new(PersistentAgentConfig {
            binary: "sh".to_string(),
            extra_args: vec!["-c".to_string(), script.to_string(), "fake-agent".to_string()],
            permission_mode: None,
            wait_timeout_secs: 5,
        })
    }

    fn request(model: &str) -> TurnRequest {
        TurnRequest::new("ping", model, std::env::temp_dir())
    }

    async fn collect(manager: &PersistentAgentManager, request: TurnRequest) -> Vec<Chunk> {
        manager.stream_turn(request).collect().await
    }

    fn response_text(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .filter_map(|c| match c {
                Chunk::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    // ============================================================================
    // 测试
    // ============================================================================

    #[tokio::test]
    async fn test_turn_streams_until_done() {
        let m = manager(ECHO_AGENT);
        let chunks = collect(&m, request("sonnet")).await;

        let text = response_text(&chunks);
        assert!(text.contains("--input-format stream-json"));
        assert!(text.contains("--model sonnet"));
        assert!(matches!(chunks[chunks.len() - 2], Chunk::Stats(_)));
        assert_eq!(chunks.last(), Some(&Chunk::done()));
        assert!(m.is_connected().await);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_process_reused_until_model_changes() {
        let m = manager(ECHO_AGENT);
        let first = response_text(&collect(&m, request("sonnet")).await);
        let second = response_text(&collect(&m, request("sonnet")).await);
        let third = response_text(&collect(&m, request("opus")).await);

        let pid = |s: &str| s.split_whitespace().next().unwrap_or_default().to_string();
        assert_eq!(pid(&first), pid(&second));
        assert_ne!(pid(&second), pid(&third));
        assert!(third.contains("--model opus"));
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_thinking_budget_change_respawns() {
        let m = manager(ECHO_AGENT);
        let plain = response_text(&collect(&m, request("sonnet")).await);
        let budget = request("sonnet").with_options(TurnOptions {
            thinking_budget: Some(4096),
            session_id: None,
        });
        let thinking = response_text(&collect(&m, budget).await);
        assert_ne!(
            plain.split_whitespace().next(),
            thinking.split_whitespace().next()
        );
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_timeout_yields_timed_out_done() {
        let m = manager(SILENT_AGENT).with_wait_timeout(Duration::from_millis(200));
        let chunks = collect(&m, request("sonnet")).await;
        assert_eq!(chunks, vec![Chunk::timed_out()]);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_process_exit_mid_turn_yields_error() {
        let m = manager(EXITING_AGENT);
        let chunks = collect(&m, request("sonnet")).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], Chunk::Error { .. }));
        assert!(!m.is_connected().await);
    }

    #[tokio::test]
    async fn test_spawn_failure_yields_error_then_done() {
        let m = PersistentAgentManager::new(PersistentAgentConfig {
            binary: "/nonexistent/agent-binary".to_string(),
            ..Default::default()
        });
        let chunks = collect(&m, request("sonnet")).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(&chunks[0], Chunk::Error { .. }));
        assert_eq!(chunks[1], Chunk::done());
    }

    #[tokio::test]
    async fn test_tool_turn_drives_response_block() {
        use crate::timeline::{drive_turn, Timeline};
        use infinitty_core::{AiResponseBlock, ToolStatus};

        let m = manager(TOOL_AGENT);
        let timeline = Timeline::new("tab-1", std::env::temp_dir(), 10);
        let block = AiResponseBlock::streaming("list files", "sonnet", AgentBackend::Persistent);
        let id = block.id.clone();
        timeline.append(block.into());

        assert!(drive_turn(&timeline, &id, m.stream_turn(request("sonnet"))).await);

        let block = timeline.get(&id).unwrap();
        let ai = block.as_ai_response().unwrap();
        assert_eq!(ai.response, "Listing");
        assert_eq!(ai.tool_calls.len(), 1);
        assert_eq!(ai.tool_calls[0].name, "Bash");
        assert_eq!(ai.tool_calls[0].status, ToolStatus::Completed);
        assert_eq!(ai.tool_calls[0].output.as_deref(), Some("a.txt"));
        let stats = ai.stats.as_ref().unwrap();
        assert_eq!(stats.input_tokens, Some(5));
        assert_eq!(stats.output_tokens, Some(7));
        assert_eq!(stats.cost_usd, Some(0.01));
        assert!(!ai.is_streaming);
        assert!(!ai.timed_out);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_event_respawns_before_next_turn() {
        let marker = std::env::temp_dir().join(format!(
            "infinitty-fail-once-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let m = manager(&fail_once_agent(&marker));

        let first = collect(&m, request("sonnet")).await;
        assert_eq!(first, vec![Chunk::error("boom")]);

        // 旧进程补发的 result 不能结束新回合
        let second = collect(&m, request("sonnet")).await;
        assert!(response_text(&second).starts_with("pid="));
        assert_eq!(second.last(), Some(&Chunk::done()));

        m.shutdown().await;
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn test_abandoned_turn_respawns_next_time() {
        let m = manager(ECHO_AGENT);
        let first = {
            let mut stream = m.stream_turn(request("sonnet"));
            // 只取第一个块后放弃
            stream.next().await
        };
        assert!(first.is_some());

        let next = response_text(&collect(&m, request("sonnet")).await);
        assert!(next.starts_with("pid="));
        m.shutdown().await;
    }
}
