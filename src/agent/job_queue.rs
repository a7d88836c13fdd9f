//! 远程任务队列会话管理器
//!
//! 代理运行在本地 HTTP 服务中：每个工作目录一个会话，提交提示得到任务 ID，
//! 之后按游标轮询任务产生的块直到完成。
//!
//! ## 功能
//! - `JobQueueClient`: 请求-响应接口
//! - `HttpJobQueueClient`: 基于 reqwest 的实现，同时提供会话历史分页
//! - `JobQueueAgentManager`: 会话复用、轮询、整体超时

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use infinitty_core::config::JobQueueConfig;
use infinitty_core::{AgentBackend, Chunk};

use super::error::AgentError;
use super::{AgentSession, ChunkStream, TurnRequest};
use crate::timeline::{HistoryPage, HistorySource};

/// 一次轮询的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPoll {
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    /// 下次轮询使用的游标
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub finished: bool,
}

/// 任务队列客户端
#[async_trait]
pub trait JobQueueClient: Send + Sync {
    /// 创建会话，返回会话 ID
    async fn create_session(&self, cwd: &Path) -> Result<String, AgentError>;

    /// 提交提示，返回任务 ID
    async fn submit(&self, session_id: &str, request: &TurnRequest) -> Result<String, AgentError>;

    /// 拉取游标之后的块
    async fn poll(&self, job_id: &str, cursor: usize) -> Result<JobPoll, AgentError>;

    /// 会话历史（`offset` 从最新消息起计）
    async fn fetch_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryPage, AgentError>;
}

// ============================================================================
// HTTP 实现
// ============================================================================

#[derive(Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    prompt: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

/// HTTP 任务队列客户端
#[derive(Clone)]
pub struct HttpJobQueueClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpJobQueueClient {
    pub fn new(config: &JobQueueConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 检查响应状态
    ///
    /// # 参数
    /// - `what`: 请求针对的资源 ID，用于错误信息
    /// - `not_found`: 404 时构造的错误
    async fn check(
        response: reqwest::Response,
        what: &str,
        not_found: fn(String) -> AgentError,
    ) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(not_found(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http(format!("{} {}: {}", what, status, body.trim())));
        }
        Ok(response)
    }
}

#[async_trait]
impl JobQueueClient for HttpJobQueueClient {
    async fn create_session(&self, cwd: &Path) -> Result<String, AgentError> {
        let response = self
            .http
            .post(self.url("/session"))
            .json(&serde_json::json!({ "cwd": cwd }))
            .send()
            .await?;
        let body: CreateSessionResponse = Self::check(response, "session", |what| {
            AgentError::Http(format!("{} 404 Not Found", what))
        })
        .await?
        .json()
        .await?;
        Ok(body.id)
    }

    async fn submit(&self, session_id: &str, request: &TurnRequest) -> Result<String, AgentError> {
        let body = SubmitBody {
            prompt: &request.prompt,
            model: &request.model,
            thinking_budget: request.options.thinking_budget,
        };
        let response = self
            .http
            .post(self.url(&format!("/session/{}/prompt", session_id)))
            .json(&body)
            .send()
            .await?;
        let body: SubmitResponse = Self::check(response, session_id, AgentError::SessionNotFound)
            .await?
            .json()
            .await?;
        Ok(body.job_id)
    }

    async fn poll(&self, job_id: &str, cursor: usize) -> Result<JobPoll, AgentError> {
        let response = self
            .http
            .get(self.url(&format!("/job/{}/events", job_id)))
            .query(&[("cursor", cursor)])
            .send()
            .await?;
        Ok(Self::check(response, job_id, AgentError::JobNotFound)
            .await?
            .json()
            .await?)
    }

    async fn fetch_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryPage, AgentError> {
        let response = self
            .http
            .get(self.url(&format!("/session/{}/messages", session_id)))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        Ok(Self::check(response, session_id, AgentError::SessionNotFound)
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl HistorySource for HttpJobQueueClient {
    async fn fetch_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryPage, AgentError> {
        JobQueueClient::fetch_messages(self, session_id, limit, offset).await
    }
}

// ============================================================================
// 会话管理器
// ============================================================================

/// 任务队列会话管理器
#[derive(Clone)]
pub struct JobQueueAgentManager {
    client: Arc<dyn JobQueueClient>,
    /// 工作目录 → 会话 ID
    sessions: Arc<RwLock<HashMap<PathBuf, String>>>,
    poll_interval: Duration,
    turn_timeout: Duration,
}

impl JobQueueAgentManager {
    pub fn new(client: Arc<dyn JobQueueClient>, config: &JobQueueConfig) -> Self {
        Self {
            client,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }

    /// 工作目录当前绑定的会话
    pub fn session_for(&self, cwd: &Path) -> Option<String> {
        self.sessions.read().get(cwd).cloned()
    }

    async fn ensure_session(
        client: &dyn JobQueueClient,
        sessions: &RwLock<HashMap<PathBuf, String>>,
        cwd: &Path,
    ) -> Result<String, AgentError> {
        if let Some(id) = sessions.read().get(cwd).cloned() {
            return Ok(id);
        }
        let id = client.create_session(cwd).await?;
        tracing::info!("[JobQueueAgent] 创建会话: cwd={:?}, session_id={}", cwd, id);
        sessions.write().insert(cwd.to_path_buf(), id.clone());
        Ok(id)
    }

    /// 提交提示；绑定的会话已失效时重建一次
    async fn submit(
        client: &dyn JobQueueClient,
        sessions: &RwLock<HashMap<PathBuf, String>>,
        request: &TurnRequest,
    ) -> Result<String, AgentError> {
        if let Some(session_id) = request.options.session_id.as_deref() {
            return client.submit(session_id, request).await;
        }
        let session_id = Self::ensure_session(client, sessions, &request.cwd).await?;
        match client.submit(&session_id, request).await {
            Err(AgentError::SessionNotFound(_)) => {
                tracing::warn!("[JobQueueAgent] 会话已失效，重新创建: session_id={}", session_id);
                sessions.write().remove(&request.cwd);
                let session_id = Self::ensure_session(client, sessions, &request.cwd).await?;
                client.submit(&session_id, request).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl AgentSession for JobQueueAgentManager {
    fn backend(&self) -> AgentBackend {
        AgentBackend::JobQueue
    }

    fn stream_turn(&self, request: TurnRequest) -> ChunkStream {
        let client = self.client.clone();
        let sessions = self.sessions.clone();
        let poll_interval = self.poll_interval;
        let turn_timeout = self.turn_timeout;

        Box::pin(async_stream::stream! {
            let job_id = match Self::submit(client.as_ref(), &sessions, &request).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!("[JobQueueAgent] 提交失败: {}", e);
                    yield Chunk::error(e.to_string());
                    yield Chunk::done();
                    return;
                }
            };
            tracing::info!("[JobQueueAgent] 已提交任务: job_id={}", job_id);

            let deadline = Instant::now() + turn_timeout;
            let mut cursor = 0;
            loop {
                let poll = match client.poll(&job_id, cursor).await {
                    Ok(poll) => poll,
                    Err(e) => {
                        tracing::error!("[JobQueueAgent] 轮询失败: job_id={}, error={}", job_id, e);
                        yield Chunk::error(e.to_string());
                        yield Chunk::done();
                        return;
                    }
                };
                cursor = poll.cursor.max(cursor);
                for chunk in poll.chunks {
                    let terminal = chunk.is_terminal();
                    yield chunk;
                    if terminal {
                        return;
                    }
                }
                if poll.finished {
                    yield Chunk::done();
                    return;
                }
                if Instant::now() >= deadline {
                    tracing::warn!("[JobQueueAgent] 任务超时: job_id={}", job_id);
                    yield Chunk::timed_out();
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        })
    }
}
