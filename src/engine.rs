//! 引擎门面
//!
//! 组合会话注册表、进程注册表、命令执行器、三种代理管理器与历史加载器，
//! 供界面桥接层调用。
//!
//! ## 功能
//! - 按持久化键获取时间线
//! - 执行命令、发起 AI 回合、取消回合
//! - 关闭块、删除块、关闭整条时间线（先终止其所有进程）
//! - 交互块输入与调整大小（句柄已移除时为空操作）
//! - 会话历史加载与分页

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use infinitty_core::{AgentBackend, AiResponseBlock, Block, BlockId, EngineConfig};

use crate::agent::{
    AgentError, AgentSession, HttpJobQueueClient, JobQueueAgentManager, OneShotAgentManager,
    PersistentAgentManager, TurnOptions, TurnRequest,
};
use crate::terminal::{
    CommandHandle, CommandRunner, EngineEvent, EventBus, LocalPtySpawner, ProcessRegistry,
    PtySpawner, TermSize, TerminalError,
};
use crate::timeline::{
    drive_turn, DismissOutcome, HistoryLoader, HistorySource, SessionRegistry, Timeline,
    Virtualizer,
};

/// 三种代理后端
#[derive(Clone)]
pub struct EngineAgents {
    pub persistent: Arc<dyn AgentSession>,
    pub one_shot: Arc<dyn AgentSession>,
    pub job_queue: Arc<dyn AgentSession>,
}

impl EngineAgents {
    pub fn get(&self, backend: AgentBackend) -> &Arc<dyn AgentSession> {
        match backend {
            AgentBackend::Persistent => &self.persistent,
            AgentBackend::OneShot => &self.one_shot,
            AgentBackend::JobQueue => &self.job_queue,
        }
    }
}

/// 引擎组件（便于替换 PTY 与代理实现）
pub struct EngineParts {
    pub spawner: Arc<dyn PtySpawner>,
    pub agents: EngineAgents,
    pub history: Option<Arc<dyn HistorySource>>,
    /// 固定命令 PATH，不捕获登录 shell
    pub fixed_path: Option<String>,
}

/// 引擎
pub struct Engine {
    config: EngineConfig,
    sessions: Arc<SessionRegistry>,
    processes: Arc<ProcessRegistry>,
    events: EventBus,
    runner: CommandRunner,
    agents: EngineAgents,
    history: Option<Arc<HistoryLoader>>,
    /// AI 块 ID → 回合任务
    turns: Mutex<HashMap<BlockId, JoinHandle<()>>>,
}

impl Engine {
    /// 使用本地 PTY 与默认代理后端创建引擎
    pub fn new(config: EngineConfig) -> Result<Self, AgentError> {
        let client = Arc::new(HttpJobQueueClient::new(&config.agents.job_queue)?);
        let agents = EngineAgents {
            persistent: Arc::new(PersistentAgentManager::new(
                config.agents.persistent.clone(),
            )),
            one_shot: Arc::new(OneShotAgentManager::new(config.agents.one_shot.clone())),
            job_queue: Arc::new(JobQueueAgentManager::new(
                client.clone(),
                &config.agents.job_queue,
            )),
        };
        let parts = EngineParts {
            spawner: Arc::new(LocalPtySpawner::new()),
            agents,
            history: Some(client),
            fixed_path: None,
        };
        Ok(Self::with_parts(config, parts))
    }

    /// 从配置文件创建引擎
    pub fn from_config_file(path: &Path) -> anyhow::Result<Self> {
        let config = EngineConfig::load_from(path)?;
        Ok(Self::new(config)?)
    }

    pub fn with_parts(config: EngineConfig, parts: EngineParts) -> Self {
        let processes = Arc::new(ProcessRegistry::new());
        let events = EventBus::default();
        let mut runner = CommandRunner::new(
            config.runner.clone(),
            parts.spawner,
            processes.clone(),
            events.clone(),
        );
        if let Some(path) = parts.fixed_path {
            runner = runner.with_path(path);
        }
        let history = parts.history.map(|source| {
            Arc::new(HistoryLoader::new(
                source,
                config.history.page_size,
                AgentBackend::JobQueue,
            ))
        });

        tracing::info!(
            "[Engine] 初始化: max_blocks={}, history={}",
            config.timeline.max_blocks,
            history.is_some()
        );

        Self {
            sessions: Arc::new(SessionRegistry::new(config.timeline.max_blocks)),
            processes,
            events,
            runner,
            agents: parts.agents,
            history,
            turns: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn processes(&self) -> &Arc<ProcessRegistry> {
        &self.processes
    }

    /// 订阅引擎事件
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// 订阅某条时间线的变更
    pub fn watch_timeline(&self, key: &str) -> Option<watch::Receiver<u64>> {
        self.sessions.get(key).map(|t| t.subscribe())
    }

    /// 新的虚拟化器
    pub fn virtualizer(&self) -> Virtualizer {
        Virtualizer::new(&self.config.virtualizer)
    }

    /// 获取或创建时间线
    pub fn timeline(&self, key: &str, cwd: impl Into<PathBuf>) -> Arc<Timeline> {
        self.sessions.get_or_create(key, cwd)
    }

    fn timeline_or_home(&self, key: &str) -> Arc<Timeline> {
        match self.sessions.get(key) {
            Some(timeline) => timeline,
            None => {
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
                self.sessions.get_or_create(key, home)
            }
        }
    }

    // ------------------------------------------------------------------------
    // 命令
    // ------------------------------------------------------------------------

    /// 执行命令
    pub async fn run_command(
        &self,
        key: &str,
        command: &str,
    ) -> Result<CommandHandle, TerminalError> {
        let timeline = self.timeline_or_home(key);
        self.runner.run(timeline, command).await
    }

    /// 关闭命令块或交互块，并终止其进程
    pub async fn dismiss(&self, key: &str, block_id: &str) -> Result<DismissOutcome, TerminalError> {
        let timeline = self
            .sessions
            .get(key)
            .ok_or_else(|| TerminalError::BlockNotFound(block_id.to_string()))?;
        let outcome = timeline.dismiss(block_id, self.runner.dismiss_exit_code());
        if outcome == DismissOutcome::Dismissed {
            let killed = self.processes.kill(block_id).await;
            tracing::info!(
                "[Engine] 关闭块: key={}, block_id={}, killed={}",
                key,
                block_id,
                killed
            );
        }
        Ok(outcome)
    }

    /// 删除块（终止其进程或回合）
    pub async fn remove_block(&self, key: &str, block_id: &str) -> Option<Block> {
        let timeline = self.sessions.get(key)?;
        self.processes.kill(block_id).await;
        if let Some(task) = self.turns.lock().remove(block_id) {
            task.abort();
        }
        timeline.remove(block_id)
    }

    /// 向交互块写入输入
    ///
    /// # 返回
    /// 句柄已移除时返回 `Ok(false)`
    pub async fn send_input(&self, block_id: &str, data: &[u8]) -> Result<bool, TerminalError> {
        match self.processes.write(block_id, data).await {
            Ok(()) => Ok(true),
            Err(TerminalError::ProcessNotFound(_)) | Err(TerminalError::ProcessExited) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 调整交互块终端大小
    pub async fn resize(&self, block_id: &str, rows: u16, cols: u16) -> Result<bool, TerminalError> {
        match self.processes.resize(block_id, TermSize { rows, cols }).await {
            Ok(()) => Ok(true),
            Err(TerminalError::ProcessNotFound(_)) | Err(TerminalError::ProcessExited) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------------
    // AI 回合
    // ------------------------------------------------------------------------

    /// 发起 AI 回合
    ///
    /// 追加流式 AI 块后立即返回块 ID，流在后台写入。
    pub fn ask(
        &self,
        key: &str,
        backend: AgentBackend,
        prompt: &str,
        model: &str,
        options: TurnOptions,
    ) -> BlockId {
        let timeline = self.timeline_or_home(key);
        let block = AiResponseBlock::streaming(prompt, model, backend);
        let block_id = block.id.clone();
        timeline.append(block.into());

        let request = TurnRequest::new(prompt, model, timeline.cwd()).with_options(options);
        let stream = self.agents.get(backend).stream_turn(request);

        tracing::info!(
            "[Engine] 发起回合: key={}, block_id={}, backend={}, model={}",
            key,
            block_id,
            backend,
            model
        );

        let id = block_id.clone();
        let task = tokio::spawn(async move {
            drive_turn(&timeline, &id, stream).await;
        });

        let mut turns = self.turns.lock();
        turns.retain(|_, t| !t.is_finished());
        turns.insert(block_id.clone(), task);
        block_id
    }

    /// 取消进行中的回合
    ///
    /// # 返回
    /// 块仍在流式输出且已被停止时返回 true
    pub fn cancel_turn(&self, key: &str, block_id: &str) -> bool {
        let Some(timeline) = self.sessions.get(key) else {
            return false;
        };
        let stopped = timeline.complete(block_id, |block| {
            if let Some(ai) = block.as_ai_response_mut() {
                ai.is_streaming = false;
            }
        });
        if let Some(task) = self.turns.lock().remove(block_id) {
            task.abort();
        }
        if stopped {
            tracing::info!("[Engine] 取消回合: key={}, block_id={}", key, block_id);
        }
        stopped
    }

    // ------------------------------------------------------------------------
    // 时间线生命周期
    // ------------------------------------------------------------------------

    /// 关闭时间线：终止所有进程和回合后删除
    pub async fn close_timeline(&self, key: &str) -> bool {
        let Some(timeline) = self.sessions.get(key) else {
            return false;
        };

        for block_id in timeline.running_process_ids() {
            self.processes.kill(&block_id).await;
        }
        {
            let mut turns = self.turns.lock();
            for block in timeline.blocks() {
                if let Some(task) = turns.remove(block.id()) {
                    task.abort();
                }
            }
        }

        self.sessions.remove(key);
        self.events.emit(EngineEvent::TimelineClosed {
            persist_key: key.to_string(),
        });
        tracing::info!("[Engine] 关闭时间线: key={}", key);
        true
    }

    // ------------------------------------------------------------------------
    // 历史
    // ------------------------------------------------------------------------

    fn history_loader(&self) -> Result<&Arc<HistoryLoader>, AgentError> {
        self.history
            .as_ref()
            .ok_or_else(|| AgentError::Internal("未配置历史来源".to_string()))
    }

    /// 加载会话最近的一页历史
    pub async fn load_history(&self, key: &str, session_id: &str) -> Result<usize, AgentError> {
        let loader = self.history_loader()?;
        let timeline = self.timeline_or_home(key);
        loader.load_initial(&timeline, session_id).await
    }

    /// 加载更早的一页
    pub async fn load_older(&self, key: &str) -> Result<usize, AgentError> {
        let loader = self.history_loader()?;
        let Some(timeline) = self.sessions.get(key) else {
            return Ok(0);
        };
        loader.load_older(&timeline).await
    }

    /// 终止所有进程与回合，释放代理后端
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.turns.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.abort();
        }
        self.processes.kill_all().await;
        self.agents.persistent.shutdown().await;
        self.agents.one_shot.shutdown().await;
        self.agents.job_queue.shutdown().await;
        tracing::info!("[Engine] 已关闭");
    }
}
