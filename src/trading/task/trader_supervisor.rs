//! 交易单元调度器
//!
//! 每个单元一个 tokio 任务，外面再包一层守护任务：
//! 单元 panic 或返回 Err 记为故障，等待 `restart_backoff` 后重启一次，
//! 第二次故障后停止该单元。单元之间互不影响。

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app_config::shutdown_manager::{ShutdownConfig, ShutdownManager};
use crate::app_config::trader_config::SupervisorConfig;
use crate::error::app_error::SupervisorError;
use crate::trading::task::auto_trader::AutoTrader;
use crate::trading::task::shared_account::{rank_entries, LeaderboardEntry};

/// 故障后最多重启次数
const MAX_RESTARTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitState {
    Idle,
    Running,
    Success,
    RecoveredFailure,
    Faulted,
    Stopped,
}

pub type UnitStateCell = Arc<RwLock<UnitState>>;

pub struct TraderSupervisor {
    config: SupervisorConfig,
    units: RwLock<HashMap<String, Arc<AutoTrader>>>,
    states: RwLock<HashMap<String, UnitStateCell>>,
    handles: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_manager: ShutdownManager,
    /// 关闭回调只注册一次
    hook_registered: AtomicBool,
}

impl TraderSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown_manager = ShutdownManager::new(ShutdownConfig {
            total_timeout: config.shutdown_timeout,
            hook_timeout: config.shutdown_timeout,
        });
        Self {
            config,
            units: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            handles: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_manager,
            hook_registered: AtomicBool::new(false),
        }
    }

    pub async fn register(&self, trader: Arc<AutoTrader>) -> Result<(), SupervisorError> {
        let id = trader.id().to_string();
        let mut units = self.units.write().await;
        if units.contains_key(&id) {
            return Err(SupervisorError::AlreadyRegistered(id));
        }
        units.insert(id.clone(), trader);
        self.states
            .write()
            .await
            .insert(id.clone(), Arc::new(RwLock::new(UnitState::Idle)));
        info!("注册交易单元: {}", id);
        Ok(())
    }

    /// 启动单个交易单元
    pub async fn start(&self, trader_id: &str) -> Result<(), SupervisorError> {
        let trader = self
            .units
            .read()
            .await
            .get(trader_id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnitNotFound(trader_id.to_string()))?;
        let state = self.state_cell(trader_id).await?;

        let mut handles = self.handles.lock().await;
        if handles.get(trader_id).is_some_and(|h| !h.is_finished()) {
            return Err(SupervisorError::AlreadyRunning(trader_id.to_string()));
        }

        trader.prepare().await;
        let handle = tokio::spawn(supervise(
            trader,
            state,
            self.shutdown_tx.subscribe(),
            self.config.clone(),
        ));
        handles.insert(trader_id.to_string(), handle);
        Ok(())
    }

    /// 启动所有已注册、尚未运行的交易单元，返回本次启动的数量
    pub async fn start_all(&self) -> usize {
        let mut ids: Vec<String> = self.units.read().await.keys().cloned().collect();
        ids.sort();
        let mut started = 0;
        for id in ids {
            match self.start(&id).await {
                Ok(()) => started += 1,
                Err(SupervisorError::AlreadyRunning(_)) => {}
                Err(e) => warn!("启动交易单元失败: {}", e),
            }
        }
        info!("已启动 {} 个交易单元", started);
        started
    }

    /// 通知所有单元停止，等待进行中的周期结束；超时后强制终止
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if !self.hook_registered.swap(true, Ordering::SeqCst) {
            self.register_units_hook().await;
        }

        let result = self.shutdown_manager.shutdown().await;
        let mut handles = self.handles.lock().await;
        for (id, handle) in handles.drain() {
            warn!("强制终止交易单元: {}", id);
            handle.abort();
        }
        result
    }

    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown_manager
    }

    async fn register_units_hook(&self) {
        let handles = self.handles.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        self.shutdown_manager
            .register_shutdown_hook("trader_units", move || {
                let handles = handles.clone();
                let shutdown_tx = shutdown_tx.clone();
                async move {
                    shutdown_tx.send_replace(true);
                    let mut handles = handles.lock().await;
                    let waits = handles
                        .iter_mut()
                        .map(|(id, handle)| async move { (id.clone(), handle.await) });
                    for (id, result) in join_all(waits).await {
                        if let Err(e) = result {
                            warn!("交易单元 {} 退出异常: {}", id, e);
                        }
                    }
                    handles.clear();
                    Ok(())
                }
            })
            .await;
    }

    pub async fn unit_state(&self, trader_id: &str) -> Result<UnitState, SupervisorError> {
        let cell = self.state_cell(trader_id).await?;
        let state = *cell.read().await;
        Ok(state)
    }

    pub async fn unit_states(&self) -> HashMap<String, UnitState> {
        let states = self.states.read().await;
        let mut result = HashMap::with_capacity(states.len());
        for (id, cell) in states.iter() {
            result.insert(id.clone(), *cell.read().await);
        }
        result
    }

    /// 按收益率排名，并标出疑似共用交易账户的单元
    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let units: Vec<Arc<AutoTrader>> = self.units.read().await.values().cloned().collect();
        let mut entries = Vec::with_capacity(units.len());
        for trader in units {
            let status = trader.status().await;
            let state = self
                .unit_state(trader.id())
                .await
                .unwrap_or(UnitState::Idle);
            let initial_balance = match trader.ledger().initial_balance().await {
                Ok(Some(balance)) => balance,
                _ => trader.config().initial_balance,
            };
            entries.push(LeaderboardEntry {
                trader_id: trader.id().to_string(),
                name: trader.config().display_name().to_string(),
                ai_model: trader.config().ai_model.clone(),
                state,
                initial_balance,
                equity: status.account.map(|a| a.total_balance),
                pn_l: 0.0,
                pn_l_pct: 0.0,
                call_count: status.call_count,
                shared_with: vec![],
            });
        }
        rank_entries(entries)
    }

    async fn state_cell(&self, trader_id: &str) -> Result<UnitStateCell, SupervisorError> {
        self.states
            .read()
            .await
            .get(trader_id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnitNotFound(trader_id.to_string()))
    }
}

/// 守护任务：运行单元，故障后按策略重启
async fn supervise(
    trader: Arc<AutoTrader>,
    state: UnitStateCell,
    mut shutdown: watch::Receiver<bool>,
    config: SupervisorConfig,
) {
    let trader_id = trader.id().to_string();
    let mut restarts = 0u32;

    loop {
        let run = tokio::spawn(trader.clone().run(shutdown.clone(), state.clone()));
        let fault = match run.await {
            Ok(Ok(())) => {
                *state.write().await = UnitState::Stopped;
                return;
            }
            Ok(Err(e)) => SupervisorError::Fault {
                trader_id: trader_id.clone(),
                reason: format!("{:#}", e),
            },
            Err(e) if e.is_panic() => SupervisorError::Fault {
                trader_id: trader_id.clone(),
                reason: format!("panic: {}", panic_message(e.into_panic())),
            },
            Err(e) => {
                warn!("[{}] 交易单元任务被取消: {}", trader_id, e);
                *state.write().await = UnitState::Stopped;
                return;
            }
        };

        *state.write().await = UnitState::Faulted;
        error!("❌ {}", fault);

        if restarts >= MAX_RESTARTS {
            error!("[{}] 重启后再次故障，停止该交易单元", trader_id);
            *state.write().await = UnitState::Stopped;
            return;
        }
        if *shutdown.borrow() {
            *state.write().await = UnitState::Stopped;
            return;
        }

        warn!("[{}] {:?} 后重启交易单元", trader_id, config.restart_backoff);
        tokio::select! {
            _ = tokio::time::sleep(config.restart_backoff) => {}
            _ = shutdown.changed() => {
                *state.write().await = UnitState::Stopped;
                return;
            }
        }
        restarts += 1;
        *state.write().await = UnitState::Idle;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
