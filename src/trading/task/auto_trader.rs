//! 单个交易单元的决策周期
//!
//! 一个周期：构建上下文 → 调用模型 → 解析校验 → 先平后开执行 → 写账本。
//! 上下文、模型、校验失败都记为失败周期（RecoveredFailure），不会中断循环；
//! 账本写入失败只记日志。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::app_config::trader_config::TraderConfig;
use crate::trading::context::{CycleInfo, PerformanceView};
use crate::trading::decision::{parse_full_decision_response, sort_decisions_close_first};
use crate::trading::ledger::DecisionLedger;
use crate::trading::model::decision_record::{AccountSnapshot, DecisionAction, DecisionRecord};
use crate::trading::task::collaborators::{
    CompletionProvider, ExecutionClient, MarketContextProvider,
};
use crate::trading::task::trader_supervisor::{UnitState, UnitStateCell};

/// 单个周期的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// 周期完成（包括兜底 wait）
    Success {
        cycle_number: Option<i64>,
        executed: usize,
        is_fallback: bool,
    },
    /// 上下文/模型/校验失败，已记录
    RecoveredFailure {
        cycle_number: Option<i64>,
        reason: String,
    },
}

/// 交易单元运行状态（供排行榜使用）
#[derive(Debug, Clone, Default)]
pub struct TraderStatus {
    pub account: Option<AccountSnapshot>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_number: Option<i64>,
    pub call_count: u64,
}

pub struct AutoTrader {
    config: TraderConfig,
    ledger: Arc<DecisionLedger>,
    context_provider: Arc<dyn MarketContextProvider>,
    completion: Arc<dyn CompletionProvider>,
    executor: Arc<dyn ExecutionClient>,
    call_count: AtomicU64,
    started_at: DateTime<Utc>,
    status: RwLock<TraderStatus>,
}

impl AutoTrader {
    pub fn new(
        config: TraderConfig,
        ledger: Arc<DecisionLedger>,
        context_provider: Arc<dyn MarketContextProvider>,
        completion: Arc<dyn CompletionProvider>,
        executor: Arc<dyn ExecutionClient>,
    ) -> Self {
        Self {
            config,
            ledger,
            context_provider,
            completion,
            executor,
            call_count: AtomicU64::new(0),
            started_at: Utc::now(),
            status: RwLock::new(TraderStatus::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &TraderConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<DecisionLedger> {
        &self.ledger
    }

    pub async fn status(&self) -> TraderStatus {
        let mut status = self.status.read().await.clone();
        status.call_count = self.call_count.load(Ordering::SeqCst);
        status
    }

    /// 写入初始资金种子记录（已存在则跳过）
    pub async fn prepare(&self) {
        if self.config.initial_balance <= 0.0 {
            return;
        }
        if let Err(e) = self.ledger.seed_initial_balance(self.config.initial_balance).await {
            warn!("[{}] 写入初始资金种子记录失败: {}", self.config.id, e);
        }
    }

    /// 按固定间隔循环，直到收到关闭信号
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        state: UnitStateCell,
    ) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "🚀 [{}] 交易单元启动，周期间隔 {:?}",
            self.config.display_name(),
            self.config.scan_interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            *state.write().await = UnitState::Running;
            match self.run_cycle().await? {
                CycleOutcome::Success { cycle_number, executed, is_fallback } => {
                    *state.write().await = UnitState::Success;
                    debug!(
                        "[{}] 周期 {:?} 完成，执行 {} 条决策，兜底: {}",
                        self.config.id, cycle_number, executed, is_fallback
                    );
                }
                CycleOutcome::RecoveredFailure { cycle_number, reason } => {
                    *state.write().await = UnitState::RecoveredFailure;
                    warn!(
                        "[{}] 周期 {:?} 失败: {}",
                        self.config.id, cycle_number, reason
                    );
                }
            }
            *state.write().await = UnitState::Idle;
        }

        info!("[{}] 交易单元已停止", self.config.display_name());
        Ok(())
    }

    /// 执行一个完整周期
    pub async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let started = Utc::now();
        let call_count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = DecisionRecord::new(started);

        let cycle_info = CycleInfo {
            cycle_number: self.ledger.current_cycle().await + 1,
            call_count,
            runtime_minutes: (started - self.started_at).num_minutes(),
        };
        info!("⏰ [{}] 周期 #{} 开始", self.config.id, cycle_info.cycle_number);

        let performance = self.load_performance().await;

        // 1. 上下文
        let built = bounded(
            self.config.context_timeout(),
            self.context_provider
                .build_context(&self.config, cycle_info, performance),
        )
        .await;
        let context = match built {
            Ok(context) => context,
            Err(e) => return Ok(self.record_failure(record, format!("构建交易上下文失败: {}", e)).await),
        };
        record.account_state = context.account.clone();
        record.positions = context.positions.clone();
        record.candidate_coins = context.candidate_symbols();
        {
            let mut status = self.status.write().await;
            status.account = Some(context.account.clone());
            status.last_cycle_at = Some(started);
        }

        // 2. 模型
        let prompts = self.context_provider.render_prompts(&context);
        record.system_prompt = prompts.system.clone();
        record.input_prompt = prompts.user.clone();
        let completed = bounded(
            self.config.model_timeout(),
            self.completion.complete(&prompts.system, &prompts.user),
        )
        .await;
        let raw = match completed {
            Ok(raw) => raw,
            Err(e) => return Ok(self.record_failure(record, format!("调用模型失败: {}", e)).await),
        };
        record.raw_response = Some(raw.clone());

        // 3. 解析 + 校验
        let full = match parse_full_decision_response(
            &raw,
            context.account_equity(),
            &self.config.risk_limits,
        ) {
            Ok(full) => full,
            Err(e) => {
                record.cot_trace = e.cot_trace().unwrap_or_default().to_string();
                record.decision_json = "[]".to_string();
                return Ok(self.record_failure(record, e.to_string()).await);
            }
        };
        record.cot_trace = full.cot_trace.clone();
        record.decision_json = full.decision_json()?;

        // 4. 执行：先平仓再开仓
        let mut decisions = full.decisions.clone();
        sort_decisions_close_first(&mut decisions);
        let mut executed = 0usize;
        for decision in decisions.iter().filter(|d| d.is_actionable()) {
            let mut action = DecisionAction::new(&decision.action, &decision.symbol, Utc::now());
            action.leverage = decision.leverage;
            let result = bounded(
                self.config.execution_timeout(),
                self.executor.execute(decision),
            )
            .await;
            match result {
                Ok(report) => {
                    action.price = report.price;
                    action.quantity = report.quantity;
                    action.order_id = report.order_id;
                    action.success = true;
                    executed += 1;
                    record.execution_log.push(format!(
                        "✓ {} {} 成功 price={} qty={}",
                        decision.symbol, decision.action, action.price, action.quantity
                    ));
                }
                Err(e) => {
                    action.error = e.to_string();
                    error!(
                        "[{}] ❌ 执行决策失败 ({} {}): {}",
                        self.config.id, decision.symbol, decision.action, e
                    );
                    record.execution_log.push(format!(
                        "✗ {} {} 失败: {}",
                        decision.symbol, decision.action, e
                    ));
                }
            }
            record.decisions.push(action);
        }

        // 5. 记账
        record.success = true;
        let cycle_number = self.persist(record).await;
        Ok(CycleOutcome::Success {
            cycle_number,
            executed,
            is_fallback: full.is_fallback,
        })
    }

    async fn load_performance(&self) -> Option<Arc<dyn PerformanceView>> {
        match self
            .ledger
            .analyze_performance(self.config.performance_lookback)
            .await
        {
            Ok(analysis) => Some(Arc::new(analysis)),
            Err(e) => {
                warn!("[{}] 读取历史绩效失败: {}", self.config.id, e);
                None
            }
        }
    }

    async fn record_failure(&self, mut record: DecisionRecord, reason: String) -> CycleOutcome {
        warn!("[{}] {}", self.config.id, reason);
        record.execution_log.push(reason.clone());
        record.mark_failed(reason.clone());
        let cycle_number = self.persist(record).await;
        CycleOutcome::RecoveredFailure {
            cycle_number,
            reason,
        }
    }

    /// 写账本；失败只记日志
    async fn persist(&self, record: DecisionRecord) -> Option<i64> {
        match self.ledger.append(record).await {
            Ok(cycle_number) => {
                self.status.write().await.last_cycle_number = Some(cycle_number);
                Some(cycle_number)
            }
            Err(e) => {
                error!("[{}] 保存决策记录失败: {}", self.config.id, e);
                None
            }
        }
    }
}

/// 给协作方调用加超时，统一成 anyhow 错误
async fn bounded<T, F>(timeout: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("超时 ({:?})", timeout)),
    }
}
