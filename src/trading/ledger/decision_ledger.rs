//! 决策账本
//!
//! 每个交易单元一个实例，周期号计数器是实例字段，没有全局状态。
//!
//! 后端选择：共享 MySQL → 单机 SQLite → JSON 文件，每次降级都记 warn 日志。
//!
//! 周期号对账：启动时以及每次写入前读取已提交的最大周期号，
//! 下一个周期号 = max(库内最大值, 待迁移旧记录最大值) + 1；
//! 空库或只有种子记录时为 1。与内存计数器不一致时以库为准重新对齐。

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app_config::db::{connect_sqlite, LedgerConfig};
use crate::error::app_error::LedgerError;
use crate::time_util::{day_range_ms, days_ago_ms, mill_time_to_datetime};
use crate::trading::analysis::performance_analysis::{
    equity_curve, reconstruct_trades, split_window, summarize, PerformanceAnalysis,
    SEED_WINDOW_MULTIPLIER,
};
use crate::trading::ledger::file_store::FileDecisionStore;
use crate::trading::ledger::sql_store::{SharedPool, SqlDecisionStore};
use crate::trading::ledger::store::{DecisionStore, LedgerBackend, Statistics};
use crate::trading::model::decision_record::{DecisionRecord, SEED_CYCLE_NUMBER};

const SQLITE_FILE_NAME: &str = "decisions.db";
const LEGACY_DIR_NAME: &str = "decision_logs";

pub struct DecisionLedger {
    trader_id: String,
    store: Arc<dyn DecisionStore>,
    /// 最后一次写入的周期号；锁同时串行化写入
    cycle: Mutex<i64>,
    /// 尚未迁移完的旧记录最大周期号，迁移完成后清零
    pending_legacy_max: Arc<AtomicI64>,
    query_timeout: Duration,
    migration: Mutex<Option<JoinHandle<()>>>,
}

impl DecisionLedger {
    /// 按降级链打开账本；`shared` 为进程内共享的 MySQL 连接池
    pub async fn open(
        trader_id: &str,
        config: &LedgerConfig,
        shared: Option<&SharedPool>,
    ) -> Result<Self, LedgerError> {
        let trader_dir = config.trader_dir(trader_id);
        let legacy_dir = trader_dir.join(LEGACY_DIR_NAME);

        let store = Self::select_backend(trader_id, config, shared).await?;
        info!(
            "交易单元 {} 账本后端: {}",
            trader_id,
            store.backend()
        );
        Self::with_store(trader_id, store, Some(legacy_dir.as_path()), config.query_timeout).await
    }

    async fn select_backend(
        trader_id: &str,
        config: &LedgerConfig,
        shared: Option<&SharedPool>,
    ) -> Result<Arc<dyn DecisionStore>, LedgerError> {
        if let Some(pool) = shared {
            let store = pool.store_for(trader_id);
            match tokio::time::timeout(config.connect_timeout, store.max_cycle_number()).await {
                Ok(Ok(_)) => return Ok(Arc::new(store)),
                Ok(Err(e)) => warn!("交易单元 {} 共享数据库不可用，降级到本地 SQLite: {}", trader_id, e),
                Err(_) => warn!("交易单元 {} 共享数据库响应超时，降级到本地 SQLite", trader_id),
            }
        }

        let sqlite_path = config.trader_dir(trader_id).join(SQLITE_FILE_NAME);
        let embedded = async {
            let rb = connect_sqlite(&sqlite_path, config.connect_timeout).await?;
            match tokio::time::timeout(config.connect_timeout, SqlDecisionStore::embedded(rb)).await
            {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Timeout("本地 SQLite 建表超时".to_string())),
            }
        };
        match embedded.await {
            Ok(store) => return Ok(Arc::new(store)),
            Err(e) => warn!("交易单元 {} 本地 SQLite 不可用，降级到 JSON 文件: {}", trader_id, e),
        }

        let files_dir = config.trader_dir(trader_id).join(LEGACY_DIR_NAME);
        let store = FileDecisionStore::open(files_dir).await?;
        Ok(Arc::new(store))
    }

    /// 基于已打开的存储构建账本；关系型后端时检查旧 JSON 记录并在后台迁移
    pub async fn with_store(
        trader_id: &str,
        store: Arc<dyn DecisionStore>,
        legacy_dir: Option<&Path>,
        query_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let pending_legacy_max = Arc::new(AtomicI64::new(0));
        let mut legacy_records = Vec::new();

        if store.backend().is_relational() {
            if let Some(dir) = legacy_dir {
                if let Some(legacy) = FileDecisionStore::open_existing(dir).await {
                    match legacy.all().await {
                        Ok(records) => legacy_records = records,
                        Err(e) => warn!("读取旧决策文件失败 {}: {}", dir.display(), e),
                    }
                }
            }
        }
        if let Some(max) = legacy_records.iter().map(|r| r.cycle_number).max() {
            pending_legacy_max.store(max, Ordering::SeqCst);
        }

        let ledger = Self {
            trader_id: trader_id.to_string(),
            store,
            cycle: Mutex::new(0),
            pending_legacy_max,
            query_timeout,
            migration: Mutex::new(None),
        };

        let stored_max = match ledger.timed("读取最大周期号", ledger.store.max_cycle_number()).await {
            Ok(max) => max.unwrap_or(0),
            Err(e) => {
                warn!("交易单元 {} 启动时读取最大周期号失败: {}", trader_id, e);
                0
            }
        };
        let start = stored_max.max(ledger.pending_legacy_max.load(Ordering::SeqCst));
        *ledger.cycle.lock().await = start;
        info!("交易单元 {} 当前周期号: {}", trader_id, start);

        if !legacy_records.is_empty() {
            ledger.spawn_migration(legacy_records).await;
        }
        Ok(ledger)
    }

    async fn spawn_migration(&self, records: Vec<DecisionRecord>) {
        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending_legacy_max);
        let trader_id = self.trader_id.clone();
        info!(
            "交易单元 {} 发现 {} 条旧决策文件，后台迁移中",
            trader_id,
            records.len()
        );

        let handle = tokio::spawn(async move {
            let mut imported = 0usize;
            let mut skipped = 0usize;
            let mut failed = 0usize;
            for mut record in records {
                match store.cycle_exists(record.cycle_number).await {
                    Ok(true) => {
                        skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("迁移周期 #{} 检查失败: {}", record.cycle_number, e);
                        failed += 1;
                        continue;
                    }
                }
                record.compact_for_storage();
                match store.insert(&record).await {
                    Ok(()) => imported += 1,
                    Err(LedgerError::Conflict(_)) => skipped += 1,
                    Err(e) => {
                        warn!("迁移周期 #{} 失败: {}", record.cycle_number, e);
                        failed += 1;
                    }
                }
            }
            if failed == 0 {
                pending.store(0, Ordering::SeqCst);
            }
            info!(
                "交易单元 {} 旧决策迁移完成: 导入 {}, 跳过 {}, 失败 {}",
                trader_id, imported, skipped, failed
            );
        });
        *self.migration.lock().await = Some(handle);
    }

    /// 等待后台迁移结束（测试和优雅退出用）
    pub async fn wait_for_migration(&self) {
        let handle = self.migration.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("交易单元 {} 旧决策迁移任务异常: {}", self.trader_id, e);
            }
        }
    }

    pub fn trader_id(&self) -> &str {
        &self.trader_id
    }

    pub fn backend(&self) -> LedgerBackend {
        self.store.backend()
    }

    /// 最后一次写入（或对账得到）的周期号
    pub async fn current_cycle(&self) -> i64 {
        *self.cycle.lock().await
    }

    async fn timed<T, F>(&self, op: &str, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "{} 超时 ({:?})",
                op, self.query_timeout
            ))),
        }
    }

    /// 写入前对账，返回应使用的周期号
    async fn next_cycle(&self, in_memory: i64) -> i64 {
        let expected = in_memory + 1;
        match self.timed("读取最大周期号", self.store.max_cycle_number()).await {
            Ok(stored) => {
                let stored = stored.unwrap_or(0);
                let legacy = self.pending_legacy_max.load(Ordering::SeqCst);
                let next = stored.max(legacy).max(SEED_CYCLE_NUMBER) + 1;
                if next != expected {
                    warn!(
                        "交易单元 {} 周期号与存储不一致: 内存 {}, 存储最大 {}, 旧记录最大 {}, 对齐为 {}",
                        self.trader_id, in_memory, stored, legacy, next
                    );
                }
                next
            }
            Err(e) => {
                warn!(
                    "交易单元 {} 读取最大周期号失败，沿用内存计数 {}: {}",
                    self.trader_id, expected, e
                );
                expected
            }
        }
    }

    /// 写入一条周期记录，返回分配的周期号
    pub async fn append(&self, mut record: DecisionRecord) -> Result<i64, LedgerError> {
        let mut cycle = self.cycle.lock().await;
        record.compact_for_storage();
        record.cycle_number = self.next_cycle(*cycle).await;

        let first = self.timed("写入决策记录", self.store.insert(&record)).await;
        match first {
            Ok(()) => {}
            Err(LedgerError::Conflict(msg)) => {
                warn!(
                    "交易单元 {} 周期 #{} 冲突，重新对账后重试: {}",
                    self.trader_id, record.cycle_number, msg
                );
                let retry = self.next_cycle(record.cycle_number).await;
                record.cycle_number = retry.max(record.cycle_number + 1);
                self.timed("写入决策记录", self.store.insert(&record)).await?;
            }
            Err(e) => return Err(e),
        }

        *cycle = record.cycle_number;
        debug!(
            "交易单元 {} 周期 #{} 已记录 ({})",
            self.trader_id,
            record.cycle_number,
            self.store.backend()
        );
        Ok(record.cycle_number)
    }

    /// 写入初始资金种子记录（cycle 0），已存在则不写
    pub async fn seed_initial_balance(&self, initial_balance: f64) -> Result<bool, LedgerError> {
        let _guard = self.cycle.lock().await;
        if self
            .timed("检查种子记录", self.store.cycle_exists(SEED_CYCLE_NUMBER))
            .await?
        {
            return Ok(false);
        }
        let seed = DecisionRecord::seed(initial_balance, Utc::now());
        self.timed("写入种子记录", self.store.insert(&seed)).await?;
        info!(
            "交易单元 {} 初始资金基线: {:.2}",
            self.trader_id, initial_balance
        );
        Ok(true)
    }

    /// 种子记录中的初始资金
    pub async fn initial_balance(&self) -> Result<Option<f64>, LedgerError> {
        let records = self.timed("读取种子记录", self.store.all()).await?;
        Ok(records
            .iter()
            .find(|r| r.is_seed())
            .map(|r| r.account_state.total_balance))
    }

    /// 最近 n 个周期（升序，不含种子记录）
    pub async fn latest_records(&self, n: usize) -> Result<Vec<DecisionRecord>, LedgerError> {
        let records = self
            .timed("查询最近记录", self.store.latest(n.saturating_add(1)))
            .await?;
        let mut records: Vec<DecisionRecord> = records.into_iter().filter(|r| !r.is_seed()).collect();
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }

    /// 全部周期（升序，不含种子记录）
    pub async fn all_records(&self) -> Result<Vec<DecisionRecord>, LedgerError> {
        let records = self.timed("查询全部记录", self.store.all()).await?;
        Ok(records.into_iter().filter(|r| !r.is_seed()).collect())
    }

    /// 某个 UTC 自然日的周期
    pub async fn records_by_date(&self, date: NaiveDate) -> Result<Vec<DecisionRecord>, LedgerError> {
        let (start, end) = day_range_ms(date);
        let records = self.timed("按日期查询", self.store.between(start, end)).await?;
        Ok(records.into_iter().filter(|r| !r.is_seed()).collect())
    }

    pub async fn statistics(&self) -> Result<Statistics, LedgerError> {
        self.timed("统计", self.store.statistics()).await
    }

    /// 删除 days 天之前的周期，种子记录保留
    pub async fn purge_older_than(&self, days: i64) -> Result<u64, LedgerError> {
        let cutoff = days_ago_ms(Utc::now(), days);
        let deleted = self.timed("清理历史记录", self.store.purge_before(cutoff)).await?;
        if deleted > 0 {
            info!(
                "交易单元 {} 清理 {} 之前的决策记录 {} 条",
                self.trader_id,
                mill_time_to_datetime(cutoff).unwrap_or_default(),
                deleted
            );
        }
        Ok(deleted)
    }

    /// 绩效分析；lookback 为 0 时分析全部历史
    pub async fn analyze_performance(&self, lookback: usize) -> Result<PerformanceAnalysis, LedgerError> {
        let records = if lookback == 0 {
            self.timed("读取全部记录", self.store.all()).await?
        } else {
            let widened = lookback.saturating_mul(SEED_WINDOW_MULTIPLIER).saturating_add(1);
            self.timed("读取扩大窗口", self.store.latest(widened)).await?
        };

        let (seed, window) = split_window(&records, lookback);
        let mut reconstruction = reconstruct_trades(window, seed, None);

        // 扩大窗口仍有未配对的平仓，且窗口之前还有更早的历史时，倒查完整历史
        let covers_history = records.first().map(|r| r.is_seed()).unwrap_or(true) || lookback == 0;
        if reconstruction.unmatched_closes > 0 && !covers_history {
            debug!(
                "交易单元 {} 有 {} 笔平仓在扩大窗口内找不到开仓，倒查完整历史",
                self.trader_id, reconstruction.unmatched_closes
            );
            let history = self.timed("读取完整历史", self.store.all()).await?;
            reconstruction = reconstruct_trades(window, seed, Some(&history));
        }

        let equity = equity_curve(window);
        Ok(summarize(&reconstruction.trades, &equity))
    }
}
