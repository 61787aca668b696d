use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::app_error::LedgerError;
use crate::trading::decision::TradeAction;
use crate::trading::model::decision_record::DecisionRecord;

/// 当前使用的存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerBackend {
    /// 多交易单元共享的 MySQL
    SharedMysql,
    /// 单交易单元独占的 SQLite
    EmbeddedSqlite,
    /// 每个周期一个 JSON 文件
    JsonFile,
}

impl LedgerBackend {
    pub fn is_relational(&self) -> bool {
        !matches!(self, LedgerBackend::JsonFile)
    }
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerBackend::SharedMysql => "shared-mysql",
            LedgerBackend::EmbeddedSqlite => "embedded-sqlite",
            LedgerBackend::JsonFile => "json-file",
        };
        write!(f, "{}", name)
    }
}

/// 周期统计（不含种子记录）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_cycles: i64,
    pub successful_cycles: i64,
    pub failed_cycles: i64,
    /// 成功的开仓动作数
    pub total_open_positions: i64,
    /// 成功的平仓动作数
    pub total_close_positions: i64,
}

impl Statistics {
    pub fn from_records(records: &[DecisionRecord]) -> Self {
        let mut stats = Statistics::default();
        for record in records.iter().filter(|r| !r.is_seed()) {
            stats.total_cycles += 1;
            if record.success {
                stats.successful_cycles += 1;
            } else {
                stats.failed_cycles += 1;
            }
            for action in record.decisions.iter().filter(|a| a.success) {
                match TradeAction::parse(&action.action) {
                    Some(a) if a.is_open() => stats.total_open_positions += 1,
                    Some(a) if a.is_close() => stats.total_close_positions += 1,
                    _ => {}
                }
            }
        }
        stats
    }
}

/// 决策记录存储
///
/// 所有列表查询按 `cycle_number` 升序返回，并包含种子记录；
/// 种子记录的过滤由账本负责。
#[async_trait]
pub trait DecisionStore: Send + Sync {
    fn backend(&self) -> LedgerBackend;

    /// 已提交的最大周期号，空库返回 None
    async fn max_cycle_number(&self) -> Result<Option<i64>, LedgerError>;

    async fn cycle_exists(&self, cycle_number: i64) -> Result<bool, LedgerError>;

    /// 原子写入一条记录（含持仓和动作），周期号冲突返回 `LedgerError::Conflict`
    async fn insert(&self, record: &DecisionRecord) -> Result<(), LedgerError>;

    /// 最近 n 条（升序）
    async fn latest(&self, n: usize) -> Result<Vec<DecisionRecord>, LedgerError>;

    async fn all(&self) -> Result<Vec<DecisionRecord>, LedgerError>;

    /// 时间区间 [start_ms, end_ms) 内的记录
    async fn between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<DecisionRecord>, LedgerError>;

    /// 删除早于 cutoff_ms 的非种子记录，返回删除条数
    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64, LedgerError>;

    async fn statistics(&self) -> Result<Statistics, LedgerError> {
        let records = self.all().await?;
        Ok(Statistics::from_records(&records))
    }
}
