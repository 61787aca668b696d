//! 单个周期的只读输入
//!
//! 由外部的上下文构建方（行情、指标、账户）组装，核心只读取。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use crate::trading::analysis::performance_analysis::PerformanceView;
use crate::trading::model::decision_record::{AccountSnapshot, PositionSnapshot};

/// 周期计数信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleInfo {
    /// 预计的周期号（以账本写入时分配的为准）
    pub cycle_number: i64,
    /// 本进程内的调用次数
    pub call_count: u64,
    /// 本进程运行分钟数
    pub runtime_minutes: i64,
}

/// 候选币种
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCoin {
    pub symbol: String,
    /// 来源标签（如 ai500 / oi_top）
    pub sources: Vec<String>,
}

#[derive(Clone)]
pub struct Context {
    pub current_time: DateTime<Utc>,
    pub cycle: CycleInfo,
    pub account: AccountSnapshot,
    pub positions: Vec<PositionSnapshot>,
    pub candidate_coins: Vec<CandidateCoin>,
    /// 每个币种的行情/指标摘要文本
    pub market_summaries: HashMap<String, String>,
    /// 历史绩效
    pub performance: Option<Arc<dyn PerformanceView>>,
}

impl Context {
    pub fn account_equity(&self) -> f64 {
        self.account.total_balance
    }

    pub fn candidate_symbols(&self) -> Vec<String> {
        self.candidate_coins.iter().map(|c| c.symbol.clone()).collect()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("current_time", &self.current_time)
            .field("cycle", &self.cycle)
            .field("account", &self.account)
            .field("positions", &self.positions.len())
            .field("candidate_coins", &self.candidate_coins.len())
            .field(
                "sharpe_ratio",
                &self.performance.as_ref().map(|p| p.sharpe_ratio()),
            )
            .finish()
    }
}

/// 渲染好的提示词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}
