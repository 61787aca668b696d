//! 决策周期记录
//!
//! 每个交易周期一条 `DecisionRecord`，只由账本写入；
//! 绩效分析和外部查询只读使用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 种子记录的周期号：只用于保存初始资金基线
pub const SEED_CYCLE_NUMBER: i64 = 0;

/// 账户快照（周期开始时的时点拷贝）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// 账户总权益
    pub total_balance: f64,
    /// 可用余额
    pub available_balance: f64,
    /// 未实现盈亏
    pub total_unrealized_profit: f64,
    /// 持仓数量
    pub position_count: i64,
    /// 保证金使用率(%)
    pub margin_used_pct: f64,
}

/// 持仓快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// long / short
    pub side: String,
    pub position_amt: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
}

/// 已尝试执行的决策动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAction {
    /// open_long / open_short / close_long / close_short
    pub action: String,
    pub symbol: String,
    pub quantity: f64,
    pub leverage: i64,
    /// 成交价
    pub price: f64,
    pub order_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

impl DecisionAction {
    pub fn new(action: &str, symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            action: action.to_string(),
            symbol: symbol.to_string(),
            quantity: 0.0,
            leverage: 0,
            price: 0.0,
            order_id: String::new(),
            timestamp,
            success: false,
            error: String::new(),
        }
    }
}

/// 单个周期的完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    /// 周期号，同一交易单元内严格递增
    pub cycle_number: i64,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub input_prompt: String,
    /// 思维链
    #[serde(default)]
    pub cot_trace: String,
    /// 规范化后的决策 JSON
    #[serde(default)]
    pub decision_json: String,
    /// 模型原始输出，仅失败周期保留
    #[serde(default)]
    pub raw_response: Option<String>,
    pub account_state: AccountSnapshot,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub candidate_coins: Vec<String>,
    /// 实际尝试执行的动作
    #[serde(default)]
    pub decisions: Vec<DecisionAction>,
    /// 执行日志，仅失败周期保留
    #[serde(default)]
    pub execution_log: Vec<String>,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
}

impl DecisionRecord {
    /// 新建一条空记录，周期号由账本在写入时分配
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cycle_number: 0,
            system_prompt: String::new(),
            input_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: String::new(),
            raw_response: None,
            account_state: AccountSnapshot::default(),
            positions: Vec::new(),
            candidate_coins: Vec::new(),
            decisions: Vec::new(),
            execution_log: Vec::new(),
            success: false,
            error_message: String::new(),
        }
    }

    /// 初始资金种子记录（cycle 0）
    pub fn seed(initial_balance: f64, timestamp: DateTime<Utc>) -> Self {
        let mut record = Self::new(timestamp);
        record.cycle_number = SEED_CYCLE_NUMBER;
        record.cot_trace = "initial balance seed".to_string();
        record.decision_json = "[]".to_string();
        record.account_state = AccountSnapshot {
            total_balance: initial_balance,
            available_balance: initial_balance,
            ..Default::default()
        };
        record.success = true;
        record
    }

    pub fn is_seed(&self) -> bool {
        self.cycle_number == SEED_CYCLE_NUMBER
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// 标记周期失败
    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.success = false;
        self.error_message = error_message.into();
    }

    /// 成功周期不落库原始输出和执行日志，控制长期存储增长
    pub fn compact_for_storage(&mut self) {
        if self.success {
            self.raw_response = None;
            self.execution_log.clear();
        }
    }
}
