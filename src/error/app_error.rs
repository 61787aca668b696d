use thiserror::Error;

/// 决策解析/校验错误
#[derive(Error, Debug, Clone)]
pub enum DecisionError {
    /// 模型输出中找不到可解码的决策数组（内部会降级为 wait 决策，不会向外抛出）
    #[error("决策提取失败: {0}")]
    Extraction(String),

    /// 真实解析出的决策违反风控规则，整组决策都不得执行
    #[error("决策校验失败: {reason}")]
    Validation {
        reason: String,
        /// 完整思维链，供审计
        cot_trace: String,
        raw_response: String,
    },
}

impl DecisionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DecisionError::Validation { .. })
    }

    /// 校验失败时附带的思维链
    pub fn cot_trace(&self) -> Option<&str> {
        match self {
            DecisionError::Validation { cot_trace, .. } => Some(cot_trace),
            DecisionError::Extraction(_) => None,
        }
    }
}

/// 账本存储错误
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("存储不可用: {0}")]
    Unavailable(String),

    #[error("存储操作超时: {0}")]
    Timeout(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("周期号冲突: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rbatis::rbdc::Error> for LedgerError {
    fn from(err: rbatis::rbdc::Error) -> Self {
        let msg = err.to_string();
        if is_unique_violation(&msg) {
            LedgerError::Conflict(msg)
        } else {
            LedgerError::Database(msg)
        }
    }
}

/// MySQL: "Duplicate entry"；SQLite: "UNIQUE constraint failed"
pub fn is_unique_violation(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("duplicate entry") || lower.contains("unique constraint")
}

/// 交易单元调度错误
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("交易单元不存在: {0}")]
    UnitNotFound(String),

    #[error("交易单元已在运行: {0}")]
    AlreadyRunning(String),

    #[error("交易单元已注册: {0}")]
    AlreadyRegistered(String),

    #[error("交易单元故障: {trader_id}: {reason}")]
    Fault { trader_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_detection() {
        assert!(is_unique_violation(
            "Duplicate entry 'a-3' for key 'uk_trader_cycle'"
        ));
        assert!(is_unique_violation(
            "UNIQUE constraint failed: decisions.cycle_number"
        ));
        assert!(!is_unique_violation("no such table: decisions"));
    }

    #[test]
    fn test_validation_error_carries_trace() {
        let err = DecisionError::Validation {
            reason: "杠杆超限".to_string(),
            cot_trace: "thinking...".to_string(),
            raw_response: "raw".to_string(),
        };
        assert!(err.is_validation());
        assert_eq!(err.cot_trace(), Some("thinking..."));
        assert!(err.to_string().contains("杠杆超限"));
    }
}
