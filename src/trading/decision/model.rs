use serde::{Deserialize, Deserializer, Serialize};

/// 决策动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
}

impl TradeAction {
    pub const ALL: [TradeAction; 6] = [
        TradeAction::OpenLong,
        TradeAction::OpenShort,
        TradeAction::CloseLong,
        TradeAction::CloseShort,
        TradeAction::Hold,
        TradeAction::Wait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::CloseLong => "close_long",
            TradeAction::CloseShort => "close_short",
            TradeAction::Hold => "hold",
            TradeAction::Wait => "wait",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == s)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TradeAction::OpenLong | TradeAction::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, TradeAction::CloseLong | TradeAction::CloseShort)
    }

    /// 开平仓动作对应的持仓方向
    pub fn side(&self) -> Option<&'static str> {
        match self {
            TradeAction::OpenLong | TradeAction::CloseLong => Some("long"),
            TradeAction::OpenShort | TradeAction::CloseShort => Some("short"),
            TradeAction::Hold | TradeAction::Wait => None,
        }
    }

    /// 执行顺序：先平仓释放保证金，再开仓，最后 hold/wait
    fn execution_priority(&self) -> u8 {
        match self {
            TradeAction::CloseLong | TradeAction::CloseShort => 0,
            TradeAction::OpenLong | TradeAction::OpenShort => 1,
            TradeAction::Hold | TradeAction::Wait => 2,
        }
    }
}

/// 模型给出的一条交易决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub leverage: i64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub position_size_usd: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub stop_loss: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub take_profit: f64,
    /// 信心度 0-100
    #[serde(default, deserialize_with = "lenient_i64")]
    pub confidence: i64,
    /// 最大风险(USD)
    #[serde(default, deserialize_with = "lenient_f64")]
    pub risk_usd: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// 兜底的 wait 决策
    pub fn wait_all(reasoning: impl Into<String>) -> Self {
        Self {
            symbol: "ALL".to_string(),
            action: TradeAction::Wait.as_str().to_string(),
            leverage: 0,
            position_size_usd: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            confidence: 0,
            risk_usd: 0.0,
            reasoning: reasoning.into(),
        }
    }

    pub fn trade_action(&self) -> Option<TradeAction> {
        TradeAction::parse(&self.action)
    }

    /// 是否需要交给执行端
    pub fn is_actionable(&self) -> bool {
        self.trade_action()
            .map(|a| a.is_open() || a.is_close())
            .unwrap_or(false)
    }
}

/// 一次模型输出的完整解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct FullDecision {
    /// 思维链，总是非空
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub raw_response: String,
    /// 是否为提取失败后合成的 wait 决策
    pub is_fallback: bool,
}

impl FullDecision {
    /// 规范化的决策 JSON
    pub fn decision_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.decisions)
    }
}

/// 先平仓、再开仓、最后 hold/wait；同优先级保持原顺序
pub fn sort_decisions_close_first(decisions: &mut [Decision]) {
    decisions.sort_by_key(|d| {
        d.trade_action()
            .map(|a| a.execution_priority())
            .unwrap_or(u8::MAX)
    });
}

/// 数字字段兼容：数字、数字字符串、null（按 0 处理）；NaN/inf 视为非法
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let v = match value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("invalid number")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid number: {}", s))),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {}",
            other
        ))),
    }?;
    if !v.is_finite() {
        return Err(serde::de::Error::custom(format!("non-finite number: {}", v)));
    }
    Ok(v)
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = lenient_f64(deserializer)?;
    Ok(v.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_action_round_trip_names() {
        for action in TradeAction::ALL {
            assert_eq!(TradeAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(TradeAction::parse("buy"), None);
        assert_eq!(TradeAction::CloseShort.side(), Some("short"));
        assert_eq!(TradeAction::Wait.side(), None);
    }

    #[test]
    fn test_lenient_number_fields() {
        let json = r#"{"symbol":"SOLUSDT","action":"open_long","leverage":"3",
            "position_size_usd":500,"stop_loss":null,"take_profit":"12.5","confidence":85.0}"#;
        let d: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(d.leverage, 3);
        assert_eq!(d.position_size_usd, 500.0);
        assert_eq!(d.stop_loss, 0.0);
        assert_eq!(d.take_profit, 12.5);
        assert_eq!(d.confidence, 85);
        assert_eq!(d.reasoning, "");
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for raw in ["\"NaN\"", "\"inf\"", "\"-inf\""] {
            let json = format!(
                r#"{{"symbol":"SOLUSDT","action":"open_long","position_size_usd":{}}}"#,
                raw
            );
            assert!(serde_json::from_str::<Decision>(&json).is_err(), "{}", raw);
        }
        let json = r#"{"symbol":"SOLUSDT","action":"open_long","leverage":"NaN"}"#;
        assert!(serde_json::from_str::<Decision>(json).is_err());
    }

    #[test]
    fn test_sort_close_first_is_stable() {
        let mk = |symbol: &str, action: &str| Decision {
            symbol: symbol.to_string(),
            action: action.to_string(),
            ..Decision::wait_all("")
        };
        let mut decisions = vec![
            mk("BTCUSDT", "open_long"),
            mk("ETHUSDT", "hold"),
            mk("SOLUSDT", "close_short"),
            mk("BNBUSDT", "open_short"),
            mk("XRPUSDT", "close_long"),
        ];
        sort_decisions_close_first(&mut decisions);
        let order: Vec<&str> = decisions.iter().map(|d| d.symbol.as_str()).collect();
        assert_eq!(
            order,
            vec!["SOLUSDT", "XRPUSDT", "BTCUSDT", "BNBUSDT", "ETHUSDT"]
        );
    }
}
