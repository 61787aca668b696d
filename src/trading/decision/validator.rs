//! 决策风控校验
//!
//! 只校验真实解析出的决策，兜底 wait 决策不经过这里。
//! 整组决策原子校验：第一条不合格的决策即终止，整组都不得执行。

use serde::{Deserialize, Serialize};

use crate::trading::decision::model::{Decision, TradeAction};

/// 入场价近似：止损到止盈方向上 20% 的位置
const ENTRY_OFFSET_RATIO: f64 = 0.2;
/// 仓位上限的浮点容差
const POSITION_TOLERANCE: f64 = 1.01;

/// 风控参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// 主流币杠杆上限
    pub major_leverage: i64,
    /// 山寨币杠杆上限
    pub altcoin_leverage: i64,
    /// 主流币仓位上限 = 权益 × 倍数
    pub major_position_multiple: f64,
    /// 山寨币仓位上限 = 权益 × 倍数
    pub altcoin_position_multiple: f64,
    /// 最小风险回报比
    pub min_risk_reward: f64,
    pub major_symbols: Vec<String>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            major_leverage: 5,
            altcoin_leverage: 5,
            major_position_multiple: 10.0,
            altcoin_position_multiple: 1.5,
            min_risk_reward: 3.0,
            major_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        }
    }
}

impl RiskLimits {
    pub fn is_major(&self, symbol: &str) -> bool {
        self.major_symbols.iter().any(|s| s == symbol)
    }

    pub fn leverage_limit(&self, symbol: &str) -> i64 {
        if self.is_major(symbol) {
            self.major_leverage
        } else {
            self.altcoin_leverage
        }
    }

    pub fn max_position_usd(&self, symbol: &str, account_equity: f64) -> f64 {
        let multiple = if self.is_major(symbol) {
            self.major_position_multiple
        } else {
            self.altcoin_position_multiple
        };
        account_equity * multiple
    }
}

/// 近似入场价下的风险回报
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskReward {
    pub entry_price: f64,
    pub risk_pct: f64,
    pub reward_pct: f64,
    pub ratio: f64,
}

/// 按近似入场价计算风险回报比；止损/止盈顺序错误时返回 None
pub fn risk_reward(action: TradeAction, stop_loss: f64, take_profit: f64) -> Option<RiskReward> {
    let (entry, risk, reward) = match action {
        TradeAction::OpenLong if stop_loss < take_profit => {
            let entry = stop_loss + (take_profit - stop_loss) * ENTRY_OFFSET_RATIO;
            (entry, entry - stop_loss, take_profit - entry)
        }
        TradeAction::OpenShort if stop_loss > take_profit => {
            let entry = stop_loss - (stop_loss - take_profit) * ENTRY_OFFSET_RATIO;
            (entry, stop_loss - entry, entry - take_profit)
        }
        _ => return None,
    };
    if entry <= 0.0 || risk <= 0.0 {
        return None;
    }
    let risk_pct = risk / entry * 100.0;
    let reward_pct = reward / entry * 100.0;
    Some(RiskReward {
        entry_price: entry,
        risk_pct,
        reward_pct,
        ratio: reward_pct / risk_pct,
    })
}

/// 校验单条决策，返回失败原因
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn validate_decision(
    decision: &Decision,
    account_equity: f64,
    limits: &RiskLimits,
) -> Result<(), String> {
    let action = TradeAction::parse(&decision.action)
        .ok_or_else(|| format!("无效的 action: {}", decision.action))?;

    if !action.is_open() {
        return Ok(());
    }

    let symbol = decision.symbol.as_str();
    let max_leverage = limits.leverage_limit(symbol);
    if decision.leverage < 1 || decision.leverage > max_leverage {
        return Err(format!(
            "{} 杠杆必须在 1-{} 之间: {}",
            symbol, max_leverage, decision.leverage
        ));
    }

    // 比较写成取反形式，NaN 也会被拒绝
    if !(decision.position_size_usd > 0.0) {
        return Err(format!(
            "{} 仓位大小必须大于0: {:.2}",
            symbol, decision.position_size_usd
        ));
    }
    let max_position = limits.max_position_usd(symbol, account_equity);
    if !(decision.position_size_usd <= max_position * POSITION_TOLERANCE) {
        return Err(format!(
            "{} 仓位 {:.2} USDT 超过上限 {:.2} USDT",
            symbol, decision.position_size_usd, max_position
        ));
    }

    if !(decision.stop_loss > 0.0 && decision.take_profit > 0.0) {
        return Err(format!(
            "{} 止损和止盈必须大于0: stop_loss={}, take_profit={}",
            symbol, decision.stop_loss, decision.take_profit
        ));
    }
    match action {
        TradeAction::OpenLong if decision.stop_loss >= decision.take_profit => {
            return Err(format!(
                "{} 做多止损价必须小于止盈价: stop_loss={}, take_profit={}",
                symbol, decision.stop_loss, decision.take_profit
            ));
        }
        TradeAction::OpenShort if decision.stop_loss <= decision.take_profit => {
            return Err(format!(
                "{} 做空止损价必须大于止盈价: stop_loss={}, take_profit={}",
                symbol, decision.stop_loss, decision.take_profit
            ));
        }
        _ => {}
    }

    let rr = risk_reward(action, decision.stop_loss, decision.take_profit)
        .ok_or_else(|| format!("{} 无法计算风险回报比", symbol))?;
    if rr.ratio < limits.min_risk_reward {
        return Err(format!(
            "{} 风险回报比过低 {:.2}:1 (要求 ≥{:.1}:1), 风险 {:.2}%, 收益 {:.2}%",
            symbol, rr.ratio, limits.min_risk_reward, rr.risk_pct, rr.reward_pct
        ));
    }

    Ok(())
}

/// 整组校验，第一条失败即返回（附带序号）
pub fn validate_decisions(
    decisions: &[Decision],
    account_equity: f64,
    limits: &RiskLimits,
) -> Result<(), String> {
    for (i, decision) in decisions.iter().enumerate() {
        validate_decision(decision, account_equity, limits)
            .map_err(|reason| format!("决策 #{} 校验失败: {}", i + 1, reason))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn open(symbol: &str, action: &str, leverage: i64, size: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action: action.to_string(),
            leverage,
            position_size_usd: size,
            stop_loss: sl,
            take_profit: tp,
            ..Decision::wait_all("")
        }
    }

    #[test]
    fn test_valid_long_and_short() {
        let limits = RiskLimits::default();
        assert!(validate_decision(&open("BTCUSDT", "open_long", 5, 1000.0, 90.0, 110.0), 1000.0, &limits).is_ok());
        assert!(validate_decision(&open("SOLUSDT", "open_short", 3, 1500.0, 110.0, 90.0), 1000.0, &limits).is_ok());
    }

    #[test]
    fn test_leverage_bounds_per_asset_class() {
        let limits = RiskLimits {
            major_leverage: 20,
            altcoin_leverage: 5,
            ..Default::default()
        };
        assert!(validate_decision(&open("BTCUSDT", "open_long", 20, 100.0, 90.0, 110.0), 1000.0, &limits).is_ok());
        assert!(validate_decision(&open("SOLUSDT", "open_long", 20, 100.0, 90.0, 110.0), 1000.0, &limits).is_err());
        assert!(validate_decision(&open("SOLUSDT", "open_long", 0, 100.0, 90.0, 110.0), 1000.0, &limits).is_err());
    }

    #[test]
    fn test_position_size_tolerance() {
        let limits = RiskLimits::default();
        // 山寨币上限 1000 × 1.5 = 1500，容差 1%
        assert!(validate_decision(&open("SOLUSDT", "open_long", 2, 1510.0, 90.0, 110.0), 1000.0, &limits).is_ok());
        assert!(validate_decision(&open("SOLUSDT", "open_long", 2, 1520.0, 90.0, 110.0), 1000.0, &limits).is_err());
        assert!(validate_decision(&open("BTCUSDT", "open_long", 2, 10_000.0, 90.0, 110.0), 1000.0, &limits).is_ok());
        assert!(validate_decision(&open("BTCUSDT", "open_long", 2, 0.0, 90.0, 110.0), 1000.0, &limits).is_err());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let limits = RiskLimits::default();
        assert!(validate_decision(&open("SOLUSDT", "open_long", 3, f64::NAN, 100.0, 150.0), 1000.0, &limits).is_err());
        assert!(validate_decision(&open("SOLUSDT", "open_long", 3, f64::INFINITY, 100.0, 150.0), 1000.0, &limits).is_err());
        assert!(validate_decision(&open("SOLUSDT", "open_long", 3, 500.0, f64::NAN, 150.0), 1000.0, &limits).is_err());
    }

    #[test]
    fn test_stop_take_ordering() {
        let limits = RiskLimits::default();
        let err = validate_decision(&open("BTCUSDT", "open_long", 5, 1000.0, 100.0, 90.0), 1000.0, &limits).unwrap_err();
        assert!(err.contains("止损价必须小于止盈价"));
        assert!(validate_decision(&open("BTCUSDT", "open_short", 5, 1000.0, 90.0, 100.0), 1000.0, &limits).is_err());
        assert!(validate_decision(&open("BTCUSDT", "open_long", 5, 1000.0, 0.0, 100.0), 1000.0, &limits).is_err());
    }

    #[test]
    fn test_risk_reward_approximation_is_fixed() {
        let rr = risk_reward(TradeAction::OpenLong, 90.0, 110.0).unwrap();
        assert_relative_eq!(rr.entry_price, 94.0);
        assert_relative_eq!(rr.ratio, 4.0, epsilon = 1e-9);
        let rr = risk_reward(TradeAction::OpenShort, 110.0, 90.0).unwrap();
        assert_relative_eq!(rr.entry_price, 106.0);
        assert_relative_eq!(rr.ratio, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_min_risk_reward_threshold() {
        let limits = RiskLimits {
            min_risk_reward: 5.0,
            ..Default::default()
        };
        let err = validate_decision(&open("BTCUSDT", "open_long", 5, 1000.0, 90.0, 110.0), 1000.0, &limits).unwrap_err();
        assert!(err.contains("风险回报比过低"));
        assert!(err.contains("4.00:1"));
    }

    #[test]
    fn test_unknown_action_and_atomic_set() {
        let limits = RiskLimits::default();
        let decisions = vec![
            open("BTCUSDT", "open_long", 5, 1000.0, 90.0, 110.0),
            open("ETHUSDT", "buy", 0, 0.0, 0.0, 0.0),
        ];
        let err = validate_decisions(&decisions, 1000.0, &limits).unwrap_err();
        assert!(err.contains("#2"));
        assert!(validate_decision(&open("ALL", "wait", 0, 0.0, 0.0, 0.0), 0.0, &limits).is_ok());
    }
}
