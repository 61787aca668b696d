//! 从动作日志重建已实现交易，并计算胜率、盈亏比、分币种统计、类夏普比率
//!
//! 回放规则：
//! - 只回放执行成功的动作
//! - (symbol, side) 对应最近一次尚未配对的开仓
//! - 平仓找不到开仓时，在扩大窗口（回看周期数的 3 倍）回放后仍未平掉的开仓里找；
//!   扩大窗口仍不够时，改为回放窗口之前的完整历史
//! - 开仓配对后即消耗，不会被第二笔平仓重复使用
//! - 数量和杠杆取开仓动作的值，成交价分别取开/平仓动作的成交价

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trading::analysis::metrics::{profit_factor, ratio_pct, sharpe_ratio};
use crate::trading::decision::TradeAction;
use crate::trading::model::decision_record::{DecisionAction, DecisionRecord};

/// 返回的最近交易条数
pub const RECENT_TRADES_LIMIT: usize = 10;
/// 扩大窗口倍数
pub const SEED_WINDOW_MULTIPLIER: usize = 3;

/// 一笔重建出来的已实现交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    /// long / short
    pub side: String,
    pub quantity: f64,
    pub leverage: i64,
    pub open_price: f64,
    pub close_price: f64,
    /// 名义价值 = 数量 × 开仓价
    pub position_value: f64,
    /// 占用保证金 = 名义价值 / 杠杆
    pub margin_used: f64,
    pub pn_l: f64,
    /// 相对保证金的收益率(%)
    pub pn_l_pct: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    /// 持仓时长（秒）
    pub holding_secs: i64,
}

/// 分币种统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolPerformance {
    pub symbol: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pn_l: f64,
    pub avg_pn_l: f64,
}

/// 绩效分析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    /// 最近的交易，新的在前
    pub recent_trades: Vec<TradeOutcome>,
    pub symbol_stats: HashMap<String, SymbolPerformance>,
    pub best_symbol: String,
    pub worst_symbol: String,
}

/// 供上下文构建方读取的历史绩效
pub trait PerformanceView: Send + Sync {
    fn sharpe_ratio(&self) -> f64;
    fn win_rate(&self) -> f64;
    fn total_trades(&self) -> usize;
    fn profit_factor(&self) -> f64;
}

impl PerformanceView for PerformanceAnalysis {
    fn sharpe_ratio(&self) -> f64 {
        self.sharpe_ratio
    }

    fn win_rate(&self) -> f64 {
        self.win_rate
    }

    fn total_trades(&self) -> usize {
        self.total_trades
    }

    fn profit_factor(&self) -> f64 {
        self.profit_factor
    }
}

/// 重建结果
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub trades: Vec<TradeOutcome>,
    /// 到处都找不到开仓的平仓动作数
    pub unmatched_closes: usize,
}

type PositionKey = (String, &'static str);

fn successful_actions(record: &DecisionRecord) -> impl Iterator<Item = (&DecisionAction, TradeAction)> + '_ {
    record
        .decisions
        .iter()
        .filter(|a| a.success)
        .filter_map(|a| TradeAction::parse(&a.action).map(|t| (a, t)))
}

fn position_key(action: &DecisionAction, trade_action: TradeAction) -> Option<PositionKey> {
    trade_action
        .side()
        .map(|side| (action.symbol.clone(), side))
}

/// 回放开平仓动作，返回仍未配对的开仓
fn replay_opens(records: &[DecisionRecord]) -> HashMap<PositionKey, DecisionAction> {
    let mut open_positions = HashMap::new();
    for record in records {
        for (action, trade_action) in successful_actions(record) {
            let Some(key) = position_key(action, trade_action) else {
                continue;
            };
            if trade_action.is_open() {
                open_positions.insert(key, action.clone());
            } else if trade_action.is_close() {
                open_positions.remove(&key);
            }
        }
    }
    open_positions
}

/// 由一对开平仓动作计算交易结果
pub fn build_outcome(open: &DecisionAction, close: &DecisionAction, side: &str) -> TradeOutcome {
    let quantity = open.quantity;
    let leverage = open.leverage.max(1);
    let position_value = quantity * open.price;
    let margin_used = position_value / leverage as f64;
    let raw = quantity * (close.price - open.price);
    let pn_l = if side == "short" { -raw } else { raw };
    let pn_l_pct = if margin_used > 0.0 {
        pn_l / margin_used * 100.0
    } else {
        0.0
    };
    TradeOutcome {
        symbol: open.symbol.clone(),
        side: side.to_string(),
        quantity,
        leverage,
        open_price: open.price,
        close_price: close.price,
        position_value,
        margin_used,
        pn_l,
        pn_l_pct,
        open_time: open.timestamp,
        close_time: close.timestamp,
        holding_secs: (close.timestamp - open.timestamp).num_seconds(),
    }
}

/// 重建窗口内的已实现交易
///
/// `seed` 为窗口之前的扩大窗口记录，只用于预先登记开仓；
/// `history` 为按周期号升序的完整历史，给出时改用窗口之前的全部历史登记开仓。
pub fn reconstruct_trades(
    window: &[DecisionRecord],
    seed: &[DecisionRecord],
    history: Option<&[DecisionRecord]>,
) -> Reconstruction {
    let mut seeded_opens = match (history, window.first()) {
        (Some(history), Some(first)) => {
            let end = history.partition_point(|r| r.cycle_number < first.cycle_number);
            replay_opens(&history[..end])
        }
        _ => replay_opens(seed),
    };
    let mut open_positions: HashMap<PositionKey, DecisionAction> = HashMap::new();
    let mut result = Reconstruction::default();

    for record in window {
        for (action, trade_action) in successful_actions(record) {
            let Some(key) = position_key(action, trade_action) else {
                continue;
            };
            if trade_action.is_open() {
                open_positions.insert(key, action.clone());
                continue;
            }
            if !trade_action.is_close() {
                continue;
            }

            let open = open_positions
                .remove(&key)
                .or_else(|| seeded_opens.remove(&key));
            match open {
                Some(open) => result.trades.push(build_outcome(&open, action, key.1)),
                None => result.unmatched_closes += 1,
            }
        }
    }
    result
}

/// 汇总交易结果和权益序列
pub fn summarize(trades: &[TradeOutcome], equity: &[f64]) -> PerformanceAnalysis {
    let mut analysis = PerformanceAnalysis {
        total_trades: trades.len(),
        sharpe_ratio: sharpe_ratio(equity),
        ..Default::default()
    };

    let wins: Vec<f64> = trades.iter().map(|t| t.pn_l).filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = trades.iter().map(|t| t.pn_l).filter(|p| *p < 0.0).collect();
    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum();

    analysis.winning_trades = wins.len();
    analysis.losing_trades = losses.len();
    analysis.win_rate = ratio_pct(wins.len(), trades.len());
    if !wins.is_empty() {
        analysis.avg_win = gross_win / wins.len() as f64;
    }
    if !losses.is_empty() {
        analysis.avg_loss = gross_loss / losses.len() as f64;
    }
    analysis.profit_factor = profit_factor(gross_win, gross_loss);

    for trade in trades {
        let stats = analysis
            .symbol_stats
            .entry(trade.symbol.clone())
            .or_insert_with(|| SymbolPerformance {
                symbol: trade.symbol.clone(),
                ..Default::default()
            });
        stats.total_trades += 1;
        stats.total_pn_l += trade.pn_l;
        if trade.pn_l > 0.0 {
            stats.winning_trades += 1;
        } else if trade.pn_l < 0.0 {
            stats.losing_trades += 1;
        }
    }
    for stats in analysis.symbol_stats.values_mut() {
        stats.win_rate = ratio_pct(stats.winning_trades, stats.total_trades);
        stats.avg_pn_l = stats.total_pn_l / stats.total_trades as f64;
    }

    // 按总盈亏选最好/最差，同值按币种名排序保证结果稳定
    let mut ranked: Vec<&SymbolPerformance> = analysis.symbol_stats.values().collect();
    ranked.sort_by(|a, b| {
        b.total_pn_l
            .total_cmp(&a.total_pn_l)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    if let (Some(best), Some(worst)) = (ranked.first(), ranked.last()) {
        analysis.best_symbol = best.symbol.clone();
        analysis.worst_symbol = worst.symbol.clone();
    }

    analysis.recent_trades = trades
        .iter()
        .rev()
        .take(RECENT_TRADES_LIMIT)
        .cloned()
        .collect();
    analysis
}

/// 窗口内的逐周期权益
pub fn equity_curve(window: &[DecisionRecord]) -> Vec<f64> {
    window
        .iter()
        .map(|r| r.account_state.total_balance)
        .collect()
}

/// 把升序记录切分为 (扩大窗口前段, 分析窗口)；lookback 为 0 时整段都是分析窗口
pub fn split_window(records: &[DecisionRecord], lookback: usize) -> (&[DecisionRecord], &[DecisionRecord]) {
    if lookback == 0 {
        return (&[], records);
    }
    let real_cycles = records.iter().filter(|r| !r.is_seed()).count();
    let take = lookback.min(real_cycles);
    let split_at = records.len() - take;
    records.split_at(split_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn action(kind: &str, symbol: &str, qty: f64, lev: i64, price: f64, ts: DateTime<Utc>) -> DecisionAction {
        DecisionAction {
            quantity: qty,
            leverage: lev,
            price,
            success: true,
            ..DecisionAction::new(kind, symbol, ts)
        }
    }

    fn record(cycle: i64, balance: f64, actions: Vec<DecisionAction>) -> DecisionRecord {
        let mut r = DecisionRecord::new(Utc::now());
        r.cycle_number = cycle;
        r.success = true;
        r.account_state.total_balance = balance;
        r.decisions = actions;
        r
    }

    #[test]
    fn test_long_trade_pnl() {
        let t0 = Utc::now();
        let records = vec![
            record(1, 1000.0, vec![action("open_long", "BTCUSDT", 2.0, 5, 100.0, t0)]),
            record(2, 1020.0, vec![action("close_long", "BTCUSDT", 0.0, 0, 110.0, t0 + Duration::minutes(30))]),
        ];
        let rec = reconstruct_trades(&records, &[], None);
        assert_eq!(rec.trades.len(), 1);
        let trade = &rec.trades[0];
        assert_relative_eq!(trade.pn_l, 20.0);
        assert_relative_eq!(trade.margin_used, 40.0);
        assert_relative_eq!(trade.pn_l_pct, 50.0);
        assert_eq!(trade.holding_secs, 1800);
    }

    #[test]
    fn test_short_trade_and_failed_actions_ignored() {
        let t0 = Utc::now();
        let mut failed_close = action("close_short", "ETHUSDT", 0.0, 0, 50.0, t0);
        failed_close.success = false;
        let records = vec![
            record(1, 1000.0, vec![action("open_short", "ETHUSDT", 1.0, 2, 100.0, t0)]),
            record(2, 1000.0, vec![failed_close]),
            record(3, 1000.0, vec![action("close_short", "ETHUSDT", 0.0, 0, 90.0, t0)]),
        ];
        let rec = reconstruct_trades(&records, &[], None);
        assert_eq!(rec.trades.len(), 1);
        assert_relative_eq!(rec.trades[0].pn_l, 10.0);
        assert_relative_eq!(rec.trades[0].pn_l_pct, 20.0);
    }

    #[test]
    fn test_close_matched_from_seed_window_then_history() {
        let t0 = Utc::now();
        let history = vec![
            record(1, 1000.0, vec![action("open_long", "SOLUSDT", 1.0, 1, 10.0, t0)]),
            record(2, 1000.0, vec![action("open_short", "BTCUSDT", 1.0, 1, 100.0, t0)]),
            record(3, 1000.0, vec![]),
            record(4, 1000.0, vec![
                action("close_short", "BTCUSDT", 0.0, 0, 90.0, t0),
                action("close_long", "SOLUSDT", 0.0, 0, 12.0, t0),
            ]),
        ];
        // 分析窗口只有周期 4，扩大窗口只覆盖周期 2-3
        let window = &history[3..];
        let seed = &history[1..3];

        let without_history = reconstruct_trades(window, seed, None);
        assert_eq!(without_history.trades.len(), 1);
        assert_eq!(without_history.unmatched_closes, 1);

        let with_history = reconstruct_trades(window, seed, Some(&history));
        assert_eq!(with_history.trades.len(), 2);
        assert_eq!(with_history.unmatched_closes, 0);
        assert_relative_eq!(with_history.trades[1].pn_l, 2.0);
    }

    #[test]
    fn test_history_open_already_closed_is_not_reused() {
        let t0 = Utc::now();
        let history = vec![
            record(1, 1000.0, vec![action("open_long", "BTCUSDT", 1.0, 1, 100.0, t0)]),
            record(2, 1000.0, vec![action("close_long", "BTCUSDT", 0.0, 0, 105.0, t0)]),
            record(3, 1000.0, vec![action("open_short", "ETHUSDT", 1.0, 1, 50.0, t0)]),
            record(4, 1000.0, vec![]),
            record(5, 1000.0, vec![action("close_long", "BTCUSDT", 0.0, 0, 120.0, t0)]),
            record(6, 1000.0, vec![action("close_short", "ETHUSDT", 0.0, 0, 40.0, t0)]),
            record(7, 1000.0, vec![action("close_short", "ETHUSDT", 0.0, 0, 30.0, t0)]),
        ];
        let window = &history[4..];
        let seed = &history[3..4];

        let rec = reconstruct_trades(window, seed, Some(&history));
        // BTC 开仓在周期 2 已平；ETH 开仓只能配对一次
        assert_eq!(rec.trades.len(), 1);
        assert_eq!(rec.trades[0].symbol, "ETHUSDT");
        assert_relative_eq!(rec.trades[0].pn_l, 10.0);
        assert_eq!(rec.unmatched_closes, 2);
    }

    #[test]
    fn test_summary_sentinels_and_symbol_ranking() {
        let t0 = Utc::now();
        let records = vec![
            record(1, 1000.0, vec![
                action("open_long", "BTCUSDT", 1.0, 1, 100.0, t0),
                action("open_long", "ETHUSDT", 1.0, 1, 100.0, t0),
            ]),
            record(2, 1010.0, vec![
                action("close_long", "BTCUSDT", 0.0, 0, 110.0, t0),
                action("close_long", "ETHUSDT", 0.0, 0, 101.0, t0),
            ]),
        ];
        let rec = reconstruct_trades(&records, &[], None);
        let analysis = summarize(&rec.trades, &equity_curve(&records));
        assert_eq!(analysis.total_trades, 2);
        assert_eq!(analysis.losing_trades, 0);
        assert_eq!(analysis.profit_factor, 999.0);
        assert_eq!(analysis.sharpe_ratio, 999.0);
        assert_relative_eq!(analysis.win_rate, 100.0);
        assert_eq!(analysis.best_symbol, "BTCUSDT");
        assert_eq!(analysis.worst_symbol, "ETHUSDT");
        assert_eq!(analysis.recent_trades[0].symbol, "ETHUSDT");
    }

    #[test]
    fn test_empty_summary() {
        let analysis = summarize(&[], &[]);
        assert_eq!(analysis.profit_factor, 0.0);
        assert_eq!(analysis.win_rate, 0.0);
        assert!(analysis.best_symbol.is_empty());
    }

    #[test]
    fn test_split_window() {
        let mut records = vec![DecisionRecord::seed(1000.0, Utc::now())];
        for cycle in 1..=5 {
            records.push(record(cycle, 1000.0, vec![]));
        }
        let (seed, window) = split_window(&records, 2);
        assert_eq!(seed.len(), 4);
        assert_eq!(window[0].cycle_number, 4);
        let (seed, window) = split_window(&records, 0);
        assert!(seed.is_empty());
        assert_eq!(window.len(), 6);
    }
}
