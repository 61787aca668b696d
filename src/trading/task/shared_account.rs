//! 排行榜与共享账户识别
//!
//! 多个交易单元可能接在同一个交易所账户上。这里只根据最新权益是否完全相同
//! （按位比较）来判断，不做更多推断。

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::trading::task::trader_supervisor::UnitState;

/// 将最新权益按位相同的单元分组，只返回成员数 ≥ 2 的组
pub fn detect_shared_accounts(equities: &[(String, f64)]) -> Vec<Vec<String>> {
    let mut groups: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for (trader_id, equity) in equities {
        groups
            .entry(equity.to_bits())
            .or_default()
            .push(trader_id.clone());
    }

    let mut shared: Vec<Vec<String>> = groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort();
            ids
        })
        .collect();
    shared.sort();
    shared
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub trader_id: String,
    pub name: String,
    pub ai_model: String,
    pub state: UnitState,
    pub initial_balance: f64,
    pub equity: Option<f64>,
    pub pn_l: f64,
    pub pn_l_pct: f64,
    pub call_count: u64,
    /// 与本单元共用交易账户的其他单元
    pub shared_with: Vec<String>,
}

impl LeaderboardEntry {
    pub fn is_shared_account(&self) -> bool {
        !self.shared_with.is_empty()
    }
}

/// 计算收益并排序（收益率高的在前，没有权益数据的排最后）
pub fn rank_entries(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    let equities: Vec<(String, f64)> = entries
        .iter()
        .filter_map(|e| e.equity.map(|eq| (e.trader_id.clone(), eq)))
        .collect();
    let shared = detect_shared_accounts(&equities);

    for entry in entries.iter_mut() {
        if let Some(equity) = entry.equity {
            entry.pn_l = equity - entry.initial_balance;
            entry.pn_l_pct = if entry.initial_balance > 0.0 {
                entry.pn_l / entry.initial_balance * 100.0
            } else {
                0.0
            };
        }
        entry.shared_with = shared
            .iter()
            .find(|group| group.contains(&entry.trader_id))
            .map(|group| {
                group
                    .iter()
                    .filter(|id| **id != entry.trader_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
    }

    entries.sort_by(|a, b| match (a.equity, b.equity) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => b
            .pn_l_pct
            .total_cmp(&a.pn_l_pct)
            .then_with(|| a.trader_id.cmp(&b.trader_id)),
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn entry(id: &str, initial: f64, equity: Option<f64>) -> LeaderboardEntry {
        LeaderboardEntry {
            trader_id: id.to_string(),
            name: id.to_string(),
            ai_model: String::new(),
            state: UnitState::Idle,
            initial_balance: initial,
            equity,
            pn_l: 0.0,
            pn_l_pct: 0.0,
            call_count: 0,
            shared_with: vec![],
        }
    }

    #[test]
    fn test_groups_bitwise_equal_equities_only() {
        let equities = vec![
            ("b".to_string(), 1000.5),
            ("a".to_string(), 1000.5),
            ("c".to_string(), 1000.5 + f64::EPSILON * 1024.0),
            ("d".to_string(), 0.0),
            ("e".to_string(), -0.0),
        ];
        let groups = detect_shared_accounts(&equities);
        // 0.0 与 -0.0 按位不同，不算共享
        assert_eq!(groups, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_rank_by_pnl_pct() {
        let ranked = rank_entries(vec![
            entry("low", 1000.0, Some(900.0)),
            entry("none", 1000.0, None),
            entry("high", 500.0, Some(600.0)),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|e| e.trader_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "none"]);
        assert_relative_eq!(ranked[0].pn_l_pct, 20.0);
        assert_relative_eq!(ranked[1].pn_l, -100.0);
        assert!(!ranked[0].is_shared_account());
    }

    #[test]
    fn test_shared_with_lists_other_members() {
        let ranked = rank_entries(vec![
            entry("a", 1000.0, Some(1234.0)),
            entry("b", 2000.0, Some(1234.0)),
        ]);
        let a = ranked.iter().find(|e| e.trader_id == "a").unwrap();
        assert_eq!(a.shared_with, vec!["b".to_string()]);
    }
}
