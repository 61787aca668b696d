//! 绩效指标计算
//!
//! - 类夏普比率：逐周期权益的相对收益均值 / 标准差（总体标准差）
//! - 盈亏比：总盈利 / |总亏损|

/// 除零时的哨兵值
pub const METRIC_SENTINEL: f64 = 999.0;

/// 逐周期权益序列的类夏普比率
///
/// 少于两个有效权益点返回 0；标准差为 0 时按均值符号返回 ±999 或 0。
pub fn sharpe_ratio(equity: &[f64]) -> f64 {
    let points: Vec<f64> = equity
        .iter()
        .copied()
        .filter(|e| e.is_finite() && *e > 0.0)
        .collect();
    if points.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = points.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return if mean > 0.0 {
            METRIC_SENTINEL
        } else if mean < 0.0 {
            -METRIC_SENTINEL
        } else {
            0.0
        };
    }
    mean / std_dev
}

/// 盈亏比；有盈利无亏损返回 999，没有数据返回 0
pub fn profit_factor(gross_win: f64, gross_loss: f64) -> f64 {
    let loss = gross_loss.abs();
    if loss == 0.0 {
        if gross_win > 0.0 {
            METRIC_SENTINEL
        } else {
            0.0
        }
    } else {
        gross_win / loss
    }
}

/// 百分比，分母为 0 时返回 0
pub fn ratio_pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
