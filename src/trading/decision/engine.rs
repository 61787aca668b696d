use tracing::{debug, warn};

use crate::error::app_error::DecisionError;
use crate::trading::decision::extract::{extract_cot_trace, extract_decisions, truncate_chars};
use crate::trading::decision::model::{Decision, FullDecision};
use crate::trading::decision::validator::{validate_decisions, RiskLimits};

/// 兜底 wait 决策的理由最长字符数
const FALLBACK_REASON_CHARS: usize = 200;
const EMPTY_RESPONSE_TRACE: &str = "模型未返回任何内容";

/// 解析模型完整输出：思维链 + 决策数组 + 风控校验
///
/// 找不到决策数组（或数组为空）时返回单条 `ALL/wait` 兜底决策，不报错；
/// 只有真实解析出的决策校验失败才返回 `DecisionError::Validation`。
pub fn parse_full_decision_response(
    response: &str,
    account_equity: f64,
    limits: &RiskLimits,
) -> Result<FullDecision, DecisionError> {
    let mut cot_trace = extract_cot_trace(response);
    if cot_trace.is_empty() {
        cot_trace = EMPTY_RESPONSE_TRACE.to_string();
    }

    let decisions = match extract_decisions(response) {
        Ok(decisions) if !decisions.is_empty() => decisions,
        Ok(_) => {
            warn!("决策数组为空，降级为 wait");
            return Ok(fallback(cot_trace, response));
        }
        Err(e) => {
            warn!("{}，降级为 wait", e);
            return Ok(fallback(cot_trace, response));
        }
    };

    if let Err(reason) = validate_decisions(&decisions, account_equity, limits) {
        return Err(DecisionError::Validation {
            reason,
            cot_trace,
            raw_response: response.to_string(),
        });
    }

    debug!("解析出 {} 条决策", decisions.len());
    Ok(FullDecision {
        cot_trace,
        decisions,
        raw_response: response.to_string(),
        is_fallback: false,
    })
}

fn fallback(cot_trace: String, response: &str) -> FullDecision {
    let reasoning = first_sentence(&cot_trace);
    FullDecision {
        decisions: vec![Decision::wait_all(reasoning)],
        cot_trace,
        raw_response: response.to_string(),
        is_fallback: true,
    }
}

/// 思维链第一句，最多 200 字符
pub fn first_sentence(text: &str) -> String {
    let text = text.trim();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut end = text.len();
    for (i, &(idx, c)) in chars.iter().enumerate() {
        let terminal = match c {
            '。' | '！' | '？' | '\n' => true,
            '.' | '!' | '?' => chars.get(i + 1).map_or(true, |&(_, n)| n.is_whitespace()),
            _ => false,
        };
        if terminal {
            end = if c == '\n' { idx } else { idx + c.len_utf8() };
            break;
        }
    }
    let sentence = truncate_chars(text[..end].trim(), FALLBACK_REASON_CHARS);
    if sentence.is_empty() {
        EMPTY_RESPONSE_TRACE.to_string()
    } else {
        sentence.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_array_falls_back_to_wait() {
        let response = "BTC 在关键阻力位附近震荡。资金费率偏高，暂不操作";
        let full = parse_full_decision_response(response, 1000.0, &RiskLimits::default()).unwrap();
        assert!(full.is_fallback);
        assert_eq!(full.decisions.len(), 1);
        assert_eq!(full.decisions[0].symbol, "ALL");
        assert_eq!(full.decisions[0].action, "wait");
        assert_eq!(full.decisions[0].reasoning, "BTC 在关键阻力位附近震荡。");
        assert_eq!(full.cot_trace, response);
    }

    #[test]
    fn test_empty_array_falls_back_to_wait() {
        let response = "Nothing to do. ```json\n[]\n```";
        let full = parse_full_decision_response(response, 1000.0, &RiskLimits::default()).unwrap();
        assert!(full.is_fallback);
        assert_eq!(full.decisions[0].reasoning, "Nothing to do.");
    }

    #[test]
    fn test_empty_response_still_has_trace() {
        let full = parse_full_decision_response("", 1000.0, &RiskLimits::default()).unwrap();
        assert!(full.is_fallback);
        assert!(!full.cot_trace.is_empty());
        assert!(!full.decisions[0].reasoning.is_empty());
    }

    #[test]
    fn test_inverted_long_stop_rejects_whole_set() {
        let response = r#"思考过程
[{"symbol":"BTCUSDT","action":"open_long","leverage":5,"position_size_usd":1000,"stop_loss":100,"take_profit":90,"confidence":80,"risk_usd":50,"reasoning":"突破"},
 {"symbol":"ETHUSDT","action":"hold"}]"#;
        let err = parse_full_decision_response(response, 1000.0, &RiskLimits::default()).unwrap_err();
        match err {
            DecisionError::Validation { cot_trace, raw_response, .. } => {
                assert_eq!(cot_trace, "思考过程");
                assert_eq!(raw_response, response);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_decisions_pass_through() {
        let response = r#"<reasoning>趋势向上</reasoning>
<decision>
[{"symbol":"BTCUSDT","action":"open_long","leverage":3,"position_size_usd":2000,"stop_loss":60000,"take_profit":70000,"confidence":75,"risk_usd":40}]
</decision>"#;
        let full = parse_full_decision_response(response, 1000.0, &RiskLimits::default()).unwrap();
        assert!(!full.is_fallback);
        assert_eq!(full.cot_trace, "趋势向上");
        assert_eq!(full.decisions[0].leverage, 3);
    }

    #[test]
    fn test_first_sentence_rules() {
        assert_eq!(first_sentence("Price is 3.5 now. Then more"), "Price is 3.5 now.");
        assert_eq!(first_sentence("第一行\n第二行"), "第一行");
        assert_eq!(first_sentence(&"长".repeat(300)).chars().count(), 200);
    }
}
