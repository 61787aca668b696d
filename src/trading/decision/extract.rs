//! 从模型原始输出中提取思维链和决策数组
//!
//! 提取顺序：
//! 1. `<decision>` 标签内部
//! 2. ```` ```json ```` 代码块内部
//! 3. 全文正向扫描：`[` 之后第一个非空白字符必须是 `{`（数字数组是推理过程中的产物，跳过），
//!    括号匹配（跳过字符串内部）后试解码，第一个成功的胜出
//! 4. 全文反向扫描：从右往左逐个 `]` 向左匹配，规则同上
//!
//! 宽松解码只在原样解码失败时启用，且只做以下固定修复：
//! - R1 非 ASCII 双引号（“ ” „ ‟ ＂）替换为 `"`
//! - R2 字符串外的全角 `：` `，` 替换为 `:` `,`
//! - R3 删除零宽字符（U+200B U+200C U+200D U+FEFF）
//! - R4 删除字符串外、紧挨 `]` / `}` 之前的多余逗号

use crate::error::app_error::DecisionError;
use crate::trading::decision::model::Decision;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";
/// 思维链提取失败时，截取原文前缀的长度（字符数）
const COT_FALLBACK_CHARS: usize = 500;

const SMART_QUOTES: [char; 5] = ['\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}', '\u{FF02}'];
const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// 提取思维链，保证返回非空（原文为空时除外）
pub fn extract_cot_trace(response: &str) -> String {
    let trace = if let Some(inner) = tagged_block(response, "reasoning") {
        inner.trim().to_string()
    } else if let Some(idx) = response.find("<decision>") {
        response[..idx].trim().to_string()
    } else if let Some(idx) = response.find(JSON_FENCE) {
        response[..idx].trim().to_string()
    } else if let Some(idx) = first_array_candidate(response) {
        response[..idx].trim().to_string()
    } else {
        response.trim().to_string()
    };

    if trace.is_empty() {
        truncate_chars(response.trim(), COT_FALLBACK_CHARS).to_string()
    } else {
        trace
    }
}

/// 按顺序尝试各个提取区域，返回第一个可解码的决策数组
pub fn extract_decisions(response: &str) -> Result<Vec<Decision>, DecisionError> {
    if let Some(inner) = tagged_block(response, "decision") {
        if let Some(decisions) = scan_forward(inner).or_else(|| scan_backward(inner)) {
            return Ok(decisions);
        }
    }

    if let Some(inner) = json_fence_block(response) {
        if let Some(decisions) = scan_forward(inner).or_else(|| scan_backward(inner)) {
            return Ok(decisions);
        }
    }

    scan_forward(response)
        .or_else(|| scan_backward(response))
        .ok_or_else(|| DecisionError::Extraction("未找到可解码的决策数组".to_string()))
}

/// 宽松解码：先原样解码，失败后修复再试一次
pub fn lenient_decode(span: &str) -> Result<Vec<Decision>, serde_json::Error> {
    match serde_json::from_str::<Vec<Decision>>(span) {
        Ok(decisions) => Ok(decisions),
        Err(e) => {
            let repaired = repair_json(span);
            if repaired == span {
                return Err(e);
            }
            serde_json::from_str::<Vec<Decision>>(&repaired)
        }
    }
}

/// 应用 R1-R4 修复
pub fn repair_json(span: &str) -> String {
    // R3 + R1：不依赖字符串边界
    let normalized: String = span
        .chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .map(|c| if SMART_QUOTES.contains(&c) { '"' } else { c })
        .collect();

    // R2 + R4：只处理字符串外部
    let chars: Vec<char> = normalized.chars().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '：' => out.push(':'),
            '，' | ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(',');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// 正向扫描：每个合格的 `[` 向右匹配，第一个解码成功的胜出
pub fn scan_forward(text: &str) -> Option<Vec<Decision>> {
    let bytes = text.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'[' || !first_element_is_object(text, start) {
            continue;
        }
        let Some(end) = match_forward(bytes, start) else {
            continue;
        };
        if let Ok(decisions) = lenient_decode(&text[start..=end]) {
            return Some(decisions);
        }
    }
    None
}

/// 反向扫描：从右往左每个 `]` 向左匹配
pub fn scan_backward(text: &str) -> Option<Vec<Decision>> {
    let bytes = text.as_bytes();
    for end in (0..bytes.len()).rev() {
        if bytes[end] != b']' {
            continue;
        }
        let Some(start) = match_backward(bytes, end) else {
            continue;
        };
        if !first_element_is_object(text, start) {
            continue;
        }
        if let Ok(decisions) = lenient_decode(&text[start..=end]) {
            return Some(decisions);
        }
    }
    None
}

/// 第一个决策数组候选的起点
fn first_array_candidate(text: &str) -> Option<usize> {
    text.bytes()
        .enumerate()
        .find(|&(i, b)| b == b'[' && first_element_is_object(text, i))
        .map(|(i, _)| i)
}

fn first_element_is_object(text: &str, open_idx: usize) -> bool {
    text[open_idx + 1..]
        .chars()
        .find(|c| !c.is_whitespace() && !ZERO_WIDTH.contains(c))
        == Some('{')
}

/// 从 `[` 向右找到配对的 `]`，跳过字符串内部
fn match_forward(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 从 `]` 向左找到配对的 `[`，跳过字符串内部
fn match_backward(bytes: &[u8], end: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = end + 1;
    while i > 0 {
        i -= 1;
        let b = bytes[i];
        if b == b'"' && !is_escaped(bytes, i) {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b']' => depth += 1,
            b'[' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 前面连续反斜杠为奇数个时，引号是转义的
fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let backslashes = bytes[..idx]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count();
    backslashes % 2 == 1
}

/// `<tag>...</tag>` 的内部文本；缺少闭合标签时取到文末
fn tagged_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    Some(match rest.find(&close) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

/// ```` ```json ```` 代码块内部；缺少闭合栅栏时取到文末
fn json_fence_block(text: &str) -> Option<&str> {
    let start = text.find(JSON_FENCE)? + JSON_FENCE.len();
    let rest = &text[start..];
    Some(match rest.find(FENCE) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

/// 按字符截断，不会切断多字节字符
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
