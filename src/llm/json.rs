//! LLM 输出中的 JSON 提取与「主解析 → 回退解析」组合子
//!
//! LLM 返回的文本总被视为可能不合规：先尝试从 ```json 代码块、或首个 `{`/`[` 到最后一个 `}`/`]` 中提取 JSON；
//! 主解析失败时调用确定性的回退解析，二者签名一致，可分别单测。

use serde::de::DeserializeOwned;

use crate::core::AgentError;

/// 从文本中提取 JSON 片段；找不到时返回 None
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(body.trim());
    }

    let open = match (trimmed.find('{'), trimmed.find('[')) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    let close_char = if trimmed[open..].starts_with('[') { ']' } else { '}' };
    let close = trimmed.rfind(close_char)?;
    if close < open {
        return None;
    }
    Some(&trimmed[open..=close])
}

/// 提取并反序列化 JSON
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let json_str = extract_json(text)
        .ok_or_else(|| AgentError::JsonParseError(format!("no JSON found in: {}", preview(text))))?;
    serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, preview(json_str))))
}

/// 先主解析，失败时记录 debug 日志并调用回退解析
pub fn parse_or_fallback<T>(
    text: &str,
    primary: impl FnOnce(&str) -> Result<T, AgentError>,
    fallback: impl FnOnce(&str) -> T,
) -> T {
    match primary(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "primary parse failed, using fallback parser");
            fallback(text)
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 200 {
        format!("{}...", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}
