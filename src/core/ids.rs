//! 标识符与文本截断工具

use chrono::Utc;

/// uuid v4 的前 n 位十六进制（n ≤ 32）
pub fn short_hex(n: usize) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..n.min(hex.len())].to_string()
}

/// `<prefix>_<YYYYmmdd_HHMMSS>_<8 hex>`，用于 plan / exec 标识
pub fn timestamped_id(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().format("%Y%m%d_%H%M%S"),
        short_hex(8)
    )
}

/// 按字符截断（UTF-8 安全）
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamped_id_shape() {
        let id = timestamped_id("plan");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "plan");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
    }

    #[test]
    fn test_truncate_chars_is_utf8_safe() {
        assert_eq!(truncate_chars("多智能体协作", 3), "多智能");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
