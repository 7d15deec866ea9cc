use crate::types::value::Value;

const MAX_DEBUG_LEN: usize = 120; // 单行摘要的最大长度

/// 格式化一个值用于错误消息，如果太长则截断。
pub fn format_value_summary(value: &Value) -> String {
    truncate_summary(value.to_string())
}

pub fn truncate_summary(text: String) -> String {
    if text.chars().count() > MAX_DEBUG_LEN {
        // 按字符截断，避免切在多字节字符中间
        let mut truncated: String = text.chars().take(MAX_DEBUG_LEN).collect();
        truncated.push_str("...");
        truncated
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_summary_is_truncated() {
        let long = "界".repeat(200);
        let summary = format_value_summary(&Value::from(long.as_str()));
        assert_eq!(summary.chars().count(), MAX_DEBUG_LEN + 3);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_short_summary_is_unchanged() {
        assert_eq!(format_value_summary(&Value::Int(42)), "42");
    }
}
