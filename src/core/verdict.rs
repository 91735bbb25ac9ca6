//! 裁决提取：从 agent 自由文本中尽力解析 JSON 结论；解析失败视为「无结论」

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default)]
    pub best_answer: Option<String>,
    #[serde(default)]
    pub evaluation_notes: String,
    #[serde(default)]
    pub actions: Option<Vec<serde_json::Value>>,
}

fn fence_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n([\s\S]*?)\n\s*```").expect("valid fence regex"))
}

/// 先找 ```json 代码块，再取最外层 `{...}`
pub fn extract_verdict(text: &str) -> Option<Verdict> {
    let body = fence_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str());

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&body[start..=end]) {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            tracing::debug!("verdict JSON ignored: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_preferred() {
        let text = "Thinking {not json}\n```json\n{\"satisfied\": true, \"best_answer\": \"42\"}\n```\n";
        let v = extract_verdict(text).unwrap();
        assert!(v.satisfied);
        assert_eq!(v.best_answer.as_deref(), Some("42"));
    }

    #[test]
    fn test_outermost_braces() {
        let text = "Verdict: {\"satisfied\": false, \"evaluation_notes\": \"use {braces}\"} done";
        let v = extract_verdict(text).unwrap();
        assert!(!v.satisfied);
        assert_eq!(v.evaluation_notes, "use {braces}");
    }

    #[test]
    fn test_malformed_is_none() {
        assert!(extract_verdict("no json here").is_none());
        assert!(extract_verdict("{satisfied: yes}").is_none());
        assert!(extract_verdict("} {").is_none());
    }
}
