//! Tolerant parsing of LLM responses. Models wrap JSON in markdown fences,
//! preambles and trailing prose; we accept raw JSON, a fenced block, or
//! the first balanced object found anywhere in the text.

use serde::Deserialize;

use common::SentimentLabel;

pub const MAX_EXPLANATION_LEN: usize = 500;

/// Parsed and normalized sentiment verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSentiment {
    pub label: SentimentLabel,
    /// Clamped to [0, 100].
    pub confidence: f64,
    pub explanation: String,
}

#[derive(Deserialize)]
struct RawSentiment {
    sentiment: Option<String>,
    confidence: Option<f64>,
    #[serde(alias = "reasoning", alias = "explanation")]
    explanation: Option<String>,
}

/// Parse a free-form LLM response into a normalized sentiment, or None
/// when no JSON object can be recovered at all.
pub fn parse_sentiment(text: &str) -> Option<ParsedSentiment> {
    let json = extract_json(text)?;
    let raw: RawSentiment = serde_json::from_str(&json).ok()?;

    let label = raw
        .sentiment
        .map(|s| SentimentLabel::from_label(&s))
        .unwrap_or(SentimentLabel::Neutral);

    let confidence = raw.confidence.unwrap_or(50.0);
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        50.0
    };

    let explanation = truncate(raw.explanation.unwrap_or_default().trim(), MAX_EXPLANATION_LEN);

    Some(ParsedSentiment {
        label,
        confidence,
        explanation,
    })
}

/// Recover a JSON object from raw text: as-is, from a markdown code fence,
/// or the first balanced `{...}` in free text.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Some(obj) = first_balanced_object(&fenced) {
            return Some(obj);
        }
    }

    first_balanced_object(trimmed)
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// Scan for the first balanced, string-aware `{...}` span that parses as
/// JSON. Prose braces are common in model output, so a span that balances
/// but is not JSON does not end the search; the scan resumes at the next
/// opening brace.
fn first_balanced_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
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
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=i];
                        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                            return Some(candidate.to_string());
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_json() {
        let parsed = parse_sentiment(
            r#"{"sentiment": "BULLISH", "confidence": 72, "explanation": "strong flows"}"#,
        )
        .unwrap();
        assert_eq!(parsed.label, SentimentLabel::Bullish);
        assert_eq!(parsed.confidence, 72.0);
        assert_eq!(parsed.explanation, "strong flows");
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here is my analysis:\n```json\n{\"sentiment\": \"BEARISH\", \"confidence\": 65, \"reasoning\": \"distribution\"}\n```\nHope that helps.";
        let parsed = parse_sentiment(text).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Bearish);
        assert_eq!(parsed.explanation, "distribution");
    }

    #[test]
    fn test_embedded_json_in_prose() {
        let text = "The market looks mixed. {\"sentiment\": \"NEUTRAL\", \"confidence\": 55, \"explanation\": \"chop\"} That is my verdict.";
        let parsed = parse_sentiment(text).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Neutral);
        assert_eq!(parsed.confidence, 55.0);
    }

    #[test]
    fn test_nested_braces_and_strings() {
        let text = r#"prefix {"sentiment": "BULLISH", "confidence": 60, "explanation": "breakout above {key} level \" held"} suffix"#;
        let parsed = parse_sentiment(text).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Bullish);
        assert!(parsed.explanation.contains("{key}"));
    }

    #[test]
    fn test_prose_braces_before_json() {
        let text = "Watch the {KEY} level here. {\"sentiment\": \"BULLISH\", \"confidence\": 70, \"explanation\": \"breakout held\"}";
        let parsed = parse_sentiment(text).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Bullish);
        assert_eq!(parsed.confidence, 70.0);
    }

    #[test]
    fn test_unclosed_brace_before_json() {
        let text = "Range is {volatile and the answer follows {\"sentiment\": \"BEARISH\", \"confidence\": 60, \"explanation\": \"rejection\"}";
        let parsed = parse_sentiment(text).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Bearish);
    }

    #[test]
    fn test_unknown_label_coerced_to_neutral() {
        let parsed =
            parse_sentiment(r#"{"sentiment": "CRABWISE", "confidence": 80}"#).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Neutral);
        assert_eq!(parsed.explanation, "");
    }

    #[test]
    fn test_confidence_clamped() {
        let high = parse_sentiment(r#"{"sentiment": "BULLISH", "confidence": 250}"#).unwrap();
        assert_eq!(high.confidence, 100.0);
        let low = parse_sentiment(r#"{"sentiment": "BEARISH", "confidence": -3}"#).unwrap();
        assert_eq!(low.confidence, 0.0);
        let missing = parse_sentiment(r#"{"sentiment": "BULLISH"}"#).unwrap();
        assert_eq!(missing.confidence, 50.0);
    }

    #[test]
    fn test_explanation_truncated() {
        let long = "x".repeat(2000);
        let parsed = parse_sentiment(&format!(
            r#"{{"sentiment": "NEUTRAL", "confidence": 50, "explanation": "{}"}}"#,
            long
        ))
        .unwrap();
        assert_eq!(parsed.explanation.chars().count(), MAX_EXPLANATION_LEN);
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_sentiment("no json here at all").is_none());
        assert!(parse_sentiment("{broken json").is_none());
        assert!(parse_sentiment("").is_none());
    }
}
