//! Boundary parser for LLM completions.
//!
//! The model's text is untrusted: the first JSON object is cut out of it, decoded into
//! tolerant tagged variants, then validated field by field into an `Annotation`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use super::{Annotation, Category, ImpactLevel, RelevanceScore};
use crate::error::AnnotationError;

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    #[serde(default)]
    relevance_score: Option<ScoreField>,
    #[serde(default)]
    impact_level: Option<String>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    key_regulators: Option<Value>,
    #[serde(default)]
    what_happened: Option<String>,
    #[serde(default)]
    why_relevant: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreField {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Parse a completion into a validated annotation.
pub fn parse_annotation(text: &str) -> Result<Annotation, AnnotationError> {
    let obj = extract_json_object(text)
        .ok_or_else(|| AnnotationError::MalformedResponse(preview(text)))?;
    let raw: RawAnnotation = serde_json::from_str(obj)
        .map_err(|e| AnnotationError::MalformedResponse(format!("{e}: {}", preview(obj))))?;

    let relevance_score = match raw.relevance_score {
        Some(f) => score_from_field(f)?,
        None => {
            return Err(AnnotationError::InvalidField {
                field: "relevance_score",
                reason: "missing".to_string(),
            })
        }
    };

    let impact_level = raw
        .impact_level
        .as_deref()
        .ok_or_else(|| AnnotationError::InvalidField {
            field: "impact_level",
            reason: "missing".to_string(),
        })
        .and_then(|s| {
            ImpactLevel::parse(s).ok_or_else(|| AnnotationError::InvalidField {
                field: "impact_level",
                reason: format!("unknown level '{s}'"),
            })
        })?;

    // Anything but a known category string maps to `other`.
    let category = raw
        .category
        .as_ref()
        .and_then(Value::as_str)
        .and_then(Category::parse)
        .unwrap_or(Category::Other);

    // Non-string list entries and non-list, non-string values are dropped.
    let key_regulators = match &raw.key_regulators {
        Some(Value::Array(v)) => clean_regulators(v.iter().filter_map(Value::as_str)),
        Some(Value::String(s)) => clean_regulators(s.split([',', ';'])),
        _ => BTreeSet::new(),
    };

    Ok(Annotation {
        relevance_score,
        impact_level,
        category,
        key_regulators,
        what_happened: raw.what_happened.map(|s| s.trim().to_string()).unwrap_or_default(),
        why_relevant: raw.why_relevant.map(|s| s.trim().to_string()).unwrap_or_default(),
    })
}

fn score_from_field(f: ScoreField) -> Result<RelevanceScore, AnnotationError> {
    let invalid = |reason: String| AnnotationError::InvalidField {
        field: "relevance_score",
        reason,
    };
    let n: i64 = match f {
        ScoreField::Int(i) => i,
        ScoreField::Float(x) if x.fract() == 0.0 && x.is_finite() => x as i64,
        ScoreField::Float(x) => return Err(invalid(format!("not an integer: {x}"))),
        ScoreField::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("not numeric: '{s}'")))?,
    };
    u8::try_from(n)
        .ok()
        .and_then(RelevanceScore::new)
        .ok_or_else(|| invalid(format!("out of range: {n}")))
}

fn clean_regulators<'a>(items: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    items
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// First balanced `{...}` in `text`, skipping braces inside JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_str {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(s: &str) -> String {
    let t: String = s.chars().take(120).collect();
    t.replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{
        "relevance_score": 8,
        "impact_level": "High",
        "category": "banking regulation",
        "key_regulators": ["ECB", " BaFin ", "", "ECB"],
        "what_happened": "ECB tightened capital buffers.",
        "why_relevant": "Affects bank equity holdings.",
        "confidence": 0.9
    }"#;

    #[test]
    fn parses_well_formed_response() {
        let a = parse_annotation(GOOD).unwrap();
        assert_eq!(a.relevance_score.get(), 8);
        assert_eq!(a.impact_level, ImpactLevel::High);
        assert_eq!(a.category, Category::BankingRegulation);
        assert_eq!(
            a.key_regulators.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["BaFin", "ECB"]
        );
    }

    #[test]
    fn tolerates_code_fences_and_prose() {
        let text = format!("Sure! Here is the analysis:\n```json\n{GOOD}\n```\nThanks");
        assert!(parse_annotation(&text).is_ok());
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_annotation("I cannot help with that.").unwrap_err();
        assert!(matches!(err, AnnotationError::MalformedResponse(_)));
        let err = parse_annotation("{ not: json }").unwrap_err();
        assert!(matches!(err, AnnotationError::MalformedResponse(_)));
    }

    #[test]
    fn score_variants() {
        let ok = |s: &str| {
            parse_annotation(&format!(r#"{{"relevance_score": {s}, "impact_level": "low"}}"#))
                .map(|a| a.relevance_score.get())
        };
        assert_eq!(ok("7").unwrap(), 7);
        assert_eq!(ok("7.0").unwrap(), 7);
        assert_eq!(ok(r#"" 3 ""#).unwrap(), 3);
        assert_eq!(ok("0").unwrap(), 0);
        assert_eq!(ok("10").unwrap(), 10);
        for bad in ["11", "-1", "7.5", r#""high""#, "null", "[1]"] {
            assert!(ok(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn missing_score_or_impact_is_invalid() {
        let err = parse_annotation(r#"{"impact_level":"low"}"#).unwrap_err();
        assert!(matches!(err, AnnotationError::InvalidField { field: "relevance_score", .. }));
        let err = parse_annotation(r#"{"relevance_score":5,"impact_level":"severe"}"#).unwrap_err();
        assert!(matches!(err, AnnotationError::InvalidField { field: "impact_level", .. }));
    }

    #[test]
    fn defaults_for_optional_fields() {
        let a = parse_annotation(r#"{"relevance_score":5,"impact_level":"medium","category":"crypto"}"#)
            .unwrap();
        assert_eq!(a.category, Category::Other);
        assert!(a.key_regulators.is_empty());
        assert_eq!(a.what_happened, "");
        assert_eq!(a.why_relevant, "");
    }

    #[test]
    fn wrongly_typed_category_falls_back_to_other() {
        for cat in ["3", r#"["banking_regulation"]"#, "null", r#"{"x":1}"#] {
            let a = parse_annotation(&format!(
                r#"{{"relevance_score":5,"impact_level":"low","category":{cat}}}"#
            ))
            .unwrap();
            assert_eq!(a.category, Category::Other, "category {cat}");
            assert_eq!(a.relevance_score.get(), 5);
            assert_eq!(a.impact_level, ImpactLevel::Low);
        }
    }

    #[test]
    fn non_string_regulator_entries_are_dropped() {
        let a = parse_annotation(
            r#"{"relevance_score":6,"impact_level":"high","key_regulators":["SEC", null, 4, {"n":"x"}, " FCA "]}"#,
        )
        .unwrap();
        assert_eq!(
            a.key_regulators.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["FCA", "SEC"]
        );
        let a = parse_annotation(r#"{"relevance_score":6,"impact_level":"high","key_regulators":42}"#).unwrap();
        assert!(a.key_regulators.is_empty());
    }

    #[test]
    fn regulators_as_csv_string() {
        let a = parse_annotation(
            r#"{"relevance_score":5,"impact_level":"medium","key_regulators":"SEC, CFTC;FDIC"}"#,
        )
        .unwrap();
        assert_eq!(a.key_regulators.len(), 3);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let s = r#"x {"what_happened":"a } b","relevance_score":1,"impact_level":"low"} y"#;
        assert_eq!(extract_json_object(s).unwrap().chars().last(), Some('}'));
        assert_eq!(parse_annotation(s).unwrap().what_happened, "a } b");
    }
}
