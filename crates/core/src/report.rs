//! Parsing and normalization of model-produced world reports.
//!
//! A generated report is ideally a JSON object
//! `{title, time_advance, summary, events[], risks[], tension_percent?,
//! crisis_focus?}`. Models drift: fenced code blocks, prose around the JSON,
//! trailing commas, unquoted keys, bare-string event lists. This module
//! recovers a normalized [`ReportSnapshot`] from whatever came back, or gives
//! up and lets the caller persist the raw text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Inference hint tables
// ---------------------------------------------------------------------------

const NEGATIVE_HINTS: &[&str] = &[
    "war",
    "invasion",
    "battle",
    "conflict",
    "epidemic",
    "pandemic",
    "plague",
    "famine",
    "casualty",
    "death",
    "earthquake",
    "flood",
    "wildfire",
    "hurricane",
    "typhoon",
    "drought",
    "collapse",
    "explosion",
    "meltdown",
    "accident",
    "outbreak",
    "sanction",
    "blockade",
    "战争",
    "冲突",
    "瘟疫",
    "疫情",
    "饥荒",
    "死亡",
    "灾害",
    "事故",
    "地震",
    "洪水",
    "火灾",
    "封锁",
    "制裁",
];

const POSITIVE_HINTS: &[&str] = &[
    "recovery",
    "peace",
    "ceasefire",
    "breakthrough",
    "stabilize",
    "growth",
    "cooperation",
    "alliance",
    "prosper",
    "复苏",
    "停火",
    "突破",
    "增长",
    "合作",
    "稳定",
];

const SEVERITY_HIGH_HINTS: &[&str] = &[
    "mass",
    "catastrophic",
    "collapse",
    "state-wide",
    "national",
    "全面",
    "大规模",
    "重大",
    "致命",
    "灭亡",
];

const SEVERITY_LOW_HINTS: &[&str] = &["minor", "local", "small", "轻微", "局部", "小规模"];

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Tone of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Positive,
    Negative,
    Neutral,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Positive => "positive",
            Category::Negative => "negative",
            Category::Neutral => "neutral",
        }
    }
}

/// Impact of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// One normalized event or risk row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub category: Category,
    pub severity: Severity,
    pub description: String,
}

/// A normalized world progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub title: String,
    pub time_advance: String,
    pub summary: String,
    pub events: Vec<ReportEntry>,
    pub risks: Vec<ReportEntry>,
    pub tension_percent: i64,
    pub crisis_focus: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse model output into a normalized snapshot, or `None` when no JSON
/// object can be recovered.
pub fn parse_report_snapshot(content: &str, fallback_time_advance: &str) -> Option<ReportSnapshot> {
    let normalized = sanitize_report_text(content);
    if normalized.is_empty() {
        return None;
    }

    let mut candidates = vec![normalized.clone()];
    let extracted = extract_json_object(&normalized);
    if !extracted.is_empty() && extracted != normalized {
        candidates.push(extracted);
    }

    for candidate in candidates {
        if let Some(payload) = load_json_mapping(&candidate) {
            return Some(normalize_report_snapshot(&payload, fallback_time_advance));
        }
    }
    None
}

/// Normalize one already-decoded report payload.
pub fn normalize_report_snapshot(
    payload: &Map<String, Value>,
    fallback_time_advance: &str,
) -> ReportSnapshot {
    let title = non_empty_or(safe_text_value(payload.get("title")), "World Report");
    let time_advance = non_empty_or(
        safe_text_value(payload.get("time_advance")),
        &non_empty_or(safe_text(fallback_time_advance), "tick"),
    );
    let events = normalize_entries(payload.get("events"), Category::Neutral, Severity::Medium);
    let risks = normalize_entries(payload.get("risks"), Category::Negative, Severity::High);

    let mut summary = safe_text_value(payload.get("summary"));
    if summary.is_empty() {
        summary = fallback_summary(&events, &risks);
    }

    let tension_percent = payload
        .get("tension_percent")
        .or_else(|| payload.get("tension"))
        .or_else(|| payload.get("tension_index"))
        .and_then(parse_tension_percent)
        .unwrap_or_else(|| infer_tension_percent(&events, &risks));

    let mut crisis_focus = safe_text_value(
        payload
            .get("crisis_focus")
            .or_else(|| payload.get("crisis_focus_event"))
            .or_else(|| payload.get("focus_event")),
    );
    if crisis_focus.is_empty() {
        crisis_focus = fallback_crisis_focus(&summary, &events, &risks);
    }

    ReportSnapshot {
        title,
        time_advance,
        summary,
        events,
        risks,
        tension_percent,
        crisis_focus,
    }
}

/// Serialize a snapshot for database storage.
pub fn snapshot_to_storage_json(snapshot: &ReportSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_default()
}

/// Serialize a snapshot back to canonical report content.
///
/// The canonical form keeps only the model-facing fields; derived fields
/// (tension, crisis focus) live in the storage snapshot.
pub fn snapshot_to_content(snapshot: &ReportSnapshot) -> String {
    let payload = serde_json::json!({
        "title": snapshot.title,
        "time_advance": snapshot.time_advance,
        "summary": snapshot.summary,
        "events": snapshot.events,
        "risks": snapshot.risks,
    });
    payload.to_string()
}

/// Parse a stored snapshot column back into a [`ReportSnapshot`].
pub fn parse_storage_snapshot(raw_value: Option<&str>) -> Option<ReportSnapshot> {
    let raw = raw_value?.trim();
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

// ---------------------------------------------------------------------------
// Entry normalization
// ---------------------------------------------------------------------------

fn normalize_entries(
    value: Option<&Value>,
    default_category: Category,
    default_severity: Severity,
) -> Vec<ReportEntry> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for item in items {
        match item {
            Value::String(text) => {
                let description = safe_text(text);
                if description.is_empty() {
                    continue;
                }
                rows.push(ReportEntry {
                    category: infer_category(&description, default_category),
                    severity: infer_severity(&description, default_severity),
                    description,
                });
            }
            Value::Object(map) => {
                let description = safe_text_value(
                    map.get("description")
                        .or_else(|| map.get("detail"))
                        .or_else(|| map.get("content"))
                        .or_else(|| map.get("title"))
                        .or_else(|| map.get("label")),
                );
                if description.is_empty() {
                    continue;
                }
                rows.push(ReportEntry {
                    category: normalize_category(map.get("category"), &description, default_category),
                    severity: normalize_severity(map.get("severity"), &description, default_severity),
                    description,
                });
            }
            _ => {}
        }
    }
    rows
}

fn normalize_category(raw: Option<&Value>, description: &str, default: Category) -> Category {
    let value = safe_text_value(raw).to_lowercase();
    match value.as_str() {
        "positive" | "good" => Category::Positive,
        "negative" | "bad" => Category::Negative,
        "neutral" | "general" => Category::Neutral,
        _ => infer_category(description, default),
    }
}

fn normalize_severity(raw: Option<&Value>, description: &str, default: Severity) -> Severity {
    let value = safe_text_value(raw).to_lowercase();
    match value.as_str() {
        "low" | "minor" | "低" | "轻微" => Severity::Low,
        "medium" | "moderate" | "中" => Severity::Medium,
        "high" | "critical" | "severe" | "高" | "严重" => Severity::High,
        _ => infer_severity(description, default),
    }
}

fn infer_category(description: &str, default: Category) -> Category {
    let text = description.to_lowercase();
    if NEGATIVE_HINTS.iter().any(|hint| text.contains(hint)) {
        return Category::Negative;
    }
    if POSITIVE_HINTS.iter().any(|hint| text.contains(hint)) {
        return Category::Positive;
    }
    default
}

fn infer_severity(description: &str, default: Severity) -> Severity {
    let text = description.to_lowercase();
    if SEVERITY_HIGH_HINTS.iter().any(|hint| text.contains(hint)) {
        return Severity::High;
    }
    if SEVERITY_LOW_HINTS.iter().any(|hint| text.contains(hint)) {
        return Severity::Low;
    }
    default
}

// ---------------------------------------------------------------------------
// Tension & focus inference
// ---------------------------------------------------------------------------

fn parse_tension_percent(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_f64().map(clamp_percent),
        Value::String(s) => {
            let cleaned = safe_text(s).replace('%', "");
            cleaned.parse::<f64>().ok().map(clamp_percent)
        }
        _ => None,
    }
}

fn clamp_percent(value: f64) -> i64 {
    (value.round() as i64).clamp(0, 100)
}

fn infer_tension_percent(events: &[ReportEntry], risks: &[ReportEntry]) -> i64 {
    let mut score: i64 = 28;
    for entry in events {
        let step = match entry.severity {
            Severity::Low => 8,
            Severity::Medium => 15,
            Severity::High => 24,
        };
        match entry.category {
            Category::Negative => score += step,
            Category::Positive => score -= (step as f64 * 0.6).round() as i64,
            Category::Neutral => score += (step as f64 * 0.2).round() as i64,
        }
    }
    score += risks.len() as i64 * 8;
    score.clamp(0, 100)
}

fn fallback_summary(events: &[ReportEntry], risks: &[ReportEntry]) -> String {
    events
        .iter()
        .chain(risks.iter())
        .map(|row| row.description.as_str())
        .find(|text| !text.is_empty())
        .map(first_sentence)
        .unwrap_or_default()
}

fn fallback_crisis_focus(summary: &str, events: &[ReportEntry], risks: &[ReportEntry]) -> String {
    if let Some(row) = events
        .iter()
        .find(|row| row.category == Category::Negative && row.severity == Severity::High)
    {
        return first_sentence(&row.description);
    }
    if let Some(row) = events.iter().find(|row| row.category == Category::Negative) {
        return first_sentence(&row.description);
    }
    if let Some(row) = risks.iter().find(|row| !row.description.is_empty()) {
        return first_sentence(&row.description);
    }
    first_sentence(summary)
}

// ---------------------------------------------------------------------------
// Text & JSON recovery helpers
// ---------------------------------------------------------------------------

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\s*").expect("valid regex"));
static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
static HALF_QUOTED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([,{]\s*)([A-Za-z_][A-Za-z0-9_]*)"\s*:"#).expect("valid regex"));
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([,{]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("valid regex"));
static FIRST_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+?[。！？!?\.])(\s|$)").expect("valid regex"));

fn sanitize_report_text(content: &str) -> String {
    let mut raw = content.trim().to_string();
    if raw.starts_with("```") {
        raw = FENCE_OPEN.replace(&raw, "").into_owned();
        raw = FENCE_CLOSE.replace(&raw, "").into_owned();
    }
    raw.trim().to_string()
}

fn extract_json_object(content: &str) -> String {
    let Some(start) = content.find('{') else {
        return String::new();
    };
    let Some(end) = content.rfind('}') else {
        return String::new();
    };
    if end <= start {
        return String::new();
    }
    content[start..=end].trim().to_string()
}

fn load_json_mapping(content: &str) -> Option<Map<String, Value>> {
    for candidate in json_repair_candidates(content) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return Some(map);
        }
    }
    None
}

fn json_repair_candidates(content: &str) -> Vec<String> {
    let mut candidates = vec![content.to_string()];
    let repaired = repair_json_object(content);
    if repaired != content {
        candidates.push(repaired);
    }
    candidates
}

fn repair_json_object(content: &str) -> String {
    let text = TRAILING_COMMA.replace_all(content, "${1}");
    let text = HALF_QUOTED_KEY.replace_all(&text, "${1}\"${2}\":");
    BARE_KEY.replace_all(&text, "${1}\"${2}\":").into_owned()
}

pub(crate) fn first_sentence(text: &str) -> String {
    let value = safe_text(text);
    if value.is_empty() {
        return String::new();
    }
    let sentence = FIRST_SENTENCE
        .captures(&value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or(value);
    if sentence.chars().count() <= 140 {
        return sentence;
    }
    let head: String = sentence.chars().take(137).collect();
    format!("{head}...")
}

/// Collapse whitespace runs in a string value.
fn safe_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn safe_text_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => safe_text(s),
        _ => String::new(),
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_report() {
        let content = r#"{"title":"Q1","time_advance":"1 month","summary":"Calm quarter.",
            "events":[{"category":"positive","severity":"low","description":"Trade grows"}],
            "risks":[{"category":"negative","severity":"high","description":"War looms"}]}"#;
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        assert_eq!(snapshot.title, "Q1");
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].category, Category::Positive);
        assert_eq!(snapshot.risks[0].severity, Severity::High);
    }

    #[test]
    fn strips_code_fences_and_surrounding_prose() {
        let content = "Here is the report:\n```json\n{\"title\":\"Fenced\",\"summary\":\"ok\",\"events\":[],\"risks\":[]}\n```";
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        assert_eq!(snapshot.title, "Fenced");
    }

    #[test]
    fn repairs_trailing_commas_and_bare_keys() {
        let content = r#"{title: "Broken", summary: "still parses", events: [], risks: [],}"#;
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        assert_eq!(snapshot.title, "Broken");
        assert_eq!(snapshot.summary, "still parses");
    }

    #[test]
    fn non_json_content_yields_none() {
        assert!(parse_report_snapshot("plain prose, no braces", "tick").is_none());
        assert!(parse_report_snapshot("", "tick").is_none());
        assert!(parse_report_snapshot("[1, 2, 3]", "tick").is_none());
    }

    #[test]
    fn bare_string_entries_get_inferred_labels() {
        let content = r#"{"title":"T","events":["A wildfire spreads","Treaty signed brings peace"],"risks":[]}"#;
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        assert_eq!(snapshot.events[0].category, Category::Negative);
        assert_eq!(snapshot.events[1].category, Category::Positive);
    }

    #[test]
    fn missing_fields_fall_back() {
        let content = r#"{"events":[{"description":"Minor local unrest"}]}"#;
        let snapshot = parse_report_snapshot(content, "1 week").unwrap();
        assert_eq!(snapshot.title, "World Report");
        assert_eq!(snapshot.time_advance, "1 week");
        assert_eq!(snapshot.events[0].severity, Severity::Low);
        // Summary falls back to the first entry's first sentence.
        assert_eq!(snapshot.summary, "Minor local unrest");
    }

    #[test]
    fn tension_accepts_number_and_percent_string() {
        let content = r#"{"title":"T","tension_percent":"85%","events":[],"risks":[]}"#;
        assert_eq!(parse_report_snapshot(content, "t").unwrap().tension_percent, 85);

        let content = r#"{"title":"T","tension":140,"events":[],"risks":[]}"#;
        assert_eq!(parse_report_snapshot(content, "t").unwrap().tension_percent, 100);
    }

    #[test]
    fn tension_is_inferred_from_entries() {
        let content = r#"{"title":"T","events":[{"category":"negative","severity":"high","description":"war erupts"}],"risks":["famine"]}"#;
        let snapshot = parse_report_snapshot(content, "t").unwrap();
        // 28 + 24 (high negative) + 8 (one risk) = 60
        assert_eq!(snapshot.tension_percent, 60);
    }

    #[test]
    fn crisis_focus_prefers_high_negative_event() {
        let content = r#"{"title":"T","summary":"s",
            "events":[{"category":"neutral","severity":"low","description":"markets idle"},
                      {"category":"negative","severity":"high","description":"Plague spreads north. More text."}],
            "risks":[]}"#;
        let snapshot = parse_report_snapshot(content, "t").unwrap();
        assert_eq!(snapshot.crisis_focus, "Plague spreads north.");
    }

    #[test]
    fn storage_round_trip() {
        let content = r#"{"title":"T","summary":"s","events":[],"risks":[]}"#;
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        let stored = snapshot_to_storage_json(&snapshot);
        assert_eq!(parse_storage_snapshot(Some(&stored)).unwrap(), snapshot);
        assert!(parse_storage_snapshot(None).is_none());
        assert!(parse_storage_snapshot(Some("not json")).is_none());
    }

    #[test]
    fn canonical_content_omits_derived_fields() {
        let content = r#"{"title":"T","summary":"s","events":[],"risks":[]}"#;
        let snapshot = parse_report_snapshot(content, "tick").unwrap();
        let canonical = snapshot_to_content(&snapshot);
        assert!(canonical.contains("\"title\""));
        assert!(!canonical.contains("tension_percent"));
        assert!(!canonical.contains("crisis_focus"));
    }
}
