//! Continuity anchors and trend summary derived from a branch's report
//! history.
//!
//! Every round injects a compact trajectory block into the prompt so the
//! model stays aware of where the world has been heading: an overall trend
//! line, a risk outlook with dominant themes, and a ranked list of key
//! continuity anchors pulled from past reports. This is distinct from the
//! per-message snapshot normalization in [`crate::report`] (which cleans one
//! report) and from the event dice (which plan one upcoming tick).

use std::collections::HashSet;

use crate::report::{
    first_sentence, parse_report_snapshot, parse_storage_snapshot, Category, ReportEntry,
    ReportSnapshot, Severity,
};

/// Default cap on continuity anchors in the context block.
pub const DEFAULT_MAX_ANCHORS: usize = 8;

/// Recurring crisis themes counted for the risk outlook.
const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    ("war", &["war", "invasion", "battle", "frontline", "战争", "冲突"]),
    (
        "epidemic",
        &["epidemic", "pandemic", "plague", "outbreak", "疫情", "瘟疫"],
    ),
    ("famine", &["famine", "hunger", "粮食短缺", "饥荒"]),
    (
        "natural_disaster",
        &[
            "earthquake",
            "flood",
            "wildfire",
            "hurricane",
            "typhoon",
            "drought",
            "地震",
            "洪水",
            "台风",
            "干旱",
            "山火",
        ],
    ),
    (
        "man_made_disaster",
        &[
            "meltdown",
            "chemical leak",
            "industrial",
            "explosion",
            "人为灾害",
            "泄漏",
            "爆炸",
        ],
    ),
    (
        "accident",
        &["accident", "crash", "collision", "事故", "坠毁", "相撞"],
    ),
];

// ---------------------------------------------------------------------------
// Inputs & signals
// ---------------------------------------------------------------------------

/// A timeline message as the context builder sees it.
#[derive(Debug, Clone, Copy)]
pub struct ReportView<'a> {
    pub seq: i64,
    pub role: &'a str,
    pub content: &'a str,
    pub report_snapshot_json: Option<&'a str>,
}

/// Where a signal was pulled from inside a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Summary,
    Event,
    Risk,
}

impl SourceKind {
    fn rank_weight(self) -> f64 {
        match self {
            SourceKind::Risk => 1.2,
            SourceKind::Event => 1.0,
            SourceKind::Summary => 0.6,
        }
    }
}

/// One extracted key-event signal.
#[derive(Debug, Clone)]
struct WorldlineSignal {
    seq: i64,
    category: Category,
    severity: Severity,
    description: String,
    source_kind: SourceKind,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds the worldline trajectory context for prompt injection.
#[derive(Debug, Clone)]
pub struct WorldlineContext {
    max_anchors: usize,
}

impl Default for WorldlineContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ANCHORS)
    }
}

impl WorldlineContext {
    pub fn new(max_anchors: usize) -> Self {
        Self {
            max_anchors: max_anchors.max(3),
        }
    }

    /// Return a compact worldline trajectory context for the prompt.
    ///
    /// Non-report messages and unparseable reports contribute nothing; with
    /// no confirmed signals at all the block says so instead of being empty.
    pub fn build_context(&self, timeline: &[ReportView<'_>]) -> String {
        let signals = extract_signals(timeline);
        if signals.is_empty() {
            return "Trend: not enough confirmed key events yet.\n\
                    Risk outlook: uncertain due to sparse history.\n\
                    Key continuity anchors:\n\
                    - none"
                .to_string();
        }

        let trend = build_trend_summary(&signals);
        let risk = build_risk_summary(&signals);
        let anchors = build_anchors(&signals, self.max_anchors);

        let mut lines = vec![
            format!("Trend: {trend}"),
            format!("Risk outlook: {risk}"),
            "Key continuity anchors:".to_string(),
        ];
        lines.extend(anchors.into_iter().map(|anchor| format!("- {anchor}")));
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Signal extraction
// ---------------------------------------------------------------------------

fn extract_signals(timeline: &[ReportView<'_>]) -> Vec<WorldlineSignal> {
    let mut signals = Vec::new();
    for message in timeline {
        if message.role != "system_report" {
            continue;
        }
        // Stored snapshots are authoritative; older rows fall back to
        // re-parsing their content.
        let Some(snapshot) = parse_storage_snapshot(message.report_snapshot_json)
            .or_else(|| parse_report_snapshot(message.content, "tick"))
        else {
            continue;
        };

        push_snapshot_signals(&mut signals, message.seq, &snapshot);
    }
    signals
}

fn push_snapshot_signals(signals: &mut Vec<WorldlineSignal>, seq: i64, snapshot: &ReportSnapshot) {
    if !snapshot.summary.is_empty() {
        signals.push(WorldlineSignal {
            seq,
            category: Category::Neutral,
            severity: Severity::Medium,
            description: snapshot.summary.clone(),
            source_kind: SourceKind::Summary,
        });
    }
    signals.extend(entry_signals(seq, &snapshot.events, SourceKind::Event));
    signals.extend(entry_signals(seq, &snapshot.risks, SourceKind::Risk));
}

fn entry_signals(
    seq: i64,
    entries: &[ReportEntry],
    source_kind: SourceKind,
) -> Vec<WorldlineSignal> {
    entries
        .iter()
        .filter(|entry| !entry.description.is_empty())
        .map(|entry| WorldlineSignal {
            seq,
            category: entry.category,
            severity: entry.severity,
            description: entry.description.clone(),
            source_kind,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Trend & risk summaries
// ---------------------------------------------------------------------------

fn build_trend_summary(signals: &[WorldlineSignal]) -> String {
    let negative_count = count_category(signals, Category::Negative);
    let positive_count = count_category(signals, Category::Positive);
    let neutral_count = count_category(signals, Category::Neutral);
    let high_negative_count = signals
        .iter()
        .filter(|item| item.category == Category::Negative && item.severity == Severity::High)
        .count();

    let tail_start = signals.len().saturating_sub(6);
    let recent = &signals[tail_start..];
    let recent_negative = count_category(recent, Category::Negative);
    let recent_positive = count_category(recent, Category::Positive);

    let direction = if recent_negative >= 4 || high_negative_count >= 4 {
        "escalating instability with repeated high-impact shocks"
    } else if recent_positive >= recent_negative + 2 {
        "partial stabilization with recovery momentum"
    } else if negative_count >= positive_count + 3 {
        "fragile trajectory with sustained downside pressure"
    } else {
        "mixed trajectory with volatile shifts"
    };

    format!(
        "{direction}; negative={negative_count}, positive={positive_count}, \
         neutral={neutral_count}, high_negative={high_negative_count}"
    )
}

fn count_category(signals: &[WorldlineSignal], category: Category) -> usize {
    signals
        .iter()
        .filter(|item| item.category == category)
        .count()
}

fn build_risk_summary(signals: &[WorldlineSignal]) -> String {
    let text = signals
        .iter()
        .map(|item| item.description.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut theme_hits: Vec<(&str, usize)> = THEME_KEYWORDS
        .iter()
        .filter_map(|(theme, keywords)| {
            let count: usize = keywords
                .iter()
                .map(|keyword| text.matches(keyword).count())
                .sum();
            (count > 0).then_some((*theme, count))
        })
        .collect();
    theme_hits.sort_by(|a, b| b.1.cmp(&a.1));

    let major_themes = if theme_hits.is_empty() {
        "none".to_string()
    } else {
        theme_hits
            .iter()
            .take(3)
            .map(|(theme, _)| *theme)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let severe_negative = signals
        .iter()
        .filter(|item| item.category == Category::Negative && item.severity == Severity::High)
        .count();
    let severity_note = if severe_negative >= 4 {
        "critical crisis density"
    } else if severe_negative >= 2 {
        "elevated crisis pressure"
    } else {
        "managed but fragile pressure"
    };

    format!("{severity_note}; dominant themes: {major_themes}")
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

fn build_anchors(signals: &[WorldlineSignal], limit: usize) -> Vec<String> {
    let max_seq = signals.iter().map(|item| item.seq).max().unwrap_or(1);

    let mut ranked: Vec<&WorldlineSignal> = signals.iter().collect();
    ranked.sort_by(|a, b| {
        rank(b, max_seq)
            .partial_cmp(&rank(a, max_seq))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.seq.cmp(&a.seq))
    });

    let mut anchors = Vec::new();
    let mut seen = HashSet::new();
    for item in ranked {
        let headline = first_sentence(&item.description);
        if headline.is_empty() {
            continue;
        }
        if !seen.insert(headline.to_lowercase()) {
            continue;
        }
        anchors.push(format!(
            "#{} ({}/{}) {}",
            item.seq,
            item.category.as_str(),
            item.severity.as_str(),
            headline
        ));
        if anchors.len() >= limit {
            break;
        }
    }
    if anchors.is_empty() {
        anchors.push("none".to_string());
    }
    anchors
}

/// Higher for severe negative recent risks; recency is a fractional tiebreak.
fn rank(item: &WorldlineSignal, max_seq: i64) -> f64 {
    let category_score = match item.category {
        Category::Negative => 3.0,
        Category::Positive => 2.0,
        Category::Neutral => 1.0,
    };
    let severity_score = match item.severity {
        Severity::High => 3.0,
        Severity::Medium => 2.0,
        Severity::Low => 1.0,
    };
    let recency = item.seq as f64 / max_seq.max(1) as f64;
    category_score + severity_score + item.source_kind.rank_weight() + recency
}
