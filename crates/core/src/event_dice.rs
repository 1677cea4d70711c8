//! Stochastic event guidance rolled once per simulation tick.
//!
//! The dice do not decide what happens in the world; they hand the model a
//! plan: how many events to narrate, minimum counts per category, a severity
//! per slot, a crisis focus topic, plus season/geopolitical/scale hints
//! derived from the simulated date and recent timeline content.

use chrono::{DateTime, Datelike, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::report::{Category, Severity};
use crate::types::StepUnit;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which hemisphere the season hint assumes when the preset does not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    pub fn parse_or_north(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "south" => Hemisphere::South,
            _ => Hemisphere::North,
        }
    }
}

/// Tunable dice parameters (runtime-adjustable via the debug settings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDiceConfig {
    pub enabled: bool,
    pub good_prob: f64,
    pub bad_prob: f64,
    pub rebel_prob: f64,
    pub min_events: u32,
    pub max_events: u32,
    pub hemisphere: Hemisphere,
}

impl Default for EventDiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            good_prob: 0.25,
            bad_prob: 0.15,
            rebel_prob: 0.10,
            min_events: 1,
            max_events: 5,
            hemisphere: Hemisphere::North,
        }
    }
}

impl EventDiceConfig {
    /// Clamp probabilities to [0, 1] and enforce `min <= max` with `min >= 1`.
    fn normalized(&self) -> Self {
        let min_events = self.min_events.max(1);
        Self {
            enabled: self.enabled,
            good_prob: self.good_prob.clamp(0.0, 1.0),
            bad_prob: self.bad_prob.clamp(0.0, 1.0),
            rebel_prob: self.rebel_prob.clamp(0.0, 1.0),
            min_events,
            max_events: self.max_events.max(min_events),
            hemisphere: self.hemisphere,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One rolled slot the model must fill with an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDiceSlot {
    pub category: Category,
    pub severity: Severity,
    pub topic: String,
    pub rebellious: bool,
}

/// Guidance payload for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDicePlan {
    pub enabled: bool,
    pub target_event_count: u32,
    pub positive_min_count: u32,
    pub negative_min_count: u32,
    pub neutral_min_count: u32,
    pub crisis_focus: String,
    pub event_slots: Vec<EventDiceSlot>,
    pub season_hint: String,
    pub geopolitical_hint: String,
    pub scale_hint: String,
    pub interval_hint: String,
}

/// Inputs describing where the simulated timeline currently stands.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub timeline_start_iso: Option<&'a str>,
    pub timeline_step_value: i64,
    pub timeline_step_unit: StepUnit,
    pub next_seq: i64,
    pub output_language: &'a str,
}

// ---------------------------------------------------------------------------
// Dice
// ---------------------------------------------------------------------------

/// Rolls the per-tick guidance plan.
#[derive(Debug, Clone)]
pub struct EventDice {
    cfg: EventDiceConfig,
}

impl EventDice {
    pub fn new(cfg: EventDiceConfig) -> Self {
        Self {
            cfg: cfg.normalized(),
        }
    }

    /// Swap in a new configuration (runtime settings reload).
    pub fn reload(&mut self, cfg: EventDiceConfig) {
        self.cfg = cfg.normalized();
    }

    pub fn config(&self) -> &EventDiceConfig {
        &self.cfg
    }

    /// Plan stochastic event distribution for one tick.
    ///
    /// `recent_contents` are the latest timeline message bodies in seq order;
    /// only the tail is inspected.
    pub fn build_plan<R: Rng>(
        &self,
        rng: &mut R,
        recent_contents: &[String],
        ctx: TickContext<'_>,
    ) -> EventDicePlan {
        let interval_hint = format!(
            "{} {}",
            ctx.timeline_step_value.max(1),
            ctx.timeline_step_unit.as_str()
        );

        if !self.cfg.enabled {
            return EventDicePlan {
                enabled: false,
                target_event_count: 1,
                positive_min_count: 0,
                negative_min_count: 0,
                neutral_min_count: 1,
                crisis_focus: String::new(),
                event_slots: Vec::new(),
                season_hint: "No season hint.".into(),
                geopolitical_hint: "No geopolitical pressure hint.".into(),
                scale_hint: "No scale hint.".into(),
                interval_hint,
            };
        }

        let target_event_count = rng.gen_range(self.cfg.min_events..=self.cfg.max_events);
        let mut positive_min = u32::from(rng.gen::<f64>() < self.cfg.good_prob);
        let mut negative_min = u32::from(rng.gen::<f64>() < self.cfg.bad_prob);

        while positive_min + negative_min > target_event_count {
            if negative_min > 0 {
                negative_min -= 1;
            } else {
                positive_min -= 1;
            }
        }
        let mut neutral_min = target_event_count.saturating_sub(positive_min + negative_min);
        if positive_min == 0 && negative_min == 0 && neutral_min == 0 {
            neutral_min = 1;
        }

        let simulated_time = compute_simulated_time(
            ctx.timeline_start_iso,
            ctx.timeline_step_value,
            ctx.timeline_step_unit,
            ctx.next_seq,
        );
        let season_hint = season_hint(simulated_time, self.cfg.hemisphere);
        let geopolitical_hint = infer_geopolitical_hint(recent_contents);
        let scale_hint = build_scale_hint(ctx.timeline_step_value, ctx.timeline_step_unit);
        let crisis_focus = choose_crisis_focus(
            rng,
            recent_contents,
            &season_hint,
            &geopolitical_hint,
            ctx.output_language,
        );

        let categories = roll_categories(
            rng,
            target_event_count,
            positive_min,
            negative_min,
            neutral_min,
            self.cfg.good_prob,
            self.cfg.bad_prob,
            &geopolitical_hint,
        );

        let mut event_slots = Vec::with_capacity(categories.len());
        for category in categories {
            let rebellious = matches!(category, Category::Positive | Category::Negative)
                && rng.gen::<f64>() < self.cfg.rebel_prob;
            let topic = if rebellious {
                choose_rebel_topic(rng, &crisis_focus, ctx.output_language)
            } else {
                crisis_focus.clone()
            };
            let severity = roll_severity(
                rng,
                category,
                ctx.timeline_step_value,
                ctx.timeline_step_unit,
            );
            event_slots.push(EventDiceSlot {
                category,
                severity,
                topic,
                rebellious,
            });
        }

        EventDicePlan {
            enabled: true,
            target_event_count,
            positive_min_count: positive_min,
            negative_min_count: negative_min,
            neutral_min_count: neutral_min,
            crisis_focus,
            event_slots,
            season_hint,
            geopolitical_hint,
            scale_hint,
            interval_hint,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated time
// ---------------------------------------------------------------------------

fn compute_simulated_time(
    timeline_start_iso: Option<&str>,
    step_value: i64,
    step_unit: StepUnit,
    next_seq: i64,
) -> DateTime<Utc> {
    let baseline = parse_iso_or_now(timeline_start_iso);
    let offset = (next_seq - 1).max(0) * step_value.max(1);
    match step_unit {
        StepUnit::Day => baseline + Duration::days(offset),
        StepUnit::Week => baseline + Duration::days(offset * 7),
        StepUnit::Month => add_months(baseline, offset),
        StepUnit::Year => add_years(baseline, offset),
    }
}

fn parse_iso_or_now(value: Option<&str>) -> DateTime<Utc> {
    let raw = value.unwrap_or("").trim();
    if raw.is_empty() {
        return Utc::now();
    }
    let normalized = raw.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn add_months(source: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let total = source.year() as i64 * 12 + (source.month() as i64 - 1) + months;
    let year = clamp_year(total.div_euclid(12)) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let day = source.day().min(days_in_month(year, month));
    rebuild_date(source, year, month, day)
}

fn add_years(source: DateTime<Utc>, years: i64) -> DateTime<Utc> {
    let year = clamp_year(source.year() as i64 + years) as i32;
    let month = source.month();
    let day = source.day().min(days_in_month(year, month));
    rebuild_date(source, year, month, day)
}

fn rebuild_date(source: DateTime<Utc>, year: i32, month: u32, day: u32) -> DateTime<Utc> {
    // Move to day 1 first so intermediate year/month combinations stay valid.
    source
        .with_day(1)
        .and_then(|d| d.with_year(year))
        .and_then(|d| d.with_month(month))
        .and_then(|d| d.with_day(day))
        .unwrap_or(source)
}

fn clamp_year(year: i64) -> i64 {
    year.clamp(1, 9999)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
            if leap {
                29
            } else {
                28
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

fn season_hint(simulated_time: DateTime<Utc>, hemisphere: Hemisphere) -> String {
    let month = simulated_time.month();
    let north = match month {
        12 | 1 | 2 => "winter",
        3..=5 => "spring",
        6..=8 => "summer",
        _ => "autumn",
    };
    let south = match month {
        12 | 1 | 2 => "summer",
        3..=5 => "autumn",
        6..=8 => "winter",
        _ => "spring",
    };
    let (season, name) = match hemisphere {
        Hemisphere::South => (south, "southern"),
        Hemisphere::North => (north, "northern"),
    };
    format!("Current season is {season} in the {name} hemisphere.")
}

const TENSION_KEYWORDS: &[&str] = &["war", "sanction", "conflict", "riot", "blockade", "crisis"];
const COOPERATION_KEYWORDS: &[&str] = &[
    "treaty",
    "alliance",
    "ceasefire",
    "trade",
    "cooperation",
    "summit",
];

fn infer_geopolitical_hint(recent_contents: &[String]) -> String {
    if recent_contents.is_empty() {
        return "Global conditions are uncertain but not yet escalated.".into();
    }

    let tail_start = recent_contents.len().saturating_sub(8);
    let joined = recent_contents[tail_start..]
        .iter()
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let count = |words: &[&str]| -> usize {
        words
            .iter()
            .map(|word| joined.matches(word).count())
            .sum()
    };
    let tension = count(TENSION_KEYWORDS);
    let cooperation = count(COOPERATION_KEYWORDS);

    if tension >= cooperation + 2 {
        "International conditions are tense with rising confrontation signals.".into()
    } else if cooperation >= tension + 2 {
        "International conditions lean toward temporary coordination and diplomacy.".into()
    } else {
        "International conditions are mixed, with both friction and cooperation.".into()
    }
}

fn build_scale_hint(step_value: i64, step_unit: StepUnit) -> String {
    let days = step_unit.interval_days(step_value);
    let hint = if days <= 2 {
        "Very short interval: avoid civilizational shocks; focus on local and incremental changes."
    } else if days <= 14 {
        "Short interval: major strategic shifts are rare; focus on emerging signals and limited incidents."
    } else if days <= 90 {
        "Medium interval: regional escalations or reforms can happen if well justified."
    } else if days <= 370 {
        "Long interval: large policy turns, regime changes, or state fragmentation become plausible."
    } else {
        "Very long interval: transformative geopolitical and civilizational shifts are plausible."
    };
    hint.into()
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

fn normalize_language(code: &str) -> &'static str {
    match code.trim().to_lowercase().replace('_', "-").as_str() {
        "zh" | "zh-cn" | "zh-hans" => "zh-cn",
        _ => "en",
    }
}

fn topic_catalog(language: &str) -> &'static [&'static str] {
    if normalize_language(language) == "zh-cn" {
        &[
            "战争",
            "饥荒",
            "瘟疫",
            "金融危机",
            "干旱",
            "自然灾害",
            "人为灾害",
            "事故",
            "政治动荡",
            "技术突破",
        ]
    } else {
        &[
            "war",
            "famine",
            "epidemic",
            "financial crisis",
            "drought",
            "natural disaster",
            "man-made disaster",
            "major accident",
            "political turmoil",
            "technology breakthrough",
        ]
    }
}

fn choose_crisis_focus<R: Rng>(
    rng: &mut R,
    recent_contents: &[String],
    season_hint: &str,
    geopolitical_hint: &str,
    output_language: &str,
) -> String {
    let language = normalize_language(output_language);
    let topics = topic_catalog(language);

    let tail_start = recent_contents.len().saturating_sub(10);
    let text = recent_contents[tail_start..]
        .iter()
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let season = season_hint.to_lowercase();
    let geop = geopolitical_hint.to_lowercase();

    let hit = |keywords: &[&str]| keywords.iter().any(|word| text.contains(word));

    if language == "zh-cn" {
        if hit(&["战争", "战事", "入侵", "冲突", "制裁"]) || geop.contains("tense") {
            return "战争".into();
        }
        if hit(&["饥荒", "歉收", "粮", "断粮"]) || season.contains("drought") {
            return "饥荒".into();
        }
        if hit(&["瘟疫", "疫病", "感染", "隔离"]) {
            return "瘟疫".into();
        }
        if hit(&["金融", "通胀", "崩盘", "挤兑"]) {
            return "金融危机".into();
        }
        if hit(&["地震", "洪水", "台风", "暴雨", "火山", "雪灾"]) {
            return "自然灾害".into();
        }
        if hit(&["爆炸", "污染", "泄漏", "事故"]) {
            return "事故".into();
        }
        if hit(&["政变", "叛乱", "示威", "动荡"]) {
            return "政治动荡".into();
        }
        return topics[rng.gen_range(0..topics.len())].into();
    }

    if hit(&["war", "invasion", "conflict", "sanction", "riot"]) || geop.contains("tense") {
        return "war".into();
    }
    if hit(&["famine", "hunger", "crop failure"]) || season.contains("drought") {
        return "famine".into();
    }
    if hit(&["epidemic", "plague", "infection", "quarantine"]) {
        return "epidemic".into();
    }
    if hit(&["inflation", "bank run", "default", "crash"]) {
        return "financial crisis".into();
    }
    if hit(&["earthquake", "flood", "hurricane", "wildfire", "eruption"]) {
        return "natural disaster".into();
    }
    if hit(&["explosion", "leak", "accident", "collapse"]) {
        return "major accident".into();
    }
    if hit(&["coup", "uprising", "protest", "turmoil"]) {
        return "political turmoil".into();
    }
    topics[rng.gen_range(0..topics.len())].into()
}

fn choose_rebel_topic<R: Rng>(rng: &mut R, crisis_focus: &str, output_language: &str) -> String {
    let topics = topic_catalog(output_language);
    let candidates: Vec<&str> = topics
        .iter()
        .copied()
        .filter(|topic| *topic != crisis_focus)
        .collect();
    if candidates.is_empty() {
        return crisis_focus.to_string();
    }
    candidates[rng.gen_range(0..candidates.len())].to_string()
}

// ---------------------------------------------------------------------------
// Category & severity rolls
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn roll_categories<R: Rng>(
    rng: &mut R,
    target_event_count: u32,
    positive_min: u32,
    negative_min: u32,
    neutral_min: u32,
    good_prob: f64,
    bad_prob: f64,
    geopolitical_hint: &str,
) -> Vec<Category> {
    let mut categories = Vec::with_capacity(target_event_count as usize);
    categories.extend(std::iter::repeat(Category::Positive).take(positive_min as usize));
    categories.extend(std::iter::repeat(Category::Negative).take(negative_min as usize));
    categories.extend(std::iter::repeat(Category::Neutral).take(neutral_min as usize));

    let remaining = (target_event_count as usize).saturating_sub(categories.len());
    if remaining == 0 {
        shuffle(rng, &mut categories);
        categories.truncate(target_event_count as usize);
        return categories;
    }

    let geop = geopolitical_hint.to_lowercase();
    let tension_boost = if geop.contains("tense") || geop.contains("confrontation") {
        0.10
    } else {
        0.0
    };
    let w_pos = good_prob.max(0.05);
    let w_neg = (bad_prob + tension_boost).max(0.05);
    let w_neu = (1.0 - (w_pos + w_neg) / 2.0).max(0.10);
    let total = w_pos + w_neg + w_neu;
    let (w_pos, w_neg) = (w_pos / total, w_neg / total);

    for _ in 0..remaining {
        let pick = rng.gen::<f64>();
        if pick < w_pos {
            categories.push(Category::Positive);
        } else if pick < w_pos + w_neg {
            categories.push(Category::Negative);
        } else {
            categories.push(Category::Neutral);
        }
    }

    shuffle(rng, &mut categories);
    categories.truncate(target_event_count as usize);
    categories
}

/// Fisher-Yates over the rolled category list.
fn shuffle<R: Rng, T>(rng: &mut R, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Roll severity from a normal distribution bucketed into low/medium/high.
///
/// The mean shifts with the time-interval scale so short ticks skew mild and
/// long ticks allow heavier outcomes; medium stays the most common bucket.
fn roll_severity<R: Rng>(
    rng: &mut R,
    category: Category,
    step_value: i64,
    step_unit: StepUnit,
) -> Severity {
    let value = step_value.max(1);
    let mut mu = match step_unit {
        StepUnit::Day => -0.60,
        StepUnit::Week => -0.35,
        StepUnit::Month => -0.10,
        StepUnit::Year => 0.25,
    };
    mu += (0.15 * ((value + 1) as f64).log10()).min(0.35);
    mu += match category {
        Category::Negative => 0.10,
        Category::Positive => 0.05,
        Category::Neutral => -0.10,
    };

    let z = sample_gauss(rng, mu, 0.85);
    if z < -0.25 {
        Severity::Low
    } else if z < 0.70 {
        Severity::Medium
    } else {
        Severity::High
    }
}

/// Box-Muller sample from N(mu, sigma).
fn sample_gauss<R: Rng>(rng: &mut R, mu: f64, sigma: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mu + sigma * z
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx(next_seq: i64) -> TickContext<'static> {
        TickContext {
            timeline_start_iso: Some("2030-01-15T00:00:00+00:00"),
            timeline_step_value: 1,
            timeline_step_unit: StepUnit::Month,
            next_seq,
            output_language: "en",
        }
    }

    #[test]
    fn disabled_dice_produce_inert_plan() {
        let dice = EventDice::new(EventDiceConfig {
            enabled: false,
            ..EventDiceConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(7);
        let plan = dice.build_plan(&mut rng, &[], ctx(1));
        assert!(!plan.enabled);
        assert!(plan.event_slots.is_empty());
        assert_eq!(plan.neutral_min_count, 1);
        assert_eq!(plan.interval_hint, "1 month");
    }

    #[test]
    fn plan_respects_event_count_bounds() {
        let dice = EventDice::new(EventDiceConfig {
            min_events: 2,
            max_events: 4,
            ..EventDiceConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let plan = dice.build_plan(&mut rng, &[], ctx(3));
            assert!((2..=4).contains(&plan.target_event_count));
            assert_eq!(plan.event_slots.len(), plan.target_event_count as usize);
            assert!(
                plan.positive_min_count + plan.negative_min_count + plan.neutral_min_count
                    <= plan.target_event_count
            );
        }
    }

    #[test]
    fn config_is_normalized() {
        let dice = EventDice::new(EventDiceConfig {
            good_prob: 3.0,
            bad_prob: -1.0,
            min_events: 0,
            max_events: 0,
            ..EventDiceConfig::default()
        });
        let cfg = dice.config();
        assert_eq!(cfg.good_prob, 1.0);
        assert_eq!(cfg.bad_prob, 0.0);
        assert_eq!(cfg.min_events, 1);
        assert_eq!(cfg.max_events, 1);
    }

    #[test]
    fn simulated_time_advances_by_months() {
        let time = compute_simulated_time(
            Some("2030-01-31T00:00:00+00:00"),
            1,
            StepUnit::Month,
            2,
        );
        // One month after Jan 31 clamps to Feb 28 (2030 is not a leap year).
        assert_eq!(time.month(), 2);
        assert_eq!(time.day(), 28);
        assert_eq!(time.year(), 2030);
    }

    #[test]
    fn tense_timeline_biases_crisis_focus_to_war() {
        let dice = EventDice::new(EventDiceConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let contents = vec![
            "A war of sanction and conflict grips the region".to_string(),
            "Another war riot and blockade crisis".to_string(),
        ];
        let plan = dice.build_plan(&mut rng, &contents, ctx(3));
        assert_eq!(plan.crisis_focus, "war");
        assert!(plan.geopolitical_hint.contains("tense"));
    }

    #[test]
    fn chinese_locale_uses_chinese_topics() {
        let dice = EventDice::new(EventDiceConfig::default());
        let mut rng = StdRng::seed_from_u64(5);
        let contents = vec!["各地爆发战争与冲突".to_string()];
        let plan = dice.build_plan(
            &mut rng,
            &contents,
            TickContext {
                output_language: "zh-CN",
                ..ctx(2)
            },
        );
        assert_eq!(plan.crisis_focus, "战争");
    }

    #[test]
    fn rebel_slots_pick_a_different_topic() {
        let dice = EventDice::new(EventDiceConfig {
            rebel_prob: 1.0,
            bad_prob: 1.0,
            good_prob: 1.0,
            ..EventDiceConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(11);
        let contents = vec!["war war war sanction conflict".to_string()];
        let plan = dice.build_plan(&mut rng, &contents, ctx(4));
        for slot in plan
            .event_slots
            .iter()
            .filter(|slot| slot.rebellious)
        {
            assert_ne!(slot.topic, plan.crisis_focus);
        }
    }

    #[test]
    fn severity_distribution_prefers_medium_for_months() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut counts = [0u32; 3];
        for _ in 0..500 {
            let severity = roll_severity(&mut rng, Category::Neutral, 1, StepUnit::Month);
            counts[severity as usize] += 1;
        }
        assert!(counts[Severity::Medium as usize] > counts[Severity::Low as usize] / 2);
        assert!(counts[Severity::Medium as usize] > counts[Severity::High as usize]);
    }
}
