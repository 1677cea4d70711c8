//! Deterministic prompt construction for one generation round.
//!
//! Given identical inputs the produced messages are byte-identical; the mock
//! provider and the prompt tests rely on this.

use serde::{Deserialize, Serialize};

use crate::event_dice::EventDicePlan;

/// Role tag on a provider-neutral prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

/// One provider-neutral prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// A timeline message as the prompt sees it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub seq: i64,
    pub content: String,
}

/// Everything one round feeds into the builder.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub world_preset: &'a str,
    pub tick_label: &'a str,
    /// Recent messages on the active branch, ascending seq order.
    pub timeline: &'a [HistoryEntry],
    /// Freshly consumed interventions, ordered by creation time.
    pub interventions: &'a [String],
    /// Snippets from the memory collaborator (may be empty).
    pub memory_snippets: &'a [String],
    /// Trajectory block from [`crate::worldline_context`]; empty to omit.
    pub worldline_context: &'a str,
    pub output_language: &'a str,
    pub dice_plan: Option<&'a EventDicePlan>,
}

/// Composes prompts for LLM generation.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_history: usize,
    memory_max_snippets: usize,
    memory_max_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(20, 8, 4000)
    }
}

impl PromptBuilder {
    pub fn new(max_history: usize, memory_max_snippets: usize, memory_max_chars: usize) -> Self {
        Self {
            max_history,
            memory_max_snippets,
            memory_max_chars,
        }
    }

    /// Adjust the memory budget (runtime settings reload).
    pub fn update_memory_limits(&mut self, max_snippets: usize, max_chars: usize) {
        self.memory_max_snippets = max_snippets;
        self.memory_max_chars = max_chars;
    }

    /// Create the `[system, user]` message list for a generation round.
    pub fn build_messages(&self, input: &PromptInput<'_>) -> Vec<PromptMessage> {
        vec![
            PromptMessage {
                role: PromptRole::System,
                content: SYSTEM_PROMPT.to_string(),
            },
            PromptMessage {
                role: PromptRole::User,
                content: self.build_user_prompt(input),
            },
        ]
    }

    fn build_user_prompt(&self, input: &PromptInput<'_>) -> String {
        let mut sections: Vec<String> = Vec::new();

        sections.push(format!("World preset:\n{}", input.world_preset));
        sections.push(format!("Time advance label: {}", input.tick_label));

        let memory = self.memory_section(input.memory_snippets);
        if let Some(memory) = memory {
            sections.push(memory);
        }

        sections.push(format!(
            "Recent timeline:\n{}",
            self.history_section(input.timeline)
        ));

        if !input.worldline_context.is_empty() {
            sections.push(format!(
                "Worldline trajectory:\n{}",
                input.worldline_context
            ));
        }

        sections.push(format!(
            "Pending interventions:\n{}",
            intervention_section(input.interventions)
        ));

        if let Some(plan) = input.dice_plan.filter(|plan| plan.enabled) {
            sections.push(dice_section(plan));
        }

        sections.push(FORMAT_REMINDER.to_string());
        sections.push(format!(
            "Write the report in the \"{}\" locale.",
            input.output_language
        ));

        sections.join("\n\n")
    }

    fn history_section(&self, timeline: &[HistoryEntry]) -> String {
        let tail_start = timeline.len().saturating_sub(self.max_history);
        let lines: Vec<String> = timeline[tail_start..]
            .iter()
            .map(|entry| format!("#{} {}", entry.seq, entry.content))
            .collect();
        if lines.is_empty() {
            "(none)".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn memory_section(&self, snippets: &[String]) -> Option<String> {
        if snippets.is_empty() || self.memory_max_snippets == 0 {
            return None;
        }
        let mut lines: Vec<String> = Vec::new();
        let mut used_chars = 0usize;
        for snippet in snippets.iter().take(self.memory_max_snippets) {
            let len = snippet.chars().count();
            if used_chars + len > self.memory_max_chars {
                break;
            }
            used_chars += len;
            lines.push(format!("- {snippet}"));
        }
        if lines.is_empty() {
            return None;
        }
        Some(format!("Long-term memory:\n{}", lines.join("\n")))
    }
}

fn intervention_section(interventions: &[String]) -> String {
    if interventions.is_empty() {
        return "(none)".to_string();
    }
    interventions
        .iter()
        .map(|content| format!("- {content}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn dice_section(plan: &EventDicePlan) -> String {
    let mut lines = vec![
        "Event guidance for this tick:".to_string(),
        format!("- Narrate exactly {} events.", plan.target_event_count),
        format!(
            "- Category minimums: {} positive, {} negative, {} neutral.",
            plan.positive_min_count, plan.negative_min_count, plan.neutral_min_count
        ),
    ];
    if !plan.crisis_focus.is_empty() {
        lines.push(format!("- Crisis focus: {}.", plan.crisis_focus));
    }
    for slot in &plan.event_slots {
        lines.push(format!(
            "- Slot: {:?} / {:?} severity, topic \"{}\".",
            slot.category, slot.severity, slot.topic
        ));
    }
    lines.push(format!("- {}", plan.season_hint));
    lines.push(format!("- {}", plan.geopolitical_hint));
    lines.push(format!("- {}", plan.scale_hint));
    lines.push(format!("- Interval: {}.", plan.interval_hint));
    lines.join("\n")
}

const SYSTEM_PROMPT: &str = "You are generating a world progress report for an \
ongoing simulation. Keep it objective, concise, and continuous with the \
established history. Output a single JSON object with fields: title, \
time_advance, summary, events, risks, and optionally tension_percent and \
crisis_focus. Each entry in events and risks is an object with category \
(positive|negative|neutral), severity (low|medium|high), and description.";

const FORMAT_REMINDER: &str = "Return a single JSON object only, with no \
surrounding prose or code fences.";
