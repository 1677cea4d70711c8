//! Shared identifier, timestamp, and enumeration types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque entity identifier (UUID v4, simple form).
pub type Id = String;

/// UTC timestamp used for all persisted times.
pub type Timestamp = DateTime<Utc>;

/// Create a fresh entity identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current UTC time.
pub fn utc_now() -> Timestamp {
    Utc::now()
}

// ---------------------------------------------------------------------------
// Message roles
// ---------------------------------------------------------------------------

/// Role of a timeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A generated world progress report.
    SystemReport,
    /// A user directive mirrored into the timeline.
    UserIntervention,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SystemReport => "system_report",
            Role::UserIntervention => "user_intervention",
        }
    }
}

// ---------------------------------------------------------------------------
// Intervention status
// ---------------------------------------------------------------------------

/// Lifecycle state of a queued intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    Consumed,
    Canceled,
}

impl InterventionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InterventionStatus::Pending => "pending",
            InterventionStatus::Consumed => "consumed",
            InterventionStatus::Canceled => "canceled",
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline step unit
// ---------------------------------------------------------------------------

/// Unit of one simulated-time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepUnit {
    Day,
    Week,
    Month,
    Year,
}

impl StepUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            StepUnit::Day => "day",
            StepUnit::Week => "week",
            StepUnit::Month => "month",
            StepUnit::Year => "year",
        }
    }

    /// Parse a unit, falling back to `Month` for unknown input.
    pub fn parse_or_month(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => StepUnit::Day,
            "week" => StepUnit::Week,
            "year" => StepUnit::Year,
            _ => StepUnit::Month,
        }
    }

    /// Approximate number of days covered by `step_value` of this unit.
    pub fn interval_days(self, step_value: i64) -> i64 {
        let value = step_value.max(1);
        match self {
            StepUnit::Day => value,
            StepUnit::Week => value * 7,
            StepUnit::Month => value * 30,
            StepUnit::Year => value * 365,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique_and_hex() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn step_unit_parses_with_month_fallback() {
        assert_eq!(StepUnit::parse_or_month("week"), StepUnit::Week);
        assert_eq!(StepUnit::parse_or_month(" YEAR "), StepUnit::Year);
        assert_eq!(StepUnit::parse_or_month("fortnight"), StepUnit::Month);
    }

    #[test]
    fn interval_days_clamps_to_one_step() {
        assert_eq!(StepUnit::Day.interval_days(0), 1);
        assert_eq!(StepUnit::Week.interval_days(2), 14);
        assert_eq!(StepUnit::Year.interval_days(1), 365);
    }
}
