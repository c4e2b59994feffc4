//! Typed records for the shared household document
//!
//! Field names follow the document's camelCase wire form so records
//! round-trip through the CRDT unchanged. Every record carries a globally
//! unique id assigned at creation; ids are never reused.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as Unix milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fresh record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Family member profile (per-field last-writer-wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub xp: i64,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub streaks: i64,
}

fn default_level() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoreStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chore {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub points: i64,
    pub status: ChoreStatus,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub last_completed_by: Option<String>,
    #[serde(default)]
    pub last_completed_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub assignee: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub added_by: Option<String>,
    pub created_at: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// How a recurring series terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecurrenceEnd {
    Never,
    /// Last permitted instance timestamp (Unix millis, inclusive)
    Until { until: i64 },
    /// Fixed number of instances counted from the series start
    Count { count: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Weekly only. 0 = Sunday .. 6 = Saturday; empty means the start weekday.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default = "default_end")]
    pub end: RecurrenceEnd,
}

fn default_interval() -> u32 {
    1
}
fn default_end() -> RecurrenceEnd {
    RecurrenceEnd::Never
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    /// Start of the first (or only) instance, Unix millis
    pub start: i64,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    /// Instance timestamps detached from the series
    #[serde(default)]
    pub exceptions: Vec<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessEntry {
    pub id: String,
    pub user_id: String,
    /// 1 (rough) .. 5 (great)
    pub mood: i64,
    #[serde(default)]
    pub note: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: i64,
}
