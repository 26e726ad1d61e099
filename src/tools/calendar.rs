//! 日程能力工具集（JSON 文件中的单一日历）
//!
//! 时间统一用本地无时区时间（NaiveDateTime），输入接受 `YYYY-MM-DD HH:MM` 或 ISO 8601。
//! find_free_slot 只在工作时间 09:00–18:00 内找空档。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tools::json_store::JsonStore;
use crate::tools::{optional_str, optional_u64, required_str, Tool, ToolRegistry};

const WORKDAY_START_HOUR: u32 = 9;
const WORKDAY_END_HOUR: u32 = 18;
const DEFAULT_EVENT_MINUTES: i64 = 60;
const DEFAULT_SEARCH_DAYS: i64 = 7;
const MAX_FREE_SLOTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    fn render(&self) -> String {
        let mut line = format!(
            "- {} | {} to {} (id: {})",
            self.summary,
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M"),
            self.id
        );
        if let Some(ref loc) = self.location {
            line.push_str(&format!(" @ {}", loc));
        }
        if !self.attendees.is_empty() {
            line.push_str(&format!(" with {}", self.attendees.join(", ")));
        }
        line
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Calendar {
    #[serde(default)]
    pub events: Vec<CalendarEvent>,
}

impl Calendar {
    /// 按 id 精确匹配，或按标题不区分大小写匹配
    fn position(&self, key: &str) -> Option<usize> {
        let key = key.trim();
        let lower = key.to_lowercase();
        self.events
            .iter()
            .position(|e| e.id == key)
            .or_else(|| self.events.iter().position(|e| e.summary.to_lowercase() == lower))
    }

    fn find(&self, key: &str) -> Result<usize, String> {
        self.position(key)
            .ok_or_else(|| format!("Event '{}' not found", key.trim()))
    }

    /// 从 now 起 days 天内、工作时间内第一批长度不小于 duration 的空档
    pub fn free_slots(
        &self,
        now: NaiveDateTime,
        duration: Duration,
        days: i64,
    ) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let mut busy: Vec<(NaiveDateTime, NaiveDateTime)> =
            self.events.iter().map(|e| (e.start, e.end)).collect();
        busy.sort();

        let mut slots = Vec::new();
        for offset in 0..days.max(1) {
            let day = now.date() + Duration::days(offset);
            let day_start = day.and_time(hour(WORKDAY_START_HOUR));
            let day_end = day.and_time(hour(WORKDAY_END_HOUR));
            let mut cursor = if offset == 0 { round_up(now.max(day_start)) } else { day_start };
            for &(start, end) in busy.iter().filter(|(s, e)| *e > day_start && *s < day_end) {
                if start > cursor && start - cursor >= duration {
                    slots.push((cursor, start));
                }
                cursor = cursor.max(end);
            }
            if cursor < day_end && day_end - cursor >= duration {
                slots.push((cursor, day_end));
            }
            if slots.len() >= MAX_FREE_SLOTS {
                break;
            }
        }
        slots.truncate(MAX_FREE_SLOTS);
        slots
    }
}

fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// 向上取整到下一个 15 分钟
fn round_up(t: NaiveDateTime) -> NaiveDateTime {
    let t = t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t);
    let rem = t.minute() % 15;
    if rem == 0 {
        t
    } else {
        t + Duration::minutes((15 - rem) as i64)
    }
}

/// 解析 `YYYY-MM-DD HH:MM`、`YYYY-MM-DDTHH:MM[:SS][Z]` 或单独日期（取 00:00）
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim().trim_end_matches('Z');
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| format!("Invalid date/time '{}', expected YYYY-MM-DD HH:MM", s))
}

pub type CalendarStore = JsonStore<Calendar>;

pub struct ListEventsTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for ListEventsTool {
    fn name(&self) -> &str {
        "list_events"
    }

    fn description(&self) -> &str {
        "List events from a date (default today) for N days (default 7). Args: {\"from\": \"optional YYYY-MM-DD\", \"days\": 7, \"query\": \"optional text\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let from = match optional_str(&args, "from") {
            Some(s) => parse_datetime(s)?.date(),
            None => Local::now().date_naive(),
        }
        .and_time(NaiveTime::MIN);
        let days = optional_u64(&args, "days").unwrap_or(DEFAULT_SEARCH_DAYS as u64) as i64;
        let until = from + Duration::days(days.max(1));
        let query = optional_str(&args, "query").map(|q| q.to_lowercase());
        Ok(self.store.read(|cal| {
            let mut hits: Vec<&CalendarEvent> = cal
                .events
                .iter()
                .filter(|e| e.end > from && e.start < until)
                .filter(|e| match &query {
                    Some(q) => e.summary.to_lowercase().contains(q),
                    None => true,
                })
                .collect();
            hits.sort_by_key(|e| e.start);
            if hits.is_empty() {
                format!("No events between {} and {}.", from.date(), until.date())
            } else {
                let lines: Vec<String> = hits.iter().map(|e| e.render()).collect();
                format!("Events:\n{}", lines.join("\n"))
            }
        }))
    }
}

pub struct GetEventTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for GetEventTool {
    fn name(&self) -> &str {
        "get_event"
    }

    fn description(&self) -> &str {
        "Show one event. Args: {\"event\": \"event id or exact title\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let key = required_str(&args, "event")?;
        self.store.read(|cal| -> Result<String, String> {
            let e = &cal.events[cal.find(key)?];
            let mut out = e.render();
            if let Some(ref d) = e.description {
                out.push_str(&format!("\nDescription: {}", d));
            }
            Ok(out)
        })
    }
}

pub struct CreateEventTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for CreateEventTool {
    fn name(&self) -> &str {
        "create_event"
    }

    fn description(&self) -> &str {
        "Create an event. Args: {\"summary\": \"title\", \"start\": \"YYYY-MM-DD HH:MM\", \"end\": \"optional YYYY-MM-DD HH:MM\", \"duration_minutes\": 60, \"location\": \"optional\", \"description\": \"optional\", \"attendees\": [\"optional emails\"]}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "start": {"type": "string"},
                "end": {"type": "string"},
                "duration_minutes": {"type": "integer"},
                "location": {"type": "string"},
                "description": {"type": "string"},
                "attendees": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["summary", "start"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let summary = required_str(&args, "summary")?;
        let start = parse_datetime(required_str(&args, "start")?)?;
        let end = match optional_str(&args, "end") {
            Some(s) => parse_datetime(s)?,
            None => {
                let minutes = optional_u64(&args, "duration_minutes")
                    .map(|m| m as i64)
                    .unwrap_or(DEFAULT_EVENT_MINUTES);
                start + Duration::minutes(minutes)
            }
        };
        if end <= start {
            return Err("Event end must be after its start".to_string());
        }
        let attendees = args
            .get("attendees")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|x| x.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let event = CalendarEvent {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            summary: summary.trim().to_string(),
            start,
            end,
            description: optional_str(&args, "description").map(String::from),
            location: optional_str(&args, "location").map(String::from),
            attendees,
        };
        tracing::info!(summary = %event.summary, start = %event.start, "create_event tool execute");
        self.store.update(|cal| {
            let msg = format!(
                "✅ Event '{}' created successfully for {} (id: {}).",
                event.summary,
                event.start.format("%Y-%m-%d %H:%M"),
                event.id
            );
            cal.events.push(event);
            Ok(msg)
        })
    }
}

pub struct UpdateEventTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for UpdateEventTool {
    fn name(&self) -> &str {
        "update_event"
    }

    fn description(&self) -> &str {
        "Update an event. Args: {\"event\": \"id or title\", \"summary\": \"optional\", \"start\": \"optional\", \"end\": \"optional\", \"location\": \"optional\", \"description\": \"optional\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let key = required_str(&args, "event")?;
        let start = optional_str(&args, "start").map(parse_datetime).transpose()?;
        let end = optional_str(&args, "end").map(parse_datetime).transpose()?;
        self.store.update(|cal| {
            let idx = cal.find(key)?;
            let e = &mut cal.events[idx];
            if let Some(s) = start {
                // 只改开始时间时保持原时长
                let length = e.end - e.start;
                e.start = s;
                if end.is_none() {
                    e.end = s + length;
                }
            }
            if let Some(t) = end {
                e.end = t;
            }
            if e.end <= e.start {
                return Err("Event end must be after its start".to_string());
            }
            if let Some(s) = optional_str(&args, "summary") {
                e.summary = s.trim().to_string();
            }
            if let Some(l) = optional_str(&args, "location") {
                e.location = Some(l.to_string());
            }
            if let Some(d) = optional_str(&args, "description") {
                e.description = Some(d.to_string());
            }
            Ok(format!("✅ Event '{}' updated successfully.", e.summary))
        })
    }
}

pub struct DeleteEventTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for DeleteEventTool {
    fn name(&self) -> &str {
        "delete_event"
    }

    fn description(&self) -> &str {
        "Delete an event. Args: {\"event\": \"id or exact title\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let key = required_str(&args, "event")?;
        self.store.update(|cal| {
            let idx = cal.find(key)?;
            let removed = cal.events.remove(idx);
            Ok(format!("✅ Event '{}' deleted successfully.", removed.summary))
        })
    }
}

pub struct FindFreeSlotTool {
    store: Arc<CalendarStore>,
}

#[async_trait]
impl Tool for FindFreeSlotTool {
    fn name(&self) -> &str {
        "find_free_slot"
    }

    fn description(&self) -> &str {
        "Find free slots within working hours (09:00-18:00). Args: {\"duration_minutes\": 60, \"days\": 7}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let minutes = optional_u64(&args, "duration_minutes").unwrap_or(DEFAULT_EVENT_MINUTES as u64);
        let days = optional_u64(&args, "days").unwrap_or(DEFAULT_SEARCH_DAYS as u64) as i64;
        let now = Local::now().naive_local();
        let slots = self
            .store
            .read(|cal| cal.free_slots(now, Duration::minutes(minutes as i64), days));
        if slots.is_empty() {
            return Ok(format!(
                "No free slots of {} minutes in the next {} days.",
                minutes, days
            ));
        }
        let lines: Vec<String> = slots
            .iter()
            .map(|(s, e)| format!("- {} to {}", s.format("%Y-%m-%d %H:%M"), e.format("%H:%M")))
            .collect();
        Ok(format!("Free slots of {} minutes:\n{}", minutes, lines.join("\n")))
    }
}

/// 日程能力的完整工具集
pub fn calendar_tools(data_file: Option<PathBuf>) -> ToolRegistry {
    let store = Arc::new(CalendarStore::open(data_file));
    let mut registry = ToolRegistry::new();
    registry.register(ListEventsTool { store: store.clone() });
    registry.register(GetEventTool { store: store.clone() });
    registry.register(CreateEventTool { store: store.clone() });
    registry.register(UpdateEventTool { store: store.clone() });
    registry.register(DeleteEventTool { store: store.clone() });
    registry.register(FindFreeSlotTool { store });
    registry
}
