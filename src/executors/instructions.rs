//! 能力执行器的系统提示
//!
//! 每个提示都包含：当前日期、该能力的工具及调用示例、多工具一次完成的要求、
//! 联系人地址规则、无需二次确认的要求，以及 tool call 的 JSON 格式。

use chrono::NaiveDate;

use crate::executors::Capability;
use crate::tools::{tool_call_schema_json, ToolRegistry};

/// 每个能力的工具调用示例
fn usage_examples(capability: Capability) -> &'static str {
    match capability {
        Capability::Weather => {
            r#"{"tool": "get_weather", "args": {"location": "Madrid"}}
{"tool": "get_weekly_summary", "args": {"location": "Buenos Aires"}}
{"tool": "get_next_rain_day", "args": {"location": "Roma"}}
{"tool": "get_clothing_advice", "args": {"location": "Madrid"}}
{"tool": "get_air_quality", "args": {"location": "Santiago"}}"#
        }
        Capability::Tasks => {
            r#"{"tool": "create_task", "args": {"title": "Buy milk", "due": "2025-03-10"}}
{"tool": "list_tasks", "args": {}}
{"tool": "complete_task", "args": {"title": "Buy milk"}}
{"tool": "edit_task", "args": {"title": "Buy milk", "new_title": "Buy oat milk"}}
{"tool": "add_subtask", "args": {"parent_title": "Trip", "title": "Book hotel"}}"#
        }
        Capability::Files => {
            r#"{"tool": "search_files", "args": {"query": "report", "extension": "pdf"}}
{"tool": "get_file_metadata", "args": {"path": "reports/q1.pdf"}}
{"tool": "read_file", "args": {"path": "notes/todo.txt"}}
{"tool": "upload_file", "args": {"path": "notes/summary.txt", "content": "..."}}
{"tool": "move_file", "args": {"from": "notes/summary.txt", "to": "archive/"}}"#
        }
        Capability::Messaging => {
            r#"{"tool": "list_messages", "args": {"label": "INBOX", "query": "invoice", "max_results": 5}}
{"tool": "get_message", "args": {"id": "3f2a9c81b0d4"}}
{"tool": "send_message", "args": {"to": "Juan Pérez", "subject": "Meeting", "body": "Hi Juan, ..."}}
{"tool": "reply_message", "args": {"id": "3f2a9c81b0d4", "body": "Thanks!"}}
{"tool": "modify_labels", "args": {"id": "3f2a9c81b0d4", "remove": ["UNREAD"]}}"#
        }
        Capability::Scheduling => {
            r#"{"tool": "list_events", "args": {"from": "2025-03-10", "days": 7}}
{"tool": "create_event", "args": {"summary": "Team sync", "start": "2025-03-10 15:00", "duration_minutes": 30, "attendees": ["Juan Pérez"]}}
{"tool": "update_event", "args": {"event": "Team sync", "start": "2025-03-10 16:00"}}
{"tool": "delete_event", "args": {"event": "Team sync"}}
{"tool": "find_free_slot", "args": {"duration_minutes": 60, "days": 5}}"#
        }
    }
}

fn role_line(capability: Capability) -> &'static str {
    match capability {
        Capability::Weather => "You look up current weather, forecasts, air quality, sun times and clothing advice.",
        Capability::Tasks => "You manage the user's to-do list: create, list, complete, edit, search and delete tasks and subtasks.",
        Capability::Files => "You manage the user's stored files: search, inspect, read, upload, move and delete them.",
        Capability::Messaging => "You manage the user's email: list, read, send, reply, delete and label messages.",
        Capability::Scheduling => "You manage the user's calendar: list, create, update and delete events and find free slots.",
    }
}

/// 组装某个能力执行器的系统提示；以 "You are the {capability} agent" 开头
pub fn system_instructions(
    capability: Capability,
    tools: &ToolRegistry,
    today: NaiveDate,
    contact_domain: &str,
) -> String {
    let tool_lines: Vec<String> = tools
        .tool_descriptions()
        .into_iter()
        .map(|(name, desc)| format!("- {}: {}", name, desc))
        .collect();

    format!(
        r#"You are the {cap} agent. {role}

Today's date is {today} ({weekday}). Ignore any other date mentioned earlier in the conversation.

AVAILABLE TOOLS:
{tools}

EXAMPLES:
{examples}

HOW TO WORK:
- To call a tool, output exactly one JSON object and nothing else, matching this schema:
{schema}
- After each call you receive an "Observation:". Call the next tool, or answer in plain text (no JSON) when you are done.
- If the request has several parts (for example create three tasks, or list then delete), make all the needed tool calls in this same pass, one after another.
- Act directly when the request is unambiguous. Do not ask the user for confirmation.
- Contact addresses: for a person's full name use the first letter of the first name plus the last surname, lowercase and without accents, at @{domain} ("Juan Pérez" -> "jperez@{domain}"). Use addresses that already contain "@" as given.
- If a tool fails, say exactly what failed starting with "Error:". Never invent results.
- Your final plain-text answer must state concretely what was done and include the relevant data."#,
        cap = capability,
        role = role_line(capability),
        today = today.format("%Y-%m-%d"),
        weekday = today.format("%A"),
        tools = tool_lines.join("\n"),
        examples = usage_examples(capability),
        schema = tool_call_schema_json(),
        domain = contact_domain.trim_start_matches('@'),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::task_tools;

    #[test]
    fn test_instructions_carry_required_sections() {
        let registry = task_tools(None);
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let text = system_instructions(Capability::Tasks, &registry, date, "udesa.edu.ar");
        assert!(text.starts_with("You are the tasks agent"));
        assert!(text.contains("2025-03-10"));
        assert!(text.contains("- create_task:"));
        assert!(text.contains("jperez@udesa.edu.ar"));
        assert!(text.contains("Do not ask the user for confirmation"));
        assert!(text.contains("same pass"));
    }
}
