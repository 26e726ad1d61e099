//! 规划层的提示模板
//!
//! 各模板的开头固定，测试脚本按 system 前缀分派回复。

use chrono::NaiveDate;

pub const PLANNER_HEADER: &str = "You are the planning module";
pub const ROUTER_HEADER: &str = "You are a router";
pub const REPLANNER_HEADER: &str = "You are updating a multi-step plan";
pub const RESPONDER_HEADER: &str = "You write the final answer";

/// 规划器的 system 提示：工具词汇 + 当前日期
pub fn planner_system(today: NaiveDate) -> String {
    format!(
        r#"{header} of a personal assistant with conversation memory.
Today's date is {today} ({weekday}).

The assistant can:
- weather: current weather, forecasts, next rain day, air quality, sunrise/sunset, clothing advice
- tasks: create, list, complete, edit, search and delete to-do tasks and subtasks
- files: search, inspect, read, upload, move and delete stored files
- messaging: list, read, send, reply, delete and label email messages
- scheduling: list, create, update and delete calendar events, find free slots

Split the user's request into a short, ordered list of concrete steps.
If the request refers to earlier messages ("that city", "the same task"), resolve the reference from the conversation history.
Answer ONLY with numbered steps, one per line, for example:
1. Get the current weather in Madrid
2. Give clothing advice for Madrid
If nothing needs to be done, answer with no numbered lines."#,
        header = PLANNER_HEADER,
        today = today.format("%Y-%m-%d"),
        weekday = today.format("%A"),
    )
}

pub fn planner_user(request: &str, context: &str) -> String {
    format!("{}\n\nUser request: {}", context, request)
}

pub fn router_system() -> String {
    format!(
        r#"{header} that decides which executor must handle a task.

EXECUTORS:
- weather: weather, forecasts, air quality, sun times, clothing advice
- tasks: to-do tasks (create, list, complete, delete, edit, search)
- files: stored files (search, read, upload, move, delete)
- messaging: email (send, read, reply, delete, labels)
- scheduling: calendar events (create, edit, delete, free slots)

EXAMPLES:
"Get the weather in Madrid" -> weather
"Crear una tarea llamada 'Reunión'" -> tasks
"Find the budget spreadsheet" -> files
"Send an email to Juan" -> messaging
"Schedule a meeting tomorrow at 10" -> scheduling

Answer ONLY with the executor name."#,
        header = ROUTER_HEADER
    )
}

pub fn router_user(step: &str, context: &str) -> String {
    format!("Conversation context:\n{}\n\nTask to route: {}", context, step)
}

pub fn replanner_system() -> String {
    format!(
        r#"{header} with conversation awareness.

Answer with EXACTLY ONE of:
1) "FINAL ANSWER: <final answer>" if the request is fully handled, or
2) "PLAN:" followed by the numbered steps that are still missing.
Do NOT repeat steps that already succeeded. Do not retry a failed step more than once unless something changed."#,
        header = REPLANNER_HEADER
    )
}

pub fn replanner_user(input_with_context: &str, plan: &str, past_steps: &str) -> String {
    format!(
        "User request: {}\n\nRemaining plan:\n{}\n\nSteps already executed:\n{}",
        input_with_context, plan, past_steps
    )
}

pub fn responder_system() -> String {
    format!(
        r#"{header} for a personal assistant.

Write a clear, direct, conversational answer to the user's request using the tool results.
Include the concrete data (temperatures, titles, dates, addresses) found in the results.
If the information could not be obtained, explain plainly what failed.
Reply in the language of the user's request. Output ONLY the answer."#,
        header = RESPONDER_HEADER
    )
}

pub fn responder_user(query: &str, tool_result: &str, steps: &str, context: &str) -> String {
    format!(
        "User request: {}\n\nTool result:\n{}\n\nExecuted steps:\n{}\n\nRecent conversation:\n{}",
        query, tool_result, steps, context
    )
}
