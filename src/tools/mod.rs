//! 工具层：Tool trait 与注册表、带超时的执行器，以及五个能力各自的工具集

pub mod calendar;
pub mod executor;
pub mod files;
pub mod json_store;
pub mod messaging;
pub mod registry;
pub mod schema;
pub mod tasks;
pub mod weather;

use serde_json::Value;

pub use calendar::calendar_tools;
pub use executor::ToolExecutor;
pub use files::{file_tools, SafeFs};
pub use messaging::{contact_address, messaging_tools, MailIdentity};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use tasks::task_tools;
pub use weather::{weather_tools, WeatherClient};

/// 取必填字符串参数；缺失或为空时返回错误文本
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(format!("Missing required argument '{}'", key)),
    }
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// 数字参数：接受 JSON 数字或数字字符串（LLM 常把数字写成字符串）
pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
