//! 编排过程事件：供 CLI / 网关展示计划、路由与执行进度

use serde::Serialize;

use crate::core::state::Phase;
use crate::executors::Capability;

/// 单轮编排过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 阶段切换
    PhaseChanged { phase: Phase },
    /// 规划器安装了新计划
    PlanInstalled { steps: Vec<String> },
    /// 一批步骤被路由（None 表示无法路由）
    StepRouted {
        steps: Vec<String>,
        executor: Option<Capability>,
    },
    /// 一批步骤执行结束（结果预览）
    StepFinished {
        steps: Vec<String>,
        success: bool,
        preview: String,
    },
    /// 重规划插入的步骤
    Replanned { steps: Vec<String> },
    /// 循环熔断
    LoopBreakerTripped { reason: String },
    /// 本轮结束
    Finished { response: String },
}

/// 结果预览，避免事件过长
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = TurnEvent::StepRouted {
            steps: vec!["Check the weather in Madrid".into()],
            executor: Some(Capability::Weather),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "step_routed");
        assert_eq!(json["executor"], "weather");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("ñandú", 3), "ñan...");
        assert_eq!(preview("ok", 10), "ok");
    }
}
