//! 任务路由：步骤 -> 能力执行器
//!
//! 先让 LLM 在封闭的能力名集合中分类；LLM 失败或回答不在集合内时，
//! 按 weather > tasks > files > messaging > scheduling 的优先级做关键词扫描。
//! 关键词也不命中时返回 Unroutable，由编排层请用户澄清。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::executors::Capability;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::planning::prompts;

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "route", content = "capability", rename_all = "snake_case")]
pub enum Route {
    Capability(Capability),
    Unroutable,
}

impl Route {
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Route::Capability(c) => Some(*c),
            Route::Unroutable => None,
        }
    }
}

fn keywords(capability: Capability) -> &'static [&'static str] {
    match capability {
        Capability::Weather => &[
            "weather", "forecast", "temperature", "rain", "umbrella", "sunrise", "sunset",
            "air quality", "humidity", "clima", "tiempo", "temperatura", "lluvia", "pronóstico",
            "pronostico", "amanecer", "atardecer", "calidad del aire",
        ],
        Capability::Tasks => &[
            "task", "to-do", "subtask", "tarea", "subtarea", "pendiente",
        ],
        Capability::Files => &[
            "file", "folder", "document", "drive", "upload", "download", "archivo", "carpeta",
            "documento", "subir", "descargar",
        ],
        Capability::Messaging => &[
            "email", "e-mail", "mail", "inbox", "message", "reply", "correo", "gmail", "mensaje",
            "responder", "bandeja",
        ],
        Capability::Scheduling => &[
            "calendar", "event", "meeting", "appointment", "schedule", "free slot", "evento",
            "calendario", "reunión", "reunion", "cita", "agenda",
        ],
    }
}

static KEYWORD_RES: OnceLock<Vec<(Capability, Regex)>> = OnceLock::new();

/// 每个能力一条整词正则，允许 s/es 复数；"train" 不命中 "rain"
fn keyword_patterns() -> &'static [(Capability, Regex)] {
    KEYWORD_RES.get_or_init(|| {
        Capability::ALL
            .into_iter()
            .map(|cap| {
                let alternatives = keywords(cap)
                    .iter()
                    .map(|kw| regex::escape(kw))
                    .collect::<Vec<_>>()
                    .join("|");
                let re = Regex::new(&format!(r"\b(?:{})(?:s|es)?\b", alternatives)).unwrap();
                (cap, re)
            })
            .collect()
    })
}

/// 确定性关键词路由；不命中返回 None
pub fn keyword_route(step: &str) -> Option<Capability> {
    let text = step.to_lowercase();
    keyword_patterns()
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(cap, _)| *cap)
}

/// 解析 LLM 的分类回答（接受 "weather_executor"、"**tasks**" 等写法）
pub fn parse_route_answer(answer: &str) -> Option<Capability> {
    let cleaned = answer.trim().to_lowercase();
    let first_line = cleaned.lines().next().unwrap_or("");
    let candidate = first_line
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .trim_end_matches("_executor");
    Capability::parse(candidate)
}

pub struct Router {
    llm: Arc<dyn LlmClient>,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn route(&self, step: &str, context: &str) -> Route {
        let messages = vec![
            Message::system(prompts::router_system()),
            Message::user(prompts::router_user(step, context)),
        ];
        match self.llm.complete(&messages).await {
            Ok(answer) => {
                if let Some(cap) = parse_route_answer(&answer) {
                    tracing::info!(step = %step, executor = %cap, source = "llm", "step routed");
                    return Route::Capability(cap);
                }
                tracing::warn!(step = %step, answer = %answer, "router answer outside capability set, using keywords");
            }
            Err(e) => {
                tracing::warn!(step = %step, error = %e, "router LLM failed, using keywords");
            }
        }

        match keyword_route(step) {
            Some(cap) => {
                tracing::info!(step = %step, executor = %cap, source = "keywords", "step routed");
                Route::Capability(cap)
            }
            None => {
                tracing::warn!(step = %step, "step could not be routed");
                Route::Unroutable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FnLlmClient, MockLlmClient};

    #[tokio::test]
    async fn test_keyword_fallback_without_llm() {
        let router = Router::new(Arc::new(MockLlmClient));
        assert_eq!(
            router.route("¿clima en Roma?", "").await,
            Route::Capability(Capability::Weather)
        );
        assert_eq!(
            router.route("crear tarea X", "").await,
            Route::Capability(Capability::Tasks)
        );
        assert_eq!(router.route("tell me a joke", "").await, Route::Unroutable);
    }

    #[test]
    fn test_keyword_priority() {
        // weather 优先于 messaging
        assert_eq!(
            keyword_route("Email Ana the weather forecast"),
            Some(Capability::Weather)
        );
        assert_eq!(keyword_route("Schedule a meeting with Bob"), Some(Capability::Scheduling));
        assert_eq!(keyword_route("Upload the file notes.txt"), Some(Capability::Files));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert_eq!(
            keyword_route("Create task: buy train tickets"),
            Some(Capability::Tasks)
        );
        assert_eq!(keyword_route("Will it rain tomorrow?"), Some(Capability::Weather));
        assert_eq!(keyword_route("Update my profile picture"), None);
        assert_eq!(keyword_route("How to prevent burnout"), None);
        assert_eq!(keyword_route("Solicitar vacaciones"), None);
        // 复数形式
        assert_eq!(keyword_route("List my upcoming meetings"), Some(Capability::Scheduling));
        assert_eq!(keyword_route("Mostrar mis tareas"), Some(Capability::Tasks));
        assert_eq!(keyword_route("¿Tengo reuniones hoy?"), Some(Capability::Scheduling));
    }

    #[test]
    fn test_parse_route_answer() {
        assert_eq!(parse_route_answer("weather_executor"), Some(Capability::Weather));
        assert_eq!(parse_route_answer("**Tasks**\n"), Some(Capability::Tasks));
        assert_eq!(parse_route_answer("drive_executor"), Some(Capability::Files));
        assert_eq!(parse_route_answer("I think banking"), None);
    }

    #[tokio::test]
    async fn test_llm_answer_outside_set_falls_back() {
        let router = Router::new(Arc::new(FnLlmClient::new(|_| Ok("banking".to_string()))));
        assert_eq!(
            router.route("Send an email to Ana", "").await,
            Route::Capability(Capability::Messaging)
        );
        let router = Router::new(Arc::new(FnLlmClient::new(|_| Ok("scheduling".to_string()))));
        assert_eq!(
            router.route("anything", "").await,
            Route::Capability(Capability::Scheduling)
        );
    }
}
