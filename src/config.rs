//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONDUCTOR__*` 覆盖（双下划线表示嵌套，如 `CONDUCTOR__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [app] 段：应用名、会话记忆文件、工作目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话日志文件（JSON：{"sessions": {id: [Message...]}}）
    #[serde(default = "default_memory_file")]
    pub memory_file: PathBuf,
    /// 工作目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            memory_file: default_memory_file(),
            workspace_root: None,
        }
    }
}

fn default_memory_file() -> PathBuf {
    PathBuf::from("conversation_memory.json")
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

/// [orchestrator] 段：上下文窗口、批量执行、循环熔断阈值、整轮超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_planning_context")]
    pub planning_context_messages: usize,
    #[serde(default = "default_replanning_context")]
    pub replanning_context_messages: usize,
    #[serde(default = "default_routing_context")]
    pub routing_context_messages: usize,
    #[serde(default = "default_responder_context")]
    pub responder_context_messages: usize,
    /// 附加到执行器任务文本中的上下文消息数
    #[serde(default = "default_executor_context")]
    pub executor_context_messages: usize,
    /// 单批最多执行的互补步骤数
    #[serde(default = "default_max_batch_steps")]
    pub max_batch_steps: usize,
    /// 「最近两次及以上全部失败」的步骤数达到此值即熔断
    #[serde(default = "default_max_repeated_failures")]
    pub max_repeated_failures: usize,
    /// 同一步骤累计失败次数上限
    #[serde(default = "default_max_step_failures")]
    pub max_step_failures: usize,
    /// 同一步骤重复成功次数上限（重复做已完成的工作）
    #[serde(default = "default_max_repeated_successes")]
    pub max_repeated_successes: usize,
    /// 单轮执行尝试总数上限
    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: usize,
    /// 单轮对话的外层超时（秒），超时后返回固定致歉语
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            planning_context_messages: default_planning_context(),
            replanning_context_messages: default_replanning_context(),
            routing_context_messages: default_routing_context(),
            responder_context_messages: default_responder_context(),
            executor_context_messages: default_executor_context(),
            max_batch_steps: default_max_batch_steps(),
            max_repeated_failures: default_max_repeated_failures(),
            max_step_failures: default_max_step_failures(),
            max_repeated_successes: default_max_repeated_successes(),
            max_total_attempts: default_max_total_attempts(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

fn default_planning_context() -> usize {
    10
}

fn default_replanning_context() -> usize {
    5
}

fn default_routing_context() -> usize {
    3
}

fn default_responder_context() -> usize {
    5
}

fn default_executor_context() -> usize {
    5
}

fn default_max_batch_steps() -> usize {
    3
}

fn default_max_repeated_failures() -> usize {
    5
}

fn default_max_step_failures() -> usize {
    5
}

fn default_max_repeated_successes() -> usize {
    3
}

fn default_max_total_attempts() -> usize {
    25
}

fn default_turn_timeout_secs() -> u64 {
    120
}

/// [executor] 段：能力执行器的迭代与时间上限
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_secs: default_executor_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}

fn default_executor_timeout_secs() -> u64 {
    30
}

/// [tools] 段：工具超时与各能力后端
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 文件能力的沙箱根目录，未设置时用 workspace/files
    pub files_root: Option<PathBuf>,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub messaging: MessagingSection,
    #[serde(default)]
    pub tasks: TasksSection,
    #[serde(default)]
    pub calendar: CalendarSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            files_root: None,
            weather: WeatherSection::default(),
            messaging: MessagingSection::default(),
            tasks: TasksSection::default(),
            calendar: CalendarSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    20
}

/// [tools.weather] 段：OpenWeather API
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSection {
    /// 未设置时读取环境变量 OPENWEATHER_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            api_key: None,
            units: default_units(),
            lang: default_lang(),
            timeout_secs: default_weather_timeout_secs(),
        }
    }
}

fn default_units() -> String {
    "metric".to_string()
}

fn default_lang() -> String {
    "es".to_string()
}

fn default_weather_timeout_secs() -> u64 {
    15
}

/// [tools.messaging] 段：联系人邮箱域名与发件人
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingSection {
    #[serde(default = "default_contact_domain")]
    pub contact_domain: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    pub data_file: Option<PathBuf>,
}

impl Default for MessagingSection {
    fn default() -> Self {
        Self {
            contact_domain: default_contact_domain(),
            sender: default_sender(),
            data_file: None,
        }
    }
}

fn default_contact_domain() -> String {
    "udesa.edu.ar".to_string()
}

fn default_sender() -> String {
    "me@udesa.edu.ar".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TasksSection {
    pub data_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalendarSection {
    pub data_file: Option<PathBuf>,
}

impl AppConfig {
    /// 工作目录：配置 > 当前目录下的 workspace
    pub fn workspace(&self) -> PathBuf {
        self.app.workspace_root.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("workspace")
        })
    }
}

/// 从 config 目录加载配置，环境变量 CONDUCTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONDUCTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONDUCTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_ceilings() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.executor.max_iterations, 5);
        assert_eq!(cfg.executor.timeout_secs, 30);
        assert_eq!(cfg.orchestrator.max_repeated_failures, 5);
        assert_eq!(cfg.orchestrator.max_repeated_successes, 3);
        assert_eq!(cfg.orchestrator.turn_timeout_secs, 120);
        assert_eq!(cfg.app.memory_file, PathBuf::from("conversation_memory.json"));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[orchestrator]\nmax_batch_steps = 2\n\n[tools.messaging]\ncontact_domain = \"example.org\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.orchestrator.max_batch_steps, 2);
        assert_eq!(cfg.orchestrator.max_total_attempts, 25);
        assert_eq!(cfg.tools.messaging.contact_domain, "example.org");
    }
}
