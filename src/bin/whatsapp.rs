//! Conductor WhatsApp 服务
//!
//! 通过 WhatsApp Cloud API 与编排器对话。
//!
//! 环境变量:
//! - WHATSAPP_ACCESS_TOKEN: Meta WhatsApp API 访问令牌
//! - WHATSAPP_PHONE_NUMBER_ID: 企业电话号码 ID
//! - WHATSAPP_VERIFY_TOKEN: Webhook 验证令牌 (默认 "conductor")
//! - WHATSAPP_PORT: 监听端口 (默认 3000)
//! - DEEPSEEK_API_KEY 或 OPENAI_API_KEY: LLM API Key
//!
//! 启动: cargo run --bin conductor-whatsapp --features whatsapp

#[cfg(feature = "whatsapp")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use conductor::agent::Conductor;
    use conductor::config::{load_config, AppConfig};
    use conductor::integrations::whatsapp::{create_router, WhatsappState};

    conductor::observability::init();

    let access_token =
        std::env::var("WHATSAPP_ACCESS_TOKEN").context("WHATSAPP_ACCESS_TOKEN must be set")?;
    let phone_number_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID")
        .context("WHATSAPP_PHONE_NUMBER_ID must be set")?;
    let verify_token =
        std::env::var("WHATSAPP_VERIFY_TOKEN").unwrap_or_else(|_| "conductor".to_string());
    let port: u16 = std::env::var("WHATSAPP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let state = Arc::new(WhatsappState {
        conductor: Arc::new(Conductor::from_config(&cfg)),
        access_token,
        phone_number_id,
        verify_token,
        http: reqwest::Client::new(),
    });

    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Conductor WhatsApp server listening on http://{}", addr);
    tracing::info!("Webhook URL: http://YOUR_HOST:{}/webhook", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(not(feature = "whatsapp"))]
fn main() {
    eprintln!("请使用 --features whatsapp 编译: cargo run --bin conductor-whatsapp --features whatsapp");
    std::process::exit(1);
}
