//! Conductor 命令行 REPL
//!
//! 每行输入跑一轮编排。用法：
//!   conductor [--session <key>] [--config <path>]
//! 未指定 --session 时每次启动新建会话；指定时同一 key 复用同一会话。
//! 内置命令：/history、/sessions、/clear、/quit

use std::path::PathBuf;

use clap::Parser;
use conductor::agent::{session_id_for, Conductor};
use conductor::config::{load_config, AppConfig};
use conductor::core::TurnEvent;
use conductor::observability;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Conversational plan / execute / replan assistant", long_about = None)]
struct Args {
    /// Session key; the same key always resumes the same conversation
    #[arg(long)]
    session: Option<String>,

    /// Extra config file layered over config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

/// 进度事件打印到 stderr，不干扰回复输出
fn print_event(ev: &TurnEvent) {
    match ev {
        TurnEvent::PlanInstalled { steps } => {
            eprintln!("  plan:");
            for (i, s) in steps.iter().enumerate() {
                eprintln!("    {}. {}", i + 1, s);
            }
        }
        TurnEvent::StepRouted { steps, executor } => {
            let target = executor.map(|c| c.as_str()).unwrap_or("unroutable");
            eprintln!("  -> [{}] {}", target, steps.join(" | "));
        }
        TurnEvent::StepFinished { success, .. } => {
            eprintln!("     {}", if *success { "ok" } else { "failed" });
        }
        TurnEvent::Replanned { steps } => eprintln!("  + replanned: {}", steps.join(" | ")),
        TurnEvent::LoopBreakerTripped { reason } => eprintln!("  ! stopped: {}", reason),
        TurnEvent::PhaseChanged { .. } | TurnEvent::Finished { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let conductor = Conductor::from_config(&cfg).with_event_tx(event_tx);
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(&ev);
        }
    });

    let session_id = match args.session {
        Some(ref key) => conductor.memory().get_or_create(&session_id_for(key)),
        None => conductor.memory().create_session(),
    };
    println!("Conductor ready (session {}). Type /quit to exit.", session_id);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                conductor.memory().clear_session(&session_id);
                println!("Session cleared.");
            }
            "/history" => {
                for m in conductor.memory().recent(&session_id, 20) {
                    println!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.role.display_name(), m.content);
                }
            }
            "/sessions" => {
                for id in conductor.memory().list_sessions() {
                    if let Some(s) = conductor.memory().session_summary(&id) {
                        println!(
                            "{}  {} messages  {}",
                            s.session_id,
                            s.message_count,
                            s.first_user_message.unwrap_or_default()
                        );
                    }
                }
            }
            _ => {
                let reply = conductor.handle_session(&session_id, input).await;
                println!("{}\n", reply);
            }
        }
    }
    Ok(())
}
