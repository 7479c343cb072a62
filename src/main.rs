use std::io::Write;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use colored::*;

use streamchat::app::App;
use streamchat::tui::{self, EventHandler, Tui};
use streamchat::{handler, logging, ui};
use streamchat::{ChatRole, Config, HttpChatClient, Session};

#[derive(Parser)]
#[command(name = "streamchat")]
#[command(about = "Terminal chat client for a streaming text-generation backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Chat endpoint URL (overrides config and STREAMCHAT_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Fail the reply on malformed UTF-8 instead of substituting U+FFFD
    #[arg(long, global = true)]
    strict_utf8: bool,

    /// Write the effective settings back to the config file
    #[arg(long, global = true)]
    save_config: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one message and stream the reply to stdout
    Ask {
        /// Your message
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Check that the backend is up
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_env();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
    }
    if cli.strict_utf8 {
        config.strict_utf8 = true;
    }
    if cli.save_config {
        config.save()?;
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&config).await,
        Commands::Ask { message } => ask(&config, &message.join(" ")).await,
        Commands::Health => health(&config).await,
    }
}

async fn run_chat(config: &Config) -> Result<()> {
    logging::init_file(&config.log_file()?)?;
    let client = HttpChatClient::from_config(config)?;
    tracing::info!(endpoint = client.endpoint(), "Starting chat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(config, client, events.sender());

    let result = event_loop(&mut terminal, &mut app, &mut events).await;

    // Tear down any reply still streaming before leaving the screen
    app.cancel_reply();
    tui::restore()?;
    result
}

async fn event_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        app.sync_scroll();
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

async fn ask(config: &Config, message: &str) -> Result<()> {
    logging::init_stderr()?;
    let client = HttpChatClient::from_config(config)?;
    let mut session = Session::with_decode_mode(config.decode_mode());

    print!("{} ", format!("{}:", config.bot_name()).bold().magenta());
    std::io::stdout().flush()?;

    // Replies only ever grow, so print whatever is past what we printed last
    let mut printed = 0;
    let result = session
        .send(&client, message, |session| {
            if let Some(last) = session.conversation().last() {
                if last.role == ChatRole::Assistant && last.content.len() > printed {
                    print!("{}", &last.content[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = last.content.len();
                }
            }
        })
        .await;
    println!();

    result.map_err(|e| anyhow!("{}", e))
}

async fn health(config: &Config) -> Result<()> {
    logging::init_stderr()?;
    let client = HttpChatClient::from_config(config)?;

    println!("Checking {}...", client.endpoint().cyan());
    match client.health().await {
        Ok(status) if status == "ok" => {
            println!("{} Backend is up (status: {})", "✅".green(), status.bold());
            Ok(())
        }
        Ok(status) => Err(anyhow!("Backend reported status: {}", status)),
        Err(e) => {
            println!("{}: {}", "Error contacting backend".red(), e);
            println!("Make sure the chat backend is running at {}", client.endpoint().bold());
            Err(e.into())
        }
    }
}
