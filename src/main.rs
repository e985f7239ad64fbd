mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use handlers::{help_handler, start_handler, status_handler, text_handler, AppState};
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use vault_agent::config::Config;
use vault_agent::orchestrator::ConversationOrchestrator;
use vault_agent::pipeline::{LogCallLogger, ToolCallPipeline};
use vault_agent::providers;
use vault_agent::session::JsonSessionStore;
use vault_agent::validation::SchemaValidator;
use vault_agent::vault::FsVault;
use vault_agent::verification::Verifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_file("config.toml")?;

    // Initialize logging; RUST_LOG wins over the configured level
    let mut logger = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => logger.parse_filters(&filters),
        Err(_) => logger.parse_filters(&config.logging.level),
    };
    logger.init();
    log::info!("Starting Vault Agent Bot...");
    log::info!("Configuration loaded successfully");

    config.ensure_directories()?;
    log::info!("Vault and session directories verified");

    let model = providers::from_config(&config.ai_model)?;

    let vault = FsVault::new(&config.vault.path).with_daily_notes_folder(&config.vault.daily_notes_folder);
    let verifier = Verifier::new(Some(PathBuf::from(&config.vault.path)))
        .with_recency_window(config.verification.recency_window());
    let pipeline = ToolCallPipeline::new(Arc::new(vault))
        .with_verifier(verifier)
        .with_policy(config.verification.retry_policy())
        .with_validator(Arc::new(SchemaValidator))
        .with_logger(Arc::new(LogCallLogger));
    log::info!(
        "Write verification: {} (max_retries={}, strict_mode={})",
        config.verification.verify_writes,
        config.verification.max_retries,
        config.verification.strict_mode
    );

    let orchestrator = ConversationOrchestrator::new(model, Arc::new(pipeline), config.ai_model.temperature);
    let sessions = JsonSessionStore::new(&config.vault.sessions_dir);

    // Create bot instance
    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot.get_me().await?;
    log::info!("Bot started as @{}", me.username());

    println!("🤖 Vault Agent is running!");
    println!("   Username: @{}", me.username());
    println!("   Press Ctrl+C to stop");

    let state = Arc::new(AppState {
        config,
        orchestrator,
        sessions,
    });

    let handler = dptree::entry()
        // Handle commands
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        // Handle all other messages
        .branch(Update::filter_message().endpoint(text_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Bot stopped");
    Ok(())
}

/// Command enumeration
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Comandi disponibili:")]
enum Command {
    #[command(description = "Avvia il bot")]
    Start,
    #[command(description = "Mostra l'aiuto")]
    Help,
    #[command(description = "Mostra lo stato del bot")]
    Status,
}

/// Command handler that routes to specific command functions
async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    me: Me,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start => start_handler(bot, msg, me).await,
        Command::Help => help_handler(bot, msg).await,
        Command::Status => status_handler(bot, msg, state).await,
    }
}
