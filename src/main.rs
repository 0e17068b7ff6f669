use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::signal;
use tokio::time::sleep;

use televerify::cli::{Cli, Commands};
use televerify::core::retry::Retryable;
use televerify::core::web_server::{start_web_server, WebState};
use televerify::core::{config, init_logger, log_startup_configuration, metrics};
use televerify::storage::{
    create_pool, AttemptStore, InMemoryAttemptStore, SqliteAttemptStore, SqliteClientRegistry,
};
use televerify::telegram::bot::{register_webhook, setup_bot_commands, webhook_info};
use televerify::telegram::{create_bot, schema, HandlerDeps, TelegramTransport};
use televerify::verification::{
    AttemptManager, ChannelLinker, ClientApplication, ClientStatus, RedemptionGateway, VerificationPolicy,
};

/// Main entry point
///
/// Parses CLI arguments and dispatches to the matching subcommand; with no
/// subcommand the service runs in webhook mode.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present (before any config is read)
    let _ = dotenv();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run { polling, ephemeral }) => {
            log::info!("Running service (polling: {}, ephemeral: {})", polling, ephemeral);
            run_service(polling, ephemeral).await
        }
        Some(Commands::SetWebhook) => run_set_webhook().await,
        Some(Commands::WebhookInfo) => run_webhook_info().await,
        Some(Commands::RegisterClient {
            client_id,
            company_name,
            redirect_uris,
            disabled,
        }) => run_register_client(client_id, company_name, redirect_uris, disabled),
        None => {
            log::info!("No command specified, running service in webhook mode");
            run_service(false, false).await
        }
    }
}

/// Runs the HTTP API, plus the polling dispatcher when asked to.
async fn run_service(polling: bool, ephemeral: bool) -> Result<()> {
    let started = std::time::Instant::now();
    metrics::init_metrics();
    log_startup_configuration();

    let db_pool = create_pool(&config::DATABASE_PATH)?;
    let attempts: Arc<dyn AttemptStore> = if ephemeral {
        log::warn!("Ephemeral mode: attempts are kept in memory and lost on restart");
        Arc::new(InMemoryAttemptStore::new())
    } else {
        Arc::new(SqliteAttemptStore::new(db_pool.clone()))
    };
    let clients = Arc::new(SqliteClientRegistry::new(db_pool));

    let bot = create_bot()?;
    wait_for_bot_api(&bot).await?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let manager = AttemptManager::new(attempts, VerificationPolicy::default());
    let linker = ChannelLinker::new(manager.clone(), Arc::new(TelegramTransport::new(bot.clone())));
    let gateway = RedemptionGateway::new(manager.clone(), clients);
    let deps = HandlerDeps::new(linker);
    let state = WebState::new(manager, gateway, deps.clone());

    if !polling && config::WEBHOOK_URL.is_some() {
        match register_webhook(&bot).await {
            Ok(url) => log::info!("Webhook registered: {}", url),
            Err(e) => log::error!("Failed to register webhook: {}", e),
        }
    }

    log::info!("Startup finished in {:?}", started.elapsed());

    let web = tokio::spawn(async move {
        if let Err(e) = start_web_server(*config::WEB_PORT, state).await {
            log::error!("Web server stopped: {}", e);
        }
    });

    if polling {
        // getUpdates is refused while a webhook is set
        bot.delete_webhook().await?;
        let listener = Polling::builder(bot.clone()).drop_pending_updates().build();
        log::info!("Receiving updates by long polling");
        Dispatcher::builder(bot, schema(deps))
            .enable_ctrlc_handler()
            .build()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
        web.abort();
    } else {
        tokio::select! {
            _ = signal::ctrl_c() => log::info!("Received Ctrl+C, shutting down"),
            result = web => {
                if let Err(e) = result {
                    log::error!("Web server task failed: {}", e);
                }
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits until the Bot API answers getMe; a self-hosted Bot API may still be starting.
async fn wait_for_bot_api(bot: &Bot) -> Result<()> {
    let mut attempt = 0;
    loop {
        match bot.get_me().await {
            Ok(me) => {
                log::info!("Bot username: {:?}, Bot ID: {}", me.username, me.id);
                if let (Some(configured), Some(actual)) = (config::BOT_USERNAME.as_deref(), me.username.as_deref()) {
                    if configured != actual {
                        log::warn!("BOT_USERNAME is {} but the token belongs to {}", configured, actual);
                    }
                }
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                if attempt >= config::retry::MAX_STARTUP_RETRIES || !e.is_retryable() {
                    return Err(anyhow::anyhow!(
                        "Failed to connect to Bot API after {} attempts: {}",
                        attempt,
                        e
                    ));
                }
                log::warn!(
                    "Bot API not ready (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    config::retry::MAX_STARTUP_RETRIES,
                    e,
                    config::retry::startup_delay()
                );
                sleep(config::retry::startup_delay()).await;
            }
        }
    }
}

async fn run_set_webhook() -> Result<()> {
    let bot = create_bot()?;
    let url = register_webhook(&bot).await?;
    println!("Webhook set to {}", url);
    Ok(())
}

async fn run_webhook_info() -> Result<()> {
    let bot = create_bot()?;
    let info = webhook_info(&bot).await?;
    match &info.url {
        Some(url) => println!("URL: {}", url),
        None => println!("URL: (none, polling mode)"),
    }
    println!("Pending updates: {}", info.pending_update_count);
    if let Some(message) = &info.last_error_message {
        println!("Last error: {}", message);
    }
    Ok(())
}

fn run_register_client(client_id: String, company_name: String, redirect_uris: Vec<String>, disabled: bool) -> Result<()> {
    for uri in &redirect_uris {
        url::Url::parse(uri).map_err(|e| anyhow::anyhow!("Invalid redirect URI {}: {}", uri, e))?;
    }

    let pool = create_pool(&config::DATABASE_PATH)?;
    let registry = SqliteClientRegistry::new(pool);
    let client = ClientApplication {
        client_id,
        company_name,
        status: if disabled { ClientStatus::Disabled } else { ClientStatus::Active },
        redirect_uris,
    };
    registry.upsert_client(&client)?;
    println!(
        "Client {} ({}) saved as {}",
        client.client_id, client.company_name, client.status
    );
    Ok(())
}
