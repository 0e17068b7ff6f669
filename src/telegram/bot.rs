//! Bot initialization, command list and webhook registration

use reqwest::ClientBuilder;
use teloxide::payloads::SetWebhookSetters;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, WebhookInfo};
use teloxide::utils::command::BotCommands;

use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    // Carries the deep-link payload (`VERIFY_<id>`), empty for a plain /start
    #[command(description = "start a verification from the website link")]
    Start(String),
    #[command(description = "how verification works")]
    Help,
}

impl Command {
    /// Parses a message text, accepting `/start@<this bot>` forms when the username is known.
    pub fn parse_text(text: &str) -> Option<Self> {
        let bot_name = config::BOT_USERNAME.as_deref().unwrap_or_default();
        Command::parse(text, bot_name).ok()
    }
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(AppError)` - Missing token or invalid `BOT_API_URL`
pub fn create_bot() -> AppResult<Bot> {
    if config::BOT_TOKEN.is_empty() {
        return Err(AppError::Config("BOT_TOKEN (or TELOXIDE_TOKEN) is not set".to_string()));
    }
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(config::BOT_TOKEN.as_str(), client);

    let bot = match config::BOT_API_URL.as_deref() {
        Some(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            bot.set_api_url(url::Url::parse(bot_api_url)?)
        }
        None => bot,
    };
    Ok(bot)
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(vec![
        BotCommand::new("start", "start a verification from the website link"),
        BotCommand::new("help", "how verification works"),
    ])
    .await?;
    Ok(())
}

/// Registers `WEBHOOK_URL` with Telegram, with the secret token when configured.
///
/// Only message updates are requested; nothing else is handled.
pub async fn register_webhook(bot: &Bot) -> AppResult<url::Url> {
    let raw = config::WEBHOOK_URL
        .as_deref()
        .ok_or_else(|| AppError::Config("WEBHOOK_URL is not set".to_string()))?;
    let url = url::Url::parse(raw)?;
    if url.scheme() != "https" {
        return Err(AppError::Config(format!("WEBHOOK_URL must be https, got {}", url.scheme())));
    }

    let mut request = bot
        .set_webhook(url.clone())
        .allowed_updates(vec![teloxide::types::AllowedUpdate::Message])
        .drop_pending_updates(false);
    if let Some(secret) = config::WEBHOOK_SECRET.as_deref() {
        request = request.secret_token(secret.to_string());
    }
    request.await?;

    log::info!("Webhook registered at {}", url);
    Ok(url)
}

/// Telegram's current view of the webhook.
pub async fn webhook_info(bot: &Bot) -> AppResult<WebhookInfo> {
    Ok(bot.get_webhook_info().await?)
}
