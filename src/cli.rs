use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "televerify")]
#[command(author, version, about = "Phone number verification through a Telegram bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the bot
    Run {
        /// Receive Telegram updates by long polling instead of the webhook route
        #[arg(long)]
        polling: bool,

        /// Keep attempts and sessions in memory only (nothing survives a restart)
        #[arg(long)]
        ephemeral: bool,
    },

    /// Register WEBHOOK_URL with Telegram
    SetWebhook,

    /// Print the webhook Telegram currently has on file
    WebhookInfo,

    /// Create or update a client application
    RegisterClient {
        /// Identifier the website sends as `clientId`
        #[arg(long)]
        client_id: String,

        /// Display name
        #[arg(long)]
        company_name: String,

        /// Where users go after a successful verification (first one wins)
        #[arg(long = "redirect-uri")]
        redirect_uris: Vec<String>,

        /// Register the client as disabled
        #[arg(long)]
        disabled: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
