//! Test fixtures for end-to-end verification flows
//!
//! `TestEnvironment` wires the real manager, linker and gateway to either
//! the in-memory store or a throwaway SQLite file, with a
//! [`RecordingTransport`] standing in for Telegram.

#![allow(dead_code)]

use regex::Regex;
use std::sync::Arc;
use tempfile::TempDir;

use televerify::storage::{
    create_pool, AttemptStore, InMemoryAttemptStore, InMemoryClientRegistry, SqliteAttemptStore,
    SqliteClientRegistry,
};
use televerify::telegram::HandlerDeps;
use televerify::testing::{Outbound, RecordingTransport};
use televerify::verification::{
    AttemptId, AttemptManager, AttemptStatus, ChannelId, ChannelLinker, ClientApplication, ClientRegistry,
    ClientStatus, LinkOutcome, RedeemOutcome, RedemptionGateway, VerificationAttempt, VerificationPolicy,
};

pub const CLIENT_ID: &str = "acme";
pub const REDIRECT_URL: &str = "https://acme.example/verified";

/// Complete test environment
///
/// # Example
/// ```ignore
/// let env = TestEnvironment::new();
/// let attempt = env.start("+251911223344").await;
/// env.open_link(7001, &attempt.id).await;
/// env.share_own(7001, "251911223344").await;
/// let code = env.last_code(7001).unwrap();
/// ```
pub struct TestEnvironment {
    pub store: Arc<dyn AttemptStore>,
    pub manager: AttemptManager,
    pub transport: Arc<RecordingTransport>,
    pub linker: ChannelLinker,
    pub gateway: RedemptionGateway,
    /// Keeps the SQLite file alive for the environment's lifetime
    _db_dir: Option<TempDir>,
}

fn acme() -> ClientApplication {
    ClientApplication {
        client_id: CLIENT_ID.to_string(),
        company_name: "Acme Inc".to_string(),
        status: ClientStatus::Active,
        redirect_uris: vec![REDIRECT_URL.to_string()],
    }
}

impl TestEnvironment {
    /// In-memory stores with the default policy.
    pub fn new() -> Self {
        Self::with_policy(VerificationPolicy::default())
    }

    pub fn with_policy(policy: VerificationPolicy) -> Self {
        let clients = InMemoryClientRegistry::new().with_client(acme());
        Self::assemble(Arc::new(InMemoryAttemptStore::new()), Arc::new(clients), policy, None)
    }

    /// In-memory client registry around a caller-supplied attempt store.
    pub fn with_store(store: Arc<dyn AttemptStore>) -> Self {
        let clients = InMemoryClientRegistry::new().with_client(acme());
        Self::assemble(store, Arc::new(clients), VerificationPolicy::default(), None)
    }

    /// SQLite-backed stores in a temporary directory.
    pub fn sqlite() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("televerify.sqlite");
        let pool = create_pool(&path.to_string_lossy())?;

        let clients = SqliteClientRegistry::new(pool.clone());
        clients.upsert_client(&acme())?;

        Ok(Self::assemble(
            Arc::new(SqliteAttemptStore::new(pool)),
            Arc::new(clients),
            VerificationPolicy::default(),
            Some(dir),
        ))
    }

    fn assemble(
        store: Arc<dyn AttemptStore>,
        clients: Arc<dyn ClientRegistry>,
        policy: VerificationPolicy,
        db_dir: Option<TempDir>,
    ) -> Self {
        let manager = AttemptManager::new(store.clone(), policy);
        let transport = Arc::new(RecordingTransport::new());
        let linker = ChannelLinker::new(manager.clone(), transport.clone());
        let gateway = RedemptionGateway::new(manager.clone(), clients);
        Self {
            store,
            manager,
            transport,
            linker,
            gateway,
            _db_dir: db_dir,
        }
    }

    pub fn handlers(&self) -> HandlerDeps {
        HandlerDeps::new(self.linker.clone())
    }

    pub async fn start(&self, phone: &str) -> VerificationAttempt {
        self.manager.start_attempt(CLIENT_ID, phone).await.unwrap()
    }

    /// `/start VERIFY_<id>` from `chat`.
    pub async fn open_link(&self, chat: i64, id: &AttemptId) -> LinkOutcome {
        self.linker
            .handle_entry(ChannelId(chat), &format!("VERIFY_{}", id))
            .await
            .unwrap()
    }

    /// `chat` shares its own contact card.
    pub async fn share_own(&self, chat: i64, phone: &str) -> LinkOutcome {
        self.linker
            .handle_phone_assertion(ChannelId(chat), chat, Some(chat), phone)
            .await
            .unwrap()
    }

    pub async fn redeem(&self, id: &AttemptId, code: &str) -> RedeemOutcome {
        self.gateway.redeem(id, code).await.unwrap()
    }

    pub async fn status(&self, id: &AttemptId) -> AttemptStatus {
        self.manager.get_attempt(id).await.unwrap().status
    }

    /// Code from the most recent code message sent to `chat`.
    pub fn last_code(&self, chat: i64) -> Option<String> {
        let pattern = Regex::new(r"is: (\d{6})").unwrap();
        self.transport
            .messages_to(ChannelId(chat))
            .iter()
            .rev()
            .find_map(|message| match message {
                Outbound::Code(text) => pattern.captures(text).map(|caps| caps[1].to_string()),
                _ => None,
            })
    }

    /// A well-formed code guaranteed to differ from `code`.
    pub fn wrong_code(code: &str) -> String {
        if code == "000000" {
            "111111".to_string()
        } else {
            "000000".to_string()
        }
    }
}
