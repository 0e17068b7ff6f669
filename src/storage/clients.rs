use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::storage::{DbPool, StoreError, StoreResult};
use crate::verification::clients::{ClientApplication, ClientRegistry, ClientStatus};

/// `client_applications` table behind the [`ClientRegistry`] seam.
#[derive(Clone)]
pub struct SqliteClientRegistry {
    pool: DbPool,
}

impl SqliteClientRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a client (used by the `register-client` command).
    pub fn upsert_client(&self, client: &ClientApplication) -> StoreResult<()> {
        let conn = self.pool.get()?;
        let redirect_uris =
            serde_json::to_string(&client.redirect_uris).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        conn.execute(
            "INSERT INTO client_applications (client_id, company_name, status, redirect_uris) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(client_id) DO UPDATE SET \
                 company_name = excluded.company_name, status = excluded.status, \
                 redirect_uris = excluded.redirect_uris, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![
                client.client_id,
                client.company_name,
                client.status.as_str(),
                redirect_uris
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ClientRegistry for SqliteClientRegistry {
    async fn find_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>> {
        let pool = self.pool.clone();
        let client_id = client_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let row = conn
                .query_row(
                    "SELECT company_name, status, redirect_uris FROM client_applications WHERE client_id = ?1",
                    params![client_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((company_name, status, redirect_uris)) = row else {
                return Ok(None);
            };
            let status = status.parse::<ClientStatus>().map_err(StoreError::Corrupt)?;
            let redirect_uris: Vec<String> = serde_json::from_str(&redirect_uris)
                .map_err(|e| StoreError::Corrupt(format!("redirect_uris of {}: {}", client_id, e)))?;

            Ok(Some(ClientApplication {
                client_id,
                company_name,
                status,
                redirect_uris,
            }))
        })
        .await?
    }
}
