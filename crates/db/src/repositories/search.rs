//! Blind keyword index over encrypted ticket content.
//!
//! Ticket bodies are stored encrypted, so substring queries against them are impossible. At write
//! time each distinct word is hashed with a tenant-bound keyed BLAKE3 and only the hash is stored;
//! a search hashes the query words the same way and intersects the postings. The index never
//! returns content, only ticket ids.

use std::collections::BTreeSet;

use secrecy::{ExposeSecret, SecretString};
use sqlx::{QueryBuilder, Row, Sqlite};

use deskhand_core::domain::tenant::TenantId;
use deskhand_core::domain::ticket::TicketId;

use super::{RepositoryError, SearchGateway};
use crate::DbPool;

const KEY_CONTEXT: &str = "deskhand 2024 ticket search index v1";

/// Words shorter than this are too common to narrow a search.
const MIN_TOKEN_LEN: usize = 2;

pub struct SqlSearchIndex {
    pool: DbPool,
    key: [u8; 32],
}

impl SqlSearchIndex {
    pub fn new(pool: DbPool, index_key: &SecretString) -> Self {
        let key = blake3::derive_key(KEY_CONTEXT, index_key.expose_secret().as_bytes());
        Self { pool, key }
    }

    /// Replaces the indexed tokens for a ticket with those of `plaintext`.
    pub async fn index_ticket(
        &self,
        tenant_id: &TenantId,
        ticket_id: TicketId,
        plaintext: &str,
    ) -> Result<usize, RepositoryError> {
        let hashes: BTreeSet<String> =
            tokenize(plaintext).iter().map(|token| self.token_hash(tenant_id, token)).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ticket_search_token WHERE ticket_id = ?")
            .bind(ticket_id.0)
            .execute(&mut *tx)
            .await?;
        for hash in &hashes {
            sqlx::query(
                "INSERT INTO ticket_search_token (ticket_id, tenant_id, token_hash) VALUES (?, ?, ?)",
            )
            .bind(ticket_id.0)
            .bind(&tenant_id.0)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            event_name = "search.index.updated",
            tenant_id = %tenant_id,
            ticket_id = ticket_id.0,
            tokens = hashes.len(),
            "ticket search tokens replaced"
        );
        Ok(hashes.len())
    }

    fn token_hash(&self, tenant_id: &TenantId, token: &str) -> String {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(tenant_id.0.as_bytes());
        hasher.update(&[0]);
        hasher.update(token.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[async_trait::async_trait]
impl SearchGateway for SqlSearchIndex {
    async fn search(
        &self,
        tenant_id: &TenantId,
        term: &str,
    ) -> Result<Vec<TicketId>, RepositoryError> {
        let hashes: BTreeSet<String> =
            tokenize(term).iter().map(|token| self.token_hash(tenant_id, token)).collect();
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT ticket_id FROM ticket_search_token WHERE tenant_id = ",
        );
        builder.push_bind(tenant_id.0.clone());
        builder.push(" AND token_hash IN (");
        let mut separated = builder.separated(", ");
        for hash in &hashes {
            separated.push_bind(hash.clone());
        }
        separated.push_unseparated(")");
        builder.push(" GROUP BY ticket_id HAVING COUNT(DISTINCT token_hash) = ");
        builder.push_bind(hashes.len() as i64);
        builder.push(" ORDER BY ticket_id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("ticket_id").map(TicketId).map_err(RepositoryError::from))
            .collect()
    }
}

/// Lowercased alphanumeric words, deduplicated.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::Row;

    use deskhand_core::domain::tenant::{Tenant, TenantId};
    use deskhand_core::domain::ticket::{Ticket, TicketId, TicketStatus};

    use super::{tokenize, SqlSearchIndex};
    use crate::migrations;
    use crate::repositories::{
        RosterRepository, SearchGateway, SqlRosterRepository, SqlTicketRepository,
        TicketRepository,
    };
    use crate::{connect_with_settings, DbPool};

    async fn setup() -> (DbPool, SqlTicketRepository) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let roster = SqlRosterRepository::new(pool.clone());
        for tenant in ["acme", "globex"] {
            roster
                .save_tenant(Tenant {
                    id: TenantId(tenant.to_owned()),
                    name: tenant.to_owned(),
                    chat_team_id: None,
                    active: true,
                })
                .await
                .expect("save tenant");
        }
        (pool.clone(), SqlTicketRepository::new(pool))
    }

    async fn create(repo: &SqlTicketRepository, tenant: &str, slug: &str) -> TicketId {
        repo.create(Ticket {
            id: TicketId(0),
            tenant_id: TenantId(tenant.to_owned()),
            slug: slug.to_owned(),
            subject: slug.to_owned(),
            email_from: None,
            email_from_name: None,
            status: TicketStatus::Open,
            assigned_to: None,
            created_at: Utc::now(),
            closed_at: None,
        })
        .await
        .expect("create ticket")
        .id
    }

    #[test]
    fn tokenize_lowercases_and_drops_short_words() {
        let tokens: Vec<_> = tokenize("Refund for order #A1, refund PLEASE!").into_iter().collect();
        assert_eq!(tokens, vec!["a1", "for", "order", "please", "refund"]);
    }

    #[tokio::test]
    async fn search_requires_every_term_and_stays_in_tenant() {
        let (pool, tickets) = setup().await;
        let index = SqlSearchIndex::new(pool, &"index-key".to_owned().into());
        let acme = TenantId("acme".to_owned());
        let globex = TenantId("globex".to_owned());

        let refund = create(&tickets, "acme", "a").await;
        let refund_delay = create(&tickets, "acme", "b").await;
        let other_tenant = create(&tickets, "globex", "c").await;

        index.index_ticket(&acme, refund, "Refund request for order 42").await.expect("index");
        index
            .index_ticket(&acme, refund_delay, "Where is my refund? Shipping delay")
            .await
            .expect("index");
        index.index_ticket(&globex, other_tenant, "refund please").await.expect("index");

        let found = index.search(&acme, "refund").await.expect("search");
        assert_eq!(found, vec![refund_delay, refund]);

        let narrowed = index.search(&acme, "refund delay").await.expect("search");
        assert_eq!(narrowed, vec![refund_delay]);

        assert!(index.search(&acme, "invoice").await.expect("search").is_empty());
        assert!(index.search(&acme, "  ").await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn stored_tokens_do_not_contain_plaintext() {
        let (pool, tickets) = setup().await;
        let index = SqlSearchIndex::new(pool.clone(), &"index-key".to_owned().into());
        let acme = TenantId("acme".to_owned());
        let id = create(&tickets, "acme", "a").await;

        let written = index.index_ticket(&acme, id, "password reset").await.expect("index");
        assert_eq!(written, 2);

        let rows = sqlx::query("SELECT token_hash FROM ticket_search_token")
            .fetch_all(&pool)
            .await
            .expect("load tokens");
        for row in rows {
            let hash = row.get::<String, _>("token_hash");
            assert_eq!(hash.len(), 64);
            assert!(!hash.contains("password"));
        }
    }

    #[tokio::test]
    async fn different_index_keys_do_not_match() {
        let (pool, tickets) = setup().await;
        let writer = SqlSearchIndex::new(pool.clone(), &"index-key".to_owned().into());
        let reader = SqlSearchIndex::new(pool, &"rotated-key".to_owned().into());
        let acme = TenantId("acme".to_owned());
        let id = create(&tickets, "acme", "a").await;

        writer.index_ticket(&acme, id, "billing").await.expect("index");
        assert!(reader.search(&acme, "billing").await.expect("search").is_empty());
    }
}
