use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};

use deskhand_core::domain::operator::OperatorId;
use deskhand_core::domain::tenant::TenantId;
use deskhand_core::domain::ticket::{Ticket, TicketId, TicketScope, TicketStats, TicketStatus};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError, TicketRepository,
};
use crate::DbPool;

const TICKET_COLUMNS: &str = "id, tenant_id, slug, subject, email_from, email_from_name, status, \
                              assigned_to, created_at, closed_at";

pub struct SqlTicketRepository {
    pool: DbPool,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TicketRepository for SqlTicketRepository {
    async fn find_matching(&self, scope: &TicketScope) -> Result<Vec<Ticket>, RepositoryError> {
        if scope.is_trivially_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT ");
        builder.push(TICKET_COLUMNS);
        builder.push(" FROM ticket WHERE tenant_id = ");
        builder.push_bind(scope.tenant_id.0.clone());
        builder.push(" AND status = ");
        builder.push_bind(scope.status.as_str());

        if let Some(cutoff) = scope.created_before {
            builder.push(" AND created_at < ");
            builder.push_bind(format_timestamp(cutoff));
        }

        if let Some(ids) = &scope.ids {
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(id.0);
            }
            separated.push_unseparated(")");
        }

        builder.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = scope.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn assign(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let ticket = load_ticket(&mut *tx, tenant_id, id).await?;
        ticket.ensure_mutable(TicketStatus::Open)?;

        let now = Utc::now();
        sqlx::query("UPDATE ticket SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(&operator.0)
            .bind(format_timestamp(now))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        append_event(
            &mut *tx,
            id,
            operator,
            "assigned",
            json!({ "note": note, "previous_assignee": ticket.assigned_to.map(|op| op.0) }),
            now,
        )
        .await?;

        let updated = load_ticket(&mut *tx, tenant_id, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn close(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        note: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let ticket = load_ticket(&mut *tx, tenant_id, id).await?;
        ticket.ensure_mutable(TicketStatus::Closed)?;

        let now = Utc::now();
        sqlx::query("UPDATE ticket SET status = ?, closed_at = ?, updated_at = ? WHERE id = ?")
            .bind(TicketStatus::Closed.as_str())
            .bind(format_timestamp(now))
            .bind(format_timestamp(now))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        append_event(&mut *tx, id, operator, "closed", json!({ "note": note }), now).await?;

        let updated = load_ticket(&mut *tx, tenant_id, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn reply(
        &self,
        tenant_id: &TenantId,
        id: TicketId,
        operator: &OperatorId,
        body: &str,
    ) -> Result<Ticket, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let ticket = load_ticket(&mut *tx, tenant_id, id).await?;
        ticket.ensure_mutable(TicketStatus::Open)?;

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO ticket_message (ticket_id, author_operator_id, role, body, created_at)
             VALUES (?, ?, 'agent', ?, ?)",
        )
        .bind(id.0)
        .bind(&operator.0)
        .bind(body)
        .bind(format_timestamp(now))
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE ticket SET updated_at = ? WHERE id = ?")
            .bind(format_timestamp(now))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        append_event(&mut *tx, id, operator, "replied", json!({ "length": body.len() }), now)
            .await?;

        tx.commit().await?;
        Ok(ticket)
    }

    async fn stats(
        &self,
        tenant_id: &TenantId,
        operator: &OperatorId,
        since: DateTime<Utc>,
    ) -> Result<TicketStats, RepositoryError> {
        let since = format_timestamp(since);

        let answered_by_operator: i64 = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM ticket_message m
             JOIN ticket t ON t.id = m.ticket_id
             WHERE t.tenant_id = ? AND m.author_operator_id = ? AND m.role = 'agent'
               AND m.created_at > ?",
        )
        .bind(&tenant_id.0)
        .bind(&operator.0)
        .bind(&since)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;

        let open_tickets: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM ticket WHERE tenant_id = ? AND status = ?")
                .bind(&tenant_id.0)
                .bind(TicketStatus::Open.as_str())
                .fetch_one(&self.pool)
                .await?
                .try_get("count")?;

        let closed_since: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM ticket
             WHERE tenant_id = ? AND status = ? AND closed_at > ?",
        )
        .bind(&tenant_id.0)
        .bind(TicketStatus::Closed.as_str())
        .bind(&since)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;

        Ok(TicketStats { answered_by_operator, open_tickets, closed_since })
    }

    async fn create(&self, ticket: Ticket) -> Result<Ticket, RepositoryError> {
        let created_at = format_timestamp(ticket.created_at);
        let result = sqlx::query(
            "INSERT INTO ticket (
                tenant_id, slug, subject, email_from, email_from_name, status, assigned_to,
                created_at, updated_at, closed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.tenant_id.0)
        .bind(&ticket.slug)
        .bind(&ticket.subject)
        .bind(ticket.email_from.as_deref())
        .bind(ticket.email_from_name.as_deref())
        .bind(ticket.status.as_str())
        .bind(ticket.assigned_to.as_ref().map(|operator| operator.0.as_str()))
        .bind(&created_at)
        .bind(&created_at)
        .bind(ticket.closed_at.map(format_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(Ticket { id: TicketId(result.last_insert_rowid()), ..ticket })
    }
}

async fn load_ticket(
    conn: &mut SqliteConnection,
    tenant_id: &TenantId,
    id: TicketId,
) -> Result<Ticket, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {TICKET_COLUMNS} FROM ticket WHERE id = ? AND tenant_id = ?"
    ))
    .bind(id.0)
    .bind(&tenant_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => ticket_from_row(&row),
        None => Err(RepositoryError::TicketNotFound(id)),
    }
}

async fn append_event(
    conn: &mut SqliteConnection,
    ticket_id: TicketId,
    operator: &OperatorId,
    change: &str,
    detail: serde_json::Value,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO ticket_event (ticket_id, operator_id, change, detail_json, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(ticket_id.0)
    .bind(&operator.0)
    .bind(change)
    .bind(detail.to_string())
    .bind(format_timestamp(at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn ticket_from_row(row: &SqliteRow) -> Result<Ticket, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ticket status `{status_raw}`")))?;

    Ok(Ticket {
        id: TicketId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        slug: row.try_get("slug")?,
        subject: row.try_get("subject")?,
        email_from: row.try_get("email_from")?,
        email_from_name: row.try_get("email_from_name")?,
        status,
        assigned_to: row.try_get::<Option<String>, _>("assigned_to")?.map(OperatorId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        closed_at: parse_optional_timestamp("closed_at", row.try_get("closed_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use sqlx::Row;

    use deskhand_core::domain::operator::{OperatorId, RosterMember};
    use deskhand_core::domain::tenant::{Tenant, TenantId};
    use deskhand_core::domain::ticket::{Ticket, TicketId, TicketScope, TicketStatus};
    use deskhand_core::errors::DomainError;

    use super::SqlTicketRepository;
    use crate::migrations;
    use crate::repositories::{
        RepositoryError, RosterRepository, SqlRosterRepository, TicketRepository,
    };
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let roster = SqlRosterRepository::new(pool.clone());
        for tenant in ["acme", "globex"] {
            roster
                .save_tenant(Tenant {
                    id: TenantId(tenant.to_owned()),
                    name: tenant.to_owned(),
                    chat_team_id: Some(format!("T-{tenant}")),
                    active: true,
                })
                .await
                .expect("save tenant");
        }
        roster
            .save_member(RosterMember {
                id: OperatorId("op-1".to_owned()),
                tenant_id: TenantId("acme".to_owned()),
                display_name: Some("Riley".to_owned()),
                email: "riley@acme.test".to_owned(),
                external_ids: vec!["U100".to_owned()],
                active: true,
            })
            .await
            .expect("save member");
        pool
    }

    fn ticket(tenant: &str, slug: &str, age_hours: i64) -> Ticket {
        Ticket {
            id: TicketId(0),
            tenant_id: TenantId(tenant.to_owned()),
            slug: slug.to_owned(),
            subject: format!("Subject {slug}"),
            email_from: Some("customer@example.com".to_owned()),
            email_from_name: None,
            status: TicketStatus::Open,
            assigned_to: None,
            created_at: Utc::now() - Duration::hours(age_hours),
            closed_at: None,
        }
    }

    fn acme() -> TenantId {
        TenantId("acme".to_owned())
    }

    fn operator() -> OperatorId {
        OperatorId("op-1".to_owned())
    }

    async fn event_count(pool: &DbPool, ticket_id: TicketId) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM ticket_event WHERE ticket_id = ?")
            .bind(ticket_id.0)
            .fetch_one(pool)
            .await
            .expect("count events")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn find_matching_orders_newest_first_and_applies_filters() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());

        let old = repo.create(ticket("acme", "old", 24 * 20)).await.expect("create");
        let mid = repo.create(ticket("acme", "mid", 24 * 12)).await.expect("create");
        let new = repo.create(ticket("acme", "new", 1)).await.expect("create");
        repo.create(ticket("globex", "other-tenant", 2)).await.expect("create");

        let all = repo.find_matching(&TicketScope::open(acme())).await.expect("find");
        let slugs: Vec<_> = all.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["new", "mid", "old"]);

        let aged = repo
            .find_matching(
                &TicketScope::open(acme()).created_before(Utc::now() - Duration::days(10)),
            )
            .await
            .expect("find aged");
        assert_eq!(aged.iter().map(|t| t.id).collect::<Vec<_>>(), vec![mid.id, old.id]);

        let limited = repo
            .find_matching(&TicketScope::open(acme()).with_ids(vec![old.id, new.id]).limit(1))
            .await
            .expect("find limited");
        assert_eq!(limited.iter().map(|t| t.id).collect::<Vec<_>>(), vec![new.id]);
    }

    #[tokio::test]
    async fn empty_id_set_never_widens_to_tenant_scope() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool);
        repo.create(ticket("acme", "a", 1)).await.expect("create");

        let found = repo
            .find_matching(&TicketScope::open(acme()).with_ids(Vec::new()))
            .await
            .expect("find");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn assign_updates_ticket_and_writes_event_in_same_transaction() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());
        let created = repo.create(ticket("acme", "a", 1)).await.expect("create");

        let assigned = repo
            .assign(&acme(), created.id, &operator(), "Assigned via Slack mention")
            .await
            .expect("assign");

        assert_eq!(assigned.assigned_to, Some(operator()));
        assert_eq!(event_count(&pool, created.id).await, 1);
    }

    #[tokio::test]
    async fn close_rejects_already_closed_ticket_without_writing_event() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());
        let created = repo.create(ticket("acme", "a", 1)).await.expect("create");

        let closed = repo.close(&acme(), created.id, &operator(), "bulk close").await.expect("close");
        assert_eq!(closed.status, TicketStatus::Closed);
        assert!(closed.closed_at.is_some());

        let second = repo.close(&acme(), created.id, &operator(), "bulk close").await;
        assert!(matches!(
            second,
            Err(RepositoryError::Domain(DomainError::InvalidTicketTransition { .. }))
        ));
        assert_eq!(event_count(&pool, created.id).await, 1);
    }

    #[tokio::test]
    async fn mutations_are_tenant_scoped() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool);
        let foreign = repo.create(ticket("globex", "g", 1)).await.expect("create");

        let result = repo.assign(&acme(), foreign.id, &operator(), "note").await;
        assert!(matches!(result, Err(RepositoryError::TicketNotFound(id)) if id == foreign.id));
    }

    #[tokio::test]
    async fn stats_count_operator_replies_open_and_recently_closed() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool);
        let first = repo.create(ticket("acme", "a", 3)).await.expect("create");
        let second = repo.create(ticket("acme", "b", 3)).await.expect("create");
        repo.create(ticket("acme", "c", 3)).await.expect("create");

        repo.reply(&acme(), first.id, &operator(), "On it").await.expect("reply");
        repo.reply(&acme(), second.id, &operator(), "Fixed").await.expect("reply");
        repo.close(&acme(), second.id, &operator(), "done").await.expect("close");

        let stats = repo
            .stats(&acme(), &operator(), Utc::now() - Duration::hours(24))
            .await
            .expect("stats");
        assert_eq!(stats.answered_by_operator, 2);
        assert_eq!(stats.open_tickets, 2);
        assert_eq!(stats.closed_since, 1);

        let future = repo.stats(&acme(), &operator(), Utc::now() + Duration::hours(1)).await;
        let future = future.expect("stats");
        assert_eq!(future.answered_by_operator, 0);
        assert_eq!(future.closed_since, 0);
    }
}
