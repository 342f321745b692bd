use sqlx::{sqlite::SqliteRow, Row};

use deskhand_core::domain::operator::{OperatorId, RosterMember};
use deskhand_core::domain::tenant::{Tenant, TenantId};

use super::{RepositoryError, RosterRepository, CHAT_PROVIDER};
use crate::DbPool;

pub struct SqlRosterRepository {
    pool: DbPool,
}

impl SqlRosterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn external_ids(&self, operator_id: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT external_id FROM operator_external_account
             WHERE operator_id = ? AND provider = ?
             ORDER BY external_id",
        )
        .bind(operator_id)
        .bind(CHAT_PROVIDER)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row.try_get("external_id").map_err(RepositoryError::from)).collect()
    }

    async fn hydrate(&self, row: Option<SqliteRow>) -> Result<Option<RosterMember>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let external_ids = self.external_ids(&id).await?;

        Ok(Some(RosterMember {
            id: OperatorId(id),
            tenant_id: TenantId(row.try_get("tenant_id")?),
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            external_ids,
            active: row.try_get::<i64, _>("active")? != 0,
        }))
    }
}

#[async_trait::async_trait]
impl RosterRepository for SqlRosterRepository {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, chat_team_id, active FROM tenant WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn find_tenant_by_team(&self, team_id: &str) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, chat_team_id, active FROM tenant WHERE chat_team_id = ?",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &TenantId,
        external_id: &str,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        let row = sqlx::query(
            "SELECT o.id, o.tenant_id, o.display_name, o.email, o.active
             FROM operator o
             JOIN operator_external_account a ON a.operator_id = o.id
             WHERE o.tenant_id = ? AND a.provider = ? AND a.external_id = ? AND o.active = 1
             LIMIT 1",
        )
        .bind(&tenant_id.0)
        .bind(CHAT_PROVIDER)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_email(
        &self,
        tenant_id: &TenantId,
        email: &str,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, display_name, email, active
             FROM operator
             WHERE tenant_id = ? AND email = ? COLLATE NOCASE AND active = 1
             LIMIT 1",
        )
        .bind(&tenant_id.0)
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_member(
        &self,
        tenant_id: &TenantId,
        operator_id: &OperatorId,
    ) -> Result<Option<RosterMember>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, display_name, email, active
             FROM operator
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&tenant_id.0)
        .bind(&operator_id.0)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenant (id, name, chat_team_id, active) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                chat_team_id = excluded.chat_team_id,
                active = excluded.active",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.name)
        .bind(tenant.chat_team_id.as_deref())
        .bind(i64::from(tenant.active))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_member(&self, member: RosterMember) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO operator (id, tenant_id, display_name, email, active) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                display_name = excluded.display_name,
                email = excluded.email,
                active = excluded.active",
        )
        .bind(&member.id.0)
        .bind(&member.tenant_id.0)
        .bind(member.display_name.as_deref())
        .bind(&member.email)
        .bind(i64::from(member.active))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM operator_external_account WHERE operator_id = ? AND provider = ?")
            .bind(&member.id.0)
            .bind(CHAT_PROVIDER)
            .execute(&mut *tx)
            .await?;
        for external_id in &member.external_ids {
            sqlx::query(
                "INSERT INTO operator_external_account (operator_id, provider, external_id)
                 VALUES (?, ?, ?)",
            )
            .bind(&member.id.0)
            .bind(CHAT_PROVIDER)
            .bind(external_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn tenant_from_row(row: &SqliteRow) -> Result<Tenant, RepositoryError> {
    Ok(Tenant {
        id: TenantId(row.try_get("id")?),
        name: row.try_get("name")?,
        chat_team_id: row.try_get("chat_team_id")?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}
