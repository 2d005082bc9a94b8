//! Postgres-backed [`DataStore`]

use sqlx::PgPool;
use time::OffsetDateTime;

use quillbox_shared::{GroupId, TenantId};

use crate::catalog::Tier;
use crate::error::{BillingError, BillingResult};
use crate::store::{Contact, DataStore, NewGroup, PaymentFailure, TenantRecord};

/// Columns every tenant fetch selects.
const TENANT_COLUMNS: &str = "id, gateway_customer_id, current_tier, pending_tier, \
     period_end, pending_downgrade_at, failed_payment_count, quota";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DataStore for PgStore {
    async fn tenant(&self, tenant_id: TenantId) -> BillingResult<TenantRecord> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        sqlx::query_as::<_, TenantRecord>(&query)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tenant {tenant_id} not found")))
    }

    async fn tenant_by_customer(&self, customer_id: &str) -> BillingResult<Option<TenantRecord>> {
        let query =
            format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE gateway_customer_id = $1");
        let record = sqlx::query_as::<_, TenantRecord>(&query)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn contact(&self, tenant_id: TenantId) -> BillingResult<Contact> {
        sqlx::query_as::<_, Contact>(
            "SELECT email, first_name, last_name, group_id FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Tenant {tenant_id} not found")))
    }

    async fn ensure_idempotency_key(
        &self,
        tenant_id: TenantId,
        candidate: &str,
    ) -> BillingResult<String> {
        // COALESCE keeps any previously stored key, so a retried subscribe
        // replays the original gateway request.
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE tenants
            SET subscribe_idempotency_key = COALESCE(subscribe_idempotency_key, $2)
            WHERE id = $1
            RETURNING subscribe_idempotency_key
            "#,
        )
        .bind(tenant_id)
        .bind(candidate)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(key,)| key)
            .ok_or_else(|| BillingError::NotFound(format!("Tenant {tenant_id} not found")))
    }

    async fn record_new_subscription(
        &self,
        tenant_id: TenantId,
        customer_id: &str,
        tier: Tier,
        quota: Option<i64>,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET gateway_customer_id = $2,
                current_tier = $3,
                pending_tier = $3,
                quota = COALESCE($4, quota),
                period_end = $5,
                pending_downgrade_at = NULL,
                failed_payment_count = 0,
                subscribe_idempotency_key = NULL
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(tier)
        .bind(quota)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {tenant_id} not found")));
        }
        Ok(())
    }

    async fn apply_upgrade(
        &self,
        tenant_id: TenantId,
        tier: Tier,
        quota: Option<i64>,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET current_tier = $2,
                pending_tier = $2,
                quota = COALESCE($3, quota),
                period_end = $4,
                pending_downgrade_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(tier)
        .bind(quota)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {tenant_id} not found")));
        }
        Ok(())
    }

    async fn schedule_downgrade(
        &self,
        tenant_id: TenantId,
        tier: Tier,
        at: OffsetDateTime,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET pending_tier = $2,
                pending_downgrade_at = $3,
                period_end = $3
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(tier)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {tenant_id} not found")));
        }
        Ok(())
    }

    async fn clear_subscription(&self, tenant_id: TenantId) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET current_tier = $2,
                pending_tier = $2,
                quota = 0,
                period_end = NULL,
                pending_downgrade_at = NULL,
                failed_payment_count = 0
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(Tier::Free)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {tenant_id} not found")));
        }
        Ok(())
    }

    async fn increment_failed_payments(&self, tenant_id: TenantId) -> BillingResult<i32> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE tenants
            SET failed_payment_count = failed_payment_count + 1
            WHERE id = $1
            RETURNING failed_payment_count
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(count,)| count)
            .ok_or_else(|| BillingError::NotFound(format!("Tenant {tenant_id} not found")))
    }

    async fn mark_payment_succeeded(
        &self,
        tenant_id: TenantId,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE tenants SET failed_payment_count = 0, period_end = $2 WHERE id = $1",
        )
        .bind(tenant_id)
        .bind(period_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_payment_failure(&self, failure: &PaymentFailure) -> BillingResult<bool> {
        // Keyed by gateway event ID so a redelivered webhook records nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO payment_failures
                (event_id, tenant_id, invoice_id, failure_code, failure_message, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&failure.event_id)
        .bind(failure.tenant_id)
        .bind(&failure.invoice_id)
        .bind(&failure.failure_code)
        .bind(&failure.failure_message)
        .bind(failure.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_event(&self, event_id: &str, kind: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO gateway_events (event_id, event_type, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(kind)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_event(&self, event_id: &str) -> BillingResult<()> {
        sqlx::query("DELETE FROM gateway_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_processed_events(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM gateway_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn latest_failure(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<Option<PaymentFailure>> {
        let failure = sqlx::query_as::<_, PaymentFailure>(
            r#"
            SELECT event_id, tenant_id, invoice_id, failure_code, failure_message, occurred_at
            FROM payment_failures
            WHERE tenant_id = $1
            ORDER BY occurred_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(failure)
    }

    async fn apply_due_downgrades(&self, now: OffsetDateTime) -> BillingResult<u64> {
        // The predicate keeps this idempotent: once a row moves, its pending
        // tier matches and the next sweep skips it.
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET current_tier = pending_tier,
                pending_downgrade_at = NULL
            WHERE pending_downgrade_at <= $1
              AND pending_tier <> current_tier
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_group(&self, group: &NewGroup) -> BillingResult<GroupId> {
        let group_id = GroupId::new();
        sqlx::query(
            r#"
            INSERT INTO groups (id, name, address, contact, seats, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            "#,
        )
        .bind(group_id)
        .bind(&group.name)
        .bind(&group.address)
        .bind(&group.contact)
        .bind(group.seats)
        .execute(&self.pool)
        .await?;
        Ok(group_id)
    }

    async fn link_group(&self, tenant_id: TenantId, group_id: GroupId) -> BillingResult<()> {
        let result = sqlx::query("UPDATE tenants SET group_id = $2 WHERE id = $1")
            .bind(tenant_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {tenant_id} not found")));
        }
        Ok(())
    }

    async fn activate_group_member(
        &self,
        tenant_id: TenantId,
        group_id: GroupId,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE groups SET active = TRUE WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE tenants SET group_id = $2 WHERE id = $1")
            .bind(tenant_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
