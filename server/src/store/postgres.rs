use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::membership::MembershipRow;
use crate::models::ticket::TicketRow;
use crate::models::{ClubTrekkingMembership, NewTicket, Ticket};
use crate::store::{MembershipStore, StoreError, StoreResult, TicketStore};

const TICKET_COLUMNS: &str = "id, user_id, salida_id, payment_ref, code, status, issued_at, \
     redeemed_at, redeemed_by, email_sent_at, expires_at";

const MEMBERSHIP_COLUMNS: &str = "id, user_id, estado, fecha_inicio, fecha_fin, \
     proxima_fecha_pago, salidas_realizadas, limite_semanal, ultima_reset_fecha, \
     historial_salidas, penalizacion, fecha_cancelacion, motivo_cancelacion, version, \
     created_at, updated_at";

fn to_ticket(row: TicketRow) -> StoreResult<Ticket> {
    Ticket::try_from(row).map_err(StoreError::Corrupt)
}

fn to_membership(row: MembershipRow) -> StoreResult<ClubTrekkingMembership> {
    ClubTrekkingMembership::try_from(row).map_err(StoreError::Corrupt)
}

fn to_i32(value: u32, field: &str) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} out of range", field)))
}

#[derive(Clone)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn insert(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            INSERT INTO tickets (id, user_id, salida_id, payment_ref, code, status, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'issued', $6, $7)
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(ticket.id)
        .bind(ticket.user_id)
        .bind(ticket.event_id)
        .bind(&ticket.payment_ref)
        .bind(&ticket.code)
        .bind(ticket.issued_at)
        .bind(ticket.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        to_ticket(row)
    }

    async fn redeem_if_issued(
        &self,
        code: &str,
        staff_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = 'redeemed', redeemed_at = $2, redeemed_by = $3, updated_at = $2
            WHERE code = $1 AND status = 'issued'
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(at)
        .bind(staff_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_ticket).transpose()
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_ticket).transpose()
    }

    async fn find_event_name(&self, event_id: Uuid) -> StoreResult<Option<String>> {
        let name = sqlx::query_scalar::<_, String>("SELECT nombre FROM salidas WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(name)
    }

    async fn mark_email_sent(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE tickets SET email_sent_at = $2, updated_at = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn insert(&self, membership: &ClubTrekkingMembership) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO club_trekking_memberships (
                id, user_id, estado, fecha_inicio, fecha_fin, proxima_fecha_pago,
                salidas_realizadas, limite_semanal, ultima_reset_fecha,
                historial_salidas, penalizacion, fecha_cancelacion, motivo_cancelacion,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(membership.id)
        .bind(membership.user_id)
        .bind(membership.estado.as_str())
        .bind(membership.fecha_inicio)
        .bind(membership.fecha_fin)
        .bind(membership.proxima_fecha_pago)
        .bind(to_i32(membership.uso_mensual.salidas_realizadas, "salidas_realizadas")?)
        .bind(to_i32(membership.uso_mensual.limite_semanal, "limite_semanal")?)
        .bind(membership.uso_mensual.ultima_reset_fecha)
        .bind(Json(&membership.historial_salidas))
        .bind(Json(&membership.penalizacion))
        .bind(membership.fecha_cancelacion)
        .bind(&membership.motivo_cancelacion)
        .bind(membership.version)
        .bind(membership.created_at)
        .bind(membership.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        Ok(())
    }

    async fn find_live_by_user(&self, user_id: Uuid) -> StoreResult<Option<ClubTrekkingMembership>> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS}
            FROM club_trekking_memberships
            WHERE user_id = $1 AND estado IN ('activa', 'pausada')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_membership).transpose()
    }

    async fn save(&self, membership: &ClubTrekkingMembership) -> StoreResult<i64> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE club_trekking_memberships
            SET estado = $3, fecha_inicio = $4, fecha_fin = $5, proxima_fecha_pago = $6,
                salidas_realizadas = $7, limite_semanal = $8, ultima_reset_fecha = $9,
                historial_salidas = $10, penalizacion = $11, fecha_cancelacion = $12,
                motivo_cancelacion = $13, updated_at = $14, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(membership.id)
        .bind(membership.version)
        .bind(membership.estado.as_str())
        .bind(membership.fecha_inicio)
        .bind(membership.fecha_fin)
        .bind(membership.proxima_fecha_pago)
        .bind(to_i32(membership.uso_mensual.salidas_realizadas, "salidas_realizadas")?)
        .bind(to_i32(membership.uso_mensual.limite_semanal, "limite_semanal")?)
        .bind(membership.uso_mensual.ultima_reset_fecha)
        .bind(Json(&membership.historial_salidas))
        .bind(Json(&membership.penalizacion))
        .bind(membership.fecha_cancelacion)
        .bind(&membership.motivo_cancelacion)
        .bind(membership.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        version.ok_or(StoreError::VersionConflict)
    }
}
