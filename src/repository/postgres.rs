use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Bill, BillPayment, BillingMonth, Building, Room, Tenant, TenantPayment};
use crate::repository::{unpaid_method, BillDetails, BillRevision, BillingStore};

const BILL_UNIQUE_CONSTRAINT: &str = "bills_room_tenant_month_key";

const TENANT_ROW: &str = "SELECT (to_jsonb(t) - 'due_pending_amount' - 'due_date')
        || jsonb_build_object(
            'due_payment',
            jsonb_build_object('pending_amount', t.due_pending_amount, 'due_date', t.due_date)
        ) AS row
     FROM tenants t";

/// PostgreSQL-backed store. Rows are read back as `row_to_json` documents and
/// decoded straight into the model types.
#[derive(Debug, Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_tenant(&self, tenant_id: Uuid) -> BillingResult<Tenant> {
        let row = sqlx::query(&format!("{TENANT_ROW} WHERE t.id = $1 LIMIT 1"))
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        decode_optional(row)?.ok_or_else(|| not_found("tenants"))
    }

    /// Resolves why a guarded bill update matched no row.
    async fn explain_missed_bill(&self, bill_id: Uuid, message: String) -> BillingError {
        match self.get_bill(bill_id).await {
            Ok(bill) if bill.is_paid() => BillingError::AlreadyPaid(message),
            Ok(_) => BillingError::Internal(format!("Bill {bill_id} could not be updated.")),
            Err(error) => error,
        }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get_building(&self, building_id: Uuid) -> BillingResult<Building> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM buildings t WHERE t.id = $1 LIMIT 1")
            .bind(building_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        decode_optional(row)?.ok_or_else(|| not_found("buildings"))
    }

    async fn get_room(&self, room_id: Uuid) -> BillingResult<Room> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM rooms t WHERE t.id = $1 LIMIT 1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        decode_optional(row)?.ok_or_else(|| not_found("rooms"))
    }

    async fn list_rooms(&self) -> BillingResult<Vec<Room>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM rooms t ORDER BY t.building_id, t.room_number",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows)
    }

    async fn save_room(&self, room: &Room) -> BillingResult<Room> {
        let row = sqlx::query(
            "INSERT INTO rooms (id, building_id, room_number, base_rent, tenants, tenant_history, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())
             ON CONFLICT (id) DO UPDATE SET
                room_number = EXCLUDED.room_number,
                base_rent = EXCLUDED.base_rent,
                tenants = EXCLUDED.tenants,
                tenant_history = EXCLUDED.tenant_history,
                updated_at = now()
             RETURNING row_to_json(rooms.*) AS row",
        )
        .bind(room.id)
        .bind(room.building_id)
        .bind(&room.room_number)
        .bind(room.base_rent)
        .bind(&room.tenants)
        .bind(Json(&room.tenant_history))
        .bind(room.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            if unique_violation(&error).is_some() {
                return BillingError::Validation(format!(
                    "Room number {} already exists in this building.",
                    room.room_number
                ));
            }
            map_db_error(error)
        })?;
        decode_optional(row)?
            .ok_or_else(|| BillingError::Internal("Could not save rooms record.".to_string()))
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> BillingResult<Tenant> {
        self.fetch_tenant(tenant_id).await
    }

    async fn list_tenants(&self, tenant_ids: &[Uuid]) -> BillingResult<Vec<Tenant>> {
        if tenant_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "{TENANT_ROW} WHERE t.id = ANY($1) ORDER BY array_position($1, t.id)"
        ))
        .bind(tenant_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows)
    }

    async fn next_tenant_sequence(&self) -> BillingResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT nextval('tenant_code_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant> {
        sqlx::query(
            "INSERT INTO tenants (
                id, code, full_name, phone, email, room_id, move_in_date, move_out_date,
                rent_amount, advanced_amount, payments, last_payment,
                due_pending_amount, due_date, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(tenant.id)
        .bind(&tenant.code)
        .bind(&tenant.full_name)
        .bind(&tenant.phone)
        .bind(&tenant.email)
        .bind(tenant.room_id)
        .bind(tenant.move_in_date)
        .bind(tenant.move_out_date)
        .bind(tenant.rent_amount)
        .bind(tenant.advanced_amount)
        .bind(Json(&tenant.payments))
        .bind(tenant.last_payment.as_ref().map(Json))
        .bind(tenant.due_payment.pending_amount)
        .bind(tenant.due_payment.due_date)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if unique_violation(&error).is_some() {
                return BillingError::Validation(format!(
                    "Tenant code {} is already taken.",
                    tenant.code
                ));
            }
            map_db_error(error)
        })?;
        self.fetch_tenant(tenant.id).await
    }

    async fn save_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant> {
        let result = sqlx::query(
            "UPDATE tenants SET
                full_name = $2, phone = $3, email = $4, room_id = $5,
                move_in_date = $6, move_out_date = $7, rent_amount = $8,
                advanced_amount = $9, updated_at = now()
             WHERE id = $1",
        )
        .bind(tenant.id)
        .bind(&tenant.full_name)
        .bind(&tenant.phone)
        .bind(&tenant.email)
        .bind(tenant.room_id)
        .bind(tenant.move_in_date)
        .bind(tenant.move_out_date)
        .bind(tenant.rent_amount)
        .bind(tenant.advanced_amount)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found("tenants"));
        }
        self.fetch_tenant(tenant.id).await
    }

    async fn get_bill(&self, bill_id: Uuid) -> BillingResult<Bill> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM bills t WHERE t.id = $1 LIMIT 1")
            .bind(bill_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        decode_optional(row)?.ok_or_else(|| not_found("bills"))
    }

    async fn find_bill_by_room_tenant_month(
        &self,
        room_id: Uuid,
        tenant_id: Uuid,
        month: BillingMonth,
    ) -> BillingResult<Option<Bill>> {
        let row = sqlx::query(
            "SELECT row_to_json(t) AS row FROM bills t
             WHERE t.room_id = $1 AND t.tenant_id = $2 AND t.billing_month = $3
             LIMIT 1",
        )
        .bind(room_id)
        .bind(tenant_id)
        .bind(month.first_day())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_optional(row)
    }

    async fn list_bills_for_month(&self, month: BillingMonth) -> BillingResult<Vec<Bill>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM bills t WHERE t.billing_month = $1 ORDER BY t.created_at",
        )
        .bind(month.first_day())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows)
    }

    async fn insert_bill(&self, bill: &Bill) -> BillingResult<Bill> {
        let row = sqlx::query(
            "INSERT INTO bills (
                id, room_id, tenant_id, billing_month, charges, totals, total_amount,
                payment_status, payment, notes, payment_link, party, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING row_to_json(bills.*) AS row",
        )
        .bind(bill.id)
        .bind(bill.room_id)
        .bind(bill.tenant_id)
        .bind(bill.billing_month.first_day())
        .bind(Json(&bill.charges))
        .bind(Json(&bill.totals))
        .bind(bill.total_amount)
        .bind(bill.payment_status.as_str())
        .bind(bill.payment.as_ref().map(Json))
        .bind(&bill.notes)
        .bind(&bill.payment_link)
        .bind(Json(&bill.party))
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            if unique_violation(&error).as_deref() == Some(BILL_UNIQUE_CONSTRAINT) {
                return BillingError::DuplicateBill {
                    room_id: bill.room_id,
                    tenant_id: bill.tenant_id,
                    billing_month: bill.billing_month.first_day(),
                };
            }
            map_db_error(error)
        })?;
        decode_optional(row)?
            .ok_or_else(|| BillingError::Internal("Could not create bills record.".to_string()))
    }

    async fn update_bill_financials(
        &self,
        bill_id: Uuid,
        revision: &BillRevision,
    ) -> BillingResult<Bill> {
        let row = sqlx::query(
            "UPDATE bills SET
                charges = $2, totals = $3, total_amount = $4, updated_at = now()
             WHERE id = $1 AND payment_status = 'not_paid'
             RETURNING row_to_json(bills.*) AS row",
        )
        .bind(bill_id)
        .bind(Json(&revision.charges))
        .bind(Json(&revision.totals))
        .bind(revision.total_amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match decode_optional(row)? {
            Some(updated) => Ok(updated),
            None => Err(self
                .explain_missed_bill(
                    bill_id,
                    format!("Bill {bill_id} is already paid; its charges can no longer change."),
                )
                .await),
        }
    }

    async fn update_bill_details(&self, bill_id: Uuid, details: &BillDetails) -> BillingResult<Bill> {
        // Each column keeps its stored value unless the caller supplied one;
        // the payment method is patched inside the stored payment document.
        let row = sqlx::query(
            "UPDATE bills SET
                notes = CASE WHEN $2::text IS NULL THEN notes ELSE NULLIF(btrim($2::text), '') END,
                payment_link = COALESCE($3::text, payment_link),
                payment = CASE
                    WHEN $4::text IS NULL THEN payment
                    ELSE jsonb_set(payment, '{method}', to_jsonb($4::text))
                END,
                updated_at = now()
             WHERE id = $1 AND ($4::text IS NULL OR payment IS NOT NULL)
             RETURNING row_to_json(bills.*) AS row",
        )
        .bind(bill_id)
        .bind(&details.notes)
        .bind(&details.payment_link)
        .bind(&details.payment_method)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match decode_optional(row)? {
            Some(updated) => Ok(updated),
            None => {
                // Missing bill surfaces as NotFound; otherwise it is unpaid.
                self.get_bill(bill_id).await?;
                Err(unpaid_method(bill_id))
            }
        }
    }

    async fn mark_bill_paid(&self, bill_id: Uuid, payment: &BillPayment) -> BillingResult<Bill> {
        let row = sqlx::query(
            "UPDATE bills SET payment_status = 'paid', payment = $2, updated_at = now()
             WHERE id = $1 AND payment_status = 'not_paid'
             RETURNING row_to_json(bills.*) AS row",
        )
        .bind(bill_id)
        .bind(Json(payment))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match decode_optional(row)? {
            Some(paid) => Ok(paid),
            None => Err(self
                .explain_missed_bill(bill_id, format!("Bill {bill_id} is already paid."))
                .await),
        }
    }

    async fn append_tenant_payment(
        &self,
        tenant_id: Uuid,
        payment: &TenantPayment,
    ) -> BillingResult<Tenant> {
        let result = sqlx::query(
            "UPDATE tenants SET
                payments = payments || jsonb_build_array($2::jsonb),
                last_payment = $2::jsonb,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(tenant_id)
        .bind(Json(payment))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found("tenants"));
        }
        self.fetch_tenant(tenant_id).await
    }

    async fn update_tenant_due(&self, tenant_id: Uuid, settled_amount: f64) -> BillingResult<Tenant> {
        // Right-hand sides read the pre-update row, so both columns see the
        // same starting balance.
        sqlx::query(
            "UPDATE tenants SET
                due_pending_amount = GREATEST(due_pending_amount - $2, 0),
                due_date = CASE WHEN due_pending_amount - $2 > 0 THEN due_date ELSE NULL END,
                updated_at = now()
             WHERE id = $1 AND due_pending_amount > 0",
        )
        .bind(tenant_id)
        .bind(settled_amount)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        self.fetch_tenant(tenant_id).await
    }
}

fn not_found(table: &str) -> BillingError {
    BillingError::NotFound(format!("{table} record not found."))
}

fn decode_value<T: DeserializeOwned>(value: Value) -> BillingResult<T> {
    serde_json::from_value(value).map_err(|error| {
        tracing::error!(error = %error, "Could not decode database row");
        BillingError::Internal("Stored record has an unexpected shape.".to_string())
    })
}

fn decode_optional<T: DeserializeOwned>(row: Option<PgRow>) -> BillingResult<Option<T>> {
    match row {
        Some(row) => row_document(&row)?.map(decode_value).transpose(),
        None => Ok(None),
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<PgRow>) -> BillingResult<Vec<T>> {
    let mut decoded = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(value) = row_document(row)? {
            decoded.push(decode_value(value)?);
        }
    }
    Ok(decoded)
}

fn row_document(row: &PgRow) -> BillingResult<Option<Value>> {
    row_column(row.try_get::<Option<Value>, _>("row"))
}

/// A missing or mistyped `row` column is a query bug, never an absent record.
fn row_column(column: Result<Option<Value>, sqlx::Error>) -> BillingResult<Option<Value>> {
    column.map_err(|error| {
        tracing::error!(error = %error, "Could not read the row column");
        BillingError::Internal("Stored record could not be read.".to_string())
    })
}

/// Constraint name of a unique violation (`23505`), if that is what failed.
fn unique_violation(error: &sqlx::Error) -> Option<String> {
    let db_error = error.as_database_error()?;
    if db_error.code().as_deref() != Some("23505") {
        return None;
    }
    Some(db_error.constraint().unwrap_or_default().to_string())
}

fn map_db_error(error: sqlx::Error) -> BillingError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");
    BillingError::Dependency("Database operation failed.".to_string())
}
