use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::Bill;
use crate::services::invoice::{format_amount, RenderedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Whatsapp,
    Email,
}

impl NotificationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
        }
    }
}

/// What happened to a bill that warrants telling the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillEvent {
    Issued,
    Revised,
    Paid,
}

impl BillEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "bill_issued",
            Self::Revised => "bill_revised",
            Self::Paid => "payment_receipt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub bill_id: Uuid,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub notification_type: BillEvent,
    pub subject: String,
    pub body: String,
    pub attachment: Option<RenderedDocument>,
}

/// Asynchronous outbound queue. Delivery and retries happen elsewhere; the
/// billing core only enqueues and cancels.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, request: NotificationRequest) -> Result<(), DispatchError>;

    /// Cancels notifications for the bill that have not been sent yet and
    /// returns how many were withdrawn.
    async fn cancel_pending_for_bill(&self, bill_id: Uuid) -> Result<u64, DispatchError>;
}

/// Writes notifications to the `message_logs` outbox table.
#[derive(Debug, Clone)]
pub struct PgMessageQueue {
    pool: PgPool,
}

impl PgMessageQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueue for PgMessageQueue {
    async fn enqueue(&self, request: NotificationRequest) -> Result<(), DispatchError> {
        let mut payload = json!({
            "subject": request.subject,
            "body": request.body,
        });
        if let (Some(document), Some(obj)) = (&request.attachment, payload.as_object_mut()) {
            obj.insert(
                "attachment".to_string(),
                json!({
                    "file_name": document.file_name,
                    "content_type": document.content_type,
                    "size_bytes": document.bytes.len(),
                }),
            );
        }

        sqlx::query(
            "INSERT INTO message_logs (
                id, bill_id, channel, recipient, status, notification_type, payload, scheduled_at
             ) VALUES ($1, $2, $3, $4, 'queued', $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(request.bill_id)
        .bind(request.channel.as_str())
        .bind(&request.recipient)
        .bind(request.notification_type.as_str())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| DispatchError::Queue(error.to_string()))?;
        Ok(())
    }

    async fn cancel_pending_for_bill(&self, bill_id: Uuid) -> Result<u64, DispatchError> {
        let result = sqlx::query(
            "UPDATE message_logs SET status = 'cancelled', updated_at = now()
             WHERE bill_id = $1 AND status = 'queued'",
        )
        .bind(bill_id)
        .execute(&self.pool)
        .await
        .map_err(|error| DispatchError::Queue(error.to_string()))?;
        Ok(result.rows_affected())
    }
}

/// Logs notifications instead of persisting them. Used when no database is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct TracingQueue;

#[async_trait]
impl NotificationQueue for TracingQueue {
    async fn enqueue(&self, request: NotificationRequest) -> Result<(), DispatchError> {
        tracing::info!(notification = %describe(&request), recipient = %request.recipient, "Notification (not persisted)");
        Ok(())
    }

    async fn cancel_pending_for_bill(&self, _bill_id: Uuid) -> Result<u64, DispatchError> {
        Ok(0)
    }
}

/// Channels the tenant can be reached on, WhatsApp first.
pub fn recipients(bill: &Bill) -> Vec<(NotificationChannel, String)> {
    let mut found = Vec::new();
    let clean = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned)
    };
    if let Some(phone) = clean(&bill.party.tenant_phone) {
        found.push((NotificationChannel::Whatsapp, phone));
    }
    if let Some(email) = clean(&bill.party.tenant_email) {
        found.push((NotificationChannel::Email, email));
    }
    found
}

pub fn compose_message(
    bill: &Bill,
    event: BillEvent,
    currency_symbol: &str,
    app_public_url: &str,
) -> (String, String) {
    let name = &bill.party.tenant_name;
    let month = bill.billing_month.label();
    let amount = format_amount(bill.total_amount as f64, currency_symbol);
    let pay_link = bill
        .payment_link
        .clone()
        .unwrap_or_else(|| format!("{app_public_url}/bills/{}", bill.id));

    match event {
        BillEvent::Issued => (
            format!("Rent bill for {month}"),
            format!(
                "Hello {name},\n\n\
                 Your bill for {month} (room {room}) is {amount}.\n\
                 View and pay it here: {pay_link}\n\n\
                 Thank you.",
                room = bill.party.room_number
            ),
        ),
        BillEvent::Revised => (
            format!("Updated rent bill for {month}"),
            format!(
                "Hello {name},\n\n\
                 Your bill for {month} has been updated. The new total is {amount}.\n\
                 {pay_link}"
            ),
        ),
        BillEvent::Paid => {
            let reference = bill
                .payment
                .as_ref()
                .map(|p| p.reference.clone())
                .unwrap_or_default();
            (
                format!("Payment received for {month}"),
                format!(
                    "Hello {name},\n\n\
                     We received your payment of {amount} for {month} (ref: {reference}).\n\
                     Your receipt is attached.\n\n\
                     Thank you."
                ),
            )
        }
    }
}

/// Small helper for logging a request without its body.
pub fn describe(request: &NotificationRequest) -> Value {
    json!({
        "bill_id": request.bill_id,
        "channel": request.channel.as_str(),
        "type": request.notification_type.as_str(),
        "has_attachment": request.attachment.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::{compose_message, recipients, BillEvent, NotificationChannel};
    use crate::services::bills::test_support::sample_bill;

    #[test]
    fn prefers_whatsapp_then_email() {
        let mut bill = sample_bill();
        bill.party.tenant_email = Some("asha@example.com".to_string());
        let found = recipients(&bill);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, NotificationChannel::Whatsapp);
        assert_eq!(found[1].0, NotificationChannel::Email);

        bill.party.tenant_phone = Some("   ".to_string());
        bill.party.tenant_email = None;
        assert!(recipients(&bill).is_empty());
    }

    #[test]
    fn issued_message_links_to_bill() {
        let bill = sample_bill();
        let (subject, body) = compose_message(&bill, BillEvent::Issued, "₹", "https://app.example.com");
        assert_eq!(subject, "Rent bill for April 2026");
        assert!(body.contains("₹2,342"));
        assert!(body.contains(&format!("https://app.example.com/bills/{}", bill.id)));
    }
}
