use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::Bill;

/// Printable output of a renderer, handed to the notification queue as an
/// attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns a finalized bill into printable bytes. The PDF layout engine lives
/// behind this trait.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, bill: &Bill) -> Result<RenderedDocument, DispatchError>;
}

/// Keeps the latest rendering of every bill, so a revised bill is never left
/// pointing at a stale invoice.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replaces whatever was stored for the bill before.
    async fn save(&self, bill_id: Uuid, document: &RenderedDocument) -> Result<(), DispatchError>;
    async fn latest(&self, bill_id: Uuid) -> Result<Option<RenderedDocument>, DispatchError>;
}

/// Documents kept in `bill_documents`, one row per bill.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn save(&self, bill_id: Uuid, document: &RenderedDocument) -> Result<(), DispatchError> {
        sqlx::query(
            "INSERT INTO bill_documents (bill_id, file_name, content_type, content, rendered_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (bill_id) DO UPDATE SET
                file_name = EXCLUDED.file_name,
                content_type = EXCLUDED.content_type,
                content = EXCLUDED.content,
                revision = bill_documents.revision + 1,
                rendered_at = now()",
        )
        .bind(bill_id)
        .bind(&document.file_name)
        .bind(&document.content_type)
        .bind(&document.bytes)
        .execute(&self.pool)
        .await
        .map_err(|error| DispatchError::Storage(error.to_string()))?;
        Ok(())
    }

    async fn latest(&self, bill_id: Uuid) -> Result<Option<RenderedDocument>, DispatchError> {
        let row = sqlx::query_as::<_, (String, String, Vec<u8>)>(
            "SELECT file_name, content_type, content FROM bill_documents WHERE bill_id = $1",
        )
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| DispatchError::Storage(error.to_string()))?;
        Ok(row.map(|(file_name, content_type, bytes)| RenderedDocument {
            file_name,
            content_type,
            bytes,
        }))
    }
}

/// Process-local document store for runs without a database.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, RenderedDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn save(&self, bill_id: Uuid, document: &RenderedDocument) -> Result<(), DispatchError> {
        self.documents.write().await.insert(bill_id, document.clone());
        Ok(())
    }

    async fn latest(&self, bill_id: Uuid) -> Result<Option<RenderedDocument>, DispatchError> {
        Ok(self.documents.read().await.get(&bill_id).cloned())
    }
}

/// Plain-text invoice, used when no richer renderer is wired in.
#[derive(Debug, Clone)]
pub struct TextInvoiceRenderer {
    issuer_name: String,
    currency_symbol: String,
}

impl TextInvoiceRenderer {
    pub fn new(issuer_name: &str, currency_symbol: &str) -> Self {
        Self {
            issuer_name: issuer_name.to_string(),
            currency_symbol: currency_symbol.to_string(),
        }
    }

    pub fn render_text(&self, bill: &Bill) -> String {
        let party = &bill.party;
        let mut lines = vec![
            self.issuer_name.clone(),
            format!("Invoice for {}", bill.billing_month.label()),
            format!("Bill ID: {}", bill.id),
            String::new(),
            format!("Tenant: {} ({})", party.tenant_name, party.tenant_code),
        ];
        if let Some(phone) = party.tenant_phone.as_deref() {
            lines.push(format!("Phone: {phone}"));
        }
        if let Some(email) = party.tenant_email.as_deref() {
            lines.push(format!("Email: {email}"));
        }
        let building = if party.building_name.is_empty() {
            format!("Room {}", party.room_number)
        } else {
            format!("Room {}, {}", party.room_number, party.building_name)
        };
        lines.push(building);
        if let Some(address) = party.building_address.as_deref() {
            lines.push(address.to_string());
        }
        lines.push(String::new());

        for charge in &bill.charges {
            lines.push(format!(
                "{:<24}{:>14}",
                charge.title,
                format_amount(charge.amount, &self.currency_symbol)
            ));
        }
        lines.push(format!("{:-<38}", ""));
        lines.push(format!(
            "{:<24}{:>14}",
            "Total",
            format_amount(bill.total_amount as f64, &self.currency_symbol)
        ));
        lines.push(String::new());

        match &bill.payment {
            Some(payment) if bill.is_paid() => lines.push(format!(
                "PAID on {} via {} (ref {})",
                payment.paid_at.format("%d %b %Y"),
                payment.method,
                payment.reference
            )),
            _ => {
                lines.push("Status: NOT PAID".to_string());
                if let Some(link) = bill.payment_link.as_deref() {
                    lines.push(format!("Pay online: {link}"));
                }
            }
        }
        if let Some(notes) = bill.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            lines.push(String::new());
            lines.push(format!("Notes: {notes}"));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl DocumentRenderer for TextInvoiceRenderer {
    async fn render(&self, bill: &Bill) -> Result<RenderedDocument, DispatchError> {
        Ok(RenderedDocument {
            file_name: invoice_file_name(bill),
            content_type: "text/plain; charset=utf-8".to_string(),
            bytes: self.render_text(bill).into_bytes(),
        })
    }
}

pub fn invoice_file_name(bill: &Bill) -> String {
    format!(
        "invoice-{}-{}.txt",
        bill.party.tenant_code.to_ascii_lowercase(),
        bill.billing_month
    )
}

/// Formats an amount with Indian digit grouping (`₹1,23,456`). Fractions are
/// only printed when present.
pub fn format_amount(amount: f64, currency_symbol: &str) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let magnitude = amount.abs();
    let whole = magnitude.trunc() as i64;
    let fraction = ((magnitude - magnitude.trunc()) * 100.0).round() as i64;
    let grouped = group_indian(whole);
    if fraction == 0 {
        format!("{sign}{currency_symbol}{grouped}")
    } else {
        format!("{sign}{currency_symbol}{grouped}.{fraction:02}")
    }
}

fn group_indian(n: i64) -> String {
    let digits = n.to_string();
    if digits.len() <= 3 {
        return digits;
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut result = String::new();
    for (i, ch) in head.chars().enumerate() {
        if i > 0 && (head.len() - i) % 2 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    format!("{result},{tail}")
}
