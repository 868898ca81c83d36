use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A month-precision billing period, stored as the first day of the month.
///
/// Serialized as that first day (`YYYY-MM-01`). Deserialization goes through
/// [`FromStr`], so any day of the month and bare `YYYY-MM` normalize to the
/// same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingMonth(NaiveDate);

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> BillingResult<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .ok_or_else(|| BillingError::Validation(format!("Invalid billing month {year}-{month:02}.")))
    }

    /// Truncates any date to its month.
    pub fn containing(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().0.pred_opt().unwrap_or(self.0)
    }

    pub fn days_in_month(&self) -> u32 {
        (self.last_day() - self.first_day()).num_days() as u32 + 1
    }

    pub fn next(&self) -> Self {
        let (year, month) = if self.month() == 12 {
            (self.year() + 1, 1)
        } else {
            (self.year(), self.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .unwrap_or(*self)
    }

    pub fn previous(&self) -> Self {
        Self::containing(self.0.pred_opt().unwrap_or(self.0))
    }

    pub fn label(&self) -> String {
        self.0.format("%B %Y").to_string()
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for BillingMonth {
    type Err = BillingError;

    /// Accepts `YYYY-MM` or a full `YYYY-MM-DD` date (day is ignored).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self::containing(date));
        }
        let invalid = || BillingError::Validation(format!("Invalid billing month '{trimmed}'."));
        let (year, month) = trimmed.split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl Serialize for BillingMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BillingMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl From<BillingMonth> for NaiveDate {
    fn from(month: BillingMonth) -> Self {
        month.first_day()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Building {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
}

/// Immutable copy of a tenant's identity taken at booking time. Closing the
/// tenancy only fills `leaving_date`; the entry never follows later edits to
/// the live tenant record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantHistoryEntry {
    pub tenant_id: Uuid,
    pub tenant_code: String,
    pub full_name: String,
    pub booking_date: DateTime<Utc>,
    pub leaving_date: Option<DateTime<Utc>>,
}

impl TenantHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.leaving_date.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub building_id: Uuid,
    pub room_number: String,
    pub base_rent: Option<f64>,
    #[serde(default)]
    pub tenants: Vec<Uuid>,
    #[serde(default)]
    pub tenant_history: Vec<TenantHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn new(building_id: Uuid, room_number: &str, base_rent: Option<f64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            building_id,
            room_number: room_number.trim().to_string(),
            base_rent,
            tenants: Vec::new(),
            tenant_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True when at least one current tenant has not moved out.
    pub fn is_occupied(&self, tenants: &[Tenant]) -> bool {
        tenants
            .iter()
            .any(|tenant| self.tenants.contains(&tenant.id) && tenant.move_out_date.is_none())
    }

    pub fn open_history_entry(&self, tenant_id: Uuid) -> Option<&TenantHistoryEntry> {
        self.tenant_history
            .iter()
            .find(|entry| entry.tenant_id == tenant_id && entry.is_open())
    }

    /// Every tenant that ever occupied the room, current tenants first.
    pub fn known_tenant_ids(&self) -> Vec<Uuid> {
        let mut ids = self.tenants.clone();
        for entry in &self.tenant_history {
            if !ids.contains(&entry.tenant_id) {
                ids.push(entry.tenant_id);
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantPayment {
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub method: String,
    pub receipt_number: Option<String>,
    pub note: Option<String>,
    pub bill_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DuePayment {
    pub pending_amount: f64,
    pub due_date: Option<NaiveDate>,
}

impl DuePayment {
    /// Reduces the pending amount by `settled`, never below zero. The due date
    /// is cleared once nothing is pending.
    pub fn settle(&self, settled: f64) -> Self {
        let pending_amount = (self.pending_amount - settled).max(0.0);
        Self {
            pending_amount,
            due_date: if pending_amount > 0.0 { self.due_date } else { None },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub code: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub room_id: Option<Uuid>,
    pub move_in_date: DateTime<Utc>,
    pub move_out_date: Option<DateTime<Utc>>,
    pub rent_amount: Option<f64>,
    #[serde(default)]
    pub advanced_amount: f64,
    #[serde(default)]
    pub payments: Vec<TenantPayment>,
    pub last_payment: Option<TenantPayment>,
    #[serde(default)]
    pub due_payment: DuePayment,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Charge {
    pub title: String,
    pub amount: f64,
}

impl Charge {
    pub fn new(title: &str, amount: f64) -> Self {
        Self {
            title: title.to_string(),
            amount,
        }
    }
}

/// Component totals of a bill. Every value is a non-negative magnitude; the
/// discount is subtracted when the total is derived.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BillTotals {
    pub rent: f64,
    pub electricity: f64,
    pub processing_fee: f64,
    pub additional_amount: f64,
    pub discount: f64,
}

impl BillTotals {
    pub fn total_amount(&self) -> i64 {
        (self.rent + self.electricity + self.additional_amount - self.discount + self.processing_fee)
            .round() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotPaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotPaid => "not_paid",
            Self::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillPayment {
    pub method: String,
    pub reference: String,
    pub paid_at: DateTime<Utc>,
}

/// Tenant, room and building details copied onto the bill when it is issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BillParty {
    pub tenant_code: String,
    pub tenant_name: String,
    pub tenant_phone: Option<String>,
    pub tenant_email: Option<String>,
    pub room_number: String,
    pub building_name: String,
    pub building_address: Option<String>,
}

impl BillParty {
    pub fn capture(tenant: &Tenant, room: &Room, building: Option<&Building>) -> Self {
        Self {
            tenant_code: tenant.code.clone(),
            tenant_name: tenant.full_name.clone(),
            tenant_phone: tenant.phone.clone(),
            tenant_email: tenant.email.clone(),
            room_number: room.room_number.clone(),
            building_name: building.map(|b| b.name.clone()).unwrap_or_default(),
            building_address: building.and_then(|b| b.address.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bill {
    pub id: Uuid,
    pub room_id: Uuid,
    pub tenant_id: Uuid,
    pub billing_month: BillingMonth,
    pub charges: Vec<Charge>,
    pub totals: BillTotals,
    pub total_amount: i64,
    pub payment_status: PaymentStatus,
    pub payment: Option<BillPayment>,
    pub notes: Option<String>,
    pub payment_link: Option<String>,
    pub party: BillParty,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// Rounded sum of the charge lines, used when no explicit total is supplied.
pub fn sum_charges(charges: &[Charge]) -> i64 {
    charges.iter().map(|charge| charge.amount).sum::<f64>().round() as i64
}
