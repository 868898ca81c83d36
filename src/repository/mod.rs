use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    Bill, BillPayment, BillTotals, BillingMonth, Building, Charge, Room, Tenant, TenantPayment,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryBillingStore;
pub use postgres::PgBillingStore;

/// Persistence seam for the billing core.
///
/// Implementations must enforce bill uniqueness on
/// `(room_id, tenant_id, billing_month)` inside `insert_bill` itself, and must
/// make `mark_bill_paid` a compare-and-set on the payment status. Tenant
/// ledger fields (`payments`, `last_payment`, `due_payment`) are written only
/// through `append_tenant_payment` and `update_tenant_due`; `save_tenant`
/// leaves them untouched.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn get_building(&self, building_id: Uuid) -> BillingResult<Building>;

    async fn get_room(&self, room_id: Uuid) -> BillingResult<Room>;
    async fn list_rooms(&self) -> BillingResult<Vec<Room>>;
    async fn save_room(&self, room: &Room) -> BillingResult<Room>;

    async fn get_tenant(&self, tenant_id: Uuid) -> BillingResult<Tenant>;
    async fn list_tenants(&self, tenant_ids: &[Uuid]) -> BillingResult<Vec<Tenant>>;
    async fn next_tenant_sequence(&self) -> BillingResult<i64>;
    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant>;
    async fn save_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant>;

    async fn get_bill(&self, bill_id: Uuid) -> BillingResult<Bill>;
    async fn find_bill_by_room_tenant_month(
        &self,
        room_id: Uuid,
        tenant_id: Uuid,
        month: BillingMonth,
    ) -> BillingResult<Option<Bill>>;
    async fn list_bills_for_month(&self, month: BillingMonth) -> BillingResult<Vec<Bill>>;
    /// Fails with `DuplicateBill` when the triple is already billed.
    async fn insert_bill(&self, bill: &Bill) -> BillingResult<Bill>;
    /// Replaces charges and totals of an unpaid bill. Fails with
    /// `AlreadyPaid` if the stored bill has been paid in the meantime.
    async fn update_bill_financials(
        &self,
        bill_id: Uuid,
        revision: &BillRevision,
    ) -> BillingResult<Bill>;
    /// Writes only the fields present in `details`. Status, payment and
    /// amounts are never taken from the caller.
    async fn update_bill_details(&self, bill_id: Uuid, details: &BillDetails) -> BillingResult<Bill>;
    /// Flips `NotPaid` to `Paid`; fails with `AlreadyPaid` otherwise.
    async fn mark_bill_paid(&self, bill_id: Uuid, payment: &BillPayment) -> BillingResult<Bill>;

    async fn append_tenant_payment(
        &self,
        tenant_id: Uuid,
        payment: &TenantPayment,
    ) -> BillingResult<Tenant>;
    /// Decrements the pending due by `settled_amount`, clamped at zero.
    async fn update_tenant_due(&self, tenant_id: Uuid, settled_amount: f64) -> BillingResult<Tenant>;
}

/// Financial fields of a bill, replaced together.
#[derive(Debug, Clone, PartialEq)]
pub struct BillRevision {
    pub charges: Vec<Charge>,
    pub totals: BillTotals,
    pub total_amount: i64,
}

/// Bookkeeping fields of a bill. `None` leaves the stored value alone and an
/// empty `notes` clears it. `payment_method` only applies to a paid bill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillDetails {
    pub notes: Option<String>,
    pub payment_link: Option<String>,
    pub payment_method: Option<String>,
}

impl BillDetails {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none() && self.payment_link.is_none() && self.payment_method.is_none()
    }
}

pub(crate) fn unpaid_method(bill_id: Uuid) -> BillingError {
    BillingError::Validation(format!(
        "Bill {bill_id} is not paid; a payment method can only be recorded on a paid bill."
    ))
}

/// Renders a sequence number as a tenant code (`T001`, `T042`, `T1234`).
pub fn format_tenant_code(sequence: i64) -> String {
    format!("T{:03}", sequence.max(0))
}

#[cfg(test)]
mod tests {
    use super::format_tenant_code;

    #[test]
    fn pads_tenant_codes() {
        assert_eq!(format_tenant_code(1), "T001");
        assert_eq!(format_tenant_code(42), "T042");
        assert_eq!(format_tenant_code(1234), "T1234");
    }
}
