use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    Bill, BillPayment, BillingMonth, Building, PaymentStatus, Room, Tenant, TenantPayment,
};
use crate::repository::{unpaid_method, BillDetails, BillRevision, BillingStore};

#[derive(Debug, Default)]
struct MemoryState {
    buildings: HashMap<Uuid, Building>,
    rooms: HashMap<Uuid, Room>,
    tenants: HashMap<Uuid, Tenant>,
    bills: HashMap<Uuid, Bill>,
    tenant_sequence: i64,
}

/// Process-local store. Every write happens under a single lock, which is
/// what makes the bill uniqueness check and the paid compare-and-set atomic.
#[derive(Debug, Default)]
pub struct MemoryBillingStore {
    state: RwLock<MemoryState>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_building(&self, building: Building) -> Building {
        let mut state = self.state.write().await;
        state.buildings.insert(building.id, building.clone());
        building
    }

    pub async fn bill_count(&self) -> usize {
        self.state.read().await.bills.len()
    }
}

fn not_found(entity: &str) -> BillingError {
    BillingError::NotFound(format!("{entity} record not found."))
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn get_building(&self, building_id: Uuid) -> BillingResult<Building> {
        self.state
            .read()
            .await
            .buildings
            .get(&building_id)
            .cloned()
            .ok_or_else(|| not_found("buildings"))
    }

    async fn get_room(&self, room_id: Uuid) -> BillingResult<Room> {
        self.state
            .read()
            .await
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| not_found("rooms"))
    }

    async fn list_rooms(&self) -> BillingResult<Vec<Room>> {
        let state = self.state.read().await;
        let mut rooms = state.rooms.values().cloned().collect::<Vec<_>>();
        rooms.sort_by(|a, b| {
            (a.building_id, a.room_number.as_str()).cmp(&(b.building_id, b.room_number.as_str()))
        });
        Ok(rooms)
    }

    async fn save_room(&self, room: &Room) -> BillingResult<Room> {
        let mut state = self.state.write().await;
        let clash = state.rooms.values().any(|existing| {
            existing.id != room.id
                && existing.building_id == room.building_id
                && existing.room_number == room.room_number
        });
        if clash {
            return Err(BillingError::Validation(format!(
                "Room number {} already exists in this building.",
                room.room_number
            )));
        }
        let mut saved = room.clone();
        saved.updated_at = Utc::now();
        state.rooms.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> BillingResult<Tenant> {
        self.state
            .read()
            .await
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| not_found("tenants"))
    }

    async fn list_tenants(&self, tenant_ids: &[Uuid]) -> BillingResult<Vec<Tenant>> {
        let state = self.state.read().await;
        Ok(tenant_ids
            .iter()
            .filter_map(|id| state.tenants.get(id).cloned())
            .collect())
    }

    async fn next_tenant_sequence(&self) -> BillingResult<i64> {
        let mut state = self.state.write().await;
        state.tenant_sequence += 1;
        Ok(state.tenant_sequence)
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant> {
        let mut state = self.state.write().await;
        if state.tenants.values().any(|existing| existing.code == tenant.code) {
            return Err(BillingError::Validation(format!(
                "Tenant code {} is already taken.",
                tenant.code
            )));
        }
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant.clone())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> BillingResult<Tenant> {
        let mut state = self.state.write().await;
        let stored = state
            .tenants
            .get_mut(&tenant.id)
            .ok_or_else(|| not_found("tenants"))?;
        stored.full_name = tenant.full_name.clone();
        stored.phone = tenant.phone.clone();
        stored.email = tenant.email.clone();
        stored.room_id = tenant.room_id;
        stored.move_in_date = tenant.move_in_date;
        stored.move_out_date = tenant.move_out_date;
        stored.rent_amount = tenant.rent_amount;
        stored.advanced_amount = tenant.advanced_amount;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn get_bill(&self, bill_id: Uuid) -> BillingResult<Bill> {
        self.state
            .read()
            .await
            .bills
            .get(&bill_id)
            .cloned()
            .ok_or_else(|| not_found("bills"))
    }

    async fn find_bill_by_room_tenant_month(
        &self,
        room_id: Uuid,
        tenant_id: Uuid,
        month: BillingMonth,
    ) -> BillingResult<Option<Bill>> {
        let state = self.state.read().await;
        Ok(state
            .bills
            .values()
            .find(|bill| {
                bill.room_id == room_id && bill.tenant_id == tenant_id && bill.billing_month == month
            })
            .cloned())
    }

    async fn list_bills_for_month(&self, month: BillingMonth) -> BillingResult<Vec<Bill>> {
        let state = self.state.read().await;
        let mut bills = state
            .bills
            .values()
            .filter(|bill| bill.billing_month == month)
            .cloned()
            .collect::<Vec<_>>();
        bills.sort_by_key(|bill| bill.created_at);
        Ok(bills)
    }

    async fn insert_bill(&self, bill: &Bill) -> BillingResult<Bill> {
        let mut state = self.state.write().await;
        let duplicate = state.bills.values().any(|existing| {
            existing.room_id == bill.room_id
                && existing.tenant_id == bill.tenant_id
                && existing.billing_month == bill.billing_month
        });
        if duplicate {
            return Err(BillingError::DuplicateBill {
                room_id: bill.room_id,
                tenant_id: bill.tenant_id,
                billing_month: bill.billing_month.first_day(),
            });
        }
        state.bills.insert(bill.id, bill.clone());
        Ok(bill.clone())
    }

    async fn update_bill_financials(
        &self,
        bill_id: Uuid,
        revision: &BillRevision,
    ) -> BillingResult<Bill> {
        let mut state = self.state.write().await;
        let stored = state.bills.get_mut(&bill_id).ok_or_else(|| not_found("bills"))?;
        if stored.payment_status == PaymentStatus::Paid {
            return Err(BillingError::AlreadyPaid(format!(
                "Bill {bill_id} is already paid; its charges can no longer change."
            )));
        }
        stored.charges = revision.charges.clone();
        stored.totals = revision.totals.clone();
        stored.total_amount = revision.total_amount;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_bill_details(&self, bill_id: Uuid, details: &BillDetails) -> BillingResult<Bill> {
        let mut state = self.state.write().await;
        let stored = state.bills.get_mut(&bill_id).ok_or_else(|| not_found("bills"))?;
        if let Some(method) = &details.payment_method {
            let Some(payment) = stored.payment.as_mut() else {
                return Err(unpaid_method(bill_id));
            };
            payment.method = method.clone();
        }
        if let Some(notes) = &details.notes {
            stored.notes = Some(notes.trim().to_string()).filter(|n| !n.is_empty());
        }
        if let Some(link) = &details.payment_link {
            stored.payment_link = Some(link.clone());
        }
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn mark_bill_paid(&self, bill_id: Uuid, payment: &BillPayment) -> BillingResult<Bill> {
        let mut state = self.state.write().await;
        let stored = state.bills.get_mut(&bill_id).ok_or_else(|| not_found("bills"))?;
        if stored.payment_status == PaymentStatus::Paid {
            return Err(BillingError::AlreadyPaid(format!("Bill {bill_id} is already paid.")));
        }
        stored.payment_status = PaymentStatus::Paid;
        stored.payment = Some(payment.clone());
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn append_tenant_payment(
        &self,
        tenant_id: Uuid,
        payment: &TenantPayment,
    ) -> BillingResult<Tenant> {
        let mut state = self.state.write().await;
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| not_found("tenants"))?;
        tenant.payments.push(payment.clone());
        tenant.last_payment = Some(payment.clone());
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn update_tenant_due(&self, tenant_id: Uuid, settled_amount: f64) -> BillingResult<Tenant> {
        let mut state = self.state.write().await;
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| not_found("tenants"))?;
        if tenant.due_payment.pending_amount > 0.0 {
            tenant.due_payment = tenant.due_payment.settle(settled_amount);
            tenant.updated_at = Utc::now();
        }
        Ok(tenant.clone())
    }
}
