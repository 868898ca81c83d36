use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    sum_charges, Bill, BillParty, BillPayment, BillTotals, BillingMonth, Building, Charge,
    PaymentStatus, Room, Tenant, TenantPayment,
};
use crate::repository::{unpaid_method, BillDetails, BillRevision, BillingStore};
use crate::services::charges::{
    aggregate, resolve_rent, totals_from_charges, ChargeAdjustments, ChargeBreakdown,
};
use crate::services::dispatch::BillDispatcher;
use crate::services::notifications::BillEvent;
use crate::services::occupancy::resolve_in_room;

/// Interactive "generate bill" request for one tenant and month.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GenerateBillInput {
    pub room_id: Uuid,
    pub tenant_id: Uuid,
    pub billing_month: BillingMonth,
    #[serde(flatten)]
    #[validate(nested)]
    pub adjustments: ChargeAdjustments,
    pub notes: Option<String>,
    #[validate(url)]
    pub payment_link: Option<String>,
}

/// Partial update of an existing bill. `charges`, `totals` and
/// `total_amount` are financial fields and are frozen once the bill is paid.
/// `totals` and `total_amount` are only accepted alongside `charges`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct BillPatch {
    pub charges: Option<Vec<Charge>>,
    pub totals: Option<BillTotals>,
    pub total_amount: Option<i64>,
    pub notes: Option<String>,
    #[validate(url)]
    pub payment_link: Option<String>,
    /// Reconciliation bookkeeping on an already paid bill.
    #[validate(length(min = 1, max = 64))]
    pub payment_method: Option<String>,
}

impl BillPatch {
    pub fn touches_financials(&self) -> bool {
        self.charges.is_some() || self.totals.is_some() || self.total_amount.is_some()
    }
}

/// Free-form fields attached to a new bill.
#[derive(Debug, Clone, Default)]
pub struct BillExtras {
    pub notes: Option<String>,
    pub payment_link: Option<String>,
}

/// A payment event already verified by the payment gateway boundary.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PaymentConfirmation {
    #[validate(length(min = 1, max = 128))]
    pub payment_ref: String,
    #[validate(length(min = 1, max = 64))]
    pub method: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub receipt_number: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaidBill {
    pub bill: Bill,
    pub tenant: Tenant,
}

#[derive(Clone)]
pub struct BillService {
    store: Arc<dyn BillingStore>,
    dispatcher: BillDispatcher,
}

impl BillService {
    pub fn new(store: Arc<dyn BillingStore>, dispatcher: BillDispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &BillDispatcher {
        &self.dispatcher
    }

    pub async fn get_bill(&self, bill_id: Uuid) -> BillingResult<Bill> {
        self.store.get_bill(bill_id).await
    }

    pub async fn list_bills_for_month(&self, month: BillingMonth) -> BillingResult<Vec<Bill>> {
        self.store.list_bills_for_month(month).await
    }

    /// Prorates, aggregates and creates the bill for one tenant-month.
    pub async fn generate_bill(&self, input: GenerateBillInput) -> BillingResult<Bill> {
        input.validate()?;
        let room = self.store.get_room(input.room_id).await?;
        let tenant = self.store.get_tenant(input.tenant_id).await?;

        let occupancy = resolve_in_room(&tenant, &room, input.billing_month)
            .ok_or_else(|| not_resident(&tenant, &room, input.billing_month))?;
        let rent = resolve_rent(tenant.rent_amount, room.base_rent)?;
        let breakdown = aggregate(rent, &occupancy, &input.adjustments)?;

        self.create(
            &room,
            &tenant,
            input.billing_month,
            breakdown,
            BillExtras {
                notes: input.notes,
                payment_link: input.payment_link,
            },
        )
        .await
    }

    /// Persists a new unpaid bill. Tenant and room records are not touched.
    pub async fn create(
        &self,
        room: &Room,
        tenant: &Tenant,
        month: BillingMonth,
        breakdown: ChargeBreakdown,
        extras: BillExtras,
    ) -> BillingResult<Bill> {
        validate_breakdown(&breakdown)?;
        if resolve_in_room(tenant, room, month).is_none() {
            return Err(not_resident(tenant, room, month));
        }

        // Fast path only; the store's uniqueness constraint is what actually
        // closes the race with a concurrent creator.
        if self
            .store
            .find_bill_by_room_tenant_month(room.id, tenant.id, month)
            .await?
            .is_some()
        {
            return Err(BillingError::DuplicateBill {
                room_id: room.id,
                tenant_id: tenant.id,
                billing_month: month.first_day(),
            });
        }

        let building = self.load_building(room).await?;
        let now = Utc::now();
        let bill = Bill {
            id: Uuid::new_v4(),
            room_id: room.id,
            tenant_id: tenant.id,
            billing_month: month,
            charges: breakdown.charges,
            totals: breakdown.totals,
            total_amount: breakdown.total_amount,
            payment_status: PaymentStatus::NotPaid,
            payment: None,
            notes: extras.notes.filter(|n| !n.trim().is_empty()),
            payment_link: extras.payment_link,
            party: BillParty::capture(tenant, room, building.as_ref()),
            created_at: now,
            updated_at: now,
        };

        let created = self.store.insert_bill(&bill).await?;
        info!(
            bill_id = %created.id,
            tenant = %tenant.code,
            room = %room.room_number,
            month = %month,
            total = created.total_amount,
            "Bill created"
        );
        self.dispatcher.spawn(created.clone(), BillEvent::Issued);
        Ok(created)
    }

    /// Applies a partial update. Financial edits carry the full set of charge
    /// lines; the totals summary and the total amount follow from them.
    /// Bookkeeping fields are written field by field and never touch the
    /// payment status or the payment record.
    pub async fn update(&self, bill_id: Uuid, patch: BillPatch) -> BillingResult<Bill> {
        patch.validate()?;
        let current = self.store.get_bill(bill_id).await?;
        let financial = patch.touches_financials();
        if financial && current.is_paid() {
            return Err(BillingError::AlreadyPaid(format!(
                "Bill {bill_id} is already paid; its charges can no longer change."
            )));
        }
        if patch.payment_method.is_some() && !current.is_paid() {
            return Err(unpaid_method(bill_id));
        }

        let revision = if financial { Some(revise_charges(&patch)?) } else { None };
        let details = BillDetails {
            notes: patch.notes,
            payment_link: patch.payment_link,
            payment_method: patch.payment_method,
        };
        if revision.is_none() && details.is_empty() {
            return Ok(current);
        }

        let mut saved = current;
        if let Some(revision) = &revision {
            saved = self.store.update_bill_financials(bill_id, revision).await?;
        }
        if !details.is_empty() {
            saved = self.store.update_bill_details(bill_id, &details).await?;
        }
        info!(bill_id = %saved.id, financial, total = saved.total_amount, "Bill updated");
        self.dispatcher.spawn(saved.clone(), BillEvent::Revised);
        Ok(saved)
    }

    /// Marks the bill paid, then records the payment on the tenant's ledger.
    ///
    /// The bill flip, the ledger append and the due settlement run in that
    /// order, each committed before the next. Invoice regeneration and the
    /// receipt notification are spawned only afterwards.
    pub async fn pay(&self, bill_id: Uuid, confirmation: PaymentConfirmation) -> BillingResult<PaidBill> {
        confirmation.validate()?;
        let current = self.store.get_bill(bill_id).await?;
        if current.is_paid() {
            return Err(BillingError::AlreadyPaid(format!("Bill {bill_id} is already paid.")));
        }

        let paid_at = confirmation.paid_at.unwrap_or_else(Utc::now);
        let payment = BillPayment {
            method: confirmation.method.trim().to_string(),
            reference: confirmation.payment_ref.trim().to_string(),
            paid_at,
        };
        let bill = self.store.mark_bill_paid(bill_id, &payment).await?;

        let ledger_entry = TenantPayment {
            amount: bill.total_amount as f64,
            date: paid_at,
            method: payment.method.clone(),
            receipt_number: confirmation
                .receipt_number
                .or_else(|| Some(payment.reference.clone())),
            note: confirmation
                .note
                .or_else(|| Some(format!("Rent for {}", bill.billing_month.label()))),
            bill_id: Some(bill.id),
        };
        let tenant = self
            .store
            .append_tenant_payment(bill.tenant_id, &ledger_entry)
            .await
            .map_err(|e| ledger_failure(&bill, "append payment", e))?;
        let tenant = self
            .store
            .update_tenant_due(tenant.id, bill.total_amount as f64)
            .await
            .map_err(|e| ledger_failure(&bill, "settle due", e))?;

        info!(
            bill_id = %bill.id,
            tenant = %tenant.code,
            reference = %payment.reference,
            amount = bill.total_amount,
            pending_due = tenant.due_payment.pending_amount,
            "Bill paid"
        );
        self.dispatcher.spawn(bill.clone(), BillEvent::Paid);
        Ok(PaidBill { bill, tenant })
    }

    async fn load_building(&self, room: &Room) -> BillingResult<Option<Building>> {
        match self.store.get_building(room.building_id).await {
            Ok(building) => Ok(Some(building)),
            Err(BillingError::NotFound(_)) => {
                warn!(room_id = %room.id, building_id = %room.building_id, "Room references a missing building");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

fn not_resident(tenant: &Tenant, room: &Room, month: BillingMonth) -> BillingError {
    BillingError::Validation(format!(
        "Tenant {} did not occupy room {} during {month}.",
        tenant.code, room.room_number
    ))
}

fn validate_breakdown(breakdown: &ChargeBreakdown) -> BillingResult<()> {
    if breakdown.charges.is_empty() {
        return Err(BillingError::Validation("A bill needs at least one charge.".to_string()));
    }
    if breakdown.total_amount <= 0 {
        return Err(BillingError::Validation(format!(
            "Bill total must be positive, got {}.",
            breakdown.total_amount
        )));
    }
    Ok(())
}

/// Turns a financial patch into the replacement charges, totals and total.
/// Totals or a total amount that disagree with the charge lines are rejected.
fn revise_charges(patch: &BillPatch) -> BillingResult<BillRevision> {
    let Some(charges) = patch.charges.clone() else {
        return Err(BillingError::Validation(
            "Totals and the total amount follow the charge lines; send the charges with them."
                .to_string(),
        ));
    };
    if charges.is_empty() {
        return Err(BillingError::Validation("A bill needs at least one charge.".to_string()));
    }
    if charges.iter().any(|charge| !charge.amount.is_finite() || charge.title.trim().is_empty()) {
        return Err(BillingError::Validation(
            "Every charge needs a title and a finite amount.".to_string(),
        ));
    }

    let total_amount = sum_charges(&charges);
    if total_amount <= 0 {
        return Err(BillingError::Validation(format!(
            "Bill total must be positive, got {total_amount}."
        )));
    }
    if let Some(explicit) = patch.total_amount {
        if explicit != total_amount {
            return Err(BillingError::Validation(format!(
                "total_amount {explicit} does not match the charge lines ({total_amount})."
            )));
        }
    }
    let totals = match &patch.totals {
        Some(totals) if totals.total_amount() != total_amount => {
            return Err(BillingError::Validation(format!(
                "Totals add up to {}, but the charge lines add up to {total_amount}.",
                totals.total_amount()
            )));
        }
        Some(totals) => totals.clone(),
        None => totals_from_charges(&charges),
    };

    Ok(BillRevision {
        charges,
        totals,
        total_amount,
    })
}

fn ledger_failure(bill: &Bill, step: &str, cause: BillingError) -> BillingError {
    error!(
        bill_id = %bill.id,
        tenant_id = %bill.tenant_id,
        step,
        error = %cause,
        "Bill is marked paid but the tenant ledger was not updated; reconcile manually"
    );
    cause
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::BillService;
    use crate::models::{
        Bill, BillParty, BillTotals, BillingMonth, Building, Charge, PaymentStatus, Room, Tenant,
        TenantHistoryEntry,
    };
    use crate::repository::{BillingStore, MemoryBillingStore};
    use crate::services::dispatch::test_support::{
        dispatcher, memory_documents, FlakyRenderer, RecordingQueue,
    };
    use crate::services::invoice::MemoryDocumentStore;
    use crate::services::occupancy::test_support::tenant;

    pub fn sample_bill() -> Bill {
        let now = Utc::now();
        Bill {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            billing_month: BillingMonth::new(2026, 4).expect("valid month"),
            charges: vec![
                Charge::new("Rent", 2100.0),
                Charge::new("Electricity", 200.0),
                Charge::new("Processing Fee", 42.0),
            ],
            totals: BillTotals {
                rent: 2100.0,
                electricity: 200.0,
                processing_fee: 42.0,
                ..BillTotals::default()
            },
            total_amount: 2342,
            payment_status: PaymentStatus::NotPaid,
            payment: None,
            notes: None,
            payment_link: None,
            party: BillParty {
                tenant_code: "T001".to_string(),
                tenant_name: "Asha Rao".to_string(),
                tenant_phone: Some("+919800000001".to_string()),
                tenant_email: None,
                room_number: "101".to_string(),
                building_name: "Lotus Residency".to_string(),
                building_address: Some("12 MG Road, Pune".to_string()),
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub struct Fixture {
        pub store: Arc<MemoryBillingStore>,
        pub queue: Arc<RecordingQueue>,
        pub documents: Arc<MemoryDocumentStore>,
        pub service: BillService,
        pub room: Room,
    }

    impl Fixture {
        pub async fn new() -> Self {
            Self::with_queue(RecordingQueue::default(), false).await
        }

        pub async fn with_queue(queue: RecordingQueue, renderer_fails: bool) -> Self {
            let store = Arc::new(MemoryBillingStore::new());
            let building = store
                .insert_building(Building {
                    id: Uuid::new_v4(),
                    name: "Lotus Residency".to_string(),
                    address: Some("12 MG Road, Pune".to_string()),
                })
                .await;
            let room = store
                .save_room(&Room::new(building.id, "101", Some(2500.0)))
                .await
                .expect("room saved");
            let queue = Arc::new(queue);
            let documents = memory_documents();
            let renderer = Arc::new(FlakyRenderer::new(renderer_fails));
            let service = BillService::new(
                store.clone(),
                dispatcher(renderer, documents.clone(), queue.clone()),
            );
            Self {
                store,
                queue,
                documents,
                service,
                room,
            }
        }

        /// Seeds a tenant directly into the room, bypassing the tenancy flows.
        pub async fn seed_tenant(
            &mut self,
            code: &str,
            move_in: DateTime<Utc>,
            move_out: Option<DateTime<Utc>>,
        ) -> Tenant {
            let mut seeded = tenant(code, move_in, move_out);
            seeded.room_id = Some(self.room.id);
            let seeded = self.store.insert_tenant(&seeded).await.expect("tenant saved");

            if move_out.is_none() {
                self.room.tenants.push(seeded.id);
            }
            self.room.tenant_history.push(TenantHistoryEntry {
                tenant_id: seeded.id,
                tenant_code: seeded.code.clone(),
                full_name: seeded.full_name.clone(),
                booking_date: move_in,
                leaving_date: move_out,
            });
            self.room = self.store.save_room(&self.room).await.expect("room saved");
            seeded
        }
    }
}
