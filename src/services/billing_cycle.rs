use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Bill, BillingMonth, Room, Tenant};
use crate::services::bills::{BillExtras, BillService};
use crate::services::charges::{aggregate, resolve_rent, ChargeAdjustments};
use crate::services::occupancy::{resolve_in_room, Occupancy};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BillOutcome {
    Created { bill: Box<Bill> },
    Skipped { bill_id: Option<Uuid> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantBillResult {
    pub room_id: Uuid,
    pub room_number: String,
    pub tenant_id: Uuid,
    pub tenant_code: String,
    #[serde(flatten)]
    pub outcome: BillOutcome,
}

/// Result of one monthly billing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingCycleResult {
    pub billing_month: Option<BillingMonth>,
    pub rooms_scanned: u32,
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
    pub results: Vec<TenantBillResult>,
}

impl BillingCycleResult {
    fn record(&mut self, room: &Room, tenant: &Tenant, outcome: BillOutcome) {
        match &outcome {
            BillOutcome::Created { .. } => self.created += 1,
            BillOutcome::Skipped { .. } => self.skipped += 1,
            BillOutcome::Failed { .. } => self.failed += 1,
        }
        self.results.push(TenantBillResult {
            room_id: room.id,
            room_number: room.room_number.clone(),
            tenant_id: tenant.id,
            tenant_code: tenant.code.clone(),
            outcome,
        });
    }
}

/// Generate bills for every room and every tenant resident during `month`.
///
/// Residency is judged per room, so a tenant who changed rooms is billed only
/// where they actually lived that month.
/// The batch path always bills the full monthly rent. Tenants that already
/// have a bill are skipped, so a rerun for the same month creates nothing new.
/// A failure for one tenant is recorded and the run moves on.
pub async fn run_monthly_billing(
    service: &BillService,
    month: BillingMonth,
    include_processing_fee: bool,
) -> BillingResult<BillingCycleResult> {
    let rooms = service.store().list_rooms().await?;
    let mut result = BillingCycleResult {
        billing_month: Some(month),
        ..BillingCycleResult::default()
    };

    for room in rooms {
        result.rooms_scanned += 1;
        let tenants = match service.store().list_tenants(&room.known_tenant_ids()).await {
            Ok(tenants) => tenants,
            Err(error) => {
                warn!(room_id = %room.id, error = %error, "Failed to load tenants for room");
                continue;
            }
        };

        let residents = tenants
            .iter()
            .filter(|tenant| resolve_in_room(tenant, &room, month).is_some());
        for tenant in residents {
            let outcome = bill_tenant(service, &room, tenant, month, include_processing_fee).await;
            if let BillOutcome::Failed { reason } = &outcome {
                warn!(room = %room.room_number, tenant = %tenant.code, %month, reason, "Bill generation failed");
            }
            result.record(&room, tenant, outcome);
        }
    }

    info!(
        month = %month,
        rooms = result.rooms_scanned,
        created = result.created,
        skipped = result.skipped,
        failed = result.failed,
        "Monthly billing run completed"
    );
    Ok(result)
}

async fn bill_tenant(
    service: &BillService,
    room: &Room,
    tenant: &Tenant,
    month: BillingMonth,
    include_processing_fee: bool,
) -> BillOutcome {
    match service
        .store()
        .find_bill_by_room_tenant_month(room.id, tenant.id, month)
        .await
    {
        Ok(Some(existing)) => {
            return BillOutcome::Skipped {
                bill_id: Some(existing.id),
            }
        }
        Ok(None) => {}
        Err(error) => {
            return BillOutcome::Failed {
                reason: error.to_string(),
            }
        }
    }

    let adjustments = ChargeAdjustments {
        include_processing_fee,
        ..ChargeAdjustments::default()
    };
    let breakdown = resolve_rent(tenant.rent_amount, room.base_rent).and_then(|rent| {
        aggregate(rent, &Occupancy::full_month(tenant.id, month), &adjustments)
    });
    let breakdown = match breakdown {
        Ok(breakdown) => breakdown,
        Err(error) => {
            return BillOutcome::Failed {
                reason: error.to_string(),
            }
        }
    };

    let created = service
        .create(room, tenant, month, breakdown, BillExtras::default())
        .await;
    match created {
        Ok(bill) => BillOutcome::Created {
            bill: Box::new(bill),
        },
        // Lost the race against an interactive or parallel creator.
        Err(BillingError::DuplicateBill { .. }) => BillOutcome::Skipped { bill_id: None },
        Err(error) => BillOutcome::Failed {
            reason: error.to_string(),
        },
    }
}
