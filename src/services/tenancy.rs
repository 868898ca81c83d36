use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::{DuePayment, Room, Tenant, TenantHistoryEntry};
use crate::repository::{format_tenant_code, BillingStore};

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RegisterTenantInput {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    pub rent_amount: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub advanced_amount: f64,
    pub move_in_date: Option<DateTime<Utc>>,
}

/// A tenant together with the room it was just placed in.
#[derive(Debug, Clone)]
pub struct Tenancy {
    pub room: Room,
    pub tenant: Tenant,
}

#[derive(Clone)]
pub struct TenancyService {
    store: Arc<dyn BillingStore>,
}

impl TenancyService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn register_tenant(&self, input: RegisterTenantInput) -> BillingResult<Tenant> {
        input.validate()?;
        let full_name = input.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(BillingError::Validation("full_name is required.".to_string()));
        }

        let sequence = self.store.next_tenant_sequence().await?;
        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            code: format_tenant_code(sequence),
            full_name,
            phone: non_empty(input.phone),
            email: non_empty(input.email),
            room_id: None,
            move_in_date: input.move_in_date.unwrap_or(now),
            move_out_date: None,
            rent_amount: input.rent_amount,
            advanced_amount: input.advanced_amount,
            payments: Vec::new(),
            last_payment: None,
            due_payment: DuePayment::default(),
            created_at: now,
            updated_at: now,
        };

        let tenant = self.store.insert_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, code = %tenant.code, "Tenant registered");
        Ok(tenant)
    }

    /// Places a tenant in a room. Re-running for the same room is harmless:
    /// the tenant is listed once and at most one history entry stays open.
    pub async fn move_in(
        &self,
        room_id: Uuid,
        tenant_id: Uuid,
        booking_date: Option<DateTime<Utc>>,
    ) -> BillingResult<Tenancy> {
        let mut room = self.store.get_room(room_id).await?;
        let mut tenant = self.store.get_tenant(tenant_id).await?;

        if let Some(current) = tenant.room_id {
            if current != room.id && tenant.move_out_date.is_none() {
                return Err(BillingError::Validation(format!(
                    "Tenant {} still occupies another room.",
                    tenant.code
                )));
            }
        }

        let booking_date = booking_date.unwrap_or_else(Utc::now);
        if !room.tenants.contains(&tenant.id) {
            room.tenants.push(tenant.id);
        }
        if room.open_history_entry(tenant.id).is_none() {
            room.tenant_history.push(TenantHistoryEntry {
                tenant_id: tenant.id,
                tenant_code: tenant.code.clone(),
                full_name: tenant.full_name.clone(),
                booking_date,
                leaving_date: None,
            });
        }

        tenant.room_id = Some(room.id);
        tenant.move_in_date = booking_date;
        tenant.move_out_date = None;

        let room = self.store.save_room(&room).await?;
        let tenant = self.store.save_tenant(&tenant).await?;
        info!(tenant = %tenant.code, room = %room.room_number, "Tenant moved in");
        Ok(Tenancy { room, tenant })
    }

    /// Closes the tenancy. Once a move-out date is set, later calls return
    /// the tenant unchanged.
    pub async fn move_out(
        &self,
        tenant_id: Uuid,
        leaving_date: Option<DateTime<Utc>>,
    ) -> BillingResult<Tenant> {
        let mut tenant = self.store.get_tenant(tenant_id).await?;
        if tenant.move_out_date.is_some() {
            return Ok(tenant);
        }

        let leaving_date = leaving_date.unwrap_or_else(Utc::now);
        if leaving_date < tenant.move_in_date {
            return Err(BillingError::Validation(format!(
                "Tenant {} cannot leave before moving in.",
                tenant.code
            )));
        }

        if let Some(room_id) = tenant.room_id {
            let mut room = self.store.get_room(room_id).await?;
            room.tenants.retain(|id| *id != tenant.id);
            if let Some(entry) = room
                .tenant_history
                .iter_mut()
                .find(|entry| entry.tenant_id == tenant.id && entry.is_open())
            {
                entry.leaving_date = Some(leaving_date);
            }
            self.store.save_room(&room).await?;
        }

        tenant.move_out_date = Some(leaving_date);
        let tenant = self.store.save_tenant(&tenant).await?;
        info!(tenant = %tenant.code, leaving_date = %leaving_date, "Tenant moved out");
        Ok(tenant)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{RegisterTenantInput, TenancyService};
    use crate::error::BillingError;
    use crate::models::{Building, Room};
    use crate::repository::{BillingStore, MemoryBillingStore};
    use crate::services::occupancy::test_support::at;

    fn input(name: &str) -> RegisterTenantInput {
        RegisterTenantInput {
            full_name: name.to_string(),
            phone: Some("+919800000001".to_string()),
            email: Some("tenant@example.com".to_string()),
            rent_amount: Some(4500.0),
            advanced_amount: 9000.0,
            move_in_date: Some(at(2026, 3, 1, 10)),
        }
    }

    async fn setup() -> (Arc<MemoryBillingStore>, TenancyService, Room, Room) {
        let store = Arc::new(MemoryBillingStore::new());
        let building = store
            .insert_building(Building {
                id: Uuid::new_v4(),
                name: "Lotus Residency".to_string(),
                address: None,
            })
            .await;
        let a = store
            .save_room(&Room::new(building.id, "101", Some(4000.0)))
            .await
            .expect("room saved");
        let b = store
            .save_room(&Room::new(building.id, "102", Some(4000.0)))
            .await
            .expect("room saved");
        let service = TenancyService::new(store.clone());
        (store, service, a, b)
    }

    #[tokio::test]
    async fn assigns_sequential_codes() {
        let (_, service, _, _) = setup().await;
        let first = service.register_tenant(input("Asha Rao")).await.expect("registered");
        let second = service.register_tenant(input("Ravi Kumar")).await.expect("registered");
        assert_eq!(first.code, "T001");
        assert_eq!(second.code, "T002");
    }

    #[tokio::test]
    async fn rejects_invalid_registration() {
        let (_, service, _, _) = setup().await;

        let mut bad_email = input("Asha Rao");
        bad_email.email = Some("not-an-email".to_string());
        assert!(matches!(
            service.register_tenant(bad_email).await,
            Err(BillingError::Validation(_))
        ));

        assert!(matches!(
            service.register_tenant(input("   ")).await,
            Err(BillingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn move_in_is_not_duplicated() {
        let (_, service, room, _) = setup().await;
        let tenant = service.register_tenant(input("Asha Rao")).await.expect("registered");

        service
            .move_in(room.id, tenant.id, Some(at(2026, 3, 1, 10)))
            .await
            .expect("moved in");
        let again = service
            .move_in(room.id, tenant.id, Some(at(2026, 3, 1, 10)))
            .await
            .expect("moved in again");

        assert_eq!(again.room.tenants, vec![tenant.id]);
        assert_eq!(again.room.tenant_history.len(), 1);
        assert_eq!(again.tenant.room_id, Some(room.id));
    }

    #[tokio::test]
    async fn cannot_occupy_two_rooms() {
        let (_, service, a, b) = setup().await;
        let tenant = service.register_tenant(input("Asha Rao")).await.expect("registered");
        service.move_in(a.id, tenant.id, None).await.expect("moved in");

        let result = service.move_in(b.id, tenant.id, None).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn move_out_is_idempotent() {
        let (store, service, room, _) = setup().await;
        let tenant = service.register_tenant(input("Asha Rao")).await.expect("registered");
        service
            .move_in(room.id, tenant.id, Some(at(2026, 3, 1, 10)))
            .await
            .expect("moved in");

        let first = service
            .move_out(tenant.id, Some(at(2026, 5, 31, 18)))
            .await
            .expect("moved out");
        let second = service
            .move_out(tenant.id, Some(at(2026, 6, 15, 9)))
            .await
            .expect("second move out");

        assert_eq!(first.move_out_date, Some(at(2026, 5, 31, 18)));
        assert_eq!(second.move_out_date, first.move_out_date);

        let room = store.get_room(room.id).await.expect("room");
        assert!(room.tenants.is_empty());
        assert_eq!(room.tenant_history.len(), 1);
        assert_eq!(room.tenant_history[0].leaving_date, Some(at(2026, 5, 31, 18)));
        assert_eq!(room.known_tenant_ids(), vec![tenant.id]);
    }

    #[tokio::test]
    async fn leaving_before_moving_in_is_rejected() {
        let (_, service, room, _) = setup().await;
        let tenant = service.register_tenant(input("Asha Rao")).await.expect("registered");
        service
            .move_in(room.id, tenant.id, Some(at(2026, 3, 1, 10)))
            .await
            .expect("moved in");

        let result = service.move_out(tenant.id, Some(at(2026, 2, 1, 0))).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn history_snapshot_survives_renames() {
        let (store, service, room, _) = setup().await;
        let tenant = service.register_tenant(input("Asha Rao")).await.expect("registered");
        let placed = service.move_in(room.id, tenant.id, None).await.expect("moved in");

        let mut renamed = placed.tenant.clone();
        renamed.full_name = "Asha R. Menon".to_string();
        store.save_tenant(&renamed).await.expect("saved");

        let room = store.get_room(room.id).await.expect("room");
        assert_eq!(room.tenant_history[0].full_name, "Asha Rao");
    }
}
