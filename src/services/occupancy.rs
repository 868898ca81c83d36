use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{BillingMonth, Room, Tenant};

/// Portion of a billing month a tenant actually occupied, inclusive on both
/// ends and clipped to the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub tenant_id: Uuid,
    pub month: BillingMonth,
    pub occupied_start: NaiveDate,
    pub occupied_end: NaiveDate,
    pub elapsed_days: u32,
    pub total_days_in_month: u32,
}

impl Occupancy {
    pub fn is_full_month(&self) -> bool {
        self.elapsed_days == self.total_days_in_month
    }

    /// Occupancy covering the whole month regardless of move dates.
    pub fn full_month(tenant_id: Uuid, month: BillingMonth) -> Self {
        let total = month.days_in_month();
        Self {
            tenant_id,
            month,
            occupied_start: month.first_day(),
            occupied_end: month.last_day(),
            elapsed_days: total,
            total_days_in_month: total,
        }
    }
}

/// Whether a residency window touches the month at all. Comparisons are made
/// on UTC calendar dates so a late-evening move-in does not leak into the
/// next day.
pub fn is_active_in_month(
    move_in: DateTime<Utc>,
    move_out: Option<DateTime<Utc>>,
    month: BillingMonth,
) -> bool {
    let moved_in_after = move_in.date_naive() > month.last_day();
    let left_before = move_out.is_some_and(|out| out.date_naive() < month.first_day());
    !moved_in_after && !left_before
}

pub fn resolve_tenant(tenant: &Tenant, month: BillingMonth) -> Option<Occupancy> {
    let (occupied_start, occupied_end) =
        clip_to_month(tenant.move_in_date, tenant.move_out_date, month)?;
    Some(Occupancy {
        tenant_id: tenant.id,
        month,
        occupied_start,
        occupied_end,
        elapsed_days: inclusive_days(occupied_start, occupied_end),
        total_days_in_month: month.days_in_month(),
    })
}

/// Occupancy of `tenant` in this particular room.
///
/// The room's own history windows decide. A tenant who moved to another room
/// only counts here for the days they actually spent here. The live move
/// dates stand in only when the room has no history for a tenant it
/// currently houses.
pub fn resolve_in_room(tenant: &Tenant, room: &Room, month: BillingMonth) -> Option<Occupancy> {
    let stays: Vec<_> = room
        .tenant_history
        .iter()
        .filter(|entry| entry.tenant_id == tenant.id)
        .collect();
    if stays.is_empty() {
        if tenant.room_id != Some(room.id) {
            return None;
        }
        return resolve_tenant(tenant, month);
    }

    let windows: Vec<(NaiveDate, NaiveDate)> = stays
        .iter()
        .filter_map(|entry| clip_to_month(entry.booking_date, entry.leaving_date, month))
        .collect();
    let occupied_start = windows.iter().map(|(start, _)| *start).min()?;
    let occupied_end = windows.iter().map(|(_, end)| *end).max()?;
    let total = month.days_in_month();
    let elapsed = windows
        .iter()
        .map(|(start, end)| inclusive_days(*start, *end))
        .sum::<u32>()
        .min(total);

    Some(Occupancy {
        tenant_id: tenant.id,
        month,
        occupied_start,
        occupied_end,
        elapsed_days: elapsed,
        total_days_in_month: total,
    })
}

fn clip_to_month(
    move_in: DateTime<Utc>,
    move_out: Option<DateTime<Utc>>,
    month: BillingMonth,
) -> Option<(NaiveDate, NaiveDate)> {
    if !is_active_in_month(move_in, move_out, month) {
        return None;
    }
    let month_end = month.last_day();
    let start = move_in.date_naive().max(month.first_day());
    let end = move_out
        .map(|out| out.date_naive())
        .unwrap_or(month_end)
        .min(month_end);

    // Move-out recorded before move-in: nothing to bill.
    (end >= start).then_some((start, end))
}

fn inclusive_days(start: NaiveDate, end: NaiveDate) -> u32 {
    (end - start).num_days() as u32 + 1
}

/// Active tenants for the month, in input order. Inactive tenants are left
/// out entirely rather than reported with zero days.
pub fn resolve_month(tenants: &[Tenant], month: BillingMonth) -> Vec<Occupancy> {
    tenants
        .iter()
        .filter_map(|tenant| resolve_tenant(tenant, month))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::{at, date, tenant};
    use super::{resolve_in_room, resolve_month, resolve_tenant};
    use crate::models::{BillingMonth, Room, TenantHistoryEntry};
    use uuid::Uuid;

    fn april() -> BillingMonth {
        BillingMonth::new(2026, 4).expect("valid month")
    }

    #[test]
    fn full_month_resident() {
        let resident = tenant("T001", at(2026, 1, 3, 9), None);
        let occupancy = resolve_tenant(&resident, april()).expect("active");
        assert!(occupancy.is_full_month());
        assert_eq!(occupancy.elapsed_days, 30);
        assert_eq!(occupancy.occupied_start, date(2026, 4, 1));
        assert_eq!(occupancy.occupied_end, date(2026, 4, 30));
    }

    #[test]
    fn move_in_mid_month_counts_inclusive_days() {
        // Late evening move-in still counts from the calendar day.
        let resident = tenant("T002", at(2026, 4, 10, 23), None);
        let occupancy = resolve_tenant(&resident, april()).expect("active");
        assert_eq!(occupancy.elapsed_days, 21);
        assert_eq!(occupancy.total_days_in_month, 30);
    }

    #[test]
    fn in_and_out_within_the_month() {
        let resident = tenant("T003", at(2026, 4, 5, 8), Some(at(2026, 4, 5, 18)));
        let occupancy = resolve_tenant(&resident, april()).expect("active");
        assert_eq!(occupancy.elapsed_days, 1);

        let fortnight = tenant("T004", at(2026, 4, 1, 0), Some(at(2026, 4, 15, 12)));
        assert_eq!(
            resolve_tenant(&fortnight, april()).expect("active").elapsed_days,
            15
        );
    }

    #[test]
    fn excludes_tenants_outside_the_month() {
        let future = tenant("T005", at(2026, 5, 1, 0), None);
        let departed = tenant("T006", at(2025, 11, 1, 0), Some(at(2026, 3, 31, 23)));
        let boundary = tenant("T007", at(2025, 11, 1, 0), Some(at(2026, 4, 1, 0)));

        let resolved = resolve_month(&[future, departed, boundary.clone()], april());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].tenant_id, boundary.id);
        assert_eq!(resolved[0].elapsed_days, 1);
    }

    fn stay(
        resident: &crate::models::Tenant,
        booking: chrono::DateTime<chrono::Utc>,
        leaving: Option<chrono::DateTime<chrono::Utc>>,
    ) -> TenantHistoryEntry {
        TenantHistoryEntry {
            tenant_id: resident.id,
            tenant_code: resident.code.clone(),
            full_name: resident.full_name.clone(),
            booking_date: booking,
            leaving_date: leaving,
        }
    }

    #[test]
    fn transferred_tenant_only_counts_in_the_room_they_occupy() {
        let building = Uuid::new_v4();
        let mut first = Room::new(building, "101", Some(3000.0));
        let mut second = Room::new(building, "102", Some(3000.0));

        // Moved from 101 to 102 at the start of March; live dates describe 102.
        let mut mover = tenant("T001", at(2026, 3, 1, 0), None);
        mover.room_id = Some(second.id);
        first
            .tenant_history
            .push(stay(&mover, at(2026, 1, 1, 0), Some(at(2026, 2, 28, 0))));
        second.tenants.push(mover.id);
        second.tenant_history.push(stay(&mover, at(2026, 3, 1, 0), None));

        assert!(resolve_in_room(&mover, &first, april()).is_none());
        let here = resolve_in_room(&mover, &second, april()).expect("lives in 102");
        assert!(here.is_full_month());

        let february = BillingMonth::new(2026, 2).expect("valid month");
        assert!(resolve_in_room(&mover, &first, february)
            .expect("lived in 101")
            .is_full_month());
        assert!(resolve_in_room(&mover, &second, february).is_none());
    }

    #[test]
    fn room_windows_split_within_a_month() {
        let mut room = Room::new(Uuid::new_v4(), "101", Some(3000.0));
        let mut mover = tenant("T002", at(2026, 4, 21, 0), None);
        mover.room_id = Some(Uuid::new_v4());
        // Left on the 10th, came back on the 21st, moved on again.
        room.tenant_history
            .push(stay(&mover, at(2026, 1, 1, 0), Some(at(2026, 4, 10, 12))));
        room.tenant_history
            .push(stay(&mover, at(2026, 4, 21, 0), Some(at(2026, 4, 25, 0))));

        let occupancy = resolve_in_room(&mover, &room, april()).expect("active");
        assert_eq!(occupancy.elapsed_days, 15);
        assert_eq!(occupancy.occupied_start, date(2026, 4, 1));
        assert_eq!(occupancy.occupied_end, date(2026, 4, 25));
    }

    #[test]
    fn live_dates_apply_only_to_the_current_room() {
        let room = Room::new(Uuid::new_v4(), "101", Some(3000.0));
        let mut resident = tenant("T003", at(2026, 4, 10, 0), None);
        assert!(resolve_in_room(&resident, &room, april()).is_none());

        resident.room_id = Some(room.id);
        let occupancy = resolve_in_room(&resident, &room, april()).expect("active");
        assert_eq!(occupancy.elapsed_days, 21);
    }
}
