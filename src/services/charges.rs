use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::{BillTotals, Charge};
use crate::services::occupancy::Occupancy;

pub const PROCESSING_FEE_RATE: f64 = 0.02;

pub const RENT_TITLE: &str = "Rent";
pub const ELECTRICITY_TITLE: &str = "Electricity";
pub const ADDITIONAL_TITLE: &str = "Additional Amount";
pub const DISCOUNT_TITLE: &str = "Discount";
pub const PROCESSING_FEE_TITLE: &str = "Processing Fee";

/// Manually entered amounts layered on top of rent. `discount` is a
/// magnitude; the sign is applied when the charge lines are built.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ChargeAdjustments {
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub electricity: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub additional_amount: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub discount: f64,
    #[serde(default)]
    pub include_processing_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeBreakdown {
    pub charges: Vec<Charge>,
    pub totals: BillTotals,
    pub total_amount: i64,
}

/// Tenant rent wins; the room's base rent is the fallback.
pub fn resolve_rent(tenant_rent: Option<f64>, room_base_rent: Option<f64>) -> BillingResult<f64> {
    tenant_rent
        .filter(|rent| rent.is_finite() && *rent > 0.0)
        .or_else(|| room_base_rent.filter(|rent| rent.is_finite() && *rent > 0.0))
        .ok_or_else(|| {
            BillingError::Validation("No monthly rent is set for the tenant or the room.".to_string())
        })
}

pub fn prorate_rent(rent_amount: f64, occupancy: &Occupancy) -> f64 {
    if occupancy.is_full_month() {
        return rent_amount;
    }
    (rent_amount * f64::from(occupancy.elapsed_days) / f64::from(occupancy.total_days_in_month)).round()
}

/// Builds the canonical line items and totals for one tenant-month.
///
/// The processing fee is taken off the prorated rent alone, before
/// electricity, additional charges or discount are considered. Optional lines
/// with a zero amount are omitted so invoices never print an empty charge.
pub fn aggregate(
    rent_amount: f64,
    occupancy: &Occupancy,
    adjustments: &ChargeAdjustments,
) -> BillingResult<ChargeBreakdown> {
    adjustments.validate()?;
    for (field, value) in [
        ("rent", rent_amount),
        ("electricity", adjustments.electricity),
        ("additional_amount", adjustments.additional_amount),
        ("discount", adjustments.discount),
    ] {
        if !value.is_finite() {
            return Err(BillingError::Validation(format!("{field} must be a finite amount.")));
        }
    }

    let rent = prorate_rent(rent_amount, occupancy);
    let processing_fee = if adjustments.include_processing_fee {
        (rent * PROCESSING_FEE_RATE).round()
    } else {
        0.0
    };

    let totals = BillTotals {
        rent,
        electricity: adjustments.electricity,
        processing_fee,
        additional_amount: adjustments.additional_amount,
        discount: adjustments.discount,
    };
    let total_amount = totals.total_amount();
    if total_amount <= 0 {
        return Err(BillingError::Validation(format!(
            "Bill total must be positive, got {total_amount}."
        )));
    }

    let mut charges = vec![Charge::new(RENT_TITLE, rent)];
    if totals.electricity != 0.0 {
        charges.push(Charge::new(ELECTRICITY_TITLE, totals.electricity));
    }
    if totals.additional_amount != 0.0 {
        charges.push(Charge::new(ADDITIONAL_TITLE, totals.additional_amount));
    }
    if totals.discount != 0.0 {
        charges.push(Charge::new(DISCOUNT_TITLE, -totals.discount));
    }
    if totals.processing_fee != 0.0 {
        charges.push(Charge::new(PROCESSING_FEE_TITLE, totals.processing_fee));
    }

    Ok(ChargeBreakdown {
        charges,
        totals,
        total_amount,
    })
}

/// Rebuilds the totals summary from hand-edited charge lines. Titles are
/// matched case-insensitively; anything unrecognized counts as an additional
/// charge, so the summary always adds up to the lines.
pub fn totals_from_charges(charges: &[Charge]) -> BillTotals {
    let mut totals = BillTotals::default();
    for charge in charges {
        let title = charge.title.trim();
        if title.eq_ignore_ascii_case(RENT_TITLE) {
            totals.rent += charge.amount;
        } else if title.eq_ignore_ascii_case(ELECTRICITY_TITLE) {
            totals.electricity += charge.amount;
        } else if title.eq_ignore_ascii_case(PROCESSING_FEE_TITLE) {
            totals.processing_fee += charge.amount;
        } else if title.eq_ignore_ascii_case(DISCOUNT_TITLE) {
            totals.discount -= charge.amount;
        } else {
            totals.additional_amount += charge.amount;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::{aggregate, prorate_rent, resolve_rent, totals_from_charges, ChargeAdjustments};
    use crate::error::BillingError;
    use crate::models::{sum_charges, BillTotals, BillingMonth, Charge};
    use crate::services::occupancy::test_support::{at, tenant};
    use crate::services::occupancy::{resolve_tenant, Occupancy};

    fn april() -> BillingMonth {
        BillingMonth::new(2026, 4).expect("valid month")
    }

    fn occupancy_from(day: u32) -> Occupancy {
        resolve_tenant(&tenant("T001", at(2026, 4, day, 10), None), april()).expect("active")
    }

    #[test]
    fn full_month_passes_rent_through() {
        let full = Occupancy::full_month(uuid::Uuid::new_v4(), april());
        assert_eq!(prorate_rent(3000.0, &full), 3000.0);
        assert_eq!(prorate_rent(2999.5, &full), 2999.5);
    }

    #[test]
    fn half_month_of_thirty_days() {
        let resident = tenant("T001", at(2026, 4, 16, 0), None);
        let occupancy = resolve_tenant(&resident, april()).expect("active");
        assert_eq!(occupancy.elapsed_days, 15);
        assert_eq!(prorate_rent(3000.0, &occupancy), 1500.0);
    }

    #[test]
    fn move_in_on_the_tenth_with_fee() {
        let adjustments = ChargeAdjustments {
            electricity: 200.0,
            include_processing_fee: true,
            ..ChargeAdjustments::default()
        };
        let breakdown = aggregate(3000.0, &occupancy_from(10), &adjustments).expect("valid bill");

        assert_eq!(breakdown.totals.rent, 2100.0);
        assert_eq!(breakdown.totals.processing_fee, 42.0);
        assert_eq!(breakdown.total_amount, 2342);
        assert_eq!(
            breakdown.charges,
            vec![
                Charge::new("Rent", 2100.0),
                Charge::new("Electricity", 200.0),
                Charge::new("Processing Fee", 42.0),
            ]
        );
    }

    #[test]
    fn omits_zero_lines_and_signs_discount() {
        let full = Occupancy::full_month(uuid::Uuid::new_v4(), april());
        let plain = aggregate(3000.0, &full, &ChargeAdjustments::default()).expect("valid bill");
        assert_eq!(plain.charges, vec![Charge::new("Rent", 3000.0)]);

        let adjustments = ChargeAdjustments {
            additional_amount: 150.0,
            discount: 250.0,
            ..ChargeAdjustments::default()
        };
        let discounted = aggregate(3000.0, &full, &adjustments).expect("valid bill");
        let titles: Vec<&str> = discounted.charges.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Rent", "Additional Amount", "Discount"]);
        assert_eq!(discounted.charges[2].amount, -250.0);
        assert_eq!(discounted.totals.discount, 250.0);
        assert_eq!(discounted.total_amount, 2900);
    }

    #[test]
    fn fee_ignores_discount_and_extras() {
        let full = Occupancy::full_month(uuid::Uuid::new_v4(), april());
        let adjustments = ChargeAdjustments {
            electricity: 1000.0,
            discount: 500.0,
            include_processing_fee: true,
            ..ChargeAdjustments::default()
        };
        let breakdown = aggregate(3000.0, &full, &adjustments).expect("valid bill");
        assert_eq!(breakdown.totals.processing_fee, 60.0);
        assert_eq!(breakdown.total_amount, 3560);
    }

    #[test]
    fn charges_sum_to_total() {
        let adjustments = ChargeAdjustments {
            electricity: 333.3,
            additional_amount: 47.25,
            discount: 120.0,
            include_processing_fee: true,
        };
        for day in [1, 7, 13, 22, 30] {
            let breakdown = aggregate(4750.0, &occupancy_from(day), &adjustments).expect("valid bill");
            assert!((sum_charges(&breakdown.charges) - breakdown.total_amount).abs() <= 1);
        }
    }

    #[test]
    fn rejects_non_positive_totals_and_negative_inputs() {
        let full = Occupancy::full_month(uuid::Uuid::new_v4(), april());
        let wiped_out = ChargeAdjustments {
            discount: 3000.0,
            ..ChargeAdjustments::default()
        };
        assert!(matches!(
            aggregate(3000.0, &full, &wiped_out),
            Err(BillingError::Validation(_))
        ));

        let negative = ChargeAdjustments {
            electricity: -5.0,
            ..ChargeAdjustments::default()
        };
        assert!(matches!(
            aggregate(3000.0, &full, &negative),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn rent_falls_back_to_room() {
        assert_eq!(resolve_rent(Some(4200.0), Some(3000.0)).expect("rent"), 4200.0);
        assert_eq!(resolve_rent(None, Some(3000.0)).expect("rent"), 3000.0);
        assert_eq!(resolve_rent(Some(0.0), Some(3000.0)).expect("rent"), 3000.0);
        assert!(resolve_rent(None, None).is_err());
    }

    #[test]
    fn totals_rebuilt_from_edited_lines() {
        let charges = vec![
            Charge::new("Rent", 3000.0),
            Charge::new("electricity", 180.5),
            Charge::new("Discount", -100.0),
            Charge::new("Late fee", 50.0),
        ];
        let totals = totals_from_charges(&charges);
        assert_eq!(
            totals,
            BillTotals {
                rent: 3000.0,
                electricity: 180.5,
                processing_fee: 0.0,
                additional_amount: 50.0,
                discount: 100.0,
            }
        );
        assert_eq!(totals.total_amount(), sum_charges(&charges));
    }
}
