//! Quebec sales tax computation.
//!
//! TPS (federal GST) is 5% and TVQ (provincial QST) is 9.975%, both applied to
//! the subtotal. Each tax is rounded to the cent half away from zero before the
//! total is formed, so `total == subtotal + tps + tvq` holds exactly.

use crate::models::InvoiceTotals;
use rust_decimal::{Decimal, RoundingStrategy};

pub const TPS_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
pub const TVQ_RATE: Decimal = Decimal::from_parts(9975, 0, 0, false, 5);

fn to_cents(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Derive invoice totals from line-item amounts.
pub fn compute_totals<I>(amounts: I, charges_taxes: bool) -> InvoiceTotals
where
    I: IntoIterator<Item = Decimal>,
{
    let subtotal = to_cents(amounts.into_iter().sum());
    let (tps, tvq) = if charges_taxes {
        (to_cents(subtotal * TPS_RATE), to_cents(subtotal * TVQ_RATE))
    } else {
        (to_cents(Decimal::ZERO), to_cents(Decimal::ZERO))
    };

    InvoiceTotals {
        subtotal,
        tps,
        tvq,
        total: subtotal + tps + tvq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_rates() {
        assert_eq!(TPS_RATE, dec("0.05"));
        assert_eq!(TVQ_RATE, dec("0.09975"));
    }

    #[test]
    fn test_taxed_totals_round_each_tax_to_cents() {
        let totals = compute_totals([dec("1000.00"), dec("700.00")], true);

        assert_eq!(totals.subtotal, dec("1700.00"));
        assert_eq!(totals.tps, dec("85.00"));
        assert_eq!(totals.tvq, dec("169.58"));
        assert_eq!(totals.total, dec("1954.58"));
    }

    #[test]
    fn test_untaxed_totals_equal_subtotal() {
        let totals = compute_totals([dec("1000.00"), dec("500.00")], false);

        assert_eq!(totals.subtotal, dec("1500.00"));
        assert_eq!(totals.tps, Decimal::ZERO);
        assert_eq!(totals.tvq, Decimal::ZERO);
        assert_eq!(totals.total, dec("1500.00"));
    }

    #[test]
    fn test_midpoint_rounds_away_from_zero() {
        // 0.10 * 0.05 = 0.005
        let totals = compute_totals([dec("0.10")], true);
        assert_eq!(totals.tps, dec("0.01"));
    }

    #[test]
    fn test_total_is_sum_of_parts() {
        for amount in ["0.01", "19.99", "123.45", "9999.99"] {
            let totals = compute_totals([dec(amount)], true);
            assert_eq!(totals.total, totals.subtotal + totals.tps + totals.tvq);
            assert_eq!(totals.total.scale(), 2);
        }
    }

    #[test]
    fn test_empty_invoice_is_zero() {
        let totals = compute_totals(Vec::new(), true);
        assert_eq!(totals.total, Decimal::ZERO);
    }
}
