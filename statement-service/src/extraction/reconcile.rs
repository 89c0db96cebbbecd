use crate::extraction::parser::ParsedTransaction;
use crate::models::TransactionType;
use rust_decimal::Decimal;
use serde::Serialize;

/// Largest difference still treated as consistent.
pub const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Whether `opening + credits - debits` lands on the stated closing balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceCheck {
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub expected_closing: Option<Decimal>,
    pub difference: Option<Decimal>,
    /// `None` when either balance is unknown.
    pub is_consistent: Option<bool>,
}

impl BalanceCheck {
    pub fn from_totals(
        opening_balance: Option<Decimal>,
        closing_balance: Option<Decimal>,
        total_credits: Decimal,
        total_debits: Decimal,
    ) -> Self {
        let expected_closing = opening_balance.map(|o| o + total_credits - total_debits);
        let difference = expected_closing
            .zip(closing_balance)
            .map(|(expected, actual)| (actual - expected).abs());

        Self {
            opening_balance,
            closing_balance,
            total_credits,
            total_debits,
            expected_closing,
            difference,
            is_consistent: difference.map(|d| d <= BALANCE_TOLERANCE),
        }
    }
}

/// Sum credits and debits and compare against the stated balances.
pub fn check_balance(
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
    transactions: &[ParsedTransaction],
) -> BalanceCheck {
    let (credits, debits) = totals(transactions);
    BalanceCheck::from_totals(opening_balance, closing_balance, credits, debits)
}

/// `(total_credits, total_debits)`, both non-negative.
pub fn totals(transactions: &[ParsedTransaction]) -> (Decimal, Decimal) {
    transactions
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(cr, dr), t| {
            match t.transaction_type {
                TransactionType::Credit => (cr + t.amount, dr),
                TransactionType::Debit => (cr, dr + t.amount),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::parser::TypeSource;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn txn(amount: &str, transaction_type: TransactionType) -> ParsedTransaction {
        ParsedTransaction {
            line_number: 1,
            date: None,
            raw_date: String::new(),
            description: "test".into(),
            amount: dec(amount),
            transaction_type,
            type_source: TypeSource::Marker,
            balance: None,
            reference_number: None,
            merchant_name: None,
            raw_text: String::new(),
            confidence: 1.0,
            flag_reason: None,
        }
    }

    #[test]
    fn consistent_statement() {
        let rows = vec![
            txn("2500.00", TransactionType::Credit),
            txn("45.20", TransactionType::Debit),
            txn("1200.00", TransactionType::Debit),
        ];
        let check = check_balance(Some(dec("1000.00")), Some(dec("2254.80")), &rows);

        assert_eq!(check.total_credits, dec("2500.00"));
        assert_eq!(check.total_debits, dec("1245.20"));
        assert_eq!(check.expected_closing, Some(dec("2254.80")));
        assert_eq!(check.difference, Some(dec("0.00")));
        assert_eq!(check.is_consistent, Some(true));
    }

    #[test]
    fn tolerance_is_inclusive() {
        let check = BalanceCheck::from_totals(
            Some(dec("100.00")),
            Some(dec("90.01")),
            Decimal::ZERO,
            dec("10.00"),
        );
        assert_eq!(check.difference, Some(dec("0.01")));
        assert_eq!(check.is_consistent, Some(true));

        let check = BalanceCheck::from_totals(
            Some(dec("100.00")),
            Some(dec("90.02")),
            Decimal::ZERO,
            dec("10.00"),
        );
        assert_eq!(check.is_consistent, Some(false));
    }

    #[test]
    fn unknown_balances_are_undetermined() {
        let rows = vec![txn("10.00", TransactionType::Debit)];

        let no_opening = check_balance(None, Some(dec("5.00")), &rows);
        assert_eq!(no_opening.expected_closing, None);
        assert_eq!(no_opening.is_consistent, None);

        let no_closing = check_balance(Some(dec("5.00")), None, &rows);
        assert_eq!(no_closing.expected_closing, Some(dec("-5.00")));
        assert_eq!(no_closing.difference, None);
        assert_eq!(no_closing.is_consistent, None);
    }

    #[test]
    fn empty_statement_totals_are_zero() {
        assert_eq!(totals(&[]), (Decimal::ZERO, Decimal::ZERO));
    }
}
