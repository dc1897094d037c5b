//! Amortization Calculator
//!
//! Fixed-installment (annuity) loan arithmetic:
//!
//! ```text
//! r       = annual_rate / 100 / 12
//! payment = P * r * (1 + r)^n / ((1 + r)^n - 1)     when r > 0
//! payment = P / n                                   when r = 0
//! ```
//!
//! All computation stays in `Decimal`. Values are rounded to 2 dp only when an
//! installment is presented to a member; the amount a member owes is the
//! rounded installment times the term.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::amount::round_money;
use super::error::DomainError;

const MONTHS_PER_YEAR: Decimal = Decimal::from_parts(12, 0, 0, false, 0);
const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Monthly rate as a fraction from an annual percentage
pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
    annual_rate_percent / HUNDRED / MONTHS_PER_YEAR
}

/// Unrounded monthly installment for an annuity loan.
pub fn monthly_payment(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> Result<Decimal, DomainError> {
    if term_months == 0 {
        return Err(DomainError::Calculation(
            "term must be at least one month".to_string(),
        ));
    }
    if principal <= Decimal::ZERO {
        return Err(DomainError::Calculation(
            "principal must be positive".to_string(),
        ));
    }
    if annual_rate_percent < Decimal::ZERO {
        return Err(DomainError::Calculation(
            "interest rate cannot be negative".to_string(),
        ));
    }

    let rate = monthly_rate(annual_rate_percent);
    if rate.is_zero() {
        return Ok(principal / Decimal::from(term_months));
    }

    let compound = compound_factor(Decimal::ONE + rate, term_months).ok_or_else(|| {
        DomainError::Calculation("interest rate too large for term".to_string())
    })?;

    let denominator = compound - Decimal::ONE;
    if denominator.is_zero() {
        return Err(DomainError::Calculation(
            "annuity denominator is zero".to_string(),
        ));
    }

    principal
        .checked_mul(rate)
        .and_then(|v| v.checked_mul(compound))
        .and_then(|numerator| numerator.checked_div(denominator))
        .ok_or_else(|| DomainError::Calculation("payment overflow".to_string()))
}

/// `base^exp` by square-and-multiply; `None` on overflow
fn compound_factor(base: Decimal, mut exp: u32) -> Option<Decimal> {
    let mut result = Decimal::ONE;
    let mut square = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.checked_mul(square)?;
        }
        exp >>= 1;
        if exp > 0 {
            square = square.checked_mul(square)?;
        }
    }
    Some(result)
}

/// Payment quote for a principal/rate/term triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentQuote {
    pub principal: Decimal,
    pub annual_rate: Decimal,
    pub term_months: u32,
    /// Full-precision installment
    pub monthly_payment: Decimal,
    /// Installment as billed (2 dp)
    pub installment: Decimal,
    /// Installment × term
    pub total_repayment: Decimal,
    pub total_interest: Decimal,
}

impl PaymentQuote {
    pub fn calculate(
        principal: Decimal,
        annual_rate: Decimal,
        term_months: u32,
    ) -> Result<Self, DomainError> {
        let monthly_payment = monthly_payment(principal, annual_rate, term_months)?;
        let installment = round_money(monthly_payment);
        let overflow = || DomainError::Calculation("total repayment overflow".to_string());
        let total_repayment = installment
            .checked_mul(Decimal::from(term_months))
            .ok_or_else(overflow)?;
        let total_interest = total_repayment.checked_sub(principal).ok_or_else(overflow)?;

        Ok(Self {
            principal,
            annual_rate,
            term_months,
            monthly_payment,
            installment,
            total_repayment,
            total_interest,
        })
    }

    /// Amount the member owes over the life of the loan
    pub fn total_owed(&self) -> Decimal {
        self.total_repayment
    }

    /// Month-by-month breakdown. The final row clears the remaining balance,
    /// so it may differ from the regular installment by rounding.
    pub fn schedule(&self) -> Vec<ScheduleRow> {
        let rate = monthly_rate(self.annual_rate);
        let mut balance = self.principal;
        let mut rows = Vec::with_capacity(self.term_months as usize);

        for month in 1..=self.term_months {
            let interest = round_money(balance * rate);
            let (payment, principal_part) = if month == self.term_months {
                (balance + interest, balance)
            } else {
                let principal_part = (self.installment - interest).min(balance);
                (principal_part + interest, principal_part)
            };
            balance -= principal_part;

            rows.push(ScheduleRow {
                month,
                payment,
                interest,
                principal: principal_part,
                remaining_balance: balance,
            });
        }

        rows
    }
}

/// One month of an amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub month: u32,
    pub payment: Decimal,
    pub interest: Decimal,
    pub principal: Decimal,
    pub remaining_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ten_percent_twelve_months() {
        let quote = PaymentQuote::calculate(dec!(10000), dec!(10), 12).unwrap();
        assert_eq!(quote.installment, dec!(879.16));
        assert_eq!(quote.total_repayment, dec!(10549.92));
        assert_eq!(quote.total_interest, dec!(549.92));
    }

    #[test]
    fn test_zero_rate_is_straight_division() {
        let quote = PaymentQuote::calculate(dec!(12000), Decimal::ZERO, 12).unwrap();
        assert_eq!(quote.monthly_payment, dec!(1000));
        assert_eq!(quote.installment, dec!(1000.00));
        assert_eq!(quote.total_repayment, dec!(12000));

        let p = dec!(10000);
        assert_eq!(monthly_payment(p, Decimal::ZERO, 3).unwrap(), p / Decimal::from(3u32));
    }

    #[test]
    fn test_payment_times_term_matches_total() {
        let cases = [
            (dec!(5000), dec!(7.5), 24u32),
            (dec!(250000), dec!(18), 120),
            (dec!(100), dec!(0.5), 1),
            (dec!(999.99), dec!(36), 7),
        ];
        for (principal, rate, term) in cases {
            let quote = PaymentQuote::calculate(principal, rate, term).unwrap();
            let drift = (quote.monthly_payment * Decimal::from(term) - quote.total_repayment).abs();
            assert!(drift <= dec!(0.005) * Decimal::from(term), "drift {} too large", drift);
        }
    }

    #[test]
    fn test_zero_term_is_error() {
        let result = monthly_payment(dec!(1000), dec!(10), 0);
        assert!(matches!(result, Err(DomainError::Calculation(_))));
    }

    #[test]
    fn test_negative_rate_is_error() {
        assert!(monthly_payment(dec!(1000), dec!(-1), 12).is_err());
    }

    #[test]
    fn test_absurd_rate_does_not_panic() {
        assert!(monthly_payment(dec!(1000), dec!(100000000), 120).is_err());
    }

    #[test]
    fn test_huge_principal_is_error_not_panic() {
        let result = PaymentQuote::calculate(Decimal::MAX, dec!(1), 12);
        assert!(matches!(result, Err(DomainError::Calculation(_))));
    }

    #[test]
    fn test_long_term_compounds_in_log_steps() {
        let started = std::time::Instant::now();
        let result = monthly_payment(dec!(1), dec!(0.0000001), u32::MAX);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        // Either a finite installment or a clean overflow error
        if let Ok(payment) = result {
            assert!(payment > Decimal::ZERO);
        }
    }

    #[test]
    fn test_compound_factor_matches_repeated_multiplication() {
        let base = dec!(1.0083333333333333333333333333);
        let mut expected = Decimal::ONE;
        for _ in 0..12 {
            expected *= base;
        }
        let drift = (compound_factor(base, 12).unwrap() - expected).abs();
        assert!(drift < dec!(0.000000000000000001));
        assert_eq!(compound_factor(dec!(2), 10), Some(dec!(1024)));
        assert_eq!(compound_factor(dec!(2), 0), Some(Decimal::ONE));
        assert_eq!(compound_factor(dec!(10), 40), None);
    }

    #[test]
    fn test_schedule_clears_balance() {
        let quote = PaymentQuote::calculate(dec!(10000), dec!(10), 12).unwrap();
        let schedule = quote.schedule();

        assert_eq!(schedule.len(), 12);
        assert_eq!(schedule[0].interest, dec!(83.33));
        assert_eq!(schedule[0].payment, dec!(879.16));
        assert_eq!(schedule.last().unwrap().remaining_balance, Decimal::ZERO);

        let principal_sum: Decimal = schedule.iter().map(|r| r.principal).sum();
        assert_eq!(principal_sum, dec!(10000));
    }
}
