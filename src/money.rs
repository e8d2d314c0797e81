//! Money and exchange-rate primitives.
//!
//! All amounts are exact integer cents in a named currency. No floats
//! anywhere in the money path; cross-rail conversion goes through a
//! [`LockedRate`] captured when the transfer is created.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("amount too large, would overflow")]
    Overflow,

    #[error("exchange rate must be greater than zero")]
    InvalidRate,

    #[error("locked rate expired at {0}")]
    RateExpired(DateTime<Utc>),
}

/// The two rails this engine moves money between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Kenyan shilling - the mobile-money rail
    Kes,
    /// US dollar - the trading-ledger rail
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Kes => "KES",
            Currency::Usd => "USD",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "KES" => Some(Currency::Kes),
            "USD" => Some(Currency::Usd),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exact positive amount in integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    cents: i64,
    currency: Currency,
}

impl Money {
    /// Construct from integer cents. Zero and negative amounts are rejected.
    pub fn from_cents(cents: i64, currency: Currency) -> Result<Self, MoneyError> {
        if cents <= 0 {
            return Err(MoneyError::InvalidAmount);
        }
        Ok(Self { cents, currency })
    }

    pub fn kes(cents: i64) -> Result<Self, MoneyError> {
        Self::from_cents(cents, Currency::Kes)
    }

    pub fn usd(cents: i64) -> Result<Self, MoneyError> {
        Self::from_cents(cents, Currency::Usd)
    }

    #[inline]
    pub fn cents(&self) -> i64 {
        self.cents
    }

    #[inline]
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Fail unless the amount is denominated in `expected`.
    pub fn expect_currency(&self, expected: Currency) -> Result<(), MoneyError> {
        if self.currency != expected {
            return Err(MoneyError::CurrencyMismatch {
                expected,
                got: self.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.cents / 100;
        let frac = (self.cents % 100).abs();
        write!(f, "{}.{:02} {}", whole, frac, self.currency)
    }
}

/// Exchange rate frozen at transfer creation, quoted as KES per USD.
///
/// The rate is used for every conversion within one transfer, even if the
/// market has moved since - that is the point of locking it. The expiry only
/// gates creating new transfers against a stale quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedRate {
    rate: Decimal,
    locked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockedRate {
    pub fn new(
        rate: Decimal,
        locked_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, MoneyError> {
        if rate <= Decimal::ZERO {
            return Err(MoneyError::InvalidRate);
        }
        Ok(Self {
            rate,
            locked_at,
            expires_at,
        })
    }

    #[inline]
    pub fn rate(&self) -> Decimal {
        self.rate
    }

    #[inline]
    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn ensure_valid(&self, now: DateTime<Utc>) -> Result<(), MoneyError> {
        if self.is_expired(now) {
            return Err(MoneyError::RateExpired(self.expires_at));
        }
        Ok(())
    }

    /// Convert USD cents to KES cents, rounding half up to the cent.
    pub fn usd_to_kes(&self, amount: Money) -> Result<Money, MoneyError> {
        amount.expect_currency(Currency::Usd)?;
        let kes = (Decimal::from(amount.cents()) * self.rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let cents = kes.to_i64().ok_or(MoneyError::Overflow)?;
        Money::from_cents(cents, Currency::Kes)
    }

    /// Convert KES cents to USD cents, rounding half up to the cent.
    pub fn kes_to_usd(&self, amount: Money) -> Result<Money, MoneyError> {
        amount.expect_currency(Currency::Kes)?;
        let usd = (Decimal::from(amount.cents()) / self.rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let cents = usd.to_i64().ok_or(MoneyError::Overflow)?;
        Money::from_cents(cents, Currency::Usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn rate(r: &str) -> LockedRate {
        let now = Utc::now();
        LockedRate::new(Decimal::from_str(r).unwrap(), now, now + Duration::minutes(5)).unwrap()
    }

    #[test]
    fn test_money_construction() {
        let m = Money::kes(150_000).unwrap();
        assert_eq!(m.cents(), 150_000);
        assert_eq!(m.currency(), Currency::Kes);

        assert_eq!(Money::usd(0), Err(MoneyError::InvalidAmount));
        assert_eq!(Money::usd(-5), Err(MoneyError::InvalidAmount));
    }

    #[test]
    fn test_expect_currency() {
        let m = Money::usd(1000).unwrap();
        assert!(m.expect_currency(Currency::Usd).is_ok());
        assert_eq!(
            m.expect_currency(Currency::Kes),
            Err(MoneyError::CurrencyMismatch {
                expected: Currency::Kes,
                got: Currency::Usd,
            })
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::kes(150_000).unwrap().to_string(), "1500.00 KES");
        assert_eq!(Money::usd(1005).unwrap().to_string(), "10.05 USD");
        assert_eq!(Currency::Kes.to_string(), "KES");
    }

    #[test]
    fn test_usd_to_kes_exact() {
        // 10.00 USD at 150.00 KES/USD = 1500.00 KES
        let kes = rate("150.00").usd_to_kes(Money::usd(1000).unwrap()).unwrap();
        assert_eq!(kes.cents(), 150_000);
        assert_eq!(kes.currency(), Currency::Kes);
    }

    #[test]
    fn test_kes_to_usd_exact() {
        let usd = rate("150.00")
            .kes_to_usd(Money::kes(150_000).unwrap())
            .unwrap();
        assert_eq!(usd.cents(), 1000);
        assert_eq!(usd.currency(), Currency::Usd);
    }

    #[test]
    fn test_conversion_rounds_half_up() {
        // 1.50 USD at 1.01 = 151.5 KES cents -> 152 (midpoint rounds up)
        let kes = rate("1.01").usd_to_kes(Money::usd(150).unwrap()).unwrap();
        assert_eq!(kes.cents(), 152);

        // 3.33 USD at 1.505 = 501.165 -> 501 (below midpoint rounds down)
        let kes = rate("1.505").usd_to_kes(Money::usd(333).unwrap()).unwrap();
        assert_eq!(kes.cents(), 501);

        // 100.00 KES at 150 = 66.67 USD cents -> 67 (0.6667 rounds up)
        let usd = rate("150").kes_to_usd(Money::kes(10_000).unwrap()).unwrap();
        assert_eq!(usd.cents(), 67);
    }

    #[test]
    fn test_conversion_wrong_currency() {
        let r = rate("150.00");
        assert!(matches!(
            r.usd_to_kes(Money::kes(1000).unwrap()),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            r.kes_to_usd(Money::usd(1000).unwrap()),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let now = Utc::now();
        assert_eq!(
            LockedRate::new(Decimal::ZERO, now, now + Duration::minutes(5)),
            Err(MoneyError::InvalidRate)
        );
        assert_eq!(
            LockedRate::new(Decimal::from(-1), now, now + Duration::minutes(5)),
            Err(MoneyError::InvalidRate)
        );
    }

    #[test]
    fn test_rate_expiry() {
        let now = Utc::now();
        let r = LockedRate::new(Decimal::from(150), now, now + Duration::minutes(5)).unwrap();
        assert!(!r.is_expired(now));
        assert!(r.is_expired(now + Duration::minutes(5)));
        assert!(r.ensure_valid(now).is_ok());
        assert_eq!(
            r.ensure_valid(now + Duration::minutes(6)),
            Err(MoneyError::RateExpired(r.expires_at()))
        );
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::from_code("KES"), Some(Currency::Kes));
        assert_eq!(Currency::from_code("USD"), Some(Currency::Usd));
        assert_eq!(Currency::from_code("EUR"), None);
    }
}
