//! Decimal money amounts and the currencies the shop charges in.
//!
//! Catalog prices are stored in US dollars. The card gateway is charged in
//! dollars (minor units), the regional gateway in roubles after a fixed
//! conversion, so both conversions live here next to the amount type.

use core::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors produced by money arithmetic.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Two amounts in different currencies were combined.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: Currency,
        /// Currency of the right operand.
        right: Currency,
    },
    /// The amount is negative where only non-negative values make sense.
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    /// The amount has more precision than the currency's minor unit.
    #[error("amount {0} is finer than one minor unit")]
    SubMinorPrecision(Decimal),
    /// Arithmetic overflowed.
    #[error("amount overflow")]
    Overflow,
}

/// Currencies the storefront works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US dollar, the catalog currency.
    #[default]
    Usd,
    /// Russian rouble, charged by the regional gateway.
    Rub,
}

impl Currency {
    /// ISO 4217 code in upper case (`USD`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Rub => "RUB",
        }
    }

    /// ISO 4217 code in lower case, as card-network APIs expect (`usd`).
    #[must_use]
    pub const fn lowercase_code(self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Rub => "rub",
        }
    }

    /// Number of decimal places in one major unit.
    #[must_use]
    pub const fn minor_exponent(self) -> u32 {
        2
    }

    /// Parse an ISO code in any case.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "USD" => Some(Self::Usd),
            "RUB" => Some(Self::Rub),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount of money in a specific currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in major units (dollars, roubles).
    pub amount: Decimal,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Create a new amount.
    #[must_use]
    pub const fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// A zero amount in the given currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Price of `quantity` units at this unit price.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the multiplication overflows.
    pub fn times(self, quantity: u32) -> Result<Self, MoneyError> {
        let amount = self
            .amount
            .checked_mul(Decimal::from(quantity))
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Add two amounts of the same currency.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] for different currencies and
    /// [`MoneyError::Overflow`] if the sum overflows.
    pub fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Amount as an integer count of minor units (cents, kopecks).
    ///
    /// The amount must be non-negative and representable exactly; a price
    /// like `1.005` is rejected rather than silently truncated.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`], [`MoneyError::SubMinorPrecision`] or
    /// [`MoneyError::Overflow`].
    pub fn to_minor_units(self) -> Result<i64, MoneyError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(MoneyError::Negative(self.amount));
        }
        let factor = Decimal::from(10_i64.pow(self.currency.minor_exponent()));
        let minor = self
            .amount
            .checked_mul(factor)
            .ok_or(MoneyError::Overflow)?;
        if minor.fract() != Decimal::ZERO {
            return Err(MoneyError::SubMinorPrecision(self.amount));
        }
        minor.to_i64().ok_or(MoneyError::Overflow)
    }

    /// Convert into another currency with a fixed multiplier, rounded to the
    /// target's minor unit (half away from zero).
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the multiplication overflows.
    pub fn convert(self, rate: Decimal, to: Currency) -> Result<Self, MoneyError> {
        let amount = self
            .amount
            .checked_mul(rate)
            .ok_or(MoneyError::Overflow)?
            .round_dp_with_strategy(to.minor_exponent(), RoundingStrategy::MidpointAwayFromZero);
        Ok(Self::new(amount, to))
    }

    /// Amount with exactly two decimals and no symbol (`"1860.00"`).
    #[must_use]
    pub fn value_string(self) -> String {
        let scaled = self
            .amount
            .round_dp_with_strategy(self.currency.minor_exponent(), RoundingStrategy::MidpointAwayFromZero);
        format!("{scaled:.2}")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.currency {
            Currency::Usd => write!(f, "${}", self.value_string()),
            Currency::Rub => write!(f, "{} \u{20bd}", self.value_string()),
        }
    }
}
