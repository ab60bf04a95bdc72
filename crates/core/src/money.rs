//! Fixed-point money: integer minor units (e.g. paise), never floats.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A non-negative monetary amount in the smallest currency unit.
///
/// Single-currency by design; arithmetic is checked and overflow surfaces as
/// an invariant violation rather than wrapping.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub fn minor(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("monetary amount overflow"))
    }

    /// Subtraction that fails when the result would go negative.
    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("monetary amount underflow"))
    }

    /// Sum a sequence of amounts with overflow checking.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    /// Renders as major.minor with two decimal places (e.g. `500.00`).
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_uses_two_decimal_places() {
        assert_eq!(Money::from_minor(500_000).to_string(), "5000.00");
        assert_eq!(Money::from_minor(7).to_string(), "0.07");
    }

    #[test]
    fn underflow_is_rejected() {
        let err = Money::from_minor(10)
            .checked_sub(Money::from_minor(11))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn overflow_is_rejected() {
        let err = Money::from_minor(u64::MAX)
            .checked_add(Money::from_minor(1))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: adding then subtracting the same amount is the identity.
        #[test]
        fn add_then_sub_round_trips(a in 0u64..1_000_000_000, b in 0u64..1_000_000_000) {
            let base = Money::from_minor(a);
            let delta = Money::from_minor(b);
            let back = base.checked_add(delta).unwrap().checked_sub(delta).unwrap();
            prop_assert_eq!(back, base);
        }

        /// Property: checked_sum equals the plain integer sum for small inputs.
        #[test]
        fn sum_matches_integer_sum(amounts in prop::collection::vec(0u64..1_000_000u64, 0..20)) {
            let expected: u64 = amounts.iter().sum();
            let total = Money::checked_sum(amounts.into_iter().map(Money::from_minor)).unwrap();
            prop_assert_eq!(total.minor(), expected);
        }
    }
}
