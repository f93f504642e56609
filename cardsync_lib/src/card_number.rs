//! Partial credit-card numbers with wildcard-aware comparison.
//!
//! A [`CardNumber`] always holds exactly 16 positions, each either a digit
//! or the wildcard `x`. Portals and configuration files show different
//! fragments of the same number (`4277 19xx xxxx 1234`, `1234`, `4277*1234`),
//! so two numbers compare equal when no position has two different digits.
//! That relation is not transitive; `CardNumber` deliberately implements
//! neither `Eq` nor `Hash`.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

const LEN: usize = 16;
const WILDCARD: char = 'x';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CardNumberError {
    #[error("card number {0:?} has more than 16 digits")]
    TooLong(String),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardNumber {
    value: String,
}

impl CardNumber {
    pub fn parse(raw: &str) -> Result<Self, CardNumberError> {
        Ok(Self {
            value: Self::normalize(raw)?,
        })
    }

    /// Normalizes a (partial) card number to 16 positions.
    ///
    /// Digit groups keep their order; wildcards are spread evenly over the
    /// gaps between groups, with a single group anchored to the right:
    ///
    /// - `"1234"` → `xxxxxxxxxxxx1234`
    /// - `"4277 19xx xxxx 1234"` → `427719xxxxxx1234`
    /// - `"4277*1234"` → `4277xxxxxxxx1234`
    /// - `"4277x"` → `4277xxxxxxxxxxxx`
    pub fn normalize(raw: &str) -> Result<String, CardNumberError> {
        let compact: String = raw.split_whitespace().collect();
        let separators = Regex::new(r"[^0-9]+").expect("valid separator regex");
        let parts: Vec<&str> = separators.split(&compact).collect();

        let digits: usize = parts.iter().map(|p| p.len()).sum();
        if digits > LEN {
            return Err(CardNumberError::TooLong(raw.to_string()));
        }
        let padding = LEN - digits;

        // `None` marks a gap that receives wildcards.
        let mut slots: Vec<Option<&str>> = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 || parts.len() == 1 {
                slots.push(None);
            }
            slots.push(Some(part));
        }
        let gaps = slots.iter().filter(|s| s.is_none()).count();
        let per_gap = padding / gaps;

        let mut filled: Vec<String> = slots
            .into_iter()
            .map(|slot| match slot {
                Some(part) => part.to_string(),
                None => WILDCARD.to_string().repeat(per_gap),
            })
            .collect();

        let total: usize = filled.iter().map(String::len).sum();
        if let Some(first_gap) = filled
            .iter_mut()
            .find(|p| p.is_empty() || p.starts_with(WILDCARD))
        {
            first_gap.push_str(&WILDCARD.to_string().repeat(LEN - total));
        }

        Ok(filled.concat())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// True when no position is a wildcard.
    pub fn is_complete(&self) -> bool {
        !self.value.contains(WILDCARD)
    }

    /// Fills wildcard positions with the digits `other` knows.
    pub fn update(&mut self, other: &CardNumber) -> Result<(), SyncError> {
        if self != other {
            return Err(SyncError::CardMismatch {
                left: self.clone(),
                right: other.clone(),
            });
        }
        self.value = self
            .value
            .chars()
            .zip(other.value.chars())
            .map(|(a, b)| if a == WILDCARD && b != WILDCARD { b } else { a })
            .collect();
        Ok(())
    }
}

impl PartialEq for CardNumber {
    fn eq(&self, other: &Self) -> bool {
        self.value
            .chars()
            .zip(other.value.chars())
            .all(|(a, b)| a == WILDCARD || b == WILDCARD || a == b)
    }
}

impl FromStr for CardNumber {
    type Err = CardNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CardNumber {
    type Error = CardNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CardNumber> for String {
    fn from(card: CardNumber) -> Self {
        card.value
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardNumber({:?})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(raw: &str) -> CardNumber {
        CardNumber::parse(raw).unwrap()
    }

    #[test]
    fn normalize_examples() {
        assert_eq!(CardNumber::normalize("1234").unwrap(), "xxxxxxxxxxxx1234");
        assert_eq!(CardNumber::normalize("4277 19xx xxxx 1234").unwrap(), "427719xxxxxx1234");
        assert_eq!(CardNumber::normalize("4277*1234").unwrap(), "4277xxxxxxxx1234");
        assert_eq!(CardNumber::normalize("4277x").unwrap(), "4277xxxxxxxxxxxx");
        assert_eq!(CardNumber::normalize("").unwrap(), "xxxxxxxxxxxxxxxx");
        assert_eq!(CardNumber::normalize("1*2*3").unwrap(), "1xxxxxxx2xxxxxx3");
        assert_eq!(
            CardNumber::normalize("5500 0000 0000 0002").unwrap(),
            "5500000000000002"
        );
    }

    #[test]
    fn normalize_is_idempotent_and_sixteen_wide() {
        let inputs = [
            "1234",
            "4277 19xx xxxx 1234",
            "4277*1234",
            "4277x",
            "x1234x",
            "12*34*56",
            "1*2*3",
            "",
            "**",
            "4277-1900-0000-0001",
        ];
        for raw in inputs {
            let once = CardNumber::normalize(raw).unwrap();
            assert_eq!(once.len(), 16, "{raw:?} -> {once:?}");
            assert_eq!(CardNumber::normalize(&once).unwrap(), once, "{raw:?}");
        }
    }

    #[test]
    fn too_many_digits_is_rejected() {
        assert!(matches!(
            CardNumber::parse("12345678901234567"),
            Err(CardNumberError::TooLong(_))
        ));
    }

    #[test]
    fn equality_fixtures() {
        assert_eq!(card("1234"), card("4277 19xx xxxx 1234"));
        assert_ne!(card("1234"), card("5678"));
        // A bare group is anchored right, so it is compared with the last digits.
        assert_ne!(card("4277"), card("4277 19xx xxxx 0001"));
        assert_eq!(card("4277x"), card("4277 19xx xxxx 0001"));
        assert_ne!(card("4277x"), card("5500 0000 0000 0002"));
    }

    #[test]
    fn equality_is_reflexive_symmetric_but_not_transitive() {
        let a = card("1234x");
        let b = card("x");
        let c = card("4321x");
        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_eq!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn update_refines_wildcards() {
        let mut partial = card("1234");
        partial.update(&card("4277 19xx xxxx 1234")).unwrap();
        assert_eq!(partial.as_str(), "427719xxxxxx1234");
        partial.update(&card("4277190000001234")).unwrap();
        assert_eq!(partial.as_str(), "4277190000001234");
        assert!(partial.is_complete());
    }

    #[test]
    fn update_keeps_every_known_digit() {
        let a = card("4277x");
        let b = card("1234");
        let mut merged = a.clone();
        merged.update(&b).unwrap();
        for ((m, x), y) in merged.as_str().chars().zip(a.as_str().chars()).zip(b.as_str().chars()) {
            if x != 'x' || y != 'x' {
                assert_ne!(m, 'x');
            }
        }
    }

    #[test]
    fn update_unequal_fails() {
        let mut a = card("1234");
        let err = a.update(&card("5678")).unwrap_err();
        assert!(matches!(err, SyncError::CardMismatch { .. }));
        assert_eq!(a.as_str(), "xxxxxxxxxxxx1234");
    }

    #[test]
    fn serde_uses_normalized_string() {
        let json = serde_json::to_string(&card("1234")).unwrap();
        assert_eq!(json, "\"xxxxxxxxxxxx1234\"");
        let back: CardNumber = serde_json::from_str("\"4277*1234\"").unwrap();
        assert_eq!(back.as_str(), "4277xxxxxxxx1234");
    }
}
