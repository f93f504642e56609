//! Scraped card transactions and the text normalization they go through.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::card_number::CardNumber;

/// Column names of the record store, in field order.
pub const COLUMNS: [&str; 13] = [
    "card_number",
    "amount",
    "ref_id",
    "posting_seq_id",
    "posting_date",
    "statement_id",
    "formatted_amount",
    "purchase_date",
    "description",
    "additional_description",
    "foreign_currency",
    "correlation_id",
    "captured_at",
];

/// One booked or pending card transaction. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub card_number: CardNumber,
    /// Sign-prefixed amount with decimal comma, e.g. `-12,34`.
    pub amount: String,
    pub ref_id: String,
    /// Portal-assigned posting sequence; authoritative identity when present.
    pub posting_seq_id: String,
    pub posting_date: String,
    pub statement_id: String,
    pub formatted_amount: String,
    pub purchase_date: String,
    pub description: String,
    pub additional_description: String,
    pub foreign_currency: String,
    pub correlation_id: String,
    pub captured_at: DateTime<Utc>,
}

/// Identity used to match transactions from two sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxnKey {
    Posting(String),
    Tuple {
        amount: String,
        purchase_date: String,
        description: String,
        additional_description: String,
    },
}

impl Transaction {
    pub fn equivalence_key(&self) -> TxnKey {
        if !self.posting_seq_id.is_empty() {
            TxnKey::Posting(self.posting_seq_id.clone())
        } else {
            self.content_key()
        }
    }

    /// The tuple part of the key, ignoring the posting sequence id.
    pub fn content_key(&self) -> TxnKey {
        TxnKey::Tuple {
            amount: self.amount.clone(),
            purchase_date: self.purchase_date.clone(),
            description: self.description.clone(),
            additional_description: self.additional_description.clone(),
        }
    }
}

/// Turns a portal amount into a sign-prefixed decimal-comma string.
///
/// A trailing `+`/`-` token moves to the front; without one the amount is a
/// debit unless it already starts with a sign.
///
/// ```
/// use cardsync_lib::transaction::normalize_amount;
/// assert_eq!(normalize_amount("12,34 +"), "+12,34");
/// assert_eq!(normalize_amount("12,34"), "-12,34");
/// assert_eq!(normalize_amount("1.234,56 -"), "-1234,56");
/// ```
pub fn normalize_amount(raw: &str) -> String {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let (number, sign) = match tokens.as_slice() {
        [] => return String::new(),
        [rest @ .., last] if (*last == "+" || *last == "-") && !rest.is_empty() => {
            (rest.concat(), Some(*last))
        }
        all => (all.concat(), None),
    };
    let number = normalize_decimal(&number);

    match sign {
        Some(sign) => format!("{}{}", sign, number.trim_start_matches(['+', '-'])),
        None if number.starts_with(['+', '-']) => number,
        None => format!("-{}", number),
    }
}

/// `1.234,56` → `1234,56`; `12.34` → `12,34`.
fn normalize_decimal(number: &str) -> String {
    if number.contains(',') {
        number.replace('.', "")
    } else if let Some(pos) = number.rfind('.') {
        let (int, frac) = number.split_at(pos);
        format!("{},{}", int.replace('.', ""), &frac[1..])
    } else {
        number.to_string()
    }
}

/// `dd.mm.yyyy` → `yyyy-mm-dd`. Whitespace is ignored; empty stays empty.
pub fn normalize_date(raw: &str) -> Option<String> {
    let compact: String = raw.split_whitespace().collect();
    if compact.is_empty() {
        return Some(String::new());
    }
    NaiveDate::parse_from_str(&compact, "%d.%m.%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}
