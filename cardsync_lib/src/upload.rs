//! Forwarding new card transactions to a bookkeeping account.
//!
//! Upload a CSV file, point the account's import profile at its columns,
//! start the import and poll until the service reports it done.

use std::io;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::accounts::Account;
use crate::bookkeeping::{Bookkeeping, RemoteTransaction};
use crate::config::UploadConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::symmetric_difference;
use crate::transaction::Transaction;

const STATUS_OK: &str = "OK";
const STATUS_PENDING: &str = "PENDING";
const STATUS_DONE: &str = "DONE";

/// Header of the uploaded file; the import profile maps these by position.
const IMPORT_COLUMNS: [&str; 5] = [
    "transactionDate",
    "valueDate",
    "amount",
    "purpose",
    "additionalInfo",
];

/// The fields a local and a remote transaction are compared on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey {
    pub amount: String,
    pub date: String,
    pub purpose: String,
}

impl UploadKey {
    pub fn from_transaction(txn: &Transaction) -> Self {
        Self {
            amount: two_decimals(&txn.amount),
            date: txn.purchase_date.clone(),
            purpose: txn.description.trim().to_string(),
        }
    }

    /// Amount as `+12,34`/`-5,00`, date cut to `yyyy-mm-dd`.
    pub fn from_remote(remote: &RemoteTransaction) -> Self {
        let date = remote
            .transaction_date
            .as_deref()
            .or(remote.value_date.as_deref())
            .unwrap_or_default();
        Self {
            amount: format!("{:+.2}", remote.amount).replace('.', ","),
            date: date.chars().take(10).collect(),
            purpose: remote.purpose.as_deref().unwrap_or_default().trim().to_string(),
        }
    }
}

/// Pads the fraction of a decimal-comma amount to two places: `-5` → `-5,00`.
fn two_decimals(amount: &str) -> String {
    let amount = amount.trim();
    match amount.split_once(',') {
        None if amount.is_empty() => String::new(),
        None => format!("{},00", amount),
        Some((int, frac)) if frac.len() < 2 => format!("{},{:0<2}", int, frac),
        Some(_) => amount.to_string(),
    }
}

#[derive(Serialize)]
struct ImportRow<'a> {
    transaction_date: &'a str,
    value_date: &'a str,
    amount: &'a str,
    purpose: &'a str,
    additional_info: String,
}

/// Renders `transactions` in the column layout [`import_profile`] describes.
pub fn render_import_csv(transactions: &[Transaction]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(IMPORT_COLUMNS)?;
    for txn in transactions {
        let value_date = if txn.posting_date.is_empty() {
            &txn.purchase_date
        } else {
            &txn.posting_date
        };
        let additional_info = [txn.additional_description.as_str(), txn.foreign_currency.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        writer.serialize(ImportRow {
            transaction_date: &txn.purchase_date,
            value_date,
            amount: &txn.amount,
            purpose: &txn.description,
            additional_info,
        })?;
    }
    writer
        .into_inner()
        .map_err(|e| SyncError::Io(io::Error::other(e.to_string())))
}

/// Import profile settings matching [`render_import_csv`].
pub fn import_profile() -> Value {
    json!({
        "delimiter": "Semicolon",
        "quoteCharacter": "DoubleQuote",
        "characterSet": "UTF-8",
        "negateAmount": false,
        "skipLines": 1,
        "dateFormat": "yyyy-MM-dd",
        "decimalSeparator": "Comma",
        "columns": {
            "transactionDate": 0,
            "valueDate": 1,
            "amount": 2,
            "purpose": 3,
            "additionalInfo": 4,
        },
    })
}

pub struct UploadPipeline<'a> {
    client: &'a dyn Bookkeeping,
    attempts: u32,
    interval: Duration,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(client: &'a dyn Bookkeeping, config: &UploadConfig) -> Self {
        Self {
            client,
            attempts: config.poll_attempts,
            interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The transactions of `fresh` the account has not booked yet.
    pub fn missing_remotely(&self, account: &Account, fresh: &[Transaction]) -> Result<Vec<Transaction>> {
        let id = remote_id(account)?;
        let remote = self.client.get_financial_transactions(id)?;
        let diff = symmetric_difference(
            fresh.iter().cloned(),
            remote,
            UploadKey::from_transaction,
            UploadKey::from_remote,
            UploadKey::clone,
        );
        Ok(diff.only_a)
    }

    /// Uploads whatever of `fresh` is missing remotely and returns it.
    pub fn upload(&self, account: &Account, fresh: &[Transaction]) -> Result<Vec<Transaction>> {
        let missing = self.missing_remotely(account, fresh)?;
        if missing.is_empty() {
            tracing::debug!("Nothing to upload to {}", account.label());
            return Ok(missing);
        }

        let now = Utc::now();
        let filename = format!("cardsync-{}.csv", now.format("%Y%m%d%H%M%S"));
        let data = render_import_csv(&missing)?;
        let file = self.client.upload_csv_data(&filename, &data)?;

        let profile = self.client.put_importprofile(account, &import_profile())?;
        expect_status("importprofile", &profile.status_type, &profile)?;

        let description = format!("cardsync {}", now.format("%Y-%m-%d %H:%M"));
        let started = self.client.do_import(account, &file.id, &description)?;
        expect_status("import", &started.status, &started)?;
        let import_id = started.financial_transaction_import_id.as_deref().ok_or_else(|| {
            SyncError::UnexpectedResponse {
                context: "import".into(),
                raw: raw_json(&started),
            }
        })?;

        self.wait_for(import_id)?;
        tracing::info!("Uploaded {} transactions to {}", missing.len(), account.label());
        Ok(missing)
    }

    fn wait_for(&self, import_id: &str) -> Result<()> {
        let mut last = String::new();
        for attempt in 1..=self.attempts {
            let state = self.client.get_importstate(import_id)?;
            match state.status.as_str() {
                STATUS_DONE => return Ok(()),
                STATUS_OK | STATUS_PENDING => {
                    tracing::debug!("Import {} is {} (poll {})", import_id, state.status, attempt);
                    last = state.status;
                }
                _ => {
                    return Err(SyncError::UnexpectedResponse {
                        context: "importState".into(),
                        raw: raw_json(&state),
                    })
                }
            }
            if attempt < self.attempts {
                thread::sleep(self.interval);
            }
        }
        Err(SyncError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "import {} still {} after {} polls",
                import_id, last, self.attempts
            ),
        )))
    }
}

fn remote_id(account: &Account) -> Result<&str> {
    account
        .financial_account_id
        .as_deref()
        .ok_or_else(|| SyncError::Structure(format!("account {} has no remote id", account.label())))
}

fn expect_status<T: Serialize>(context: &str, status: &str, response: &T) -> Result<()> {
    match status {
        STATUS_OK | STATUS_PENDING | STATUS_DONE => Ok(()),
        _ => Err(SyncError::UnexpectedResponse {
            context: context.into(),
            raw: raw_json(response),
        }),
    }
}

fn raw_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample;

    fn remote(amount: f64, date: &str, purpose: &str) -> RemoteTransaction {
        serde_json::from_value(json!({
            "amount": amount,
            "transactionDate": date,
            "purpose": purpose,
        }))
        .unwrap()
    }

    #[test]
    fn remote_keys_use_local_conventions() {
        let key = UploadKey::from_remote(&remote(-5.0, "2026-09-01T00:00:00.000+02:00", " Coffee "));
        assert_eq!(key.amount, "-5,00");
        assert_eq!(key.date, "2026-09-01");
        assert_eq!(key.purpose, "Coffee");
        assert_eq!(UploadKey::from_remote(&remote(12.3, "", "")).amount, "+12,30");
        assert_eq!(key, UploadKey::from_transaction(&sample("", "-5,00", "Coffee")));
    }

    #[test]
    fn local_amounts_pad_to_cents() {
        assert_eq!(UploadKey::from_transaction(&sample("", "-5", "Coffee")).amount, "-5,00");
        assert_eq!(UploadKey::from_transaction(&sample("", "+12,3", "Refund")).amount, "+12,30");
        assert_eq!(UploadKey::from_transaction(&sample("", "-23,90", "Bahn")).amount, "-23,90");
        assert_eq!(
            UploadKey::from_transaction(&sample("", "-5", "Coffee")),
            UploadKey::from_remote(&remote(-5.0, "2026-09-01", "Coffee"))
        );
    }

    #[test]
    fn import_csv_has_header_and_rows() {
        let mut txn = sample("1", "-23,90", "BAHN.DE");
        txn.additional_description = "FRANKFURT".into();
        txn.posting_date = String::new();
        let csv = String::from_utf8(render_import_csv(&[txn]).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "transactionDate;valueDate;amount;purpose;additionalInfo");
        assert_eq!(lines[1], "2026-09-01;2026-09-01;-23,90;BAHN.DE;FRANKFURT");
    }
}
