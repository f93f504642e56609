//! What the sync needs from a remote bookkeeping service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::accounts::Account;

#[derive(thiserror::Error, Debug)]
pub enum BookkeepingError {
    #[error("bookkeeping request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("bookkeeping service answered {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("cannot parse {context} response: {source}")]
    Parse {
        context: String,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Unsupported(String),
}

/// A financial account as the service lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub financial_account_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
    #[serde(default, alias = "cardNumber")]
    pub credit_card_number: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A transaction already booked on a remote account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTransaction {
    pub amount: f64,
    #[serde(default)]
    pub value_date: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    #[serde(alias = "fileId")]
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProfileStatus {
    pub status_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStarted {
    pub status: String,
    #[serde(default)]
    pub financial_transaction_import_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportState {
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote bookkeeping operations, blocking.
pub trait Bookkeeping {
    fn list_financial_accounts(&self) -> Result<Vec<AccountRecord>, BookkeepingError>;

    fn get_financial_transactions(
        &self,
        financial_account_id: &str,
    ) -> Result<Vec<RemoteTransaction>, BookkeepingError>;

    fn upload_csv_data(&self, filename: &str, data: &[u8]) -> Result<UploadedFile, BookkeepingError>;

    fn put_importprofile(
        &self,
        account: &Account,
        settings: &Value,
    ) -> Result<ImportProfileStatus, BookkeepingError>;

    fn do_import(
        &self,
        account: &Account,
        file_id: &str,
        description: &str,
    ) -> Result<ImportStarted, BookkeepingError>;

    fn get_importstate(&self, import_id: &str) -> Result<ImportState, BookkeepingError>;

    /// Uploads a voucher document such as a statement PDF.
    fn upload_image(
        &self,
        filename: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<Value, BookkeepingError>;
}
