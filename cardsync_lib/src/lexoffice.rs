//! Blocking client for the lexoffice web application's REST endpoints.

use std::time::Duration;

use cardportal::truncate_body;
use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::accounts::Account;
use crate::bookkeeping::{
    AccountRecord, Bookkeeping, BookkeepingError, ImportProfileStatus, ImportStarted, ImportState,
    RemoteTransaction, UploadedFile,
};

pub const USER_AGENT: &str = "cardsync/0.1";
const PAGE_SIZE: usize = 60;
const MAX_PAGES: usize = 1000;
const CSV_MIME: &str = "application/vnd.ms-excel";

/// Endpoints and their path templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Logout,
    Privilege,
    UploadVoucherImage,
    FinancialAccounts,
    FinancialTransactions,
    UploadCsvFile,
    PutImportProfile,
    Import,
    ImportState,
}

impl Endpoint {
    fn template(self) -> &'static str {
        match self {
            Self::Login => "/grld-public/login/authorize",
            Self::Logout => "/grld-public/login/v100/logout",
            Self::Privilege => "/grld-rest/privilege-management/v100/privilege",
            Self::UploadVoucherImage => {
                "/grld-rest/voucherimageservice/1/v101/uploadBookkeepingVoucherImage/"
            }
            Self::FinancialAccounts => "/grld-rest/financialaccountservice/v100/financialAccounts",
            Self::FinancialTransactions => {
                "/grld-rest/financialtransactionservice/v100/financialTransactions"
            }
            Self::UploadCsvFile => "/grld-upload-rest/uploadNtService/v100/uploadCsvFile/",
            Self::PutImportProfile => {
                "/grld-rest/importprofileservice/v100/importprofile/financialAccount/{financial_account_id}"
            }
            Self::Import => "/grld-rest/financialtransactionimportservice/v100/import",
            Self::ImportState => {
                "/grld-rest/financialtransactionimportservice/v100/importState/{financial_transaction_import_id}"
            }
        }
    }
}

/// One page of financial transactions; the service sends either shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum TransactionPage {
    List(Vec<RemoteTransaction>),
    Paged {
        #[serde(alias = "items")]
        content: Vec<RemoteTransaction>,
    },
}

impl TransactionPage {
    fn into_items(self) -> Vec<RemoteTransaction> {
        match self {
            Self::List(items) | Self::Paged { content: items } => items,
        }
    }
}

pub struct LexofficeClient {
    base_url: String,
    http: Client,
}

impl LexofficeClient {
    /// A client for `https://<instance>`, not yet logged in.
    pub fn new(instance: &str) -> Result<Self, BookkeepingError> {
        Self::with_base_url(&format!("https://{}", instance))
    }

    /// A client for an arbitrary base URL. Used for testing with wiremock.
    pub fn with_base_url(base_url: &str) -> Result<Self, BookkeepingError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Creates a client and logs in with `auth`.
    pub fn connect(instance: &str, auth: &Map<String, Value>) -> Result<Self, BookkeepingError> {
        let client = Self::new(instance)?;
        client.login(auth)?;
        Ok(client)
    }

    pub fn url(&self, endpoint: Endpoint, params: &[(&str, &str)]) -> String {
        let mut path = endpoint.template().to_string();
        for (name, value) in params {
            path = path.replace(&format!("{{{}}}", name), value);
        }
        format!("{}{}", self.base_url, path)
    }

    fn send<T: DeserializeOwned>(
        &self,
        context: &str,
        request: RequestBuilder,
    ) -> Result<T, BookkeepingError> {
        let resp = request.send()?;
        let status = resp.status();
        let body = resp.text()?;
        tracing::debug!("{} -> {}", context, status);

        if !status.is_success() {
            let snippet = truncate_body(&body);
            tracing::error!("{} failed with status {}: {}", context, status, snippet);
            return Err(BookkeepingError::HttpStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|source| {
            tracing::error!("Failed to parse {} response: {}", context, truncate_body(body));
            BookkeepingError::Parse {
                context: context.to_string(),
                source,
            }
        })
    }

    pub fn login(&self, auth: &Map<String, Value>) -> Result<(), BookkeepingError> {
        let _: Value = self.send(
            "login",
            self.http.post(self.url(Endpoint::Login, &[])).json(auth),
        )?;
        tracing::info!("Logged in to {}", self.base_url);
        Ok(())
    }

    pub fn logout(&self) -> Result<(), BookkeepingError> {
        let _: Value = self.send("logout", self.http.get(self.url(Endpoint::Logout, &[])))?;
        Ok(())
    }

    pub fn privilege(&self) -> Result<Value, BookkeepingError> {
        self.send("privilege", self.http.get(self.url(Endpoint::Privilege, &[])))
    }

    fn transaction_page(
        &self,
        financial_account_id: &str,
        first_row: usize,
    ) -> Result<Vec<RemoteTransaction>, BookkeepingError> {
        let request = self
            .http
            .get(self.url(Endpoint::FinancialTransactions, &[]))
            .query(&[
                ("firstRow", first_row.to_string()),
                ("numRows", PAGE_SIZE.to_string()),
                ("financialAccountId", financial_account_id.to_string()),
            ]);
        let page: TransactionPage = self.send("financialTransactions", request)?;
        Ok(page.into_items())
    }

    fn file_part(filename: &str, data: &[u8], mime: &str) -> Result<multipart::Part, BookkeepingError> {
        Ok(multipart::Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime)?)
    }
}

impl Bookkeeping for LexofficeClient {
    fn list_financial_accounts(&self) -> Result<Vec<AccountRecord>, BookkeepingError> {
        self.send(
            "financialAccounts",
            self.http.get(self.url(Endpoint::FinancialAccounts, &[])),
        )
    }

    fn get_financial_transactions(
        &self,
        financial_account_id: &str,
    ) -> Result<Vec<RemoteTransaction>, BookkeepingError> {
        let mut all: Vec<RemoteTransaction> = Vec::new();
        let mut previous: Option<Vec<RemoteTransaction>> = None;
        for _ in 0..MAX_PAGES {
            let page = self.transaction_page(financial_account_id, all.len())?;
            if !page.is_empty() && previous.as_ref() == Some(&page) {
                tracing::warn!(
                    "financialTransactions ignored firstRow={} for {}; stopping",
                    all.len(),
                    financial_account_id
                );
                return Ok(all);
            }
            let fetched = page.len();
            all.extend(page.iter().cloned());
            if fetched < PAGE_SIZE {
                tracing::debug!("{} remote transactions on {}", all.len(), financial_account_id);
                return Ok(all);
            }
            previous = Some(page);
        }
        tracing::warn!(
            "Stopped after {} pages of transactions for {}",
            MAX_PAGES,
            financial_account_id
        );
        Ok(all)
    }

    fn upload_csv_data(&self, filename: &str, data: &[u8]) -> Result<UploadedFile, BookkeepingError> {
        let form = multipart::Form::new()
            .part("file", Self::file_part(filename, data, CSV_MIME)?)
            .text("uploadType", "csv");
        self.send(
            "uploadCsvFile",
            self.http.post(self.url(Endpoint::UploadCsvFile, &[])).multipart(form),
        )
    }

    fn put_importprofile(
        &self,
        account: &Account,
        settings: &Value,
    ) -> Result<ImportProfileStatus, BookkeepingError> {
        let id = account_id(account)?;
        let url = self.url(Endpoint::PutImportProfile, &[("financial_account_id", id)]);
        self.send("importprofile", self.http.put(url).json(settings))
    }

    fn do_import(
        &self,
        account: &Account,
        file_id: &str,
        description: &str,
    ) -> Result<ImportStarted, BookkeepingError> {
        let id = account_id(account)?;
        let body = json!({
            "fileId": file_id,
            "financialAccount": {
                "financialAccountId": id,
                "name": account.name,
            },
            "description": description,
        });
        self.send(
            "import",
            self.http.post(self.url(Endpoint::Import, &[])).json(&body),
        )
    }

    fn get_importstate(&self, import_id: &str) -> Result<ImportState, BookkeepingError> {
        let url = self.url(
            Endpoint::ImportState,
            &[("financial_transaction_import_id", import_id)],
        );
        self.send("importState", self.http.get(url))
    }

    fn upload_image(
        &self,
        filename: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<Value, BookkeepingError> {
        let form = multipart::Form::new()
            .part("file", Self::file_part(filename, data, content_type)?)
            .text("uploadType", "voucher");
        self.send(
            "uploadBookkeepingVoucherImage",
            self.http
                .post(self.url(Endpoint::UploadVoucherImage, &[]))
                .multipart(form),
        )
    }
}

fn account_id(account: &Account) -> Result<&str, BookkeepingError> {
    account.financial_account_id.as_deref().ok_or_else(|| {
        BookkeepingError::Unsupported(format!("account {} has no remote id", account.label()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_fill_named_params() {
        let client = LexofficeClient::with_base_url("https://app.lexoffice.test/").unwrap();
        assert_eq!(
            client.url(Endpoint::PutImportProfile, &[("financial_account_id", "fa-1")]),
            "https://app.lexoffice.test/grld-rest/importprofileservice/v100/importprofile/financialAccount/fa-1"
        );
        assert_eq!(
            client.url(Endpoint::Login, &[]),
            "https://app.lexoffice.test/grld-public/login/authorize"
        );
    }

    #[test]
    fn both_page_shapes_parse() {
        let list: TransactionPage = serde_json::from_str(r#"[{"amount": -5.0}]"#).unwrap();
        assert_eq!(list.into_items().len(), 1);
        let paged: TransactionPage =
            serde_json::from_str(r#"{"content": [{"amount": 1.5}, {"amount": 2}], "total": 2}"#).unwrap();
        assert_eq!(paged.into_items().len(), 2);
    }
}
