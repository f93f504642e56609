use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use url::Url;

use cardportal::{
    select_option, FieldValues, Form, FormLocator, Navigator, OptionChoice, Payload, Postprocess,
};

use super::parse::{self, RowContext};
use super::{Bank, Card, CardFilter, SharedNavigator};
use crate::config::BankConfig;
use crate::error::{Result, SyncError};
use crate::statement::{DocumentKind, Statement};
use crate::store::StatementCache;
use crate::transaction::Transaction;

const PRELOGON_FORM: &str = "preLogonForm";
const LOGON_BUTTON: &str = "bt_LOGON";
const SERVICE_FORM: &str = "service";
const CONTINUE_BUTTON: &str = "continueBtn";
const STATEMENT_LIST_FLAG: &str = "bt_STMTLIST";
const TRANSACTIONS_FLAG: &str = "bt_TXN";
const STATEMENT_BUTTON: &str = "bt_STMT";
const EXPORT_BUTTON: &str = "bt_EXPORT";
const EXPORT_FORM: &str = "exportForm";
const SAVE_BUTTON: &str = "bt_SAVE";
const FORMAT_SELECT: &str = "format";

const UNBILLED_HEADER: usize = 1;
const STATEMENT_HEADER: usize = 2;

/// Crawler for one login on a card-service portal.
pub struct CardCrawler {
    bank: Bank,
    entry_url: String,
    auth: BTreeMap<String, String>,
    filter: CardFilter,
    session: SharedNavigator,
    /// Reached through an SSO portal; the transport belongs to it.
    delegated: bool,
    overview_url: Option<String>,
    logout_url: Option<String>,
}

impl CardCrawler {
    /// A crawler that logs in with its own credentials and transport.
    pub fn direct(config: &BankConfig, navigator: Navigator) -> Result<Self> {
        Ok(Self {
            bank: config.bank,
            entry_url: config.entry_url().to_string(),
            auth: config.auth.clone(),
            filter: CardFilter::new(config.cards.as_deref())?,
            session: Rc::new(RefCell::new(navigator)),
            delegated: false,
            overview_url: None,
            logout_url: None,
        })
    }

    /// A crawler continuing a session an SSO portal already opened.
    pub fn delegated(config: &BankConfig, session: SharedNavigator) -> Result<Self> {
        Ok(Self {
            bank: config.bank,
            entry_url: config.entry_url().to_string(),
            auth: BTreeMap::new(),
            filter: CardFilter::new(config.cards.as_deref())?,
            session,
            delegated: true,
            overview_url: None,
            logout_url: None,
        })
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    pub fn session(&self) -> &SharedNavigator {
        &self.session
    }

    pub(crate) fn describe(&self) -> String {
        if self.delegated {
            format!("{} (delegated)", self.bank)
        } else {
            self.bank.to_string()
        }
    }

    pub fn log_in(&mut self) -> Result<()> {
        let mut nav = self.session.borrow_mut();
        if !self.delegated {
            tracing::debug!("Logging in to {}", self.bank);
            nav.navigate(&self.entry_url)?;
            nav.submit_form(
                &FormLocator::named(PRELOGON_FORM),
                FieldValues::Map(&self.auth),
                Some(LOGON_BUTTON),
                &[],
            )?;

            let doc = nav.document()?;
            if let Some(message) = parse::tab_error(&doc) {
                return Err(SyncError::Login(message));
            }
            if parse::has_form(&doc, PRELOGON_FORM) {
                return Err(SyncError::Login(
                    "login failed, no further information available".into(),
                ));
            }
        }

        if parse::has_form(&nav.document()?, SERVICE_FORM) {
            nav.submit_form(
                &FormLocator::named(SERVICE_FORM),
                FieldValues::Defaults,
                Some(CONTINUE_BUTTON),
                &[],
            )?;
        }

        let doc = nav.document()?;
        if !parse::has_account_table(&doc) {
            return Err(SyncError::Login(format!(
                "{} did not show the card overview after login",
                self.bank
            )));
        }
        self.logout_url = parse::logout_href(&doc).map(|href| nav.resolve_url(&href));
        self.overview_url = nav.page().map(|p| p.url().to_string());
        tracing::info!("Logged in to {}", self.describe());
        Ok(())
    }

    pub fn log_out(&mut self) -> Result<()> {
        let mut nav = self.session.borrow_mut();
        if nav.page().is_none() {
            return Ok(());
        }
        let href = nav
            .document()
            .ok()
            .and_then(|doc| parse::logout_href(&doc))
            .map(|href| nav.resolve_url(&href))
            .or_else(|| self.logout_url.clone())
            .ok_or_else(|| SyncError::Structure(format!("no logout link for {}", self.bank)))?;

        nav.navigate(&href)?;
        if !self.delegated {
            nav.clear()?;
        }
        self.logout_url = None;
        self.overview_url = None;
        tracing::info!("Logged out of {}", self.describe());
        Ok(())
    }

    /// Cards on the account overview that pass the configured filter.
    pub fn cards(&self) -> Result<Vec<Card>> {
        let mut nav = self.session.borrow_mut();
        let mut doc = nav.document()?;
        if !parse::has_account_table(&doc) {
            let overview = self
                .overview_url
                .clone()
                .ok_or_else(|| SyncError::Structure("account overview unknown".into()))?;
            nav.navigate(&overview)?;
            doc = nav.document()?;
        }

        let mut cards = Vec::new();
        for link in parse::card_links(&doc)? {
            if !self.filter.matches(&link.number) {
                tracing::debug!("Card {} filtered out", link.number);
                continue;
            }
            cards.push(Card {
                bank: self.bank,
                number: link.number,
                href: nav.resolve_url(&link.href),
            });
        }
        Ok(cards)
    }

    pub(crate) fn statements(&self, card: &Card, cache: &StatementCache) -> Result<Vec<Statement>> {
        let url = flagged_url(&card.href, STATEMENT_LIST_FLAG)?;
        let mut nav = self.session.borrow_mut();
        nav.navigate(&url)?;
        let doc = nav.document()?;

        // Statement forms are submitted later from other pages; pin their
        // actions to the list page.
        let list_url = nav.page().map(|p| p.url().to_string()).unwrap_or(url);
        let statements = parse::statement_entries(&doc)?
            .into_iter()
            .map(|entry| {
                let mut form = entry.form;
                form.action = if form.action.is_empty() {
                    list_url.clone()
                } else {
                    nav.resolve_url(&form.action)
                };
                Statement {
                    synced: cache.contains(&card.number, &entry.date, DocumentKind::Csv),
                    date: entry.date,
                    form,
                    first_accessed: entry.first_accessed,
                }
            })
            .collect::<Vec<_>>();
        tracing::debug!("{} statements for {}", statements.len(), card.number);
        Ok(statements)
    }

    pub(crate) fn transactions(
        &self,
        card: &Card,
        statement: Option<&Statement>,
        captured_at: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let mut nav = self.session.borrow_mut();
        let (occurrence, statement_id) = match statement {
            None => {
                nav.navigate(&flagged_url(&card.href, TRANSACTIONS_FLAG)?)?;
                (UNBILLED_HEADER, "")
            }
            Some(statement) => {
                nav.submit_form(
                    &FormLocator::Form(statement.form.clone()),
                    FieldValues::Defaults,
                    Some(STATEMENT_BUTTON),
                    &[],
                )?;
                (STATEMENT_HEADER, statement.date.as_str())
            }
        };

        let doc = nav.document()?;
        let ctx = RowContext {
            card: &card.number,
            statement_id,
            captured_at,
        };
        parse::transactions(&doc, occurrence, &ctx)
    }

    pub(crate) fn download(&self, statement: &Statement, kind: DocumentKind) -> Result<Option<Vec<u8>>> {
        let mut nav = self.session.borrow_mut();
        nav.submit_form(
            &FormLocator::Form(statement.form.clone()),
            FieldValues::Defaults,
            Some(EXPORT_BUTTON),
            &[],
        )?;

        let pick_format = |form: &Form, payload: &mut Payload| {
            if form.control(FORMAT_SELECT).is_some() {
                payload.set(FORMAT_SELECT, kind.format_value());
                Ok(())
            } else {
                select_option(None, OptionChoice::First)(form, payload)
            }
        };
        let steps: [Postprocess<'_>; 1] = [&pick_format];
        nav.submit_form(
            &FormLocator::named(EXPORT_FORM),
            FieldValues::Defaults,
            Some(SAVE_BUTTON),
            &steps,
        )?;

        let doc = nav.document()?;
        match parse::typed_link(&doc, kind.mime()) {
            Some(href) => {
                let page = nav.navigate(&href)?;
                tracing::debug!("Downloaded {} bytes of {}", page.body().len(), kind.mime());
                Ok(Some(page.body().to_vec()))
            }
            None if parse::export_pending(&doc) => {
                tracing::info!("Export of statement {} not ready yet", statement.date);
                Ok(None)
            }
            None => Err(SyncError::Structure(format!(
                "no {} link for statement {}",
                kind.mime(),
                statement.date
            ))),
        }
    }
}

/// `base` with its `bt_*` query parameters replaced by `flag=do`.
fn flagged_url(base: &str, flag: &str) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| SyncError::Structure(format!("invalid card link {}: {}", base, e)))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("bt_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut().clear().extend_pairs(kept).append_pair(flag, "do");
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flagged_url_replaces_button_params() {
        let url = flagged_url(
            "https://cards.example/cas/dispatch.do?card=1&bt_OVERVIEW=do&ref=X",
            STATEMENT_LIST_FLAG,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://cards.example/cas/dispatch.do?card=1&ref=X&bt_STMTLIST=do"
        );
    }

    #[test]
    fn flagged_url_without_query() {
        let url = flagged_url("https://cards.example/txn.do", TRANSACTIONS_FLAG).unwrap();
        assert_eq!(url, "https://cards.example/txn.do?bt_TXN=do");
        assert!(flagged_url("dispatch.do?x=1", TRANSACTIONS_FLAG).is_err());
    }
}
