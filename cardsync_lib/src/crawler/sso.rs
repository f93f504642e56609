use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cardportal::{
    last_submit_button, select_option, FieldValues, FormLocator, Navigator, OptionChoice,
    Postprocess,
};

use super::parse;
use super::{CardCrawler, SharedNavigator};
use crate::config::{BankConfig, SsoConfig};
use crate::error::{Result, SyncError};

const LOGIN_FORM: &str = "loginForm";
const LOGIN_BUTTON: &str = "bt_LOGIN";
const CHOOSER_FORM: &str = "cardChooser";

/// An outer single-sign-on portal that hands its session on to a card service.
pub struct SsoPortal {
    entry_url: String,
    auth: BTreeMap<String, String>,
    choice: OptionChoice,
    session: SharedNavigator,
    logout_url: Option<String>,
}

impl SsoPortal {
    pub fn new(config: &SsoConfig, navigator: Navigator) -> Self {
        Self {
            entry_url: config.entry_url.clone(),
            auth: config.auth.clone(),
            choice: config.choose.into(),
            session: Rc::new(RefCell::new(navigator)),
            logout_url: None,
        }
    }

    pub fn session(&self) -> &SharedNavigator {
        &self.session
    }

    pub(crate) fn describe(&self) -> String {
        match url::Url::parse(&self.entry_url) {
            Ok(url) => format!("sso {}", url.host_str().unwrap_or_default()),
            Err(_) => format!("sso {}", self.entry_url),
        }
    }

    pub fn log_in(&mut self) -> Result<()> {
        let mut nav = self.session.borrow_mut();
        nav.navigate(&self.entry_url)?;
        nav.submit_form(
            &FormLocator::named(LOGIN_FORM),
            FieldValues::Map(&self.auth),
            Some(LOGIN_BUTTON),
            &[],
        )?;

        let doc = nav.document()?;
        if let Some(message) = parse::portal_login_error(&doc) {
            return Err(SyncError::Login(message));
        }
        if parse::has_form(&doc, LOGIN_FORM) {
            return Err(SyncError::Login(
                "portal login failed, no further information available".into(),
            ));
        }
        self.logout_url = parse::portal_logout_href(&doc).map(|href| nav.resolve_url(&href));
        tracing::info!("Logged in to {}", self.describe());
        Ok(())
    }

    /// Opens the card service from the portal's current page.
    ///
    /// The returned crawler shares this portal's transport and still has
    /// to be logged in, which only confirms the card overview.
    pub fn delegate(&self, bank: &BankConfig) -> Result<CardCrawler> {
        let mut nav = self.session.borrow_mut();
        let doc = nav.document()?;

        if let Some(href) = parse::delegate_href(&doc) {
            tracing::debug!("Following card service link");
            nav.navigate(&href)?;
        } else if parse::has_form(&doc, CHOOSER_FORM) {
            let pick = select_option(None, self.choice);
            let submit = last_submit_button();
            let steps: [Postprocess<'_>; 2] = [&pick, &submit];
            nav.submit_form(
                &FormLocator::named(CHOOSER_FORM),
                FieldValues::Defaults,
                None,
                &steps,
            )?;
        } else {
            return Err(SyncError::Structure(
                "portal shows neither a card service link nor a chooser".into(),
            ));
        }
        drop(nav);

        CardCrawler::delegated(bank, Rc::clone(&self.session))
    }

    pub fn log_out(&mut self) -> Result<()> {
        let mut nav = self.session.borrow_mut();
        if nav.page().is_none() {
            return Ok(());
        }
        let href = nav
            .document()
            .ok()
            .and_then(|doc| parse::portal_logout_href(&doc))
            .map(|href| nav.resolve_url(&href))
            .or_else(|| self.logout_url.clone())
            .ok_or_else(|| SyncError::Structure("no portal logout link".into()))?;
        nav.navigate(&href)?;
        nav.clear()?;
        self.logout_url = None;
        tracing::info!("Logged out of {}", self.describe());
        Ok(())
    }
}
