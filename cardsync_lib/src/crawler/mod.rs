//! Card-service portals: logging in, enumerating cards, scraping statements.

mod atos;
pub(crate) mod parse;
mod sso;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardportal::Navigator;

use crate::card_number::CardNumber;
use crate::error::Result;
use crate::manager::LoginSession;
use crate::statement::{DocumentKind, Statement};
use crate::store::StatementCache;
use crate::transaction::Transaction;

pub use self::atos::CardCrawler;
pub use self::sso::SsoPortal;

/// Transport shared between a session and the sessions stacked on it.
pub type SharedNavigator = Rc<RefCell<Navigator>>;

/// Card issuers whose portals run the same card-service software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    /// Berliner Sparkasse
    Bspk,
    Bwbank,
    Amazon,
    Commerzbank,
    Bahncard,
    Postbank,
}

impl Bank {
    pub const ALL: [Bank; 6] = [
        Bank::Bspk,
        Bank::Bwbank,
        Bank::Amazon,
        Bank::Commerzbank,
        Bank::Bahncard,
        Bank::Postbank,
    ];

    pub fn entry_url(self) -> &'static str {
        match self {
            Bank::Bspk => "https://kreditkarten-banking.berliner-sparkasse.de/cas/dispatch.do?bt_PRELON=do&ref=BSPK&service=COS",
            Bank::Bwbank => "https://www.kreditkartenbanking.de/ssc/cas/dispatch.do?bt_PRELON=1&ref=2000_SSC&service=COS",
            Bank::Amazon => "https://kreditkarten-banking.lbb.de/Amazon/cas/dispatch.do?bt_PRELON=do&ref=1200_AMAZON&service=COS",
            Bank::Commerzbank => "https://www.kreditkartenbanking.de/businesscard/cas/dispatch.do?bt_PRELON=1&ref=1500_CHAM&service=COS",
            Bank::Bahncard => "https://www.kreditkartenbanking.de/bahncard/cas/dispatch.do?bt_PRELON=1&ref=1500_KROKO&service=COS",
            Bank::Postbank => "https://kreditkarten.postbank.de/cas/dispatch.do?bt_PRELON=1&ref=1300&service=MASTER",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bank::Bspk => "bspk",
            Bank::Bwbank => "bwbank",
            Bank::Amazon => "amazon",
            Bank::Commerzbank => "commerzbank",
            Bank::Bahncard => "bahncard",
            Bank::Postbank => "postbank",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A card found on a portal's account overview.
#[derive(Debug, Clone)]
pub struct Card {
    pub bank: Bank,
    pub number: CardNumber,
    /// Absolute link to the card's overview.
    pub href: String,
}

/// Restricts crawling to configured cards.
///
/// A bare digit group such as `4277` is also tried as a prefix, so it
/// selects `4277 19xx xxxx 0001` as well as cards ending in `4277`.
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    allowed: Option<Vec<CardNumber>>,
}

impl CardFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(raw: Option<&[String]>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::all());
        };
        let mut allowed = Vec::new();
        for entry in raw {
            let entry = entry.trim();
            allowed.push(parse_card(entry)?);
            if !entry.is_empty() && entry.len() < 16 && entry.chars().all(|c| c.is_ascii_digit()) {
                allowed.push(parse_card(&format!("{}x", entry))?);
            }
        }
        Ok(Self {
            allowed: Some(allowed),
        })
    }

    pub fn matches(&self, card: &CardNumber) -> bool {
        match &self.allowed {
            None => true,
            Some(allowed) => allowed.iter().any(|a| a == card),
        }
    }
}

fn parse_card(raw: &str) -> Result<CardNumber> {
    CardNumber::parse(raw)
        .map_err(|e| crate::error::SyncError::Structure(format!("card filter: {}", e)))
}

/// Sessions the login stack holds.
pub enum Session {
    Card(CardCrawler),
    Portal(SsoPortal),
}

impl LoginSession for Session {
    fn log_in(&mut self) -> Result<()> {
        match self {
            Session::Card(c) => c.log_in(),
            Session::Portal(p) => p.log_in(),
        }
    }

    fn log_out(&mut self) -> Result<()> {
        match self {
            Session::Card(c) => c.log_out(),
            Session::Portal(p) => p.log_out(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Session::Card(c) => c.describe(),
            Session::Portal(p) => p.describe(),
        }
    }
}

/// A card borrowed from an active crawler session.
pub struct CardHandle<'a> {
    crawler: &'a CardCrawler,
    card: Card,
}

impl<'a> CardHandle<'a> {
    pub(crate) fn new(crawler: &'a CardCrawler, card: Card) -> Self {
        Self { crawler, card }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn number(&self) -> &CardNumber {
        &self.card.number
    }

    pub fn statements(&self, cache: &StatementCache) -> Result<Vec<Statement>> {
        self.crawler.statements(&self.card, cache)
    }

    /// Unbilled transactions for `None`, else the statement's, stamped with `captured_at`.
    pub fn transactions_at(
        &self,
        statement: Option<&Statement>,
        captured_at: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.crawler.transactions(&self.card, statement, captured_at)
    }

    /// The statement export, or `None` while the portal is still preparing it.
    pub fn download(&self, statement: &Statement, kind: DocumentKind) -> Result<Option<Vec<u8>>> {
        self.crawler.download(statement, kind)
    }
}
