//! Library layer for cardsync: card-portal crawling, the local transaction
//! record, and forwarding to a bookkeeping service.
//!
//! Builds on the `cardportal` crate for navigation and form handling; this
//! crate knows the portals' page layouts and what to do with the data.

pub mod accounts;
pub mod bookkeeping;
pub mod card_number;
pub mod config;
pub mod crawler;
pub mod error;
pub mod lexoffice;
pub mod manager;
pub mod reconcile;
pub mod statement;
pub mod store;
pub mod sync;
pub mod transaction;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use cardportal;

pub use accounts::{Account, AccountManager};
pub use bookkeeping::{Bookkeeping, BookkeepingError};
pub use card_number::{CardNumber, CardNumberError};
pub use config::{BankConfig, ConfigError, Configuration, ConfigurationManager};
pub use crawler::{Bank, Card, CardCrawler, CardFilter, CardHandle, Session, SsoPortal};
pub use error::{Result, SyncError};
pub use lexoffice::LexofficeClient;
pub use manager::{CardWalk, LoginSession, Manager, UnwindReport};
pub use reconcile::{symmetric_difference, Difference};
pub use statement::{DocumentKind, Statement};
pub use store::{RecordStore, StatementCache};
pub use sync::{discover_cards, CardReport, SyncReport, Synchronizer};
pub use transaction::{Transaction, TxnKey};
pub use upload::UploadPipeline;
