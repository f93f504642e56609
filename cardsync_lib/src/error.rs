//! Error types for crawling, reconciliation and upload.

use crate::bookkeeping::BookkeepingError;
use crate::card_number::CardNumber;
use crate::config::ConfigError;

/// Errors produced by the sync layer.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The portal rejected the credentials or the expected page never appeared.
    #[error("login failed: {0}")]
    Login(String),
    /// A transient portal state; worth retrying on a later run.
    #[error("temporary portal error: {0}")]
    Temporary(String),
    /// Navigation or form submission failed.
    #[error(transparent)]
    Portal(#[from] cardportal::Error),
    /// An expected form, table or link is missing from a page.
    #[error("unexpected page structure: {0}")]
    Structure(String),
    /// Two card numbers that were supposed to describe the same card disagree.
    #[error("card numbers {left} and {right} do not match")]
    CardMismatch { left: CardNumber, right: CardNumber },
    /// The manager was entered while already entered.
    #[error("manager is already entered")]
    Nesting,
    /// An operation needed an entered manager.
    #[error("manager is not entered")]
    NotEntered,
    /// Reading or writing the local record store failed.
    #[error("record store error: {0}")]
    Store(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bookkeeping(#[from] BookkeepingError),
    /// The bookkeeping service answered with a status we do not handle.
    #[error("unexpected response during {context}: {raw}")]
    UnexpectedResponse { context: String, raw: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
