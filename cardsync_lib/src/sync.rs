//! One synchronization run over every configured card.

use chrono::Utc;
use serde::Serialize;

use crate::accounts::AccountManager;
use crate::bookkeeping::Bookkeeping;
use crate::card_number::CardNumber;
use crate::config::{Configuration, UploadConfig};
use crate::crawler::{Bank, Card, CardHandle};
use crate::error::{Result, SyncError};
use crate::manager::Manager;
use crate::statement::DocumentKind;
use crate::store::{RecordStore, StatementCache};
use crate::upload::UploadPipeline;

#[derive(Debug, Clone, Serialize)]
pub struct CardReport {
    pub bank: Bank,
    pub card: CardNumber,
    /// Transactions the portal showed in this run.
    pub scraped: usize,
    /// Rows appended to the local record.
    pub new_local: usize,
    pub uploaded: usize,
    /// Statement exports added to the cache.
    pub exports: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub cards: Vec<CardReport>,
    /// Banks or cards skipped because of an error.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new_local(&self) -> usize {
        self.cards.iter().map(|c| c.new_local).sum()
    }

    pub fn uploaded(&self) -> usize {
        self.cards.iter().map(|c| c.uploaded).sum()
    }
}

pub struct Synchronizer {
    records: RecordStore,
    cache: StatementCache,
    accounts: AccountManager,
    upload: UploadConfig,
}

impl Synchronizer {
    pub fn new(config: &Configuration) -> Result<Self> {
        Ok(Self {
            records: RecordStore::new(config.records_dir()),
            cache: StatementCache::new(config.statements_dir()),
            accounts: AccountManager::from_seeds(&config.accounts)?,
            upload: config.upload.clone(),
        })
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    /// Crawls every card, records new transactions and, given a client,
    /// uploads what the linked bookkeeping account is missing.
    pub fn run(&mut self, manager: &mut Manager, bookkeeping: Option<&dyn Bookkeeping>) -> Result<SyncReport> {
        if let Some(client) = bookkeeping {
            self.accounts.refresh(client)?;
        }

        manager.scope(|m| {
            let mut report = SyncReport::default();
            let mut walk = m.all_cards()?;
            loop {
                let handle = match walk.next() {
                    Ok(Some(handle)) => handle,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Bank skipped: {}", e);
                        report.errors.push(e.to_string());
                        continue;
                    }
                };
                match self.sync_card(&handle, bookkeeping) {
                    Ok(card) => report.cards.push(card),
                    Err(e @ SyncError::CardMismatch { .. }) => return Err(e),
                    Err(e) => {
                        tracing::warn!("Card {} skipped: {}", handle.number(), e);
                        report.errors.push(format!("{}: {}", handle.number(), e));
                    }
                }
            }
            tracing::info!(
                "Synchronized {} cards, {} new, {} uploaded",
                report.cards.len(),
                report.new_local(),
                report.uploaded()
            );
            Ok(report)
        })
    }

    fn sync_card(&self, handle: &CardHandle<'_>, bookkeeping: Option<&dyn Bookkeeping>) -> Result<CardReport> {
        let card = handle.number().clone();
        let captured_at = Utc::now();
        let mut fresh = handle.transactions_at(None, captured_at)?;
        let mut exports = 0;

        for statement in handle.statements(&self.cache)? {
            fresh.extend(handle.transactions_at(Some(&statement), captured_at)?);
            if statement.synced {
                continue;
            }
            match handle.download(&statement, DocumentKind::Csv)? {
                Some(data) => {
                    let path = self.cache.write(&card, &statement.date, DocumentKind::Csv, &data)?;
                    tracing::debug!("Cached {}", path.display());
                    exports += 1;
                }
                None => tracing::info!("Statement {} of {} not exported yet", statement.date, card),
            }
        }

        let scraped = fresh.len();
        let new_local = self.records.sync(&card, fresh.clone())?.len();

        let uploaded = match (bookkeeping, self.accounts.for_card(&card)) {
            (Some(client), Some(account)) => UploadPipeline::new(client, &self.upload)
                .upload(account, &fresh)?
                .len(),
            (Some(_), None) => {
                tracing::debug!("No bookkeeping account for {}", card);
                0
            }
            (None, _) => 0,
        };

        tracing::info!("{}: {} scraped, {} new, {} uploaded", card, scraped, new_local, uploaded);
        Ok(CardReport {
            bank: handle.card().bank,
            card,
            scraped,
            new_local,
            uploaded,
            exports,
        })
    }
}

/// Logs in everywhere and lists the cards found, skipping banks that fail.
pub fn discover_cards(manager: &mut Manager) -> Result<(Vec<Card>, Vec<String>)> {
    manager.scope(|m| {
        let mut cards = Vec::new();
        let mut errors = Vec::new();
        let mut walk = m.all_cards()?;
        loop {
            match walk.next() {
                Ok(Some(handle)) => cards.push(handle.card().clone()),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Bank skipped: {}", e);
                    errors.push(e.to_string());
                }
            }
        }
        Ok((cards, errors))
    })
}
