//! Bookkeeping accounts and the cards they belong to.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bookkeeping::{AccountRecord, Bookkeeping};
use crate::card_number::CardNumber;
use crate::config::AccountSeed;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Account {
    /// Assigned by the bookkeeping service; never changes once known.
    pub financial_account_id: Option<String>,
    pub name: Option<String>,
    pub account_type: Option<String>,
    pub card_number: Option<CardNumber>,
    pub extra: Map<String, Value>,
}

impl Account {
    pub fn from_seed(seed: &AccountSeed) -> Result<Self> {
        let card = CardNumber::parse(&seed.card)
            .map_err(|e| SyncError::Structure(format!("account {}: {}", seed.name, e)))?;
        Ok(Self {
            name: Some(seed.name.clone()),
            card_number: Some(card),
            ..Self::default()
        })
    }

    fn from_record(record: &AccountRecord) -> Result<Self> {
        let mut account = Self::default();
        account.merge(record)?;
        Ok(account)
    }

    /// Takes over the remote fields; the card number is refined, not replaced.
    pub fn merge(&mut self, record: &AccountRecord) -> Result<()> {
        match &self.financial_account_id {
            Some(id) if *id != record.financial_account_id => {
                return Err(SyncError::Structure(format!(
                    "account {} cannot become {}",
                    id, record.financial_account_id
                )));
            }
            Some(_) => {}
            None => self.financial_account_id = Some(record.financial_account_id.clone()),
        }
        if record.name.is_some() {
            self.name = record.name.clone();
        }
        if record.account_type.is_some() {
            self.account_type = record.account_type.clone();
        }
        if let Some(card) = remote_card(record)? {
            match &mut self.card_number {
                Some(existing) => existing.update(&card)?,
                None => self.card_number = Some(card),
            }
        }
        self.extra
            .extend(record.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.financial_account_id.as_deref())
            .unwrap_or("<unnamed>")
    }
}

fn remote_card(record: &AccountRecord) -> Result<Option<CardNumber>> {
    match record.credit_card_number.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => CardNumber::parse(raw).map(Some).map_err(|e| {
            SyncError::Structure(format!("account {}: {}", record.financial_account_id, e))
        }),
    }
}

/// Accounts of one configuration, rebuilt on every run.
#[derive(Debug, Default)]
pub struct AccountManager {
    accounts: Vec<Account>,
}

impl AccountManager {
    pub fn from_seeds(seeds: &[AccountSeed]) -> Result<Self> {
        let accounts = seeds.iter().map(Account::from_seed).collect::<Result<_>>()?;
        Ok(Self { accounts })
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Lists the remote accounts and merges them in.
    pub fn refresh(&mut self, client: &dyn Bookkeeping) -> Result<()> {
        let records = client.list_financial_accounts()?;
        tracing::debug!("{} remote accounts", records.len());
        self.merge_remote(&records)
    }

    /// Matches each record by id, then name, then card number.
    pub fn merge_remote(&mut self, records: &[AccountRecord]) -> Result<()> {
        for record in records {
            let card = remote_card(record)?;
            let position = self
                .accounts
                .iter()
                .position(|a| {
                    a.financial_account_id.as_deref() == Some(record.financial_account_id.as_str())
                })
                .or_else(|| {
                    record.name.as_ref().and_then(|name| {
                        self.accounts
                            .iter()
                            .position(|a| {
                                a.financial_account_id.is_none() && a.name.as_ref() == Some(name)
                            })
                    })
                })
                .or_else(|| {
                    card.as_ref().and_then(|card| {
                        self.accounts.iter().position(|a| {
                            a.financial_account_id.is_none() && a.card_number.as_ref() == Some(card)
                        })
                    })
                });

            match position {
                Some(i) => self.accounts[i].merge(record)?,
                None => self.accounts.push(Account::from_record(record)?),
            }
        }
        Ok(())
    }

    /// The remote account an uploaded card's transactions belong to.
    pub fn for_card(&self, card: &CardNumber) -> Option<&Account> {
        self.accounts.iter().find(|a| {
            a.financial_account_id.is_some() && a.card_number.as_ref().is_some_and(|c| c == card)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(name: &str, card: &str) -> AccountSeed {
        AccountSeed {
            name: name.into(),
            card: card.into(),
        }
    }

    fn record(id: &str, name: Option<&str>, card: Option<&str>) -> AccountRecord {
        AccountRecord {
            financial_account_id: id.into(),
            name: name.map(String::from),
            account_type: Some("CREDIT_CARD".into()),
            credit_card_number: card.map(String::from),
            extra: Map::new(),
        }
    }

    #[test]
    fn records_match_by_name_then_card() {
        let mut manager =
            AccountManager::from_seeds(&[seed("Amazon Visa", "0001"), seed("Bahn", "5500x")]).unwrap();
        manager
            .merge_remote(&[
                record("fa-1", Some("Amazon Visa"), Some("4277 19xx xxxx 0001")),
                record("fa-2", Some("BahnCard Business"), Some("5500 00xx xxxx 0002")),
                record("fa-3", Some("Girokonto"), None),
            ])
            .unwrap();

        let accounts = manager.accounts();
        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts[0].financial_account_id.as_deref(), Some("fa-1"));
        assert_eq!(accounts[0].card_number.as_ref().unwrap().as_str(), "427719xxxxxx0001");
        assert_eq!(accounts[1].financial_account_id.as_deref(), Some("fa-2"));
        assert_eq!(accounts[1].name.as_deref(), Some("BahnCard Business"));
        assert_eq!(accounts[2].label(), "Girokonto");
    }

    #[test]
    fn known_ids_merge_again_instead_of_duplicating() {
        let mut manager = AccountManager::from_seeds(&[seed("Amazon Visa", "0001")]).unwrap();
        manager
            .merge_remote(&[record("fa-1", Some("Amazon Visa"), None)])
            .unwrap();
        let mut renamed = record("fa-1", Some("Amazon Card"), None);
        renamed.extra.insert("state".into(), Value::String("ACTIVE".into()));
        manager.merge_remote(&[renamed]).unwrap();

        assert_eq!(manager.accounts().len(), 1);
        let account = &manager.accounts()[0];
        assert_eq!(account.name.as_deref(), Some("Amazon Card"));
        assert_eq!(account.extra["state"], "ACTIVE");
    }

    #[test]
    fn conflicting_card_numbers_fail() {
        let mut manager = AccountManager::from_seeds(&[seed("Amazon Visa", "0001")]).unwrap();
        let err = manager
            .merge_remote(&[record("fa-1", Some("Amazon Visa"), Some("4277 19xx xxxx 9999"))])
            .unwrap_err();
        assert!(matches!(err, SyncError::CardMismatch { .. }));
    }

    #[test]
    fn card_lookup_needs_remote_id() {
        let mut manager = AccountManager::from_seeds(&[seed("Amazon Visa", "0001")]).unwrap();
        let card = CardNumber::parse("4277 19xx xxxx 0001").unwrap();
        assert!(manager.for_card(&card).is_none());

        manager
            .merge_remote(&[record("fa-1", Some("Amazon Visa"), None)])
            .unwrap();
        assert_eq!(
            manager.for_card(&card).and_then(|a| a.financial_account_id.as_deref()),
            Some("fa-1")
        );
    }
}
