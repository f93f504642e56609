use chrono::Utc;

use crate::card_number::CardNumber;
use crate::transaction::Transaction;

pub(crate) fn sample(seq: &str, amount: &str, description: &str) -> Transaction {
    Transaction {
        card_number: CardNumber::parse("4277 19xx xxxx 0001").unwrap(),
        amount: amount.into(),
        ref_id: String::new(),
        posting_seq_id: seq.into(),
        posting_date: "2026-09-02".into(),
        statement_id: String::new(),
        formatted_amount: amount.trim_start_matches(['+', '-']).into(),
        purchase_date: "2026-09-01".into(),
        description: description.into(),
        additional_description: String::new(),
        foreign_currency: String::new(),
        correlation_id: String::new(),
        captured_at: Utc::now(),
    }
}

pub(crate) fn temp_dir(label: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "cardsync-{}-{}-{}",
        label,
        std::process::id(),
        nanos
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
