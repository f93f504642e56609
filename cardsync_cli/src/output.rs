use cardsync_lib::{Card, SyncReport};
use clap::ValueEnum;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled, Serialize)]
pub struct CardRow {
    #[tabled(rename = "Config")]
    #[serde(rename = "Config")]
    config: String,
    #[tabled(rename = "Bank")]
    #[serde(rename = "Bank")]
    bank: String,
    #[tabled(rename = "Card")]
    #[serde(rename = "Card")]
    card: String,
}

#[derive(Tabled)]
pub struct ReportRow {
    #[tabled(rename = "Config")]
    config: String,
    #[tabled(rename = "Bank")]
    bank: String,
    #[tabled(rename = "Card")]
    card: String,
    #[tabled(rename = "Seen")]
    scraped: usize,
    #[tabled(rename = "New")]
    new_local: usize,
    #[tabled(rename = "Uploaded")]
    uploaded: usize,
    #[tabled(rename = "Exports")]
    exports: usize,
}

// -- Row builders --

pub fn build_card_rows(config: &str, cards: &[Card]) -> Vec<CardRow> {
    cards
        .iter()
        .map(|c| CardRow {
            config: config.to_string(),
            bank: c.bank.to_string(),
            card: format_card(c.number.as_str()),
        })
        .collect()
}

pub fn build_report_rows(config: &str, report: &SyncReport) -> Vec<ReportRow> {
    report
        .cards
        .iter()
        .map(|c| ReportRow {
            config: config.to_string(),
            bank: c.bank.to_string(),
            card: format_card(c.card.as_str()),
            scraped: c.scraped,
            new_local: c.new_local,
            uploaded: c.uploaded,
            exports: c.exports,
        })
        .collect()
}

pub fn print_cards_table(rows: Vec<CardRow>) {
    println!("{}", Table::new(rows).with(Style::sharp()));
}

pub fn print_reports_table(rows: Vec<ReportRow>) {
    if rows.is_empty() {
        eprintln!("No cards synchronized.");
        return;
    }
    println!("{}", Table::new(rows).with(Style::sharp()));
}

pub fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}

/// `427719xxxxxx0001` → `4277 19xx xxxx 0001`.
fn format_card(number: &str) -> String {
    number
        .as_bytes()
        .chunks(4)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_lib::{Bank, CardNumber, CardReport};

    fn report() -> SyncReport {
        SyncReport {
            cards: vec![CardReport {
                bank: Bank::Amazon,
                card: CardNumber::parse("4277 19xx xxxx 0001").unwrap(),
                scraped: 4,
                new_local: 2,
                uploaded: 1,
                exports: 0,
            }],
            errors: vec![],
        }
    }

    #[test]
    fn card_numbers_are_grouped() {
        assert_eq!(format_card("427719xxxxxx0001"), "4277 19xx xxxx 0001");
    }

    #[test]
    fn report_rows_keep_counts() {
        let rows = build_report_rows("home", &report());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].config, "home");
        assert_eq!(rows[0].bank, "amazon");
        assert_eq!(rows[0].card, "4277 19xx xxxx 0001");
        assert_eq!((rows[0].scraped, rows[0].new_local, rows[0].uploaded), (4, 2, 1));
    }

    #[test]
    fn card_rows_serialize_with_headers() {
        let card = Card {
            bank: Bank::Postbank,
            number: CardNumber::parse("5500 0000 0000 0002").unwrap(),
            href: "https://example.test/card".into(),
        };
        let rows = build_card_rows("home", &[card]);
        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(json[0]["Bank"], "postbank");
        assert_eq!(json[0]["Card"], "5500 0000 0000 0002");
        let table = Table::new(rows).to_string();
        assert!(table.contains("Config"));
    }
}
