//! Page parsing for the card-service portals.
//!
//! Every lookup is a literal selector; a portal markup change shows up as
//! a structure error, not as silently wrong data.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use cardportal::scraper::{ElementRef, Html, Selector};
use cardportal::Form;

use crate::card_number::CardNumber;
use crate::error::{Result, SyncError};
use crate::transaction::{normalize_amount, normalize_date, Transaction};

pub(crate) const ACCOUNT_TABLE_ID: &str = "accountTable";
pub(crate) const CARD_ANCHOR_PREFIX: &str = "acc.";
pub(crate) const STATEMENT_TABLE_ID: &str = "statementTable";
const FIRST_ACCESSED_CAPTION: &str = "abgerufen";

static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}\.\d{1,2}\.\d{4}$").expect("invalid regex: date"));

macro_rules! sel {
    ($css:expr) => {{
        static SELECTOR: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("invalid selector: ", $css)));
        &*SELECTOR
    }};
}

fn elem_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comma-joined visible text of the portal's error cell, if shown.
pub(crate) fn login_error(doc: &Html, error_selector: &Selector) -> Option<String> {
    let cell = doc.select(error_selector).next()?;
    let parts: Vec<String> = cell
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    Some(parts.join(", "))
}

pub(crate) fn tab_error(doc: &Html) -> Option<String> {
    login_error(doc, sel!("td.tabError"))
}

pub(crate) fn has_form(doc: &Html, name: &str) -> bool {
    doc.select(sel!("form"))
        .any(|f| f.value().attr("name") == Some(name))
}

fn href_of(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

pub(crate) fn logout_href(doc: &Html) -> Option<String> {
    href_of(doc, sel!(r#"a[id="nav.logout"]"#))
}

pub(crate) fn has_account_table(doc: &Html) -> bool {
    doc.select(sel!("table#accountTable")).next().is_some()
}

/// A card link on the account overview.
#[derive(Debug, Clone)]
pub(crate) struct CardLink {
    pub number: CardNumber,
    pub href: String,
}

pub(crate) fn card_links(doc: &Html) -> Result<Vec<CardLink>> {
    let table = doc
        .select(sel!("table#accountTable"))
        .next()
        .ok_or_else(|| SyncError::Structure(format!("missing table #{}", ACCOUNT_TABLE_ID)))?;

    let mut links = Vec::new();
    for anchor in table.select(sel!("a[id][href]")) {
        let id = anchor.value().attr("id").unwrap_or_default();
        let href = anchor.value().attr("href").unwrap_or_default().trim();
        if !id.starts_with(CARD_ANCHOR_PREFIX) || href.is_empty() {
            continue;
        }
        let text = elem_text(anchor);
        match CardNumber::parse(&text) {
            Ok(number) => links.push(CardLink {
                number,
                href: href.to_string(),
            }),
            Err(e) => tracing::warn!("Skipping card anchor {}: {}", id, e),
        }
    }
    Ok(links)
}

/// Statement list entry before the cache lookup.
#[derive(Debug, Clone)]
pub(crate) struct StatementEntry {
    pub date: String,
    pub form: Form,
    pub first_accessed: Option<String>,
}

pub(crate) fn statement_entries(doc: &Html) -> Result<Vec<StatementEntry>> {
    let table = doc
        .select(sel!("table#statementTable"))
        .next()
        .ok_or_else(|| SyncError::Structure(format!("missing table #{}", STATEMENT_TABLE_ID)))?;

    let mut entries = Vec::new();
    for form in table.select(sel!("form")) {
        let cells: Vec<String> = form.select(sel!("td")).map(elem_text).collect();

        let Some(raw_date) = cells.iter().find(|c| RE_DATE.is_match(c)) else {
            tracing::warn!("Statement form without a date: {:?}", cells);
            continue;
        };
        let date = normalize_date(raw_date)
            .ok_or_else(|| SyncError::Structure(format!("invalid statement date {}", raw_date)))?;

        let first_accessed = cells
            .iter()
            .position(|c| c.to_lowercase().contains(FIRST_ACCESSED_CAPTION))
            .and_then(|i| cells.get(i + 1))
            .and_then(|c| normalize_date(c))
            .filter(|d| !d.is_empty());

        entries.push(StatementEntry {
            date,
            form: Form::from_element(form),
            first_accessed,
        });
    }
    Ok(entries)
}

/// The n-th (1-based) header row with exactly three `th` cells.
fn nth_header(doc: &Html, occurrence: usize) -> Option<ElementRef<'_>> {
    doc.select(sel!("tr"))
        .filter(|tr| {
            let th = tr.children().filter_map(ElementRef::wrap).filter(|c| c.value().name() == "th").count();
            th == 3
        })
        .nth(occurrence.saturating_sub(1))
}

/// Where a transaction table's rows belong.
pub(crate) struct RowContext<'a> {
    pub card: &'a CardNumber,
    pub statement_id: &'a str,
    pub captured_at: DateTime<Utc>,
}

/// Parses the transaction rows following the `occurrence`-th header.
///
/// Rows come in pairs. A pair carrying a form is read from its named
/// inputs; any other pair is read by cell position.
pub(crate) fn transactions(doc: &Html, occurrence: usize, ctx: &RowContext<'_>) -> Result<Vec<Transaction>> {
    let Some(header) = nth_header(doc, occurrence) else {
        return Ok(Vec::new());
    };

    let rows: Vec<ElementRef<'_>> = header
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
        .collect();

    let mut out = Vec::new();
    for pair in rows.chunks(2) {
        let form = pair.iter().find_map(|row| row.select(sel!("form")).next());
        let txn = match form {
            Some(form) => from_form_inputs(form, ctx)?,
            None => match from_cells(pair, ctx) {
                Some(txn) => txn,
                None => continue,
            },
        };
        out.push(txn);
    }
    Ok(out)
}

fn from_form_inputs(form: ElementRef<'_>, ctx: &RowContext<'_>) -> Result<Transaction> {
    let inputs: HashMap<&str, String> = form
        .select(sel!("input[name]"))
        .filter_map(|i| {
            let name = i.value().attr("name")?;
            Some((name, i.value().attr("value").unwrap_or_default().trim().to_string()))
        })
        .collect();
    let field = |name: &str| inputs.get(name).cloned().unwrap_or_default();
    let date = |name: &str| {
        let raw = field(name);
        normalize_date(&raw).unwrap_or(raw)
    };

    let mut card = ctx.card.clone();
    let shown = field("cardNumber");
    if !shown.is_empty() {
        let parsed = CardNumber::parse(&shown)
            .map_err(|e| SyncError::Structure(format!("transaction card number: {}", e)))?;
        card.update(&parsed)?;
    }

    let amount_raw = field("amount");
    let formatted = field("formattedAmount");
    let statement_id = field("statementId");

    Ok(Transaction {
        card_number: card,
        amount: normalize_amount(&amount_raw),
        ref_id: field("refId"),
        posting_seq_id: field("postingSeqId"),
        posting_date: date("postingDate"),
        statement_id: if statement_id.is_empty() {
            ctx.statement_id.to_string()
        } else {
            statement_id
        },
        formatted_amount: if formatted.is_empty() { amount_raw } else { formatted },
        purchase_date: date("purchaseDate"),
        description: field("description"),
        additional_description: field("additionalDescription"),
        foreign_currency: field("foreignCurrency"),
        correlation_id: field("correlationId"),
        captured_at: ctx.captured_at,
    })
}

fn cells(row: &ElementRef<'_>) -> Vec<String> {
    row.select(sel!("td")).map(elem_text).collect()
}

fn from_cells(pair: &[ElementRef<'_>], ctx: &RowContext<'_>) -> Option<Transaction> {
    let first = cells(pair.first()?);
    let [purchase, description, amount, ..] = first.as_slice() else {
        return None;
    };
    if !RE_DATE.is_match(purchase) {
        return None;
    }
    let second = pair.get(1).map(cells).unwrap_or_default();

    let (main, additional) = match description.split_once('/') {
        Some((main, rest)) => (main.trim().to_string(), rest.trim().to_string()),
        None => (description.trim().to_string(), String::new()),
    };
    let posting_raw = second.first().cloned().unwrap_or_default();

    Some(Transaction {
        card_number: ctx.card.clone(),
        amount: normalize_amount(amount),
        ref_id: String::new(),
        posting_seq_id: String::new(),
        posting_date: normalize_date(&posting_raw).unwrap_or(posting_raw),
        statement_id: ctx.statement_id.to_string(),
        formatted_amount: amount.clone(),
        purchase_date: normalize_date(purchase).unwrap_or_else(|| purchase.clone()),
        description: main,
        additional_description: additional,
        foreign_currency: second.get(1).cloned().unwrap_or_default(),
        correlation_id: String::new(),
        captured_at: ctx.captured_at,
    })
}

/// `href` of the first anchor whose `type` is `mime`.
pub(crate) fn typed_link(doc: &Html, mime: &str) -> Option<String> {
    doc.select(sel!("a[type][href]"))
        .find(|a| a.value().attr("type") == Some(mime))
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

pub(crate) fn export_pending(doc: &Html) -> bool {
    doc.select(sel!(".exportPending")).next().is_some()
}

pub(crate) fn portal_login_error(doc: &Html) -> Option<String> {
    login_error(doc, sel!(".loginError"))
}

pub(crate) fn portal_logout_href(doc: &Html) -> Option<String> {
    href_of(doc, sel!("a#logout"))
}

pub(crate) fn delegate_href(doc: &Html) -> Option<String> {
    href_of(doc, sel!("a#cardServiceLink"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERVIEW: &str = include_str!("../../tests/fixtures/overview.html");
    const STATEMENTS: &str = include_str!("../../tests/fixtures/statements.html");
    const DETAIL_FORMS: &str = include_str!("../../tests/fixtures/statement_detail.html");
    const UNBILLED_CELLS: &str = include_str!("../../tests/fixtures/unbilled.html");

    fn card() -> CardNumber {
        CardNumber::parse("4277 19xx xxxx 0001").unwrap()
    }

    fn ctx<'a>(card: &'a CardNumber, statement_id: &'a str) -> RowContext<'a> {
        RowContext {
            card,
            statement_id,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn collects_error_text() {
        let doc = Html::parse_document(
            r#"<table><tr><td class="tabError"><b>Fehler:</b>
                <span> Passwort falsch </span><span></span>Bitte erneut</td></tr></table>"#,
        );
        assert_eq!(tab_error(&doc).as_deref(), Some("Fehler:, Passwort falsch, Bitte erneut"));
        assert!(tab_error(&Html::parse_document("<p>ok</p>")).is_none());
    }

    #[test]
    fn card_links_use_prefixed_anchors_only() {
        let doc = Html::parse_document(OVERVIEW);
        let links = card_links(&doc).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].number.as_str(), "427719xxxxxx0001");
        assert_eq!(links[1].number.as_str(), "5500000000000002");
        assert!(links[0].href.contains("card=1"));
        assert_eq!(logout_href(&doc).as_deref(), Some("dispatch.do?bt_LOGOUT=do"));
    }

    #[test]
    fn missing_account_table_is_structural() {
        let doc = Html::parse_document("<p>nothing</p>");
        assert!(matches!(card_links(&doc), Err(SyncError::Structure(_))));
    }

    #[test]
    fn statement_entries_normalize_dates() {
        let doc = Html::parse_document(STATEMENTS);
        let entries = statement_entries(&doc).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date, "2026-09-30");
        assert_eq!(entries[0].first_accessed.as_deref(), Some("2026-10-02"));
        assert_eq!(entries[1].date, "2026-08-31");
        assert_eq!(entries[1].first_accessed, None);
        assert_eq!(entries[0].form.name.as_deref(), Some("stmt0"));
        assert!(entries[0].form.control("stmtId").is_some());
    }

    #[test]
    fn form_rows_carry_every_field() {
        let doc = Html::parse_document(DETAIL_FORMS);
        let card = card();
        let txns = transactions(&doc, 2, &ctx(&card, "2026-09-30")).unwrap();
        assert_eq!(txns.len(), 2);

        let t = &txns[0];
        assert_eq!(t.posting_seq_id, "884411");
        assert_eq!(t.amount, "-23,90");
        assert_eq!(t.formatted_amount, "23,90 -");
        assert_eq!(t.purchase_date, "2026-09-12");
        assert_eq!(t.posting_date, "2026-09-14");
        assert_eq!(t.description, "BAHN.DE");
        assert_eq!(t.additional_description, "FRANKFURT");
        assert_eq!(t.card_number.as_str(), "4277190000000001");
        assert_eq!(t.statement_id, "ST-0926");

        assert_eq!(txns[1].amount, "+5,00");
        assert_eq!(txns[1].statement_id, "2026-09-30");
    }

    #[test]
    fn first_header_is_summary_for_statements() {
        let doc = Html::parse_document(DETAIL_FORMS);
        let card = card();
        // The first header belongs to the summary table, which has no transaction rows.
        assert!(transactions(&doc, 1, &ctx(&card, "")).unwrap().is_empty());
        assert!(transactions(&doc, 3, &ctx(&card, "")).unwrap().is_empty());
    }

    #[test]
    fn cell_rows_are_parsed_by_position() {
        let doc = Html::parse_document(UNBILLED_CELLS);
        let card = card();
        let txns = transactions(&doc, 1, &ctx(&card, "")).unwrap();
        assert_eq!(txns.len(), 2);

        assert_eq!(txns[0].purchase_date, "2026-10-03");
        assert_eq!(txns[0].posting_date, "2026-10-05");
        assert_eq!(txns[0].description, "AMAZON MKTPLACE");
        assert_eq!(txns[0].additional_description, "AMAZON.DE");
        assert_eq!(txns[0].amount, "-19,99");
        assert_eq!(txns[0].foreign_currency, "");

        assert_eq!(txns[1].description, "HOTEL ZUERICH");
        assert_eq!(txns[1].additional_description, "");
        assert_eq!(txns[1].amount, "+120,00");
        assert_eq!(txns[1].foreign_currency, "CHF 115,00 Kurs 0,9583");
        assert!(txns.iter().all(|t| t.posting_seq_id.is_empty()));
    }

    #[test]
    fn mismatching_row_card_is_rejected() {
        let doc = Html::parse_document(DETAIL_FORMS);
        let other = CardNumber::parse("9999").unwrap();
        let err = transactions(&doc, 2, &ctx(&other, "")).unwrap_err();
        assert!(matches!(err, SyncError::CardMismatch { .. }));
    }

    #[test]
    fn export_links_and_pending_marker() {
        let doc = Html::parse_document(
            r#"<a type="application/pdf" href="doc.pdf">PDF</a><a type="text/csv" href="export.csv">CSV</a>"#,
        );
        assert_eq!(typed_link(&doc, "text/csv").as_deref(), Some("export.csv"));
        assert_eq!(typed_link(&doc, "application/pdf").as_deref(), Some("doc.pdf"));
        let pending = Html::parse_document(r#"<div class="exportPending">Noch nicht bereit</div>"#);
        assert!(typed_link(&pending, "text/csv").is_none());
        assert!(export_pending(&pending));
    }
}
