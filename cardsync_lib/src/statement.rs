//! Billing-period entries of a card's statement list.

use cardportal::Form;

/// One statement on the statement list page. Recomputed on every crawl.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Statement date, `yyyy-mm-dd`.
    pub date: String,
    /// The per-statement form that opens its detail page.
    pub form: Form,
    /// When the portal says the statement was first opened, `yyyy-mm-dd`.
    pub first_accessed: Option<String>,
    /// A cached export for this statement already exists locally.
    pub synced: bool,
}

/// Machine-readable export or document attached to a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Csv,
    Pdf,
}

impl DocumentKind {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }

    /// Value of the portal's export format select.
    pub(crate) fn format_value(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Pdf => "PDF",
        }
    }
}
