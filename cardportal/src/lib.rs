//! Blocking browser emulation for HTML-only banking portals.
//!
//! A [`Navigator`] owns the cookie session and the current page; the
//! [`form`] module extracts forms from that page and submits them the way
//! a browser would.

mod errors;
pub mod form;
pub mod navigator;
pub mod sink;

pub use self::errors::Error;
pub use self::form::{
    build_payload, last_submit_button, select_option, Control, FieldValues, Form, FormLocator,
    OptionChoice, Payload, Postprocess, SelectOption,
};
pub use self::navigator::{truncate_body, Navigator, Page, BODY_SNIPPET, USER_AGENT};
pub use self::sink::{DumpDir, PageSink};
pub use scraper;
