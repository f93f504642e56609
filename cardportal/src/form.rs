//! HTML form emulation: extract a form, build its payload, post it.

use std::collections::BTreeMap;
use std::fmt;

use scraper::{ElementRef, Html, Selector};

use crate::navigator::{Navigator, Page};
use crate::Error;

/// One `<option>` of a select control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
    pub disabled: bool,
}

/// An input-like control of a form, copied out of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Element name: `input`, `select`, `textarea` or `button`.
    pub tag: String,
    /// Lowercased `type` attribute with the HTML defaults applied.
    pub kind: String,
    /// `name`, falling back to `id`.
    pub name: Option<String>,
    pub value: Option<String>,
    pub checked: bool,
    pub disabled: bool,
    pub options: Vec<SelectOption>,
}

impl Control {
    pub fn is_submit(&self) -> bool {
        matches!(self.kind.as_str(), "submit" | "image") || (self.tag == "button" && self.kind == "submit")
    }

    fn is_text_like(&self) -> bool {
        self.tag == "textarea"
            || matches!(
                self.kind.as_str(),
                "text" | "password" | "email" | "number" | "tel" | "search" | "url" | "date"
            )
    }
}

/// Owned snapshot of a `<form>` element.
///
/// Survives navigation, so it can be kept as a handle (e.g. per statement)
/// and submitted later with [`FormLocator::Form`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub name: Option<String>,
    pub action: String,
    pub method: String,
    pub attrs: BTreeMap<String, String>,
    pub controls: Vec<Control>,
}

fn selector(css: &str) -> Selector {
    // Only called with literals below.
    Selector::parse(css).unwrap_or_else(|_| panic!("invalid selector literal: {css}"))
}

impl Form {
    pub fn from_element(element: ElementRef<'_>) -> Self {
        let attr = |name: &str| element.value().attr(name).map(str::to_string);
        let attrs = element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let controls = element
            .select(&selector("input, select, textarea, button"))
            .map(control_from_element)
            .collect();

        Self {
            name: attr("name"),
            action: attr("action").unwrap_or_default(),
            method: attr("method").unwrap_or_else(|| "get".into()).to_ascii_lowercase(),
            attrs,
            controls,
        }
    }

    /// All forms in `document` whose attributes include every pair of `criteria`.
    pub fn find_all(document: &Html, criteria: &[(String, String)]) -> Vec<Form> {
        document
            .select(&selector("form"))
            .filter(|form| {
                criteria
                    .iter()
                    .all(|(k, v)| form.value().attr(k) == Some(v.as_str()))
            })
            .map(Form::from_element)
            .collect()
    }

    /// The single form matching `criteria`.
    pub fn find(document: &Html, criteria: &[(String, String)]) -> Result<Form, Error> {
        let mut found = Self::find_all(document, criteria);
        match found.len() {
            0 => Err(Error::FormNotFound(describe(criteria))),
            1 => Ok(found.remove(0)),
            count => Err(Error::AmbiguousForm {
                criteria: describe(criteria),
                count,
            }),
        }
    }

    pub fn control(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.name.as_deref() == Some(name))
    }
}

fn describe(criteria: &[(String, String)]) -> String {
    criteria
        .iter()
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn control_from_element(element: ElementRef<'_>) -> Control {
    let el = element.value();
    let tag = el.name().to_ascii_lowercase();
    let kind = match el.attr("type") {
        Some(t) => t.to_ascii_lowercase(),
        None if tag == "button" => "submit".into(),
        None if tag == "select" => "select".into(),
        None if tag == "textarea" => "textarea".into(),
        None => "text".into(),
    };
    let name = el.attr("name").or_else(|| el.attr("id")).map(str::to_string);
    let value = if tag == "textarea" {
        Some(element.text().collect())
    } else {
        el.attr("value").map(str::to_string)
    };
    let options = if tag == "select" {
        element
            .select(&selector("option"))
            .map(|opt| {
                let label: String = opt.text().collect::<String>().trim().to_string();
                SelectOption {
                    value: opt
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| label.clone()),
                    label,
                    selected: opt.value().attr("selected").is_some(),
                    disabled: opt.value().attr("disabled").is_some(),
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    Control {
        tag,
        kind,
        name,
        value,
        checked: el.attr("checked").is_some(),
        disabled: el.attr("disabled").is_some(),
        options,
    }
}

/// How to find the form to submit.
#[derive(Debug, Clone)]
pub enum FormLocator {
    /// Attribute pairs that must match exactly one form in the current page.
    Attrs(Vec<(String, String)>),
    /// A form located earlier.
    Form(Form),
}

impl FormLocator {
    /// Locates a form by its `name` attribute.
    pub fn named(name: &str) -> Self {
        Self::Attrs(vec![("name".into(), name.into())])
    }

    pub fn with_id(id: &str) -> Self {
        Self::Attrs(vec![("id".into(), id.into())])
    }
}

/// Attribute-based lookup callback: `(field name, form, control) -> value`.
pub type ValueCallback<'a> = &'a dyn Fn(&str, &Form, &Control) -> Option<String>;

/// Where text and password inputs get their values from.
#[derive(Clone, Copy)]
pub enum FieldValues<'a> {
    /// Only control defaults.
    Defaults,
    Map(&'a BTreeMap<String, String>),
    Callback(ValueCallback<'a>),
}

impl fmt::Debug for FieldValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "Defaults"),
            Self::Map(map) => f.debug_tuple("Map").field(&map.keys().collect::<Vec<_>>()).finish(),
            Self::Callback(_) => write!(f, "Callback"),
        }
    }
}

impl FieldValues<'_> {
    fn lookup(&self, name: &str, form: &Form, control: &Control) -> Option<String> {
        match self {
            Self::Defaults => None,
            Self::Map(map) => map.get(name).cloned(),
            Self::Callback(cb) => cb(name, form, control),
        }
    }
}

/// Ordered form payload; names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    fields: Vec<(String, String)>,
}

impl Payload {
    /// Replaces the first entry named `name`, or appends one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes every entry named `name`.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(k, _)| k != name);
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A step run after the generic payload pass.
pub type Postprocess<'a> = &'a dyn Fn(&Form, &mut Payload) -> Result<(), Error>;

/// Builds the payload a browser would send for `form` when `submit_name` is clicked.
pub fn build_payload(
    form: &Form,
    values: FieldValues<'_>,
    submit_name: Option<&str>,
) -> Result<Payload, Error> {
    let mut payload = Payload::default();

    for control in &form.controls {
        let Some(name) = control.name.as_deref() else {
            continue;
        };
        if control.disabled {
            continue;
        }

        if control.kind == "hidden" {
            payload.append(name, control.value.clone().unwrap_or_default());
        } else if control.is_submit() {
            if submit_name == Some(name) {
                payload.append(name, control.value.clone().unwrap_or_default());
            }
        } else if matches!(control.kind.as_str(), "checkbox" | "radio") {
            if control.checked {
                payload.append(name, control.value.clone().unwrap_or_else(|| "on".into()));
            }
        } else if control.tag == "select" {
            let chosen = control
                .options
                .iter()
                .find(|o| o.selected)
                .or_else(|| control.options.iter().find(|o| !o.disabled));
            if let Some(option) = chosen {
                payload.append(name, option.value.clone());
            }
        } else if control.is_text_like() {
            let value = values
                .lookup(name, form, control)
                .or_else(|| control.value.clone())
                .ok_or_else(|| Error::MissingValue {
                    field: name.to_string(),
                })?;
            payload.append(name, value);
        }
    }

    Ok(payload)
}

/// Adds the last submit control of the form, replacing any other submit entry.
pub fn last_submit_button() -> impl Fn(&Form, &mut Payload) -> Result<(), Error> {
    |form, payload| {
        let submits: Vec<&Control> = form.controls.iter().filter(|c| c.is_submit()).collect();
        for control in &submits {
            if let Some(name) = control.name.as_deref() {
                payload.remove(name);
            }
        }
        let last = submits
            .last()
            .ok_or_else(|| Error::Postprocess("form has no submit control".into()))?;
        let name = last
            .name
            .as_deref()
            .ok_or_else(|| Error::Postprocess("last submit control has no name".into()))?;
        payload.set(name, last.value.clone().unwrap_or_default());
        Ok(())
    }
}

/// Which option to pick when a select must be set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionChoice {
    #[default]
    First,
    Last,
}

/// Sets the select named `name` (or every select, if `None`) to its first or last enabled option.
pub fn select_option(
    name: Option<&str>,
    choice: OptionChoice,
) -> impl Fn(&Form, &mut Payload) -> Result<(), Error> {
    let name = name.map(str::to_string);
    move |form, payload| {
        let selects: Vec<&Control> = form
            .controls
            .iter()
            .filter(|c| c.tag == "select")
            .filter(|c| name.is_none() || c.name == name)
            .collect();
        if selects.is_empty() {
            return Err(Error::Postprocess(format!(
                "no select control {}",
                name.as_deref().unwrap_or("in form")
            )));
        }
        for control in selects {
            let Some(control_name) = control.name.as_deref() else {
                continue;
            };
            let mut enabled = control.options.iter().filter(|o| !o.disabled);
            let option = match choice {
                OptionChoice::First => enabled.next(),
                OptionChoice::Last => enabled.last(),
            }
            .ok_or_else(|| Error::Postprocess(format!("select {} has no options", control_name)))?;
            payload.set(control_name, option.value.clone());
        }
        Ok(())
    }
}

impl Navigator {
    /// Locates a form, fills it and posts it; the response becomes the current page.
    pub fn submit_form(
        &mut self,
        locator: &FormLocator,
        values: FieldValues<'_>,
        submit_name: Option<&str>,
        postprocess: &[Postprocess<'_>],
    ) -> Result<&Page, Error> {
        let form = match locator {
            FormLocator::Form(form) => form.clone(),
            FormLocator::Attrs(criteria) => Form::find(&self.document()?, criteria)?,
        };

        let mut payload = build_payload(&form, values, submit_name)?;
        for step in postprocess {
            step(&form, &mut payload)?;
        }

        let action = if form.action.is_empty() {
            self.page().ok_or(Error::NoPage)?.url().to_string()
        } else {
            self.resolve_url(&form.action)
        };
        tracing::debug!(
            "Submitting form {} via {:?}",
            form.name.as_deref().unwrap_or("<unnamed>"),
            submit_name
        );
        self.post_form(&action, payload.fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r#"<html><body>
        <form name="preLogonForm" action="dispatch.do" method="POST">
          <input type="hidden" name="ref" value="1200_AMAZON">
          <input type="text" name="user">
          <input type="password" name="password">
          <input type="text" name="lang" value="de">
          <input type="checkbox" name="remember" value="yes">
          <input type="checkbox" name="tos" checked>
          <select name="country"><option value="at">AT</option><option value="de" selected>DE</option></select>
          <select name="empty"></select>
          <input type="submit" name="bt_LOGON" value="Anmelden">
          <input type="submit" name="bt_HELP" value="Hilfe">
        </form>
        <form name="other"><input type="hidden" name="x" value="1"></form>
        </body></html>"#;

    fn login_form() -> Form {
        let doc = Html::parse_document(LOGIN);
        Form::find(&doc, &[("name".into(), "preLogonForm".into())]).unwrap()
    }

    fn auth() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("user".to_string(), "max".to_string()),
            ("password".to_string(), "geheim".to_string()),
        ])
    }

    #[test]
    fn extracts_form_attributes_and_controls() {
        let form = login_form();
        assert_eq!(form.name.as_deref(), Some("preLogonForm"));
        assert_eq!(form.action, "dispatch.do");
        assert_eq!(form.method, "post");
        assert_eq!(form.controls.len(), 10);
        assert_eq!(form.control("country").unwrap().options.len(), 2);
    }

    #[test]
    fn payload_follows_control_policy() {
        let form = login_form();
        let values = auth();
        let payload = build_payload(&form, FieldValues::Map(&values), Some("bt_LOGON")).unwrap();
        assert_eq!(
            payload.fields(),
            &[
                ("ref".to_string(), "1200_AMAZON".to_string()),
                ("user".to_string(), "max".to_string()),
                ("password".to_string(), "geheim".to_string()),
                ("lang".to_string(), "de".to_string()),
                ("tos".to_string(), "on".to_string()),
                ("country".to_string(), "de".to_string()),
                ("bt_LOGON".to_string(), "Anmelden".to_string()),
            ]
        );
    }

    #[test]
    fn missing_text_value_without_default_fails() {
        let form = login_form();
        let err = build_payload(&form, FieldValues::Defaults, None).unwrap_err();
        assert!(matches!(err, Error::MissingValue { field } if field == "user"));
    }

    #[test]
    fn callback_values_fall_back_to_default() {
        let form = login_form();
        let cb = |name: &str, _: &Form, _: &Control| match name {
            "user" | "password" => Some(format!("{}-value", name)),
            _ => None,
        };
        let payload = build_payload(&form, FieldValues::Callback(&cb), None).unwrap();
        assert_eq!(payload.get("user"), Some("user-value"));
        assert_eq!(payload.get("lang"), Some("de"));
        assert_eq!(payload.get("bt_LOGON"), None);
    }

    #[test]
    fn select_without_selected_uses_first_option() {
        let doc = Html::parse_document(
            r#"<form name="f"><select name="card"><option value="a">A</option><option value="b">B</option></select></form>"#,
        );
        let form = Form::find(&doc, &[("name".into(), "f".into())]).unwrap();
        let payload = build_payload(&form, FieldValues::Defaults, None).unwrap();
        assert_eq!(payload.get("card"), Some("a"));
    }

    #[test]
    fn postprocess_last_submit_and_select() {
        let form = login_form();
        let values = auth();
        let mut payload = build_payload(&form, FieldValues::Map(&values), Some("bt_LOGON")).unwrap();

        last_submit_button()(&form, &mut payload).unwrap();
        assert_eq!(payload.get("bt_LOGON"), None);
        assert_eq!(payload.get("bt_HELP"), Some("Hilfe"));

        select_option(Some("country"), OptionChoice::Last)(&form, &mut payload).unwrap();
        assert_eq!(payload.get("country"), Some("de"));
        select_option(Some("country"), OptionChoice::First)(&form, &mut payload).unwrap();
        assert_eq!(payload.get("country"), Some("at"));

        let err = select_option(Some("empty"), OptionChoice::First)(&form, &mut payload);
        assert!(matches!(err, Err(Error::Postprocess(_))));
    }

    #[test]
    fn find_reports_missing_and_ambiguous_forms() {
        let doc = Html::parse_document(
            r#"<form class="x"></form><form class="x"></form>"#,
        );
        assert!(matches!(
            Form::find(&doc, &[("name".into(), "nope".into())]),
            Err(Error::FormNotFound(_))
        ));
        assert!(matches!(
            Form::find(&doc, &[("class".into(), "x".into())]),
            Err(Error::AmbiguousForm { count: 2, .. })
        ));
    }

    #[test]
    fn payload_set_overrides_first_entry() {
        let mut payload = Payload::default();
        payload.append("a", "1");
        payload.append("a", "2");
        payload.set("a", "3");
        payload.set("b", "4");
        assert_eq!(payload.fields()[0].1, "3");
        assert_eq!(payload.fields()[1].1, "2");
        assert_eq!(payload.get("b"), Some("4"));
        payload.remove("a");
        assert_eq!(payload.len(), 1);
    }
}
