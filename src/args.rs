//! Normalizes the various shapes a caller can hand in (a bare string, a
//! 3-tuple, an explicit 4-tuple) into a single [`crate::rule::Rule`].
//!
//! The arity dispatch, the permissive date parsing, and the case-tolerant
//! token classification all figure out which piece of a loosely-structured
//! argument is the field, which is the condition, which is the value, and
//! whether the value needs date normalization before it can go on the wire.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::Catalog;
use crate::error::{CarolError, Result};
use crate::rule::Rule;

/// A caller-supplied argument in one of the shapes the CLI and library
/// both accept. Variants are deliberately named after arity, not meaning,
/// because the same 3 or 4 strings can be reordered and still resolve to
/// the same rule.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A single free-text phrase, e.g. `"engine fire"` or `"is after 2020-01-01"`.
    Str(String),
    /// Equivalent to `Str` — kept distinct so CLI parsing that always
    /// produces a 1-element list doesn't have to special-case length 1.
    Tuple1(String),
    /// `(field, condition, value)` in any order; subfield is implied `None`.
    Tuple3(String, String, String),
    /// `(field, subfield, condition, value)`, fully explicit. Pass an empty
    /// string for `subfield` to mean "no subfield".
    Tuple4(String, String, String, String),
}

/// The condition regex: splits a combined `"<condition> <value>"` phrase,
/// e.g. `"is on or after 2020-01-01"` -> (`"is on or after"`, `"2020-01-01"`).
static CONDITION_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(is(?:(?: on or)?(?: before| after)| not)?) (.+)$").unwrap());

/// Policy for confirming an ambiguous free-text argument before it's sent
/// as a query. Library consumers supply their own policy instead of the
/// library reading from stdin itself; the CLI binary implements this by
/// actually prompting the user.
pub trait ProseConfirmation {
    /// Called when `text` could not be confidently classified as a date
    /// condition and will be sent as a free-text narrative search instead.
    /// Return `true` to proceed, `false` to reject the argument.
    fn confirm_free_text(&self, text: &str) -> bool;
}

/// Always confirms. Suitable for batch/non-interactive use and for tests.
pub struct AlwaysConfirm;

impl ProseConfirmation for AlwaysConfirm {
    fn confirm_free_text(&self, _text: &str) -> bool {
        true
    }
}

/// Normalizes an [`Arg`] into a [`Rule`] against `catalog`.
pub fn normalize(
    arg: &Arg,
    catalog: &Catalog,
    confirm: &dyn ProseConfirmation,
) -> Result<Rule> {
    let rule = match arg {
        Arg::Str(s) | Arg::Tuple1(s) => normalize_free_text(s, confirm),
        Arg::Tuple3(a, b, c) => normalize_tuple3(a, b, c, catalog),
        Arg::Tuple4(field, subfield, condition, value) => {
            normalize_tuple4(field, subfield, condition, value, catalog)
        }
    }?;
    check_complete(&rule)?;
    Ok(rule)
}

/// Builds an [`Arg`] from a caller-supplied token list, rejecting the
/// arities no normalizer handles (two tokens, or five or more) up front
/// rather than letting them fall through to a confusing downstream error.
pub fn arg_from_tokens(tokens: Vec<String>) -> Result<Arg> {
    match tokens.len() {
        1 => Ok(Arg::Tuple1(tokens.into_iter().next().unwrap())),
        3 => {
            let mut it = tokens.into_iter();
            let a = it.next().unwrap();
            let b = it.next().unwrap();
            let c = it.next().unwrap();
            Ok(Arg::Tuple3(a, b, c))
        }
        4 => {
            let mut it = tokens.into_iter();
            let field = it.next().unwrap();
            let subfield = it.next().unwrap();
            let condition = it.next().unwrap();
            let value = it.next().unwrap();
            Ok(Arg::Tuple4(field, subfield, condition, value))
        }
        n => Err(CarolError::Malformed(format!(
            "query argument needs 1, 3, or 4 parts, got {n}"
        ))),
    }
}

/// Every rule must carry a field, a condition, and a value. `subfield` may
/// be empty only for `HasSafetyRec`, the catalog's one leaf field.
fn check_complete(rule: &Rule) -> Result<()> {
    if rule.field.trim().is_empty() || rule.condition.trim().is_empty() || rule.value.trim().is_empty() {
        return Err(CarolError::Malformed(format!(
            "incomplete rule: {rule:?}"
        )));
    }
    if rule.subfield.is_none() && !rule.field.eq_ignore_ascii_case("HasSafetyRec") {
        return Err(CarolError::Malformed(format!(
            "rule for field {:?} is missing a subfield",
            rule.field
        )));
    }
    Ok(())
}

/// A one-argument query phrase reads as prose, rather than as a terse
/// condition expression, once it ends in sentence punctuation or runs past
/// what a condition phrase would ever need.
fn looks_like_prose(s: &str) -> bool {
    s.ends_with(['.', '!', '?']) || s.split_whitespace().count() > 10
}

fn normalize_free_text(s: &str, confirm: &dyn ProseConfirmation) -> Result<Rule> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CarolError::Malformed("empty query argument".into()));
    }

    if looks_like_prose(trimmed) {
        if !confirm.confirm_free_text(trimmed) {
            return Err(CarolError::Malformed(format!(
                "free-text argument rejected by caller: {trimmed:?}"
            )));
        }
        return Ok(Rule::new(
            "Narrative",
            Some("Factual".into()),
            "contains",
            trimmed.to_lowercase(),
        ));
    }

    let lowered = trimmed.to_lowercase();
    if let Some(date) = parse_date_str(&lowered) {
        return Ok(Rule::new(
            "Event",
            Some("EventDate".into()),
            "is on or after",
            date.format("%Y-%m-%d").to_string(),
        ));
    }

    if let Some(caps) = CONDITION_VALUE_RE.captures(trimmed) {
        let condition = caps[1].to_string();
        let raw_value = caps[2].to_string();
        let value = parse_loose_date(&condition, &raw_value)?;
        return Ok(Rule::new(
            "Event",
            Some("EventDate".into()),
            condition,
            value,
        ));
    }

    Ok(Rule::new(
        "Narrative",
        Some("Factual".into()),
        "contains",
        lowered,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Field,
    Subfield,
    Condition,
    Value,
    Unknown,
}

/// Classifies a single token against the catalog's four universes, in the
/// same field/subfield/condition/value priority order the original
/// `query_key_sort` uses, so a token that happens to sit in more than one
/// universe resolves the same way here as it did there.
fn classify(token: &str, catalog: &Catalog) -> TokenClass {
    if catalog.is_field(token) {
        TokenClass::Field
    } else if catalog.is_subfield(token) {
        TokenClass::Subfield
    } else if catalog.is_condition(token) {
        TokenClass::Condition
    } else if catalog.is_value(token) {
        TokenClass::Value
    } else {
        TokenClass::Unknown
    }
}

/// Classifies the three tokens of a [`Arg::Tuple3`] against the catalog's
/// universes. A token that matches nothing outright is split on whitespace
/// and each word tried in turn — callers sometimes hand in `"Event ID"` as
/// one token rather than two. Whatever is still unclaimed after that
/// defaults to the value slot.
fn normalize_tuple3(a: &str, b: &str, c: &str, catalog: &Catalog) -> Result<Rule> {
    let tokens = [a, b, c];
    let mut field: Option<&str> = None;
    let mut subfield: Option<&str> = None;
    let mut condition: Option<&str> = None;
    let mut value: Option<&str> = None;
    let mut leftover: Vec<&str> = Vec::new();

    for &t in &tokens {
        match classify(t, catalog) {
            TokenClass::Field if field.is_none() => field = Some(t),
            TokenClass::Subfield if subfield.is_none() => subfield = Some(t),
            TokenClass::Condition if condition.is_none() => condition = Some(t),
            TokenClass::Value if value.is_none() => value = Some(t),
            _ => leftover.push(t),
        }
    }

    if field.is_none() || condition.is_none() {
        let mut still_leftover = Vec::new();
        for t in leftover {
            let mut claimed = false;
            for word in t.split_whitespace() {
                if field.is_none() && catalog.is_field(word) {
                    field = Some(word);
                    claimed = true;
                } else if subfield.is_none() && catalog.is_subfield(word) {
                    subfield = Some(word);
                    claimed = true;
                } else if condition.is_none() && catalog.is_condition(word) {
                    condition = Some(word);
                    claimed = true;
                } else if value.is_none() && catalog.is_value(word) {
                    value = Some(word);
                    claimed = true;
                }
            }
            if !claimed {
                still_leftover.push(t);
            }
        }
        leftover = still_leftover;
    }

    let field = field
        .ok_or_else(|| CarolError::Malformed(format!("no recognizable field among {tokens:?}")))?;
    let condition = condition.ok_or_else(|| {
        CarolError::Malformed(format!("no recognizable condition among {tokens:?}"))
    })?;
    let value = value
        .or_else(|| leftover.first().copied())
        .ok_or_else(|| CarolError::Malformed(format!("no value left among {tokens:?}")))?;

    let input_type = catalog.input_type(field, subfield);
    let value = if input_type == Some("date") {
        parse_loose_date(condition, value)?
    } else {
        value.to_string()
    };

    Ok(Rule::new(field, subfield.map(str::to_string), condition, value))
}

fn normalize_tuple4(
    field: &str,
    subfield: &str,
    condition: &str,
    value: &str,
    catalog: &Catalog,
) -> Result<Rule> {
    if !catalog.is_field(field) {
        return Err(CarolError::Malformed(format!("unrecognized field {field:?}")));
    }
    if !catalog.is_condition(condition) {
        return Err(CarolError::Malformed(format!(
            "unrecognized condition {condition:?}"
        )));
    }

    let subfield = if subfield.trim().is_empty() {
        None
    } else {
        Some(subfield.to_string())
    };

    let input_type = catalog.input_type(field, subfield.as_deref());
    // Only "bool"/"select" fields enumerate a fixed value set in the
    // catalog; "text"/"date"/"number" fields carry a single empty-string
    // placeholder there, so value-universe membership is only meaningful
    // to check for the former.
    if matches!(input_type, Some("bool") | Some("select")) && !catalog.is_value(value) {
        return Err(CarolError::Malformed(format!(
            "unrecognized value {value:?} for field {field:?}"
        )));
    }
    let value = if input_type == Some("date") {
        parse_loose_date(condition, value)?
    } else {
        value.to_string()
    };

    Ok(Rule::new(field, subfield, condition, value))
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%B %d, %Y", "%b %d, %Y"];

/// Parses `raw` as a date using a handful of common formats. Any date
/// that lands in the future is assumed to mean the prior century — this
/// is a database of historical accident records, so `"01/02/24"` means
/// 1924, not 2024, regardless of which format matched.
fn parse_date_str(raw: &str) -> Option<chrono::NaiveDate> {
    use chrono::{Datelike, NaiveDate};

    let raw = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(mut date) = NaiveDate::parse_from_str(raw, fmt) {
            if date.year() > current_year_hint() {
                date = date.with_year(date.year() - 100).unwrap_or(date);
            }
            return Some(date);
        }
    }
    None
}

fn parse_loose_date(condition: &str, raw: &str) -> Result<String> {
    parse_date_str(raw)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| CarolError::MalformedDate {
            condition: condition.to_string(),
            value: raw.trim().to_string(),
        })
}

/// A fixed reference year used only to decide which century a 2-digit year
/// belongs to. This is deliberately not wall-clock time: the crate must
/// stay deterministic without a live clock dependency at this layer.
fn current_year_hint() -> i32 {
    2026
}
