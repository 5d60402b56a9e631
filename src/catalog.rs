//! Loads the server's field/subfield/condition/value vocabulary
//! (`possible_values.json`) into an in-memory catalog.
//!
//! The catalog is immutable once built. Library code takes `&Catalog`
//! explicitly so normalization and compilation stay testable without a
//! process-wide singleton; [`CATALOG`] exists only as the one-shot,
//! lazily-initialized slot the shipped CLI binary uses.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::{CarolError, Result};

/// Per-(field, subfield) vocabulary entry.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub input_type: String,
    pub conditions: HashSet<String>,
    pub values: HashSet<String>,
}

/// The loaded vocabulary plus the four derived membership universes.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// field -> subfield (None for leaf fields) -> info
    data: HashMap<String, HashMap<Option<String>, FieldInfo>>,
    fields: Vec<String>,
    subfields: HashSet<String>,
    conditions: HashSet<String>,
    values: HashSet<String>,
}

static CATALOG: OnceCell<Catalog> = OnceCell::new();

/// Initializes the process-wide catalog from `path`. Returns an error if
/// called twice, or if the file cannot be read/parsed.
pub fn init_catalog(path: impl AsRef<Path>) -> Result<()> {
    let catalog = Catalog::load(path)?;
    CATALOG
        .set(catalog)
        .map_err(|_| CarolError::Catalog("catalog already initialized".into()))
}

/// Returns the process-wide catalog. Panics if [`init_catalog`] was never
/// called — a missing catalog is a fatal startup error, not a recoverable
/// one.
pub fn global() -> &'static Catalog {
    CATALOG
        .get()
        .expect("carol catalog not initialized; call init_catalog() at startup")
}

// --- wire schema of possible_values.json ---

#[derive(Debug, Deserialize)]
struct RawRoot {
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    value: String,
    input: Option<String>,
    #[serde(rename = "queryValues", default)]
    query_values: Vec<RawQueryValue>,
    subfields: Option<Vec<RawSubfield>>,
}

#[derive(Debug, Deserialize)]
struct RawSubfield {
    value: String,
    input: String,
    #[serde(rename = "queryValues")]
    query_values: Vec<RawQueryValue>,
}

#[derive(Debug, Deserialize)]
struct RawQueryValue {
    value: String,
    #[serde(default)]
    conditions: Vec<String>,
}

impl Catalog {
    /// Reads and parses the vocabulary file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Catalog> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CarolError::Catalog(format!("cannot read catalog file {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parses vocabulary JSON already read into memory.
    pub fn parse(text: &str) -> Result<Catalog> {
        let root: RawRoot = serde_json::from_str(text)
            .map_err(|e| CarolError::Catalog(format!("malformed catalog JSON: {e}")))?;

        let mut data: HashMap<String, HashMap<Option<String>, FieldInfo>> = HashMap::new();
        let mut fields = Vec::new();
        let mut subfields = HashSet::new();
        let mut conditions = HashSet::new();
        let mut values = HashSet::new();

        for field in root.fields {
            fields.push(field.value.clone());
            let mut by_subfield: HashMap<Option<String>, FieldInfo> = HashMap::new();

            if let Some(subs) = field.subfields {
                for sub in subs {
                    let first_conditions = sub
                        .query_values
                        .first()
                        .map(|qv| qv.conditions.clone())
                        .unwrap_or_default();
                    let sub_conditions: HashSet<String> = first_conditions.into_iter().collect();
                    let sub_values: HashSet<String> = sub
                        .query_values
                        .iter()
                        .map(|qv| qv.value.clone())
                        .collect();

                    subfields.insert(sub.value.clone());
                    conditions.extend(sub_conditions.iter().cloned());
                    values.extend(sub_values.iter().cloned());

                    by_subfield.insert(
                        Some(sub.value.clone()),
                        FieldInfo {
                            input_type: sub.input.clone(),
                            conditions: sub_conditions,
                            values: sub_values,
                        },
                    );
                }
            } else {
                let first_conditions = field
                    .query_values
                    .first()
                    .map(|qv| qv.conditions.clone())
                    .unwrap_or_default();
                let leaf_conditions: HashSet<String> = first_conditions.into_iter().collect();
                let leaf_values: HashSet<String> = field
                    .query_values
                    .iter()
                    .map(|qv| qv.value.clone())
                    .collect();

                conditions.extend(leaf_conditions.iter().cloned());
                values.extend(leaf_values.iter().cloned());

                by_subfield.insert(
                    None,
                    FieldInfo {
                        input_type: field.input.clone().unwrap_or_default(),
                        conditions: leaf_conditions,
                        values: leaf_values,
                    },
                );
            }

            data.insert(field.value, by_subfield);
        }

        Ok(Catalog {
            data,
            fields,
            subfields,
            conditions,
            values,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Resolves the server's `InputType` for a `(field, subfield)` pair.
    pub fn input_type(&self, field: &str, subfield: Option<&str>) -> Option<&str> {
        self.data
            .get(field)
            .and_then(|by_sub| by_sub.get(&subfield.map(str::to_string)))
            .map(|info| info.input_type.as_str())
    }

    pub fn is_field(&self, s: &str) -> bool {
        case_tolerant_contains(s, |cand| self.fields.iter().any(|f| f == cand))
    }

    pub fn is_subfield(&self, s: &str) -> bool {
        case_tolerant_contains(s, |cand| self.subfields.contains(cand))
    }

    pub fn is_condition(&self, s: &str) -> bool {
        case_tolerant_contains(s, |cand| self.conditions.contains(cand))
    }

    pub fn is_value(&self, s: &str) -> bool {
        case_tolerant_contains(s, |cand| self.values.contains(cand))
    }
}

/// Tries identity, lower-case, upper-case, then title-case before
/// declaring no match.
fn case_tolerant_contains(s: &str, test: impl Fn(&str) -> bool) -> bool {
    if test(s) {
        return true;
    }
    let lower = s.to_lowercase();
    if test(&lower) {
        return true;
    }
    let upper = s.to_uppercase();
    if test(&upper) {
        return true;
    }
    let title = title_case(s);
    test(&title)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
        if c.is_whitespace() {
            capitalize_next = true;
        }
    }
    out
}

#[cfg(test)]
pub(crate) const TEST_CATALOG_JSON: &str = r#"
{
  "fields": [
    {
      "value": "Event",
      "subfields": [
        {
          "value": "EventDate",
          "input": "date",
          "queryValues": [
            { "value": "", "conditions": ["is on or before", "is on or after", "is before", "is after", "is", "is not"] }
          ]
        },
        {
          "value": "ID",
          "input": "number",
          "queryValues": [
            { "value": "", "conditions": ["is greater than", "is less than", "is", "is not"] }
          ]
        }
      ]
    },
    {
      "value": "Narrative",
      "subfields": [
        {
          "value": "Factual",
          "input": "text",
          "queryValues": [
            { "value": "", "conditions": ["contains", "does not contain"] }
          ]
        }
      ]
    },
    {
      "value": "HasSafetyRec",
      "input": "bool",
      "queryValues": [
        { "value": "Yes", "conditions": ["is"] },
        { "value": "No", "conditions": ["is"] }
      ]
    }
  ]
}
"#;
