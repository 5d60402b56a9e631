//! Compiles a normalized [`RuleSet`] into the JSON payload the probe and
//! export endpoints accept.
//!
//! The one quirk worth preserving bit-for-bit is the OR-mode group
//! assignment: the first group collects up to one `Event.ID is greater
//! than` rule then up to one `Event.ID is less than` rule; any non-key
//! rule after that always starts a fresh group (so each is evaluated in OR
//! with the key bracket), and a group already holding more than two rules
//! spawns a new one for whatever comes next. AND'd rule sets always
//! compile to a single group.

use serde::Serialize;

use crate::catalog::Catalog;
use crate::rule::{Rule, RuleSet};

#[derive(Debug, Clone, Serialize)]
pub struct SelectedOption {
    #[serde(rename = "FieldName")]
    pub field_name: String,
    #[serde(rename = "DisplayText")]
    pub display_text: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<String>,
    #[serde(rename = "Selectable")]
    pub selectable: bool,
    #[serde(rename = "InputType")]
    pub input_type: String,
    #[serde(rename = "RuleType")]
    pub rule_type: u32,
    #[serde(rename = "Options")]
    pub options: Option<serde_json::Value>,
    #[serde(rename = "TargetCollection")]
    pub target_collection: String,
    #[serde(rename = "UnderDevelopment")]
    pub under_development: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRule {
    #[serde(rename = "RuleType")]
    pub rule_type: String,
    #[serde(rename = "Values")]
    pub values: Vec<String>,
    #[serde(rename = "Columns")]
    pub columns: Vec<String>,
    #[serde(rename = "Operator")]
    pub operator: String,
    #[serde(rename = "selectedOption")]
    pub selected_option: SelectedOption,
    #[serde(rename = "overrideColumn")]
    pub override_column: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryGroup {
    #[serde(rename = "QueryRules")]
    pub query_rules: Vec<QueryRule>,
    #[serde(rename = "AndOr")]
    pub and_or: String,
    #[serde(rename = "inLastSearch")]
    pub in_last_search: bool,
    #[serde(rename = "editedSinceLastSearch")]
    pub edited_since_last_search: bool,
}

impl QueryGroup {
    fn new(and_or: &str) -> Self {
        Self {
            query_rules: Vec::new(),
            and_or: and_or.to_string(),
            in_last_search: false,
            edited_since_last_search: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Probe,
    Export,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    #[serde(rename = "ResultSetSize")]
    pub result_set_size: u64,
    #[serde(rename = "ResultSetOffset")]
    pub result_set_offset: u64,
    #[serde(rename = "QueryGroups")]
    pub query_groups: Vec<QueryGroup>,
    #[serde(rename = "AndOr")]
    pub and_or: String,
    #[serde(rename = "SortColumn")]
    pub sort_column: Option<String>,
    #[serde(rename = "SortDescending")]
    pub sort_descending: bool,
    #[serde(rename = "TargetCollection")]
    pub target_collection: String,
    #[serde(rename = "SessionId")]
    pub session_id: i64,
    #[serde(rename = "ExportFormat", skip_serializing_if = "Option::is_none")]
    pub export_format: Option<String>,
}

/// Number of rules a group absorbs, in OR mode, before the next non-key
/// rule forces a new group to open.
const GROUP_FENCEPOST: usize = 2;

fn query_rule_for(rule: &Rule, catalog: &Catalog) -> QueryRule {
    let columns = match &rule.subfield {
        Some(sub) => vec![format!("{}.{}", rule.field, sub)],
        None => vec![rule.field.clone()],
    };
    let input_type = catalog
        .input_type(&rule.field, rule.subfield.as_deref())
        .unwrap_or_default()
        .to_string();

    QueryRule {
        rule_type: "Simple".to_string(),
        values: vec![rule.value.clone()],
        columns: columns.clone(),
        operator: rule.condition.clone(),
        selected_option: SelectedOption {
            field_name: rule.field.clone(),
            display_text: String::new(),
            columns,
            selectable: true,
            input_type,
            rule_type: 0,
            options: None,
            target_collection: "cases".to_string(),
            under_development: false,
        },
        override_column: String::new(),
    }
}

/// Builds the `QueryGroups` list for an OR'd rule set, preserving the
/// key-bracket-first, fencepost-after group assignment from §4.3.
fn group_rules_or(rules: &[Rule], catalog: &Catalog) -> Vec<QueryGroup> {
    let mut groups: Vec<QueryGroup> = Vec::new();
    let mut current = QueryGroup::new("and");
    let mut took_key_bracket = false;

    let mut iter = rules.iter().peekable();

    // First group: up to one `is greater than`, then up to one
    // `is less than` key rule, in whatever order they appear.
    while let Some(rule) = iter.peek() {
        let is_gt_or_lt = rule.is_key_rule()
            && (rule.condition.eq_ignore_ascii_case("is greater than")
                || rule.condition.eq_ignore_ascii_case("is less than"));
        if !is_gt_or_lt || current.query_rules.len() >= 2 {
            break;
        }
        current.query_rules.push(query_rule_for(iter.next().unwrap(), catalog));
        took_key_bracket = true;
    }

    let mut first_general = true;
    for rule in iter {
        if first_general {
            first_general = false;
            if took_key_bracket {
                groups.push(current);
                current = QueryGroup::new("and");
            }
        } else if current.query_rules.len() > GROUP_FENCEPOST {
            groups.push(current);
            current = QueryGroup::new("and");
        }
        current.query_rules.push(query_rule_for(rule, catalog));
    }

    if !current.query_rules.is_empty() {
        groups.push(current);
    }
    groups
}

fn group_rules_and(rules: &[Rule], catalog: &Catalog) -> Vec<QueryGroup> {
    let mut group = QueryGroup::new("and");
    for rule in rules {
        group.query_rules.push(query_rule_for(rule, catalog));
    }
    vec![group]
}

/// Compiles `rule_set` into a probe or export payload. `result_set_size`
/// controls the page size the server reports counts and rows for; callers
/// probing for a count typically pass a small value, callers exporting
/// pass the server's maximum.
pub fn compile(
    rule_set: &RuleSet,
    catalog: &Catalog,
    session_id: i64,
    result_set_size: u64,
    kind: PayloadKind,
) -> Payload {
    let query_groups = if rule_set.require_all {
        group_rules_and(&rule_set.rules, catalog)
    } else {
        group_rules_or(&rule_set.rules, catalog)
    };

    Payload {
        result_set_size,
        result_set_offset: 0,
        query_groups,
        and_or: if rule_set.require_all { "and" } else { "or" }.to_string(),
        sort_column: None,
        sort_descending: true,
        target_collection: "cases".to_string(),
        session_id,
        export_format: matches!(kind, PayloadKind::Export).then(|| "summary".to_string()),
    }
}
