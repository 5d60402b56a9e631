//! The normalized rule vocabulary the rest of the crate operates on: a
//! single `(field, subfield, condition, value)` rule, and a set of rules
//! joined uniformly by AND or by OR.

/// One normalized query rule: `field.subfield condition value`, e.g.
/// `Event.EventDate is after 2020-01-01`. `subfield` is `None` for leaf
/// fields such as `HasSafetyRec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub field: String,
    pub subfield: Option<String>,
    pub condition: String,
    pub value: String,
}

impl Rule {
    pub fn new(
        field: impl Into<String>,
        subfield: Option<String>,
        condition: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            subfield,
            condition: condition.into(),
            value: value.into(),
        }
    }

    /// Rule is targeting the `Event.ID` primary key, i.e. a candidate for
    /// key-range partitioning rather than straight pass-through.
    pub fn is_key_rule(&self) -> bool {
        self.field.eq_ignore_ascii_case("Event")
            && self
                .subfield
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("ID"))
    }

    /// `value` parsed as the integer key it must be for a key rule.
    pub fn key_value(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subfield {
            Some(sub) => write!(f, "{}.{} {} {}", self.field, sub, self.condition, self.value),
            None => write!(f, "{} {} {}", self.field, self.condition, self.value),
        }
    }
}

/// A normalized set of rules, joined uniformly by AND or by OR.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    /// `true` for AND (`require_all`), `false` for OR.
    pub require_all: bool,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, require_all: bool) -> Self {
        Self { rules, require_all }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Splits the rule set into `(key_constraints, general_constraints)`,
    /// per the driver's step 2: everything targeting `Event.ID` versus
    /// everything else, order preserved within each half.
    pub fn split_key_constraints(&self) -> (Vec<Rule>, Vec<Rule>) {
        self.rules.iter().cloned().partition(|r| r.is_key_rule())
    }
}
