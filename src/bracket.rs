//! Adaptive bracketing: when a query carries no explicit `Event.ID`
//! constraint and the unconstrained probe count exceeds the per-request
//! ceiling, binary-search the key space for a tighter effective window
//! before handing things to [`crate::segments`].
//!
//! The lower edge is always searched. The upper edge is only searched in
//! OR mode — in AND mode it is left at the universe bound, since an AND'd
//! key constraint already narrows the upper side through the intersection
//! in [`crate::segments::generate_segments_and`], and re-searching it here
//! would just pay for a probe round trip that can't move the result.

use crate::config::{KEY_MAX, KEY_MIN, SEG};
use crate::error::Result;
use crate::rule::{Rule, RuleSet};

/// Counts how many results a probe returns for a given rule set. The
/// executor implements this against the live probe endpoint; abstracted
/// here so the search logic is testable without a network call.
#[async_trait::async_trait]
pub trait ProbeCounter {
    async fn count(&self, rules: &RuleSet) -> Result<u64>;
}

/// Narrows `general_rules` (already known to exceed the ceiling with no
/// key constraint) and returns the 1–2 new `Event.ID` rules discovered,
/// ready to prepend to the constraint set before partitioning.
pub async fn bracket(
    general_rules: &[Rule],
    require_all: bool,
    counter: &dyn ProbeCounter,
) -> Result<Vec<Rule>> {
    let mut discovered = Vec::new();

    let lo = find_lower_edge(general_rules, require_all, counter).await?;
    discovered.push(Rule::new(
        "Event",
        Some("ID".into()),
        "is greater than",
        (lo - 1).to_string(),
    ));

    if !require_all {
        let hi = find_upper_edge(general_rules, counter).await?;
        discovered.push(Rule::new(
            "Event",
            Some("ID".into()),
            "is less than",
            (hi + 1).to_string(),
        ));
    }

    Ok(discovered)
}

/// Returns `true` if any result exists in the key window `[win_lo, win_hi]`
/// combined with `general_rules`. Under AND, this is one combined probe.
/// Under OR, each general rule is probed separately (paired with the
/// window) and the search stops at the first nonzero count, since an OR'd
/// rule set only needs one match to be "present" in the window.
async fn any_match_in_window(
    win_lo: i64,
    win_hi: i64,
    general_rules: &[Rule],
    require_all: bool,
    counter: &dyn ProbeCounter,
) -> Result<bool> {
    let window_rules = [
        Rule::new("Event", Some("ID".into()), "is greater than", (win_lo - 1).to_string()),
        Rule::new("Event", Some("ID".into()), "is less than", (win_hi + 1).to_string()),
    ];

    if require_all {
        let mut rules: Vec<Rule> = window_rules.to_vec();
        rules.extend(general_rules.iter().cloned());
        let rs = RuleSet::new(rules, true);
        return Ok(counter.count(&rs).await? > 0);
    }

    if general_rules.is_empty() {
        let rs = RuleSet::new(window_rules.to_vec(), true);
        return Ok(counter.count(&rs).await? > 0);
    }

    for rule in general_rules {
        let mut rules: Vec<Rule> = window_rules.to_vec();
        rules.push(rule.clone());
        let rs = RuleSet::new(rules, true);
        if counter.count(&rs).await? > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn find_lower_edge(
    general_rules: &[Rule],
    require_all: bool,
    counter: &dyn ProbeCounter,
) -> Result<i64> {
    let mut lo = KEY_MIN;
    let mut hi = KEY_MAX;

    while hi - lo > SEG {
        let mid = lo + (hi - lo) / 2;
        if any_match_in_window(lo, mid, general_rules, require_all, counter).await? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    Ok(lo)
}

async fn find_upper_edge(general_rules: &[Rule], counter: &dyn ProbeCounter) -> Result<i64> {
    let mut lo = KEY_MIN;
    let mut hi = KEY_MAX;

    while hi - lo > SEG {
        let mid = lo + (hi - lo) / 2;
        if any_match_in_window(mid, hi, general_rules, false, counter).await? {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    Ok(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// A fake counter backed by a dense "which keys exist" set, plus an
    /// optional set of "matching" general-rule field names so OR-mode
    /// per-rule probing can be exercised too.
    struct FakeCounter {
        present: BTreeSet<i64>,
    }

    #[async_trait::async_trait]
    impl ProbeCounter for FakeCounter {
        async fn count(&self, rules: &RuleSet) -> Result<u64> {
            let mut lo = KEY_MIN;
            let mut hi = KEY_MAX;
            for rule in &rules.rules {
                if let Some(op) = crate::segments::key_op(rule) {
                    match op {
                        crate::segments::KeyOp::GreaterThan(n) => lo = lo.max(n + 1),
                        crate::segments::KeyOp::LessThan(n) => hi = hi.min(n - 1),
                        _ => {}
                    }
                }
            }
            Ok(self.present.range(lo..=hi).count() as u64)
        }
    }

    #[tokio::test]
    async fn and_mode_only_discovers_lower_bound() {
        let counter = FakeCounter {
            present: (150_000..=150_600).collect(),
        };
        let discovered = bracket(&[], true, &counter).await.unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].condition, "is greater than");
    }

    #[tokio::test]
    async fn or_mode_discovers_both_bounds() {
        let counter = FakeCounter {
            present: (150_000..=150_600).collect(),
        };
        let discovered = bracket(&[], false, &counter).await.unwrap();
        assert_eq!(discovered.len(), 2);
        assert_eq!(discovered[0].condition, "is greater than");
        assert_eq!(discovered[1].condition, "is less than");
        let lo: i64 = discovered[0].value.parse().unwrap();
        let hi: i64 = discovered[1].value.parse().unwrap();
        assert!(lo <= 150_000, "discovered lower bound must not exclude real matches");
        assert!(hi >= 150_600, "discovered upper bound must not exclude real matches");
    }
}
