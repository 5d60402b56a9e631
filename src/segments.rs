//! Key-range algebra: turns an ordered list of `Event.ID` constraints into
//! disjoint `[lo, hi]` segments over the `[0, 200000]` universe, ready for
//! per-segment export.
//!
//! Two algorithms, one per rule-set mode. AND intersects every constraint
//! down to the matching set. OR cannot intersect — a non-key rule might
//! match outside the key bracket entirely — so it instead computes the
//! "hot" region implied by the key constraints plus the complementary
//! region the non-key rules must also be checked against.

use std::collections::BTreeSet;

use crate::config::{KEY_MAX, KEY_MIN, SEG};
use crate::rule::Rule;

/// A closed, inclusive `[lo, hi]` interval over `Event.ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub lo: i64,
    pub hi: i64,
}

impl Segment {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn width(&self) -> i64 {
        (self.hi - self.lo + 1).max(0)
    }
}

/// A parsed `Event.ID` constraint, independent of the `Rule` wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOp {
    GreaterThan(i64),
    LessThan(i64),
    Is(i64),
    IsNot(i64),
}

/// Parses a key-range constraint out of a rule, if it is one and its
/// value and condition are both recognizable.
pub fn key_op(rule: &Rule) -> Option<KeyOp> {
    if !rule.is_key_rule() {
        return None;
    }
    let n = rule.key_value()?;
    match rule.condition.to_lowercase().as_str() {
        "is greater than" => Some(KeyOp::GreaterThan(n)),
        "is less than" => Some(KeyOp::LessThan(n)),
        "is" => Some(KeyOp::Is(n)),
        "is not" => Some(KeyOp::IsNot(n)),
        _ => None,
    }
}

/// AND-mode partitioning: intersects every constraint, in order, against a
/// running set of disjoint `[a, b]` pairs starting from the full universe.
/// `is` (equality) replaces the *entire* running set with the singleton
/// `[n, n]` — later constraints still apply after that, but earlier ones
/// are discarded: an equality rule dominates whatever narrowing came
/// before it.
pub fn generate_segments_and(constraints: &[Rule]) -> Vec<Segment> {
    let mut pairs: Vec<(i64, i64)> = vec![(KEY_MIN, KEY_MAX)];

    for rule in constraints {
        let Some(op) = key_op(rule) else { continue };
        match op {
            KeyOp::GreaterThan(n) => {
                pairs.retain_mut(|(a, b)| {
                    if *b < n {
                        return false;
                    }
                    if *a <= n && n < *b {
                        *a = n + 1;
                    }
                    true
                });
            }
            KeyOp::LessThan(n) => {
                pairs.retain_mut(|(a, b)| {
                    if *a > n + 1 {
                        return false;
                    }
                    if *a < n && n <= *b {
                        *b = n - 1;
                    }
                    true
                });
            }
            KeyOp::IsNot(n) => {
                let mut next = Vec::with_capacity(pairs.len());
                for (a, b) in pairs {
                    if a < n && n < b {
                        next.push((a, n - 1));
                        next.push((n + 1, b));
                    } else if a == n {
                        next.push((a + 1, b));
                    } else if b == n {
                        next.push((a, b - 1));
                    } else {
                        next.push((a, b));
                    }
                }
                pairs = next;
            }
            KeyOp::Is(n) => {
                pairs = vec![(n, n)];
            }
        }
    }

    pairs
        .into_iter()
        .filter(|(a, b)| a <= b)
        .flat_map(|(a, b)| slice(a, b))
        .collect()
}

/// OR-mode partitioning: returns `(hot, complement)`. `hot` covers the
/// region the key constraints actually bracket; `complement` is everything
/// else in `[0, 200000]`, which still needs checking against the non-key
/// rules since an OR'd rule set can match there too.
pub fn generate_segments_or(constraints: &[Rule]) -> (Vec<Segment>, Vec<Segment>) {
    let mut global_greater: Option<i64> = None;
    let mut global_lesser: Option<i64> = None;
    let mut is_set: BTreeSet<i64> = BTreeSet::new();
    let mut not_vals: Vec<i64> = Vec::new();

    for rule in constraints {
        match key_op(rule) {
            Some(KeyOp::GreaterThan(n)) => {
                global_greater = Some(global_greater.map_or(n + 1, |g| g.min(n + 1)));
            }
            Some(KeyOp::LessThan(n)) => {
                global_lesser = Some(global_lesser.map_or(n - 1, |l| l.max(n - 1)));
            }
            Some(KeyOp::Is(n)) => {
                is_set.insert(n);
            }
            Some(KeyOp::IsNot(n)) => not_vals.push(n),
            None => {}
        }
    }

    let halves_lo = global_lesser.filter(|&l| l >= KEY_MIN);
    let halves_hi = global_greater.filter(|&g| g <= KEY_MAX);

    // An `is not` constraint is only representable when there's exactly
    // one of it, it doesn't collide with an explicit `is`, and it actually
    // falls inside the region the `>`/`<` halves already bracket (outside
    // that, the halves alone already decide whether it's hot or not, so a
    // second narrowing pass has nothing to add and the OR collapses to the
    // safe default: the whole universe).
    let not_cond = match not_vals.as_slice() {
        [] => None,
        [n] if !is_set.contains(n) => {
            let inside_bracket = match (halves_lo, halves_hi) {
                (Some(lo), Some(hi)) => *n > lo && *n < hi,
                (Some(lo), None) => *n > lo,
                (None, Some(hi)) => *n < hi,
                (None, None) => true,
            };
            if inside_bracket {
                Some(*n)
            } else {
                None
            }
        }
        _ => None,
    };
    let collapsed = not_vals.len() > 1 || (not_vals.len() == 1 && not_cond.is_none());

    if collapsed {
        let hot = slice(KEY_MIN, KEY_MAX);
        return (hot, Vec::new());
    }

    let mut hot_ranges: Vec<(i64, i64)> = Vec::new();
    if let Some(lo) = halves_lo {
        if lo >= KEY_MIN {
            hot_ranges.push((KEY_MIN, lo.min(KEY_MAX)));
        }
    }
    if let Some(hi) = halves_hi {
        if hi <= KEY_MAX {
            hot_ranges.push((hi.max(KEY_MIN), KEY_MAX));
        }
    }
    for &v in &is_set {
        let covered = hot_ranges.iter().any(|&(a, b)| a <= v && v <= b);
        if !covered {
            hot_ranges.push((v, v));
        }
    }
    if let Some(n) = not_cond {
        // `is not n` is everything except n: split the universe around it.
        if n > KEY_MIN {
            hot_ranges.push((KEY_MIN, n - 1));
        }
        if n < KEY_MAX {
            hot_ranges.push((n + 1, KEY_MAX));
        }
    }

    let covered = merge(hot_ranges.clone());
    let complement = invert(&covered);

    let hot_segments = covered.iter().flat_map(|&(a, b)| slice(a, b)).collect();
    let complement_segments = complement.iter().flat_map(|&(a, b)| slice(a, b)).collect();

    (hot_segments, complement_segments)
}

/// Slices `[lo, hi]` into contiguous segments of at most `SEG` keys each.
fn slice(lo: i64, hi: i64) -> Vec<Segment> {
    if hi < lo {
        return Vec::new();
    }
    let mut segments = Vec::new();
    let mut cursor = lo;
    while cursor <= hi {
        let seg_hi = (cursor + SEG - 1).min(hi);
        segments.push(Segment::new(cursor, seg_hi));
        cursor = seg_hi + 1;
    }
    segments
}

/// Merges overlapping/adjacent `[a, b]` pairs into a minimal sorted set.
fn merge(mut ranges: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    ranges.retain(|&(a, b)| a <= b);
    ranges.sort_unstable();
    let mut out: Vec<(i64, i64)> = Vec::new();
    for (a, b) in ranges {
        if let Some(last) = out.last_mut() {
            if a <= last.1 + 1 {
                last.1 = last.1.max(b);
                continue;
            }
        }
        out.push((a, b));
    }
    out
}

/// Returns the gaps in `[0, 200000]` not covered by `covered` (already
/// merged and sorted).
fn invert(covered: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut gaps = Vec::new();
    let mut cursor = KEY_MIN;
    for &(a, b) in covered {
        if a > cursor {
            gaps.push((cursor, a - 1));
        }
        cursor = cursor.max(b + 1);
    }
    if cursor <= KEY_MAX {
        gaps.push((cursor, KEY_MAX));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gt(n: i64) -> Rule {
        Rule::new("Event", Some("ID".into()), "is greater than", n.to_string())
    }
    fn lt(n: i64) -> Rule {
        Rule::new("Event", Some("ID".into()), "is less than", n.to_string())
    }
    fn is(n: i64) -> Rule {
        Rule::new("Event", Some("ID".into()), "is", n.to_string())
    }
    fn is_not(n: i64) -> Rule {
        Rule::new("Event", Some("ID".into()), "is not", n.to_string())
    }

    #[test]
    fn and_intersects_greater_and_less_than() {
        let segs = generate_segments_and(&[gt(100), lt(150)]);
        let total: i64 = segs.iter().map(Segment::width).sum();
        assert_eq!(total, 49); // 101..=149
        assert_eq!(segs.first().unwrap().lo, 101);
        assert_eq!(segs.last().unwrap().hi, 149);
    }

    #[test]
    fn and_crossing_bounds_yields_no_segments() {
        let segs = generate_segments_and(&[gt(193_455), lt(3334)]);
        assert!(segs.is_empty());
    }

    #[test]
    fn and_equality_discards_earlier_narrowing() {
        let segs = generate_segments_and(&[gt(100_000), is(50)]);
        assert_eq!(segs, vec![Segment::new(50, 50)]);
    }

    #[test]
    fn and_is_not_splits_the_range() {
        let segs = generate_segments_and(&[gt(0), lt(5), is_not(2)]);
        // range is [1,4] after gt/lt; is_not(2) splits into [1,1] and [3,4]
        let total: i64 = segs.iter().map(Segment::width).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn or_covers_universe_with_no_key_constraints() {
        let (hot, complement) = generate_segments_or(&[]);
        assert!(hot.is_empty());
        let total: i64 = complement.iter().map(Segment::width).sum();
        assert_eq!(total, KEY_MAX - KEY_MIN + 1);
    }

    #[test]
    fn or_brackets_hot_region_and_complements_the_rest() {
        let (hot, complement) = generate_segments_or(&[gt(199_000), lt(1000)]);
        let hot_total: i64 = hot.iter().map(Segment::width).sum();
        let complement_total: i64 = complement.iter().map(Segment::width).sum();
        assert_eq!(hot_total + complement_total, KEY_MAX - KEY_MIN + 1);
        assert!(hot_total > 0);
    }

    #[test]
    fn or_conflicting_is_not_values_collapse_to_universe() {
        let (hot, complement) = generate_segments_or(&[is_not(5), is_not(6)]);
        assert!(complement.is_empty());
        let total: i64 = hot.iter().map(Segment::width).sum();
        assert_eq!(total, KEY_MAX - KEY_MIN + 1);
    }

    proptest! {
        #[test]
        fn and_segments_are_disjoint_ordered_and_within_stride(
            n1 in 0i64..200_000, n2 in 0i64..200_000,
        ) {
            let (lo, hi) = (n1.min(n2), n1.max(n2));
            let segs = generate_segments_and(&[gt(lo - 1), lt(hi + 1)]);
            let mut expected_next = lo.max(KEY_MIN);
            for seg in &segs {
                prop_assert_eq!(seg.lo, expected_next);
                prop_assert!(seg.hi >= seg.lo);
                prop_assert!(seg.width() <= SEG);
                expected_next = seg.hi + 1;
            }
        }

        #[test]
        fn or_hot_and_complement_partition_the_universe(
            gt_n in 0i64..200_000, lt_n in 0i64..200_000,
        ) {
            let (hot, complement) = generate_segments_or(&[gt(gt_n), lt(lt_n)]);
            let total: i64 = hot.iter().chain(complement.iter()).map(Segment::width).sum();
            prop_assert_eq!(total, KEY_MAX - KEY_MIN + 1);
        }
    }
}
