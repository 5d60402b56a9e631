//! Top-level orchestration: normalize arguments, probe, decide whether the
//! result set needs partitioning, fan out, aggregate.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::aggregator;
use crate::args::{self, Arg, ProseConfirmation};
use crate::bracket::{self, ProbeCounter};
use crate::catalog::Catalog;
use crate::client::CarolClient;
use crate::compiler::{self, PayloadKind};
use crate::config::{Config, MAX_ONE_REQUEST};
use crate::error::Result;
use crate::executor::{self, SegmentJob};
use crate::rule::{Rule, RuleSet};
use crate::segments::{self, Segment};

/// Where a completed query landed in the pipeline. Every query passes
/// through `Normalized` and `Probed`; everything past that depends on
/// whether a download was requested and how many rows the probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Normalized,
    Probed,
    Done,
    SingleExport,
    Bracketed,
    Partitioned,
    FannedOut,
    Aggregated,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub state: State,
    pub result_count: Option<u64>,
    pub aggregated_path: Option<PathBuf>,
}

/// Runs a complete query: normalizes `raw_args` against `catalog`, probes
/// the server, and — if `download` is set — partitions and fans out the
/// full export, aggregating whatever tables the executor recovers.
pub async fn query(
    raw_args: &[Arg],
    require_all: bool,
    download: bool,
    catalog: &Catalog,
    config: &Config,
    confirm: &dyn ProseConfirmation,
) -> Result<QueryOutcome> {
    let rules: Vec<Rule> = raw_args
        .iter()
        .map(|a| args::normalize(a, catalog, confirm))
        .collect::<Result<_>>()?;
    let rule_set = RuleSet::new(rules, require_all);
    info!(rules = rule_set.len(), require_all, download, "normalized query");

    let client = CarolClient::new(config.clone())?;
    let (key_constraints, general_constraints) = rule_set.split_key_constraints();

    if !download {
        let payload = compiler::compile(&rule_set, catalog, config.probe_session_id, 50, PayloadKind::Probe);
        let probe = client.probe(&payload).await?;
        info!(count = probe.result_list_count, "probe-only query complete");
        return Ok(QueryOutcome {
            state: State::Probed,
            result_count: Some(probe.result_list_count),
            aggregated_path: None,
        });
    }

    let general_only = RuleSet::new(general_constraints.clone(), require_all);
    let probe_payload = compiler::compile(&general_only, catalog, config.probe_session_id, 50, PayloadKind::Probe);
    let probe = client.probe(&probe_payload).await?;
    let n = probe.result_list_count;

    if n == 0 {
        info!("probe found no results, nothing to download");
        return Ok(QueryOutcome {
            state: State::Done,
            result_count: Some(0),
            aggregated_path: None,
        });
    }

    if n < MAX_ONE_REQUEST {
        info!(count = n, "result count under the per-request ceiling, single export");
        let job = SegmentJob { rule_set: rule_set.clone() };
        let paths = executor::run(vec![job], &client, catalog, config).await?;
        let aggregated = aggregator::aggregate(&paths, Path::new(&config.output_dir))?;
        return Ok(QueryOutcome {
            state: if aggregated.is_some() { State::Aggregated } else { State::SingleExport },
            result_count: Some(n),
            aggregated_path: aggregated,
        });
    }

    info!(count = n, "result count exceeds the per-request ceiling, bracketing");
    let mut extended_key_constraints = key_constraints.clone();
    if key_constraints.is_empty() {
        let counter = ClientProbeCounter { client: &client, catalog, config };
        let discovered = bracket::bracket(&general_constraints, require_all, &counter).await?;
        extended_key_constraints.extend(discovered);
    }

    let segment_jobs = if require_all {
        let segs = segments::generate_segments_and(&extended_key_constraints);
        build_segment_jobs(&segs, &general_constraints, true)
    } else {
        let (hot, complement) = segments::generate_segments_or(&extended_key_constraints);
        let mut jobs = build_segment_jobs(&hot, &general_constraints, false);
        jobs.extend(build_complement_jobs(&complement, &general_constraints, false));
        jobs
    };

    if segment_jobs.is_empty() {
        info!("key-range algebra produced no segments, nothing to export");
        return Ok(QueryOutcome {
            state: State::Done,
            result_count: Some(n),
            aggregated_path: None,
        });
    }

    info!(segments = segment_jobs.len(), "partitioned query, fanning out");
    let paths = executor::run(segment_jobs, &client, catalog, config).await?;
    let aggregated = aggregator::aggregate(&paths, Path::new(&config.output_dir))?;

    Ok(QueryOutcome {
        state: State::Aggregated,
        result_count: Some(n),
        aggregated_path: aggregated,
    })
}

/// Prepends each segment's `Event.ID` bound pair to `general_constraints`.
/// Only valid for AND segments and OR's "hot" segments: in both cases the
/// segment's bound is itself a real disjunct/conjunct of the query (a slice
/// of a constraint the caller actually wrote), so folding it back in as a
/// rule reproduces the original query, just windowed for pagination.
fn build_segment_jobs(segs: &[Segment], general_constraints: &[Rule], require_all: bool) -> Vec<SegmentJob> {
    segs.iter()
        .map(|seg| {
            let mut rules = vec![
                Rule::new("Event", Some("ID".into()), "is greater than", (seg.lo - 1).to_string()),
                Rule::new("Event", Some("ID".into()), "is less than", (seg.hi + 1).to_string()),
            ];
            rules.extend(general_constraints.iter().cloned());
            SegmentJob {
                rule_set: RuleSet::new(rules, require_all),
            }
        })
        .collect()
}

/// Builds jobs for OR mode's "complement" segments: the region outside the
/// key constraints' own bracket, where a record can only ever match through
/// `general_constraints`. The segment's `[lo, hi]` window is *not* folded in
/// as an `Event.ID` rule here — doing that would add it as a third OR
/// disjunct, which is true for every record in the window regardless of
/// whether `general_constraints` also matches, collapsing the query to
/// "everything in this window." `segs` only determines how many jobs to
/// fan out (and, once pagination windowing lands, how they'd be paged);
/// every job's rule set is identical, just `general_constraints` alone.
fn build_complement_jobs(segs: &[Segment], general_constraints: &[Rule], require_all: bool) -> Vec<SegmentJob> {
    segs.iter()
        .map(|_| SegmentJob {
            rule_set: RuleSet::new(general_constraints.to_vec(), require_all),
        })
        .collect()
}

struct ClientProbeCounter<'a> {
    client: &'a CarolClient,
    catalog: &'a Catalog,
    config: &'a Config,
}

#[async_trait::async_trait]
impl<'a> ProbeCounter for ClientProbeCounter<'a> {
    async fn count(&self, rules: &RuleSet) -> Result<u64> {
        let payload = compiler::compile(rules, self.catalog, self.config.probe_session_id, 1, PayloadKind::Probe);
        let probe = self.client.probe(&payload).await?;
        Ok(probe.result_list_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_segment_jobs_prepends_key_bounds() {
        let segs = vec![Segment::new(0, 399), Segment::new(400, 799)];
        let general = vec![Rule::new("HasSafetyRec", None, "is", "Yes")];
        let jobs = build_segment_jobs(&segs, &general, true);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].rule_set.rules.len(), 3);
        assert_eq!(jobs[0].rule_set.rules[0].condition, "is greater than");
        assert_eq!(jobs[0].rule_set.rules[0].value, "-1");
        assert_eq!(jobs[0].rule_set.rules[1].condition, "is less than");
        assert_eq!(jobs[0].rule_set.rules[1].value, "400");
    }

    #[test]
    fn complement_jobs_carry_no_event_id_rule() {
        let segs = vec![Segment::new(0, 399), Segment::new(800, 1199)];
        let general = vec![Rule::new("HasSafetyRec", None, "is", "Yes")];
        let jobs = build_complement_jobs(&segs, &general, false);
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(job.rule_set.rules.len(), 1);
            assert!(!job.rule_set.rules.iter().any(Rule::is_key_rule));
            assert_eq!(job.rule_set.rules[0].field, "HasSafetyRec");
        }
    }
}
