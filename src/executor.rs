//! Executes a fanned-out query across its key segments: one task per
//! segment, bounded by a worker pool sized to the host's parallelism, each
//! probing first and exporting only if the probe found anything.
//!
//! Network and filesystem failures are not escalated to the caller — they
//! are logged and the segment is dropped, so a partial run still produces
//! a usable aggregate rather than failing the whole query over one flaky
//! segment. Pacing toward the server is a held mutex around a sleep, the
//! same shape `aerolithdb-cli`'s batch operations use `buffer_unordered`
//! for bounded fan-out, just with a rate limiter in front of it instead of
//! a bare concurrency cap.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::client::{CarolClient, RequestKind};
use crate::compiler::{self, PayloadKind};
use crate::config::{Config, MAX_ONE_REQUEST};
use crate::error::{CarolError, Result};
use crate::rule::{Rule, RuleSet};

/// One unit of work: a fully-formed rule set — key bracket plus general
/// constraints — representing a single segment of a partitioned query.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub rule_set: RuleSet,
}

struct Progress {
    total: u64,
    completed: u64,
}

/// Runs every segment job through probe-then-export, writing extracted
/// tables under `config.output_dir`, and returns the paths of every table
/// successfully extracted. Segments whose probe comes back empty, times
/// out, or whose export fails are silently dropped — see the module docs.
pub async fn run(
    jobs: Vec<SegmentJob>,
    client: &CarolClient,
    catalog: &Catalog,
    config: &Config,
) -> Result<Vec<PathBuf>> {
    let total = jobs.len() as u64;
    let progress = Arc::new(Mutex::new(Progress { total, completed: 0 }));
    let pacing = Arc::new(Mutex::new(()));
    let fs_lock = Arc::new(Mutex::new(()));

    tokio::fs::create_dir_all(&config.output_dir).await.ok();

    let tasks = jobs.into_iter().map(|job| {
        run_one_segment(
            job,
            client,
            catalog,
            config,
            Arc::clone(&progress),
            Arc::clone(&pacing),
            Arc::clone(&fs_lock),
        )
    });

    let results: Vec<Option<PathBuf>> = stream::iter(tasks)
        .buffer_unordered(config.worker_count.max(1))
        .collect()
        .await;

    Ok(results.into_iter().flatten().collect())
}

async fn run_one_segment(
    job: SegmentJob,
    client: &CarolClient,
    catalog: &Catalog,
    config: &Config,
    progress: Arc<Mutex<Progress>>,
    pacing: Arc<Mutex<()>>,
    fs_lock: Arc<Mutex<()>>,
) -> Option<PathBuf> {
    let summary = rule_summary(&job.rule_set);

    {
        let _guard = pacing.lock().await;
        tokio::time::sleep(client.pacing_delay(RequestKind::Probe)).await;
    }

    let probe_payload = compiler::compile(
        &job.rule_set,
        catalog,
        config.probe_session_id,
        50,
        PayloadKind::Probe,
    );
    let probe = match client.probe(&probe_payload).await {
        Ok(p) => p,
        Err(e) => {
            warn!(segment = %summary, error = %e, "probe failed, skipping segment");
            decrement_total(&progress).await;
            return None;
        }
    };

    if probe.result_list_count == 0 {
        debug!(segment = %summary, "probe found nothing, skipping segment");
        decrement_total(&progress).await;
        return None;
    }
    if probe.max_result_count_reached {
        warn!(segment = %summary, "probe result count was capped by the server");
    }

    {
        let _guard = pacing.lock().await;
        tokio::time::sleep(client.pacing_delay(RequestKind::Export)).await;
    }

    let export_payload = compiler::compile(
        &job.rule_set,
        catalog,
        config.export_session_id,
        MAX_ONE_REQUEST,
        PayloadKind::Export,
    );
    let exported = match client.export(&export_payload).await {
        Ok(e) => e,
        Err(e) => {
            error!(segment = %summary, error = %e, "export request failed, skipping segment");
            return None;
        }
    };

    match extract_archive(&exported.bytes, &exported.filename, &summary, config, &fs_lock).await {
        Ok(path) => {
            let mut p = progress.lock().await;
            p.completed += 1;
            info!(segment = %summary, completed = p.completed, total = p.total, "segment done");
            Some(path)
        }
        Err(e) => {
            error!(segment = %summary, error = %e, "failed to extract export archive, skipping segment");
            None
        }
    }
}

async fn decrement_total(progress: &Arc<Mutex<Progress>>) {
    let mut p = progress.lock().await;
    if p.total > 0 {
        p.total -= 1;
    }
}

/// Writes the zip archive to `<output_dir>/<filename>.zip` (the server's
/// own `Content-Disposition` name), extracts it into
/// `<output_dir>/<summary>/` (the rule-summary name, so segments stay
/// distinguishable on disk even when two different filenames collide),
/// deletes the archive, and returns the path of the table it contained.
async fn extract_archive(
    bytes: &[u8],
    filename: &str,
    summary: &str,
    config: &Config,
    fs_lock: &Arc<Mutex<()>>,
) -> Result<PathBuf> {
    let _guard = fs_lock.lock().await;

    let output_dir = Path::new(&config.output_dir);
    let dir_name = sanitize_dir_name(summary);
    let segment_dir = output_dir.join(&dir_name);
    tokio::fs::create_dir_all(&segment_dir).await?;

    let archive_stem = sanitize_dir_name(filename.trim_end_matches(".zip"));
    let archive_path = output_dir.join(format!("{archive_stem}.zip"));
    tokio::fs::write(&archive_path, bytes).await?;

    let bytes = bytes.to_vec();
    let segment_dir_clone = segment_dir.clone();
    let extracted = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut first_path = None;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let Some(name) = file.enclosed_name().map(|p| p.to_path_buf()) else {
                continue;
            };
            let dest = segment_dir_clone.join(&name);
            if file.is_dir() {
                std::fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            std::io::copy(&mut file, &mut out)?;
            if first_path.is_none() {
                first_path = Some(dest);
            }
        }
        first_path.ok_or_else(|| {
            CarolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "export archive contained no files",
            ))
        })
    })
    .await
    .map_err(|e| CarolError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??;

    tokio::fs::remove_file(&archive_path).await.ok();
    Ok(extracted)
}

/// Human-readable summary of a rule set: used as both the segment's log
/// context and (sanitized) its output subdirectory name.
fn rule_summary(rule_set: &RuleSet) -> String {
    rule_set
        .rules
        .iter()
        .map(Rule::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
