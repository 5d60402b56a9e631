//! Thin CLI front-end for the `carol_client` library: just enough of a
//! binary to exercise the library end-to-end, not a full-featured
//! operator tool.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;

use carol_client::args::{Arg, ProseConfirmation};
use carol_client::{driver, Catalog, Config};

/// Queries the NTSB CAROL aviation-safety case database.
#[derive(Parser)]
#[command(name = "carol-client")]
#[command(about = "Query planner and parallel execution engine for the NTSB CAROL case database")]
struct Cli {
    /// A query rule, either a bare phrase (`"engine fire"`, `"is after 2020-01-01"`)
    /// or explicit `field=...,subfield=...,condition=...,value=...` (subfield may be
    /// left empty). Repeatable.
    #[arg(long = "rule", required = true)]
    rules: Vec<String>,

    /// Join rules with OR instead of the default AND.
    #[arg(long)]
    any: bool,

    /// Fan out and download the full result set instead of just counting it.
    #[arg(long)]
    download: bool,

    /// Path to the catalog fixture (`possible_values.json`-shaped).
    #[arg(long, default_value = "possible_values.json")]
    config: String,

    /// Emit structured JSON logs instead of the default compact format.
    #[arg(long)]
    json_logs: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let catalog = Catalog::load(&cli.config)
        .with_context(|| format!("loading catalog from {:?}", cli.config))?;
    let args: Vec<Arg> = cli
        .rules
        .iter()
        .map(|raw| parse_rule_arg(raw))
        .collect::<Result<_>>()?;

    let config = Config::default();
    let confirm: Box<dyn ProseConfirmation> = Box::new(StdinConfirm);

    let outcome = driver::query(&args, !cli.any, cli.download, &catalog, &config, confirm.as_ref())
        .await
        .map_err(|e| anyhow!(e))?;

    info!(state = ?outcome.state, "query complete");
    match outcome.result_count {
        Some(n) => println!("{n} matching records"),
        None => println!("query complete"),
    }
    if let Some(path) = outcome.aggregated_path {
        println!("aggregated table written to {}", path.display());
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt().with_env_filter(format!("carol_client={level}"));
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Parses one `--rule` value into an [`Arg`]: a `key=value,...` list if it
/// looks like one, a bare phrase otherwise.
fn parse_rule_arg(raw: &str) -> Result<Arg> {
    if !raw.contains('=') {
        return Ok(Arg::Tuple1(raw.to_string()));
    }

    let mut parts: HashMap<&str, &str> = HashMap::new();
    for segment in raw.split(',') {
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed --rule segment {segment:?}, expected key=value"))?;
        parts.insert(key.trim(), value.trim());
    }

    let field = parts
        .get("field")
        .ok_or_else(|| anyhow!("--rule with '=' must set field=..."))?;
    let condition = parts
        .get("condition")
        .ok_or_else(|| anyhow!("--rule with '=' must set condition=..."))?;
    let value = parts
        .get("value")
        .ok_or_else(|| anyhow!("--rule with '=' must set value=..."))?;
    let subfield = parts.get("subfield").copied().unwrap_or("");

    Ok(Arg::Tuple4(
        field.to_string(),
        subfield.to_string(),
        condition.to_string(),
        value.to_string(),
    ))
}

/// Prompts on stdin for confirmation of an ambiguous free-text argument.
struct StdinConfirm;

impl ProseConfirmation for StdinConfirm {
    fn confirm_free_text(&self, text: &str) -> bool {
        use std::io::{self, Write};

        print!("\"{text}\" reads like free text, not a condition. Search narratives for it? [y/N] ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
