//! End-to-end exercises of [`carol_client::driver::query`] against a mocked
//! CAROL server: probe-only, empty-result, small-result single export, and
//! the AND-mode bracket crossing that collapses to zero segments.

use std::io::Write;
use std::time::Duration;

use carol_client::args::{AlwaysConfirm, Arg};
use carol_client::{driver, Catalog, Config};
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const CATALOG_JSON: &str = r#"
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

fn catalog() -> Catalog {
    Catalog::parse(CATALOG_JSON).unwrap()
}

fn fast_config(server: &MockServer, output_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.probe_url = format!("{}/probe", server.uri());
    config.export_url = format!("{}/export", server.uri());
    config.probe_pacing = Duration::ZERO;
    config.export_pacing = Duration::ZERO;
    config.output_dir = output_dir.display().to_string();
    config.worker_count = 2;
    config
}

fn probe_body(count: u64) -> serde_json::Value {
    serde_json::json!({ "ResultListCount": count, "MaxResultCountReached": false })
}

fn zip_with_one_csv(name: &str, contents: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    writer.start_file(name, options).unwrap();
    writer.write_all(contents.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn probe_only_query_reports_count_without_downloading() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(42)))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(&server, tmp.path());
    let cat = catalog();
    let args = vec![Arg::Tuple4(
        "HasSafetyRec".into(),
        "".into(),
        "is".into(),
        "Yes".into(),
    )];

    let outcome = driver::query(&args, true, false, &cat, &config, &AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(outcome.state, driver::State::Probed);
    assert_eq!(outcome.result_count, Some(42));
    assert!(outcome.aggregated_path.is_none());
}

#[tokio::test]
async fn zero_result_probe_skips_download_entirely() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(0)))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(&server, tmp.path());
    let cat = catalog();
    let args = vec![Arg::Tuple4(
        "HasSafetyRec".into(),
        "".into(),
        "is".into(),
        "No".into(),
    )];

    let outcome = driver::query(&args, true, true, &cat, &config, &AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(outcome.state, driver::State::Done);
    assert_eq!(outcome.result_count, Some(0));
    assert!(outcome.aggregated_path.is_none());
}

#[tokio::test]
async fn small_result_set_downloads_and_aggregates_one_table() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(10)))
        .mount(&server)
        .await;

    let archive = zip_with_one_csv("cases.csv", "id,title\n1,Engine failure\n");
    Mock::given(method("POST"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(&server, tmp.path());
    let cat = catalog();
    let args = vec![Arg::Tuple4(
        "HasSafetyRec".into(),
        "".into(),
        "is".into(),
        "Yes".into(),
    )];

    let outcome = driver::query(&args, true, true, &cat, &config, &AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(outcome.result_count, Some(10));
    assert!(matches!(
        outcome.state,
        driver::State::Aggregated | driver::State::SingleExport
    ));
    let aggregated = outcome.aggregated_path.expect("expected an aggregated table");
    let contents = std::fs::read_to_string(&aggregated).unwrap();
    assert!(contents.contains("Engine failure"));
}

#[tokio::test]
async fn and_mode_key_bracket_crossing_bounds_produces_no_segments() {
    let server = MockServer::start().await;
    // Large enough to force partitioning; the two explicit Event.ID bounds
    // cross (lower bound above the upper bound), so the AND key-range
    // algebra yields an empty segment list and the query must stop clean
    // without ever touching the export endpoint.
    Mock::given(method("POST"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(5000)))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(&server, tmp.path());
    let cat = catalog();
    let args = vec![
        Arg::Tuple4("Event".into(), "ID".into(), "is greater than".into(), "193455".into()),
        Arg::Tuple4("Event".into(), "ID".into(), "is less than".into(), "3334".into()),
    ];

    let outcome = driver::query(&args, true, true, &cat, &config, &AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(outcome.state, driver::State::Done);
    assert!(outcome.aggregated_path.is_none());
}

/// Matches a probe/export request body by whether it mentions `Event.ID`,
/// letting one mock respond differently to the OR algebra's hot segments
/// (which carry a key bound) and its complement segments (which don't).
struct MentionsEventId(bool);

impl Match for MentionsEventId {
    fn matches(&self, request: &Request) -> bool {
        String::from_utf8_lossy(&request.body).contains("Event.ID") == self.0
    }
}

#[tokio::test]
async fn or_mode_complement_segments_carry_no_event_id_rule() {
    let server = MockServer::start().await;

    // Every probe whose body mentions Event.ID is a hot segment (or the
    // AND-mode bracket-crossing test above, which never reaches this one).
    // Respond zero so none of the ~500 hot segments this bound produces ever
    // reach the export endpoint — only the correctness of their probe
    // payload matters here, not their result.
    Mock::given(method("POST"))
        .and(path("/probe"))
        .and(MentionsEventId(true))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(0)))
        .mount(&server)
        .await;

    // Everything else hitting /probe is either the initial general-only
    // probe or a complement segment's probe (the two are byte-identical,
    // since a complement job's rule set is exactly `general_constraints`).
    // Respond above the ceiling so the query partitions, and above zero so
    // the complement segments proceed to export.
    Mock::given(method("POST"))
        .and(path("/probe"))
        .and(MentionsEventId(false))
        .respond_with(ResponseTemplate::new(200).set_body_json(probe_body(5000)))
        .mount(&server)
        .await;

    let archive = zip_with_one_csv("cases.csv", "id,title\n1,Gear collapse\n");
    Mock::given(method("POST"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let mut config = fast_config(&server, tmp.path());
    config.worker_count = 32;
    let cat = catalog();
    // A single explicit key bound whose hot range (0..=199599, ~499
    // segments) dwarfs its complement (199600..=200000, 2 segments) so the
    // complement side of the fan-out stays cheap to exercise, while the
    // general constraint is the one every complement segment must rely on.
    let args = vec![
        Arg::Tuple4("Event".into(), "ID".into(), "is less than".into(), "199600".into()),
        Arg::Tuple4("HasSafetyRec".into(), "".into(), "is".into(), "Yes".into()),
    ];

    let outcome = driver::query(&args, false, true, &cat, &config, &AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(outcome.result_count, Some(5000));
    assert!(matches!(
        outcome.state,
        driver::State::Aggregated | driver::State::SingleExport
    ));

    let requests = server.received_requests().await.unwrap();
    let export_bodies: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/export")
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect();

    assert_eq!(export_bodies.len(), 2, "both complement segments should export");
    for body in &export_bodies {
        assert!(
            !body.contains("Event.ID"),
            "complement segment export payload must carry only general constraints: {body}"
        );
        assert!(body.contains("HasSafetyRec"));
    }
}
