//! End-to-end batch indexing through a configured indexer stack.

use std::io::Write;

use serial_test::serial;
use strindex_domain::indexer::static_strings::shared_string_id;
use strindex_domain::UseCaseKey;
use strindex_server::handlers::batch::{BatchOrchestrator, IndexedMetric, MetricBatch};
use strindex_server::{build_indexer, StrindexConfig};
use tempfile::NamedTempFile;

const BATCH: &str = r#"
{"org_id":1,"project_id":10,"name":"sentry.sessions.session","tags":{"release":"1.0.0","environment":"production"},"timestamp":1700000000,"type":"c","value":1.0}
{"org_id":1,"project_id":10,"name":"sentry.sessions.session","tags":{"release":"1.0.1"},"timestamp":1700000001,"type":"c","value":2.0}
{"org_id":2,"project_id":20,"name":"custom.metric","tags":{"region":"eu"},"timestamp":1700000002,"type":"d","value":[1,2,3]}
"#;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{yaml}").unwrap();
    file
}

#[tokio::test]
#[serial]
async fn test_batch_indexed_end_to_end_from_config_file() {
    let file = write_config(
        r#"
indexer:
  backend: mock
  use_case: release-health
cache:
  ttl_secs: 300
logging:
  level: warn
"#,
    );
    let config = StrindexConfig::load(file.path()).unwrap();
    let stack = build_indexer(&config).await.unwrap();
    assert_eq!(stack.use_case, UseCaseKey::ReleaseHealth);

    let orchestrator = BatchOrchestrator::new(stack.indexer.clone(), stack.use_case);
    let output = orchestrator
        .process(MetricBatch::from_json_lines(BATCH).unwrap())
        .await
        .unwrap();

    assert_eq!(output.metrics.len(), 3);
    assert_eq!(output.rate_limited, 0);

    let session_id = shared_string_id("sentry.sessions.session").unwrap();
    let release_id = shared_string_id("release").unwrap();
    let first = &output.metrics[0];
    assert_eq!(first.metric_id, session_id);
    assert!(first.tags.contains_key(&release_id));
    assert_eq!(
        first.tags[&shared_string_id("environment").unwrap()],
        shared_string_id("production").unwrap()
    );

    // "1.0.0" and "1.0.1" are distinct, org-scoped strings.
    assert_ne!(first.tags[&release_id], output.metrics[1].tags[&release_id]);

    let custom = &output.metrics[2];
    assert_eq!(custom.org_id, 2);
    assert_eq!(custom.mapping_meta["f"].len(), 3);

    // Output lines round-trip through JSON.
    for metric in &output.metrics {
        let line = serde_json::to_string(metric).unwrap();
        let back: IndexedMetric = serde_json::from_str(&line).unwrap();
        assert_eq!(&back, metric);
    }
}

#[tokio::test]
#[serial]
async fn test_second_batch_is_served_from_cache() {
    let config = StrindexConfig::default();
    let stack = build_indexer(&config).await.unwrap();
    let orchestrator = BatchOrchestrator::new(stack.indexer, stack.use_case);

    let first = orchestrator
        .process(MetricBatch::from_json_lines(BATCH).unwrap())
        .await
        .unwrap();
    let second = orchestrator
        .process(MetricBatch::from_json_lines(BATCH).unwrap())
        .await
        .unwrap();

    for (a, b) in first.metrics.iter().zip(&second.metrics) {
        assert_eq!(a.metric_id, b.metric_id);
        assert_eq!(a.tags, b.tags);
        assert!(!b.mapping_meta.contains_key("f"));
    }
    let custom = &second.metrics[2];
    assert_eq!(custom.mapping_meta["c"].len(), 3);
}
