//! Metric payloads and their indexed form.
//!
//! A [`MetricBatch`] is the [`BatchCodec`] for metric ingestion: metric names,
//! tag keys and tag values are interned per organization, and each payload is
//! rewritten with integer ids in place of those strings.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strindex_domain::{MappedResults, OrgStrings};
use tracing::warn;

use super::types::{BatchCodec, BatchError, BatchResult, FetchMetadata};

/// Longest metric name accepted.
pub const MAX_NAME_LENGTH: usize = 200;

/// Longest tag key accepted.
pub const MAX_TAG_KEY_LENGTH: usize = 200;

/// Longest tag value accepted.
pub const MAX_TAG_VALUE_LENGTH: usize = 200;

/// An incoming metric with string name and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub org_id: u64,
    pub project_id: u64,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: serde_json::Value,
}

/// A metric with its name and tags replaced by ids.
///
/// `mapping_meta` records, per fetch type code, which id stood for which
/// string: `{"c": {"12": "release"}, "f": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedMetric {
    pub org_id: u64,
    pub project_id: u64,
    pub metric_id: u64,
    pub tags: BTreeMap<u64, u64>,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: serde_json::Value,
    pub mapping_meta: BTreeMap<String, BTreeMap<String, String>>,
}

/// Output of [`MetricBatch::reconstruct_messages`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructedBatch {
    /// Indexed metrics, in input order.
    pub metrics: Vec<IndexedMetric>,
    /// Payloads dropped because a string was rate limited.
    pub rate_limited: usize,
    /// Payloads dropped by validation before indexing.
    pub invalid: usize,
}

/// A batch of validated metric payloads.
#[derive(Debug, Clone, Default)]
pub struct MetricBatch {
    payloads: Vec<MetricPayload>,
    invalid: usize,
}

impl MetricBatch {
    /// Builds a batch, dropping payloads that fail validation.
    pub fn new(payloads: Vec<MetricPayload>) -> Self {
        let mut invalid = 0;
        let payloads = payloads
            .into_iter()
            .enumerate()
            .filter_map(|(index, payload)| match validate_payload(index, &payload) {
                Ok(()) => Some(payload),
                Err(e) => {
                    warn!(org_id = payload.org_id, error = %e, "Dropping invalid metric payload");
                    invalid += 1;
                    None
                }
            })
            .collect();
        if invalid > 0 {
            metrics::counter!("strindex_metrics_dropped_total", "reason" => "invalid")
                .increment(invalid as u64);
        }
        Self { payloads, invalid }
    }

    /// Decodes one JSON payload per line. Blank lines are skipped.
    pub fn from_json_lines(input: &str) -> BatchResult<Self> {
        let mut payloads = Vec::new();
        for (index, line) in input.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let payload = serde_json::from_str(line).map_err(|e| BatchError::Decode {
                line: index + 1,
                message: e.to_string(),
            })?;
            payloads.push(payload);
        }
        Ok(Self::new(payloads))
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn payloads(&self) -> &[MetricPayload] {
        &self.payloads
    }

    /// Number of payloads dropped by validation.
    pub fn invalid(&self) -> usize {
        self.invalid
    }
}

fn validate_payload(index: usize, payload: &MetricPayload) -> BatchResult<()> {
    let invalid = |message: String| BatchError::InvalidPayload { index, message };

    if payload.name.is_empty() {
        return Err(invalid("metric name cannot be empty".to_string()));
    }
    if payload.name.len() > MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "metric name exceeds {MAX_NAME_LENGTH} characters"
        )));
    }
    for (key, value) in &payload.tags {
        if key.is_empty() || key.len() > MAX_TAG_KEY_LENGTH {
            return Err(invalid(format!(
                "tag key must be 1 to {MAX_TAG_KEY_LENGTH} characters"
            )));
        }
        if value.len() > MAX_TAG_VALUE_LENGTH {
            return Err(invalid(format!(
                "value of tag '{key}' exceeds {MAX_TAG_VALUE_LENGTH} characters"
            )));
        }
    }
    Ok(())
}

/// Looks up an id, failing if the indexer never saw the key.
fn lookup(mapping: &MappedResults, org_id: u64, string: &str) -> BatchResult<Option<u64>> {
    mapping
        .get(&org_id)
        .and_then(|strings| strings.get(string))
        .copied()
        .ok_or_else(|| BatchError::MissingMapping {
            org_id,
            string: string.to_string(),
        })
}

impl BatchCodec for MetricBatch {
    type Output = ReconstructedBatch;

    fn extract_strings(&self) -> OrgStrings {
        let mut strings = OrgStrings::new();
        for payload in &self.payloads {
            let org = strings.entry(payload.org_id).or_default();
            org.insert(payload.name.clone());
            for (key, value) in &payload.tags {
                org.insert(key.clone());
                org.insert(value.clone());
            }
        }
        strings
    }

    fn reconstruct_messages(
        self,
        mapping: &MappedResults,
        metadata: &FetchMetadata,
    ) -> BatchResult<ReconstructedBatch> {
        let mut output = ReconstructedBatch {
            metrics: Vec::with_capacity(self.payloads.len()),
            rate_limited: 0,
            invalid: self.invalid,
        };

        'payloads: for payload in self.payloads {
            let org_id = payload.org_id;
            let mut used: HashMap<&str, u64> = HashMap::new();

            let Some(metric_id) = lookup(mapping, org_id, &payload.name)? else {
                output.rate_limited += 1;
                continue;
            };
            used.insert(&payload.name, metric_id);

            let mut tags = BTreeMap::new();
            for (key, value) in &payload.tags {
                let (Some(key_id), Some(value_id)) =
                    (lookup(mapping, org_id, key)?, lookup(mapping, org_id, value)?)
                else {
                    output.rate_limited += 1;
                    continue 'payloads;
                };
                used.insert(key, key_id);
                used.insert(value, value_id);
                tags.insert(key_id, value_id);
            }

            let mut mapping_meta: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
            let org_meta = metadata.get(&org_id);
            for (string, id) in used {
                if let Some(meta) = org_meta.and_then(|m| m.get(string)) {
                    mapping_meta
                        .entry(meta.fetch_type.code().to_string())
                        .or_default()
                        .insert(id.to_string(), string.to_string());
                }
            }

            output.metrics.push(IndexedMetric {
                org_id,
                project_id: payload.project_id,
                metric_id,
                tags,
                timestamp: payload.timestamp,
                metric_type: payload.metric_type.clone(),
                value: payload.value.clone(),
                mapping_meta,
            });
        }

        if output.rate_limited > 0 {
            warn!(
                dropped = output.rate_limited,
                "Dropped metrics with rate limited strings"
            );
            metrics::counter!("strindex_metrics_dropped_total", "reason" => "rate_limited")
                .increment(output.rate_limited as u64);
        }

        Ok(output)
    }
}
