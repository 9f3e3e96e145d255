use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Metric kind as carried on the wire.
///
/// Decoding is forgiving: a missing or unrecognized `type` string becomes
/// `Gauge`. Encoding always produces the lowercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    Counter,
    #[default]
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }

    fn from_wire(s: &str) -> Self {
        match s {
            "counter" => MetricKind::Counter,
            "histogram" => MetricKind::Histogram,
            "summary" => MetricKind::Summary,
            _ => MetricKind::Gauge,
        }
    }
}

impl Serialize for MetricKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MetricKind::from_wire(&s))
    }
}

/// One measurement in a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type", default)]
    pub kind: MetricKind,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// An ordered batch of metrics, created per HTTP request.
///
/// The batch has no identity of its own; identity is assigned on admission
/// to the log as `(partition, offset)`. Unknown top-level fields in the
/// request body are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricBatch {
    pub metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Serialize the batch into the log payload:
    /// `{"batch_timestamp":"<ms-since-epoch>","metrics":[...]}`.
    /// `batch_timestamp` is a string; `tags` are included when non-empty.
    pub fn to_log_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        let batch_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();
        serde_json::to_vec(&LogRecord {
            batch_timestamp,
            metrics: self
                .metrics
                .iter()
                .map(|metric| LogMetric {
                    name: &metric.name,
                    value: metric.value,
                    kind: metric.kind,
                    tags: &metric.tags,
                })
                .collect(),
        })
    }
}

#[derive(Serialize)]
struct LogRecord<'a> {
    batch_timestamp: String,
    metrics: Vec<LogMetric<'a>>,
}

#[derive(Serialize)]
struct LogMetric<'a> {
    name: &'a str,
    value: f64,
    #[serde(rename = "type")]
    kind: MetricKind,
    #[serde(skip_serializing_if = "tags_are_empty")]
    tags: &'a BTreeMap<String, String>,
}

fn tags_are_empty(tags: &&BTreeMap<String, String>) -> bool {
    tags.is_empty()
}
