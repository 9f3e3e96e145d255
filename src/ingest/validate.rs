use crate::ingest::metric::{Metric, MetricBatch};

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Longest accepted metric name, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Batch-level admission failures. The `Display` strings are the HTTP error
/// bodies clients see.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Batch cannot be empty")]
    EmptyBatch,

    #[error("Batch size exceeds maximum (1000 metrics)")]
    BatchTooLarge,

    #[error("Invalid metric: {0}")]
    Metric(#[from] MetricError),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MetricError {
    #[error("Metric name cannot be empty")]
    EmptyName,

    #[error("Metric name too long (max 255 bytes)")]
    NameTooLong,

    #[error("Metric value must be a finite number")]
    NonFiniteValue,
}

pub fn validate_metric(metric: &Metric) -> Result<(), MetricError> {
    if metric.name.is_empty() {
        return Err(MetricError::EmptyName);
    }
    if metric.name.len() > MAX_NAME_BYTES {
        return Err(MetricError::NameTooLong);
    }
    if !metric.value.is_finite() {
        return Err(MetricError::NonFiniteValue);
    }
    Ok(())
}

/// Validate cardinality first, then every metric in order; the first failure
/// wins.
pub fn validate_batch(batch: &MetricBatch) -> Result<(), ValidationError> {
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if batch.len() > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchTooLarge);
    }
    for metric in &batch.metrics {
        validate_metric(metric)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::metric::MetricKind;
    use std::collections::BTreeMap;

    fn metric(name: &str, value: f64) -> Metric {
        Metric {
            name: name.to_string(),
            value,
            kind: MetricKind::Gauge,
            tags: BTreeMap::new(),
        }
    }

    fn batch_of(metrics: Vec<Metric>) -> MetricBatch {
        MetricBatch { metrics }
    }

    #[test]
    fn test_valid_batch_passes() {
        let batch = batch_of(vec![metric("cpu", 1.0), metric("mem", -2.5)]);
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert_eq!(
            validate_batch(&batch_of(vec![])),
            Err(ValidationError::EmptyBatch)
        );
    }

    #[test]
    fn test_oversized_batch_is_rejected() {
        let batch = batch_of((0..=MAX_BATCH_SIZE).map(|i| metric(&format!("m{}", i), 1.0)).collect());
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(err, ValidationError::BatchTooLarge);
        assert!(err.to_string().contains("Batch size exceeds maximum"));
    }

    #[test]
    fn test_batch_at_limit_passes() {
        let batch = batch_of((0..MAX_BATCH_SIZE).map(|i| metric(&format!("m{}", i), 1.0)).collect());
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert_eq!(validate_metric(&metric("", 1.0)), Err(MetricError::EmptyName));
    }

    #[test]
    fn test_name_length_boundary() {
        assert!(validate_metric(&metric(&"n".repeat(MAX_NAME_BYTES), 1.0)).is_ok());
        assert_eq!(
            validate_metric(&metric(&"n".repeat(MAX_NAME_BYTES + 1), 1.0)),
            Err(MetricError::NameTooLong)
        );
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                validate_metric(&metric("x", value)),
                Err(MetricError::NonFiniteValue)
            );
        }
    }

    #[test]
    fn test_batch_error_message_names_the_metric_failure() {
        let batch = batch_of(vec![metric("ok", 1.0), metric("", 1.0)]);
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid metric: Metric name cannot be empty"
        );
    }
}
