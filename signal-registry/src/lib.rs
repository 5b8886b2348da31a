use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Canonical health sample every inbound telemetry adapter must produce.
/// Counters are per reporting interval, latency is the interval's p95 in ms.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalSampleV1 {
    pub schema: String,
    pub service: String,
    pub environment: String,
    pub error_count: u64,
    pub request_count: u64,
    pub latency_p95_ms: f64,
    pub observed_at: String,
}

pub fn validate_sample_v1(sample: &CanonicalSampleV1) -> Result<(), String> {
    if sample.schema != "sample.v1" {
        return Err(format!("unsupported schema '{}'", sample.schema));
    }
    if sample.service.trim().is_empty() {
        return Err("service is required".into());
    }
    if sample.environment.trim().is_empty() {
        return Err("environment is required".into());
    }
    if sample.error_count > sample.request_count {
        return Err(format!(
            "error_count {} exceeds request_count {}",
            sample.error_count, sample.request_count
        ));
    }
    if !sample.latency_p95_ms.is_finite() || sample.latency_p95_ms < 0.0 {
        return Err(format!("invalid latency_p95_ms {}", sample.latency_p95_ms));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalSampleV1 {
        CanonicalSampleV1 {
            schema: "sample.v1".into(),
            service: "checkout".into(),
            environment: "prod".into(),
            error_count: 3,
            request_count: 200,
            latency_p95_ms: 420.0,
            observed_at: "1".into(),
        }
    }

    #[test]
    fn validates_sample_v1() {
        assert!(validate_sample_v1(&sample()).is_ok());
    }

    #[test]
    fn rejects_unknown_schema() {
        let mut s = sample();
        s.schema = "sample.v2".into();
        assert!(validate_sample_v1(&s).is_err());
    }

    #[test]
    fn rejects_errors_exceeding_requests() {
        let mut s = sample();
        s.error_count = 300;
        assert!(validate_sample_v1(&s).is_err());
    }

    #[test]
    fn rejects_negative_latency() {
        let mut s = sample();
        s.latency_p95_ms = -1.0;
        assert!(validate_sample_v1(&s).is_err());
    }
}
