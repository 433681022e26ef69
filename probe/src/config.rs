use serde::Serialize;
use std::env;
use tracing::warn;

/// Resolved runtime configuration: environment variables first, with CLI
/// flags (see `main`) layered on top. Every field has a default, so a
/// missing or unparsable value is logged once at startup and never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub workers: usize,
    pub sample_rate: f64,
    pub sns_topic_arn: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub alert_threshold_bps: f64,
    pub alert_threshold_pps: f64,
    pub alert_cooldown_sec: f64,
    pub alert_host_bps: f64,
    pub alert_host_pps: f64,
    pub aws_region: Option<String>,
    pub vpc_id: Option<String>,
    pub log_level: String,
}

const MIN_SAMPLE_RATE: f64 = 0.0001;
const MAX_SAMPLE_RATE: f64 = 1.0;

impl Config {
    /// Load from environment variables, falling back to defaults with a
    /// warning on any unparsable value.
    pub fn from_env() -> Self {
        Self {
            workers: env_parsed("PROBE_WORKERS", default_workers()),
            sample_rate: env_parsed::<f64>("PROBE_SAMPLE_RATE", 1.0)
                .clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE),
            sns_topic_arn: env_string("SNS_TOPIC_ARN"),
            slack_webhook_url: env_string("SLACK_WEBHOOK_URL"),
            alert_threshold_bps: env_parsed("ALERT_THRESHOLD_BPS", 1e9),
            alert_threshold_pps: env_parsed("ALERT_THRESHOLD_PPS", 1e6),
            alert_cooldown_sec: env_parsed("ALERT_COOLDOWN_SEC", 300.0),
            alert_host_bps: env_parsed("ALERT_HOST_BPS", 0.0),
            alert_host_pps: env_parsed("ALERT_HOST_PPS", 0.0),
            aws_region: env_string("AWS_REGION"),
            vpc_id: env_string("VPC_ID"),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Apply CLI overrides, which win over both environment and defaults.
    pub fn apply_overrides(
        &mut self,
        workers: Option<usize>,
        sample_rate: Option<f64>,
        log_level: Option<String>,
    ) {
        if let Some(w) = workers {
            self.workers = w;
        }
        if let Some(r) = sample_rate {
            self.sample_rate = r.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        }
        if let Some(l) = log_level {
            self.log_level = l;
        }
        if self.workers == 0 {
            self.workers = default_workers();
        }
    }

    pub fn into_alert_thresholds(&self) -> vxprobe_core::alert::Thresholds {
        vxprobe_core::alert::Thresholds {
            bps: self.alert_threshold_bps,
            pps: self.alert_threshold_pps,
            host_bps: self.alert_host_bps,
            host_pps: self.alert_host_pps,
            cooldown_sec: self.alert_cooldown_sec,
        }
    }

    /// Render with secrets redacted, for `--print-config`.
    pub fn redacted_json(&self) -> String {
        let mut redacted = self.clone();
        redacted.slack_webhook_url = redacted.slack_webhook_url.map(|_| "<redacted>".into());
        redacted.sns_topic_arn = redacted.sns_topic_arn.map(|_| "<redacted>".into());
        serde_json::to_string_pretty(&redacted).unwrap_or_else(|_| "{}".into())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "unparsable environment variable, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_clamps_to_valid_range() {
        let mut cfg = Config::from_env();
        cfg.apply_overrides(None, Some(5.0), None);
        assert_eq!(cfg.sample_rate, MAX_SAMPLE_RATE);
        cfg.apply_overrides(None, Some(0.0), None);
        assert_eq!(cfg.sample_rate, MIN_SAMPLE_RATE);
    }

    #[test]
    fn zero_worker_override_falls_back_to_auto() {
        let mut cfg = Config::from_env();
        cfg.apply_overrides(Some(0), None, None);
        assert!(cfg.workers >= 1);
    }

    #[test]
    fn redacted_json_hides_webhook_and_topic() {
        let mut cfg = Config::from_env();
        cfg.slack_webhook_url = Some("https://hooks.example/secret".into());
        cfg.sns_topic_arn = Some("arn:aws:sns:us-east-1:1:topic".into());
        let json = cfg.redacted_json();
        assert!(!json.contains("secret"));
        assert!(!json.contains("arn:aws:sns"));
    }
}
