//! Outbound alert delivery. Both sinks are best-effort: a failure is
//! logged and swallowed, never retried — the alert state machine has
//! already advanced by the time we get here, so retrying would just
//! re-deliver a stale message.

use aws_sdk_sns::Client as SnsClient;
use std::time::Duration;
use tracing::{error, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const SNS_SUBJECT_MAX: usize = 100;

pub async fn send_sns(client: &SnsClient, topic_arn: &str, subject: &str, message: &str) {
    let subject: String = subject.chars().take(SNS_SUBJECT_MAX).collect();
    let result = client
        .publish()
        .topic_arn(topic_arn)
        .subject(subject)
        .message(message)
        .send()
        .await;
    if let Err(e) = result {
        error!(error = %e, "SNS publish failed");
    }
}

pub async fn send_slack(webhook_url: &str, message: &str) {
    let client = match reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build webhook client");
            return;
        }
    };
    let payload = serde_json::json!({ "text": format!("```\n{message}\n```") });
    match client.post(webhook_url).json(&payload).send().await {
        Ok(resp) if !resp.status().is_success() => {
            warn!(status = %resp.status(), "webhook returned non-success status");
        }
        Err(e) => error!(error = %e, "webhook request failed"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_truncated_to_limit() {
        let long = "x".repeat(200);
        let truncated: String = long.chars().take(SNS_SUBJECT_MAX).collect();
        assert_eq!(truncated.len(), SNS_SUBJECT_MAX);
    }
}
