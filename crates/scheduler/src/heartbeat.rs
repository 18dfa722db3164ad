//! Liveness Heartbeat

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodic GET against a push-style uptime monitor
pub struct Heartbeat {
    client: reqwest::Client,
    url: String,
    period: Duration,
}

impl Heartbeat {
    pub fn new(url: impl Into<String>, period: Duration, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
            period,
        })
    }

    /// Send one heartbeat; failures are logged and reported as `false`
    pub async fn beat(&self) -> bool {
        let result = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                info!(status = "ok", "Heartbeat");
                true
            }
            Err(e) => {
                error!(error = %e, "Heartbeat failed");
                false
            }
        }
    }

    /// Beat immediately, then every period until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.beat().await;
                }
            }
        }
        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_beat_hits_push_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/push/abc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let heartbeat = Heartbeat::new(
            format!("{}/api/push/abc", server.uri()),
            Duration::from_secs(120),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(heartbeat.beat().await);
    }

    #[tokio::test]
    async fn test_beat_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let heartbeat = Heartbeat::new(server.uri(), Duration::from_secs(120), Duration::from_secs(2)).unwrap();
        assert!(!heartbeat.beat().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let heartbeat = Heartbeat::new(server.uri(), Duration::from_millis(20), Duration::from_secs(2)).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        task.await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert!(received.len() >= 2);
    }
}
