// retry.rs

use log::*;

use crate::*;

/// Uniform bounded-retry parameters applied to every sensor read.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Wraps channel reads with bounded retry. Exhaustion yields a missing
/// reading, never an error: one glitchy sensor must not stall the cycle.
pub struct RetryingReader {
    policy: RetryPolicy,
    diag: DiagnosticsChannel,
}

impl RetryingReader {
    pub fn new(policy: RetryPolicy, diag: DiagnosticsChannel) -> Self {
        RetryingReader { policy, diag }
    }

    /// One reading for one channel. Emits a diagnostic event per failed
    /// attempt; callers must treat `None` as a valid outcome.
    pub async fn read(&self, channel: &mut Channel) -> Reading {
        let mut attempt = 0u32;
        loop {
            match channel.source.sample().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    attempt += 1;
                    warn!(
                        "{} reading failed (attempt {attempt}): {e}",
                        channel.kind.name()
                    );
                    self.diag
                        .emit(format!(
                            "{} reading failed on attempt {attempt}",
                            channel.kind.name()
                        ))
                        .await;
                    if attempt > self.policy.max_retries {
                        return None;
                    }
                    sleep(self.policy.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures_left: u32,
        value: f64,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl SampleSource for FlakySource {
        async fn sample(&mut self) -> Result<f64, SampleError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SampleError::NoReading);
            }
            Ok(self.value)
        }
    }

    fn reader_with_probe() -> (RetryingReader, PublishClient) {
        let client = PublishClient::new(PublishConfig {
            sensor_id: "1".into(),
            info_topic: "sensors/info".into(),
            queue_capacity: 64,
            drain_rate: 4,
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_secs(1),
            backoff: Backoff {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(8),
                multiplier: 2,
            },
        });
        let diag = DiagnosticsChannel::new(client.clone(), "1", "sensors/info");
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay: Duration::ZERO,
        };
        (RetryingReader::new(policy, diag), client)
    }

    fn flaky_channel(failures_left: u32, value: f64) -> (Channel, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let channel = Channel::new(
            ChannelKind::Humidity,
            Box::new(FlakySource {
                failures_left,
                value,
                attempts: attempts.clone(),
            }),
        );
        (channel, attempts)
    }

    #[tokio::test]
    async fn exhausted_retries_yield_missing() {
        let (mut channel, attempts) = flaky_channel(u32::MAX, 0.0);
        let (reader, client) = reader_with_probe();

        let reading = reader.read(&mut channel).await;

        assert_eq!(reading, None);
        assert_eq!(attempts.load(Ordering::Relaxed), 6);
        // one diagnostic per failed attempt
        assert_eq!(client.queue_depth().await, 6);
    }

    #[tokio::test]
    async fn success_on_fourth_attempt_stops_retrying() {
        let (mut channel, attempts) = flaky_channel(3, 55.2);
        let (reader, client) = reader_with_probe();

        let reading = reader.read(&mut channel).await;

        assert_eq!(reading, Some(55.2));
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        assert_eq!(client.queue_depth().await, 3);
    }

    #[tokio::test]
    async fn first_try_success_is_quiet() {
        let (mut channel, attempts) = flaky_channel(0, 42.0);
        let (reader, client) = reader_with_probe();

        let reading = reader.read(&mut channel).await;

        assert_eq!(reading, Some(42.0));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(client.queue_depth().await, 0);
    }
}

// EOF
