// publish.rs

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use log::*;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout};

use crate::*;

/// Delivery guarantee for one outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Held in flight until the broker acknowledges the message id.
    AtLeastOnce,
}

#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub mid: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the wire must provide. The broker protocol itself lives behind
/// this seam: deployment uses TcpLink, tests script it.
#[async_trait]
pub trait BrokerLink: Send {
    async fn connect(&mut self) -> Result<(), LinkError>;
    async fn publish(&mut self, msg: &OutboundMessage) -> Result<(), LinkError>;
    /// Resolves with the next acknowledged message id. Pends while the
    /// broker has nothing to say; fails when the link dies.
    async fn next_ack(&mut self) -> Result<u32, LinkError>;
    async fn disconnect(&mut self);
}

/// Reconnect delay schedule: base * multiplier^attempt, capped.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub multiplier: u32,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.base;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.multiplier);
            if delay >= self.cap {
                return self.cap;
            }
        }
        delay.min(self.cap)
    }
}

#[derive(Clone, Debug)]
pub struct PublishConfig {
    pub sensor_id: String,
    pub info_topic: String,
    pub queue_capacity: usize,
    pub drain_rate: u32,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
    pub backoff: Backoff,
}

struct ClientShared {
    cfg: PublishConfig,
    queue: Mutex<VecDeque<OutboundMessage>>,
    wakeup: Notify,
    state: RwLock<ConnectionState>,
    next_mid: AtomicU32,
    inflight: Mutex<HashMap<u32, Instant>>,
}

/// Cloneable handle to the publish pipeline. `publish` never blocks on the
/// network; `run` owns the broker link and is driven as its own task so a
/// stalled link cannot stall sampling.
#[derive(Clone)]
pub struct PublishClient {
    shared: Arc<ClientShared>,
}

impl PublishClient {
    pub fn new(cfg: PublishConfig) -> Self {
        PublishClient {
            shared: Arc::new(ClientShared {
                cfg,
                queue: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                next_mid: AtomicU32::new(0),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn queue_depth(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    /// Commit a message to the outbound queue and wake the drain loop.
    /// At capacity the single oldest queued message is evicted. A
    /// diagnostic that arrives at a full queue is dropped itself, so
    /// failure reporting gets exactly one layer and cannot recurse.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> u32 {
        let mid = self.shared.next_mid.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = OutboundMessage {
            topic: topic.to_string(),
            payload,
            qos,
            mid,
        };
        let is_diag = topic == self.shared.cfg.info_topic;

        let mut evicted = None;
        {
            let mut queue = self.shared.queue.lock().await;
            if queue.len() >= self.shared.cfg.queue_capacity {
                if is_diag {
                    debug!("outbound queue full, dropping diagnostic event {mid}");
                    return mid;
                }
                evicted = queue.pop_front();
            }
            queue.push_back(msg);
        }
        self.shared.wakeup.notify_one();

        if let Some(old) = evicted {
            warn!(
                "outbound queue full, dropped oldest message {} on {}",
                old.mid, old.topic
            );
            self.emit_diag(format!(
                "outbound queue full, dropped oldest message {}",
                old.mid
            ))
            .await;
        }
        mid
    }

    /// Broker acknowledged a QoS-1 message.
    pub async fn on_acknowledge(&self, mid: u32) {
        if self.shared.inflight.lock().await.remove(&mid).is_some() {
            debug!("message {mid} acknowledged");
        } else {
            debug!("ignoring unexpected acknowledgement for message {mid}");
        }
    }

    /// Drive the connection forever: connect with a bounded timeout, drain
    /// the queue, track acknowledgements, back off and reconnect on any
    /// link fault. Backoff caps but never stops.
    pub async fn run<L: BrokerLink>(&self, mut link: L) -> anyhow::Result<()> {
        let mut attempt = 0u32;
        loop {
            self.set_state(ConnectionState::Connecting, "connecting to broker")
                .await;
            let connected = match timeout(self.shared.cfg.connect_timeout, link.connect()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(LinkError::ConnectTimeout),
            };
            match connected {
                Ok(()) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected, "broker connected")
                        .await;
                }
                Err(e) => {
                    self.set_state(
                        ConnectionState::Disconnected,
                        &format!("broker connect failed: {e}"),
                    )
                    .await;
                    let delay = self.shared.cfg.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!("broker connect failed: {e}, retrying in {delay:?}");
                    sleep(delay).await;
                    continue;
                }
            }

            if let Err(e) = self.serve(&mut link).await {
                error!("broker link lost: {e}");
            }
            link.disconnect().await;
            self.set_state(ConnectionState::Disconnected, "broker link lost")
                .await;
        }
    }

    // Connected steady state: pop oldest-first and transmit, register QoS-1
    // messages in flight, consume acknowledgements, sweep expired waits.
    // Popping and eviction serialize on the queue lock, which is never held
    // across an await of the link.
    async fn serve<L: BrokerLink>(&self, link: &mut L) -> Result<(), LinkError> {
        let send_gap = Duration::from_millis(1000 / u64::from(self.shared.cfg.drain_rate).max(1));
        loop {
            self.sweep_expired().await;

            let next = self.shared.queue.lock().await.pop_front();
            match next {
                Some(msg) => {
                    if let Err(e) = link.publish(&msg).await {
                        self.requeue_front(msg).await;
                        return Err(e);
                    }
                    if msg.qos == QoS::AtLeastOnce {
                        self.shared
                            .inflight
                            .lock()
                            .await
                            .insert(msg.mid, Instant::now());
                    }
                    trace!("sent message {} on {}", msg.mid, msg.topic);

                    // pace the drain while a backlog remains, consuming
                    // acknowledgements in the meantime
                    if self.queue_depth().await > 0 {
                        let gap = sleep(send_gap);
                        tokio::pin!(gap);
                        loop {
                            tokio::select! {
                                _ = &mut gap => break,
                                ack = link.next_ack() => self.on_acknowledge(ack?).await,
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.shared.wakeup.notified() => {}
                        ack = link.next_ack() => self.on_acknowledge(ack?).await,
                        _ = sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }

    // A message that failed to transmit goes back to the front so FIFO
    // order survives the reconnect. If the queue refilled meanwhile it is
    // the oldest entry and drop-oldest applies to it.
    async fn requeue_front(&self, msg: OutboundMessage) {
        let mut queue = self.shared.queue.lock().await;
        if queue.len() < self.shared.cfg.queue_capacity {
            queue.push_front(msg);
        } else {
            warn!("outbound queue full, dropped unsent message {}", msg.mid);
        }
    }

    // QoS-1 messages whose acknowledgement never arrived are failed and
    // forgotten; the next cycle's data supersedes them.
    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut inflight = self.shared.inflight.lock().await;
            inflight.retain(|mid, sent| {
                if now.duration_since(*sent) >= self.shared.cfg.op_timeout {
                    expired.push(*mid);
                    false
                } else {
                    true
                }
            });
        }
        for mid in expired {
            warn!("message {mid} was never acknowledged, giving up on it");
            self.emit_diag(format!(
                "message {mid} not acknowledged within {}s",
                self.shared.cfg.op_timeout.as_secs()
            ))
            .await;
        }
    }

    async fn set_state(&self, state: ConnectionState, info: &str) {
        {
            let mut current = self.shared.state.write().await;
            if *current == state {
                return;
            }
            *current = state;
        }
        info!("connection state: {state:?} ({info})");
        self.emit_diag(info.to_string()).await;
    }

    // Diagnostics emitted by the pipeline itself. Same queue as everything
    // else, but enqueueing here never evicts: a diagnostic that does not
    // fit is dropped, closing the recursion loop after one layer.
    async fn emit_diag(&self, info: String) {
        let event = DiagnosticEvent {
            sensor: self.shared.cfg.sensor_id.clone(),
            timestamp: local_timestamp(),
            info,
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("could not encode diagnostic event: {e}");
                return;
            }
        };
        let mid = self.shared.next_mid.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = OutboundMessage {
            topic: self.shared.cfg.info_topic.clone(),
            payload,
            qos: QoS::AtMostOnce,
            mid,
        };
        {
            let mut queue = self.shared.queue.lock().await;
            if queue.len() >= self.shared.cfg.queue_capacity {
                debug!("outbound queue full, dropping diagnostic event {mid}");
                return;
            }
            queue.push_back(msg);
        }
        self.shared.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(queue_capacity: usize) -> PublishConfig {
        PublishConfig {
            sensor_id: "1".into(),
            info_topic: "sensors/info".into(),
            queue_capacity,
            drain_rate: 10,
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
            backoff: Backoff {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(128),
                multiplier: 2,
            },
        }
    }

    struct MockLink {
        refuse_connects: u32,
        auto_ack: bool,
        published: Arc<Mutex<Vec<OutboundMessage>>>,
        acks: Arc<Mutex<VecDeque<u32>>>,
    }

    impl MockLink {
        fn new(refuse_connects: u32, auto_ack: bool) -> (Self, Arc<Mutex<Vec<OutboundMessage>>>) {
            let published = Arc::new(Mutex::new(Vec::new()));
            let link = MockLink {
                refuse_connects,
                auto_ack,
                published: published.clone(),
                acks: Arc::new(Mutex::new(VecDeque::new())),
            };
            (link, published)
        }
    }

    #[async_trait]
    impl BrokerLink for MockLink {
        async fn connect(&mut self) -> Result<(), LinkError> {
            if self.refuse_connects > 0 {
                self.refuse_connects -= 1;
                return Err(LinkError::Io(std::io::ErrorKind::ConnectionRefused.into()));
            }
            Ok(())
        }

        async fn publish(&mut self, msg: &OutboundMessage) -> Result<(), LinkError> {
            self.published.lock().await.push(msg.clone());
            if self.auto_ack && msg.qos == QoS::AtLeastOnce {
                self.acks.lock().await.push_back(msg.mid);
            }
            Ok(())
        }

        async fn next_ack(&mut self) -> Result<u32, LinkError> {
            loop {
                if let Some(mid) = self.acks.lock().await.pop_front() {
                    return Ok(mid);
                }
                sleep(Duration::from_millis(5)).await;
            }
        }

        async fn disconnect(&mut self) {}
    }

    #[test]
    fn backoff_delays_grow_and_cap() {
        let backoff = Backoff {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(128),
            multiplier: 2,
        };
        let secs: Vec<u64> = (0..10).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128, 128, 128]);
    }

    #[tokio::test]
    async fn overflow_evicts_exactly_the_oldest() {
        let client = PublishClient::new(test_config(3));
        for _ in 0..4 {
            client
                .publish("sensors/data", b"{}".to_vec(), QoS::AtLeastOnce)
                .await;
        }

        let queue = client.shared.queue.lock().await;
        let mids: Vec<u32> = queue.iter().map(|m| m.mid).collect();
        assert_eq!(mids, vec![2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_drains_in_fifo_order() {
        let client = PublishClient::new(test_config(8));
        for payload in [b"m1", b"m2", b"m3"] {
            client
                .publish("sensors/data", payload.to_vec(), QoS::AtLeastOnce)
                .await;
        }

        let (link, published) = MockLink::new(2, true);
        let runner = client.clone();
        tokio::spawn(async move { runner.run(link).await });

        timeout(Duration::from_secs(600), async {
            loop {
                let data: Vec<Vec<u8>> = published
                    .lock()
                    .await
                    .iter()
                    .filter(|m| m.topic == "sensors/data")
                    .map(|m| m.payload.clone())
                    .collect();
                if data.len() == 3 {
                    assert_eq!(data, vec![b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]);
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages were not drained");

        timeout(Duration::from_secs(600), async {
            loop {
                if client.shared.inflight.lock().await.is_empty()
                    && client.queue_depth().await == 0
                {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("acknowledgements were not consumed");

        assert_eq!(client.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_messages_expire_without_retry() {
        let client = PublishClient::new(test_config(8));
        let (link, published) = MockLink::new(0, false);
        let runner = client.clone();
        tokio::spawn(async move { runner.run(link).await });

        client
            .publish("sensors/data", b"m1".to_vec(), QoS::AtLeastOnce)
            .await;

        timeout(Duration::from_secs(600), async {
            loop {
                if published
                    .lock()
                    .await
                    .iter()
                    .any(|m| m.topic == "sensors/data")
                {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("message was never sent");

        timeout(Duration::from_secs(600), async {
            loop {
                if client.shared.inflight.lock().await.is_empty() {
                    break;
                }
                sleep(Duration::from_millis(250)).await;
            }
        })
        .await
        .expect("in-flight entry was not swept");

        let sends = published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == "sensors/data")
            .count();
        assert_eq!(sends, 1);
    }
}

// EOF
