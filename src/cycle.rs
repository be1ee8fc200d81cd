// cycle.rs

use log::*;

use crate::*;

/// Orchestrates measurement cycles: timed sampling rounds across every
/// channel, per-channel trimmed-mean reduction, one summary record per
/// cycle handed to the publish pipeline.
pub struct CycleController {
    sensor_id: String,
    data_topic: String,
    cycle_length: usize,
    round_interval: Duration,
    cycle_pause: Duration,
    channels: Vec<ChannelSlot>,
    reader: RetryingReader,
    aggregator: TrimmedAggregator,
    client: PublishClient,
    diag: DiagnosticsChannel,
}

// A channel and its buffer for the cycle in progress. The buffer is
// cleared at cycle start and never grows past the cycle length.
struct ChannelSlot {
    channel: Channel,
    buffer: Vec<Reading>,
}

impl CycleController {
    pub fn new(
        config: &MyConfig,
        channels: Vec<Channel>,
        client: PublishClient,
        diag: DiagnosticsChannel,
    ) -> Result<Self, ConfigError> {
        let aggregator = TrimmedAggregator::new(config.trim, config.cycle_length)?;
        let reader = RetryingReader::new(config.retry_policy(), diag.clone());
        let cycle_length = config.cycle_length;
        Ok(CycleController {
            sensor_id: config.sensor_id.clone(),
            data_topic: config.data_topic.clone(),
            cycle_length,
            round_interval: Duration::from_secs(config.round_interval),
            cycle_pause: Duration::from_secs(config.cycle_pause),
            channels: channels
                .into_iter()
                .map(|channel| ChannelSlot {
                    channel,
                    buffer: Vec::with_capacity(cycle_length),
                })
                .collect(),
            reader,
            aggregator,
            client,
            diag,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let record = self.run_cycle().await;
            self.publish_record(&record).await;
            sleep(self.cycle_pause).await;
        }
    }

    /// One full cycle: fill every channel's buffer over `cycle_length`
    /// timed rounds, then reduce. A channel whose buffer cannot be reduced
    /// degrades to the NO_READING placeholder; the record always forms.
    pub async fn run_cycle(&mut self) -> SummaryRecord {
        for slot in &mut self.channels {
            slot.buffer.clear();
        }

        for _round in 0..self.cycle_length {
            for slot in &mut self.channels {
                let reading = self.reader.read(&mut slot.channel).await;
                slot.buffer.push(reading);
            }
            sleep(self.round_interval).await;
        }

        let mut record = SummaryRecord::new(&self.sensor_id, local_timestamp());
        for slot in &self.channels {
            match self.aggregator.aggregate(&slot.buffer) {
                Ok(value) => {
                    debug!(
                        "{}: {value:.1} {}",
                        slot.channel.kind.name(),
                        slot.channel.kind.unit()
                    );
                    record.set(slot.channel.kind, value);
                }
                Err(e) => {
                    record.set(slot.channel.kind, NO_READING);
                    self.diag
                        .emit(format!("{} aggregation failed: {e}", slot.channel.kind.name()))
                        .await;
                }
            }
        }
        record
    }

    async fn publish_record(&self, record: &SummaryRecord) {
        info!("cycle summary: {record:?}");
        match serde_json::to_vec(record) {
            Ok(payload) => {
                let mid = self
                    .client
                    .publish(&self.data_topic, payload, QoS::AtLeastOnce)
                    .await;
                debug!("queued cycle summary as message {mid}");
            }
            Err(e) => error!("could not encode summary record: {e}"),
        }
    }
}

// EOF
