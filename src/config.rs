// config.rs

use clap::Parser;

use crate::*;

const DEFAULT_CYCLE_LENGTH: usize = 20;
const DEFAULT_TRIM: usize = 3;
const DEFAULT_ROUND_INTERVAL: u64 = 15;
const DEFAULT_CYCLE_PAUSE: u64 = 3;
const DEFAULT_SENSOR_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: u64 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 128;
const DEFAULT_DRAIN_RATE: u32 = 4;
const DEFAULT_CONNECT_TIMEOUT: u64 = 20;
const DEFAULT_OP_TIMEOUT: u64 = 10;
const DEFAULT_BACKOFF_BASE: u64 = 1;
const DEFAULT_BACKOFF_CAP: u64 = 128;
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_SERIAL_PORT: &str = "/dev/serial0";
const DEFAULT_DATA_TOPIC: &str = "sensors/data";
const DEFAULT_INFO_TOPIC: &str = "sensors/info";

#[derive(Clone, Debug, Parser)]
#[command(version, about = "field telemetry agent: sample, aggregate, publish")]
pub struct MyConfig {
    /// Sensor identifier carried in every payload
    #[arg(long, env = "SENSOR_ID")]
    pub sensor_id: String,

    /// Broker gateway endpoint as host:port
    #[arg(long, env = "BROKER_ADDR")]
    pub broker_addr: String,

    /// Particulate sensor attached to this node
    #[arg(long, value_enum, default_value_t = ParticulateKind::Simulated)]
    pub particulate_sensor: ParticulateKind,

    /// Serial port of the particulate sensor
    #[arg(long, default_value = DEFAULT_SERIAL_PORT)]
    pub particulate_port: String,

    /// Readings collected per channel per cycle
    #[arg(long, default_value_t = DEFAULT_CYCLE_LENGTH)]
    pub cycle_length: usize,

    /// Readings discarded from each end of the sorted cycle buffer
    #[arg(long, default_value_t = DEFAULT_TRIM)]
    pub trim: usize,

    /// Seconds between sampling rounds
    #[arg(long, default_value_t = DEFAULT_ROUND_INTERVAL)]
    pub round_interval: u64,

    /// Seconds between the end of one cycle and the start of the next
    #[arg(long, default_value_t = DEFAULT_CYCLE_PAUSE)]
    pub cycle_pause: u64,

    /// Retries after a failed sample attempt before the round is given up
    #[arg(long, default_value_t = DEFAULT_SENSOR_RETRIES)]
    pub sensor_retries: u32,

    /// Seconds between sample retries
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY)]
    pub retry_delay: u64,

    /// Outbound queue capacity; the oldest message is dropped when full
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Messages per second while draining a backlog
    #[arg(long, default_value_t = DEFAULT_DRAIN_RATE)]
    pub drain_rate: u32,

    /// Seconds allowed for a broker connect
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: u64,

    /// Seconds to wait for a QoS-1 acknowledgement
    #[arg(long, default_value_t = DEFAULT_OP_TIMEOUT)]
    pub op_timeout: u64,

    /// First reconnect delay in seconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF_BASE)]
    pub backoff_base: u64,

    /// Reconnect delay ceiling in seconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF_CAP)]
    pub backoff_cap: u64,

    /// Reconnect delay growth factor
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: u32,

    /// Topic for cycle summary records
    #[arg(long, default_value = DEFAULT_DATA_TOPIC)]
    pub data_topic: String,

    /// Topic for diagnostic events
    #[arg(long, default_value = DEFAULT_INFO_TOPIC)]
    pub info_topic: String,
}

impl Default for MyConfig {
    fn default() -> Self {
        Self {
            sensor_id: "1".into(),
            broker_addr: "127.0.0.1:1883".into(),
            particulate_sensor: ParticulateKind::Simulated,
            particulate_port: DEFAULT_SERIAL_PORT.into(),
            cycle_length: DEFAULT_CYCLE_LENGTH,
            trim: DEFAULT_TRIM,
            round_interval: DEFAULT_ROUND_INTERVAL,
            cycle_pause: DEFAULT_CYCLE_PAUSE,
            sensor_retries: DEFAULT_SENSOR_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_rate: DEFAULT_DRAIN_RATE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            op_timeout: DEFAULT_OP_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            data_topic: DEFAULT_DATA_TOPIC.into(),
            info_topic: DEFAULT_INFO_TOPIC.into(),
        }
    }
}

impl MyConfig {
    /// Startup validation; a combination that would produce wrong numbers
    /// refuses to run at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trim.saturating_mul(2) >= self.cycle_length {
            return Err(ConfigError::TrimTooLarge {
                trim: self.trim,
                cycle_length: self.cycle_length,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.drain_rate == 0 {
            return Err(ConfigError::ZeroDrainRate);
        }
        if self.backoff_multiplier == 0 {
            return Err(ConfigError::ZeroBackoffMultiplier);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.sensor_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
        }
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            sensor_id: self.sensor_id.clone(),
            info_topic: self.info_topic.clone(),
            queue_capacity: self.queue_capacity,
            drain_rate: self.drain_rate,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            op_timeout: Duration::from_secs(self.op_timeout),
            backoff: Backoff {
                base: Duration::from_secs(self.backoff_base),
                cap: Duration::from_secs(self.backoff_cap),
                multiplier: self.backoff_multiplier,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(MyConfig::default().validate(), Ok(()));
    }

    #[test]
    fn oversized_trim_refuses_to_run() {
        let config = MyConfig {
            trim: 10,
            cycle_length: 20,
            ..MyConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TrimTooLarge {
                trim: 10,
                cycle_length: 20
            })
        );
    }

    #[test]
    fn zero_capacity_refuses_to_run() {
        let config = MyConfig {
            queue_capacity: 0,
            ..MyConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }
}

// EOF
