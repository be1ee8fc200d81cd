// lib.rs
#![warn(clippy::large_futures)]

pub use std::sync::Arc;

pub use anyhow::bail;
pub use chrono::*;
pub use serde::{Deserialize, Serialize};
pub use tokio::{
    sync::RwLock,
    time::{Duration, sleep},
};

mod aggregate;
pub use aggregate::*;

mod config;
pub use config::*;

mod cycle;
pub use cycle::*;

mod diag;
pub use diag::*;

mod error;
pub use error::*;

mod link;
pub use link::*;

mod publish;
pub use publish::*;

mod retry;
pub use retry::*;

mod sample;
pub use sample::*;

pub mod honeywell;
pub mod sds011;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder published for a channel that produced no usable data this
/// cycle. Far outside every physical range the agent measures.
pub const NO_READING: f64 = -1000.0;

/// One row per measurement cycle; its JSON form is the data-topic payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub sensor: String,
    pub timestamp: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub bmp180_temperature: f64,
    pub bmp180_airpressure: f64,
}

impl SummaryRecord {
    pub fn new(sensor: &str, timestamp: String) -> Self {
        SummaryRecord {
            sensor: sensor.to_string(),
            timestamp,
            temperature: NO_READING,
            humidity: NO_READING,
            pm25: NO_READING,
            pm10: NO_READING,
            bmp180_temperature: NO_READING,
            bmp180_airpressure: NO_READING,
        }
    }

    pub fn set(&mut self, kind: ChannelKind, value: f64) {
        match kind {
            ChannelKind::Temperature => self.temperature = value,
            ChannelKind::Humidity => self.humidity = value,
            ChannelKind::Pm25 => self.pm25 = value,
            ChannelKind::Pm10 => self.pm10 = value,
            ChannelKind::Bmp180Temperature => self.bmp180_temperature = value,
            ChannelKind::Bmp180Airpressure => self.bmp180_airpressure = value,
        }
    }
}

/// Info-topic payload: free-text operational narration from the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub sensor: String,
    pub timestamp: String,
    pub info: String,
}

/// Local wall-clock stamp carried in every payload.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// EOF
