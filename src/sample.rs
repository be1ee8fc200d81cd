// sample.rs

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use crate::*;

/// One sample attempt's outcome. `None` is the missing sentinel that sorts
/// after every real value during aggregation.
pub type Reading = Option<f64>;

/// The physical quantities this agent reports. Closed set; each maps onto
/// one field of the summary record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Temperature,
    Humidity,
    Pm25,
    Pm10,
    Bmp180Temperature,
    Bmp180Airpressure,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Temperature => "temperature",
            ChannelKind::Humidity => "humidity",
            ChannelKind::Pm25 => "pm25",
            ChannelKind::Pm10 => "pm10",
            ChannelKind::Bmp180Temperature => "bmp180_temperature",
            ChannelKind::Bmp180Airpressure => "bmp180_airpressure",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            ChannelKind::Temperature | ChannelKind::Bmp180Temperature => "°C",
            ChannelKind::Humidity => "%RH",
            ChannelKind::Pm25 | ChannelKind::Pm10 => "µg/m³",
            ChannelKind::Bmp180Airpressure => "Pa",
        }
    }
}

/// Capability wrapper around one physical quantity: one scalar per call,
/// or a failure the caller may retry.
#[async_trait]
pub trait SampleSource: Send {
    async fn sample(&mut self) -> Result<f64, SampleError>;
}

/// One configured measurement channel. Immutable after startup.
pub struct Channel {
    pub kind: ChannelKind,
    pub source: Box<dyn SampleSource>,
}

impl Channel {
    pub fn new(kind: ChannelKind, source: Box<dyn SampleSource>) -> Self {
        Channel { kind, source }
    }
}

/// Particulate sensor variant, selected once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ParticulateKind {
    Honeywell,
    Sds011,
    Simulated,
}

/// One particulate query returns both fractions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticulateReading {
    pub pm25: f64,
    pub pm10: f64,
}

/// Device capability shared by the two particulate channels.
#[async_trait]
pub trait ParticulateSensor: Send {
    async fn read(&mut self) -> Result<ParticulateReading, SampleError>;
}

#[derive(Clone, Copy, Debug)]
pub enum ParticulateField {
    Pm25,
    Pm10,
}

/// Adapts one field of a shared particulate device to the per-channel
/// sample capability.
pub struct ParticulateSource {
    dev: Arc<Mutex<Box<dyn ParticulateSensor>>>,
    field: ParticulateField,
}

impl ParticulateSource {
    pub fn new(dev: Arc<Mutex<Box<dyn ParticulateSensor>>>, field: ParticulateField) -> Self {
        ParticulateSource { dev, field }
    }
}

#[async_trait]
impl SampleSource for ParticulateSource {
    async fn sample(&mut self) -> Result<f64, SampleError> {
        let reading = self.dev.lock().await.read().await?;
        Ok(match self.field {
            ParticulateField::Pm25 => reading.pm25,
            ParticulateField::Pm10 => reading.pm10,
        })
    }
}

/// Stand-in for channels whose hardware driver lives outside this process.
/// Wanders around a baseline and glitches at a configurable rate.
pub struct SimulatedSource {
    baseline: f64,
    spread: f64,
    glitch_rate: f64,
}

impl SimulatedSource {
    pub fn new(baseline: f64, spread: f64, glitch_rate: f64) -> Self {
        SimulatedSource {
            baseline,
            spread,
            glitch_rate,
        }
    }
}

#[async_trait]
impl SampleSource for SimulatedSource {
    async fn sample(&mut self) -> Result<f64, SampleError> {
        let mut rng = rand::thread_rng();
        if self.glitch_rate > 0.0 && rng.gen_bool(self.glitch_rate) {
            return Err(SampleError::NoReading);
        }
        Ok(self.baseline + rng.gen_range(-self.spread..=self.spread))
    }
}

/// Simulated particulate device for nodes with no particulate hardware.
pub struct SimulatedParticulate {
    pm25: SimulatedSource,
    pm10: SimulatedSource,
}

impl SimulatedParticulate {
    pub fn new() -> Self {
        SimulatedParticulate {
            pm25: SimulatedSource::new(8.0, 4.0, 0.01),
            pm10: SimulatedSource::new(15.0, 6.0, 0.01),
        }
    }
}

impl Default for SimulatedParticulate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticulateSensor for SimulatedParticulate {
    async fn read(&mut self) -> Result<ParticulateReading, SampleError> {
        Ok(ParticulateReading {
            pm25: self.pm25.sample().await?,
            pm10: self.pm10.sample().await?,
        })
    }
}

// EOF
