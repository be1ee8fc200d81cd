// honeywell.rs
// Honeywell HPMA115S0 particulate sensor on a serial line. Once told to
// start measuring it streams 32-byte autosend frames.

use async_trait::async_trait;
use log::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::*;

pub const BAUD_RATE: u32 = 9600;
pub const FRAME_LEN: usize = 32;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

// First two characters of a valid frame.
const MSG_CHAR_1: u8 = 0x42;
const MSG_CHAR_2: u8 = 0x4d;

const CMD_START_MEASUREMENT: [u8; 4] = [0x68, 0x01, 0x01, 0x96];
const CMD_STOP_MEASUREMENT: [u8; 4] = [0x68, 0x01, 0x02, 0x95];
const CMD_ENABLE_AUTOSEND: [u8; 4] = [0x68, 0x01, 0x40, 0x57];

/// Extract the particulate fractions from one full autosend frame.
pub fn decode_frame(frame: &[u8]) -> Result<ParticulateReading, SampleError> {
    if frame.len() < 10 {
        return Err(SampleError::ShortFrame);
    }
    if frame[0] != MSG_CHAR_1 || frame[1] != MSG_CHAR_2 {
        return Err(SampleError::BadHeader);
    }
    let pm25 = f64::from(u16::from_be_bytes([frame[6], frame[7]]));
    let pm10 = f64::from(u16::from_be_bytes([frame[8], frame[9]]));
    Ok(ParticulateReading { pm25, pm10 })
}

pub struct Honeywell {
    port: BufReader<SerialStream>,
}

impl Honeywell {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let port = tokio_serial::new(path, BAUD_RATE).open_native_async()?;
        info!("opened Honeywell sensor on {path}");
        Ok(Honeywell {
            port: BufReader::new(port),
        })
    }

    pub async fn start_measuring(&mut self) -> Result<(), SampleError> {
        self.port.write_all(&CMD_START_MEASUREMENT).await?;
        self.port.write_all(&CMD_ENABLE_AUTOSEND).await?;
        Ok(())
    }

    pub async fn stop_measuring(&mut self) -> Result<(), SampleError> {
        self.port.write_all(&CMD_STOP_MEASUREMENT).await?;
        Ok(())
    }

    // Scan the stream for the two header characters, then take the rest of
    // the frame.
    async fn read_frame(&mut self) -> Result<[u8; FRAME_LEN], SampleError> {
        loop {
            if self.port.read_u8().await? != MSG_CHAR_1 {
                continue;
            }
            if self.port.read_u8().await? != MSG_CHAR_2 {
                continue;
            }
            let mut frame = [0u8; FRAME_LEN];
            frame[0] = MSG_CHAR_1;
            frame[1] = MSG_CHAR_2;
            self.port.read_exact(&mut frame[2..]).await?;
            return Ok(frame);
        }
    }
}

#[async_trait]
impl ParticulateSensor for Honeywell {
    async fn read(&mut self) -> Result<ParticulateReading, SampleError> {
        let frame = timeout(READ_TIMEOUT, self.read_frame())
            .await
            .map_err(|_| SampleError::Timeout)??;
        decode_frame(&frame)
    }
}


// EOF
