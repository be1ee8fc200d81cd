// sds011.rs
// Nova SDS011 particulate sensor, driven in query mode: one command frame
// out, one 10-byte reply back per reading.

use async_trait::async_trait;
use log::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::*;

pub const BAUD_RATE: u32 = 9600;
pub const REPLY_LEN: usize = 10;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

const FRAME_HEAD: u8 = 0xaa;
const FRAME_TAIL: u8 = 0xab;
const REPLY_ID: u8 = 0xc0;
const CMD_ID: u8 = 0xb4;
const CMD_QUERY: u8 = 0x04;

/// Build the query-mode "report now" command frame.
pub fn query_command() -> [u8; 19] {
    let mut cmd = [0u8; 19];
    cmd[0] = FRAME_HEAD;
    cmd[1] = CMD_ID;
    cmd[2] = CMD_QUERY;
    cmd[15] = 0xff; // device id wildcard
    cmd[16] = 0xff;
    cmd[17] = checksum(&cmd[2..17]);
    cmd[18] = FRAME_TAIL;
    cmd
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Decode one 10-byte query reply. Values are tenths of µg/m³ on the wire.
pub fn decode_reply(frame: &[u8]) -> Result<ParticulateReading, SampleError> {
    if frame.len() < REPLY_LEN {
        return Err(SampleError::ShortFrame);
    }
    if frame[0] != FRAME_HEAD || frame[1] != REPLY_ID || frame[9] != FRAME_TAIL {
        return Err(SampleError::BadHeader);
    }
    if checksum(&frame[2..8]) != frame[8] {
        return Err(SampleError::BadChecksum);
    }
    let pm25 = f64::from(u16::from_le_bytes([frame[2], frame[3]])) / 10.0;
    let pm10 = f64::from(u16::from_le_bytes([frame[4], frame[5]])) / 10.0;
    Ok(ParticulateReading { pm25, pm10 })
}

pub struct Sds011 {
    port: BufReader<SerialStream>,
}

impl Sds011 {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let port = tokio_serial::new(path, BAUD_RATE).open_native_async()?;
        info!("opened SDS011 sensor on {path}");
        Ok(Sds011 {
            port: BufReader::new(port),
        })
    }

    async fn query(&mut self) -> Result<[u8; REPLY_LEN], SampleError> {
        self.port.write_all(&query_command()).await?;
        loop {
            if self.port.read_u8().await? != FRAME_HEAD {
                continue;
            }
            if self.port.read_u8().await? != REPLY_ID {
                continue;
            }
            let mut frame = [0u8; REPLY_LEN];
            frame[0] = FRAME_HEAD;
            frame[1] = REPLY_ID;
            self.port.read_exact(&mut frame[2..]).await?;
            return Ok(frame);
        }
    }
}

#[async_trait]
impl ParticulateSensor for Sds011 {
    async fn read(&mut self) -> Result<ParticulateReading, SampleError> {
        let frame = timeout(READ_TIMEOUT, self.query())
            .await
            .map_err(|_| SampleError::Timeout)??;
        decode_reply(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(pm25_tenths: u16, pm10_tenths: u16) -> [u8; REPLY_LEN] {
        let mut frame = [0u8; REPLY_LEN];
        frame[0] = 0xaa;
        frame[1] = 0xc0;
        frame[2..4].copy_from_slice(&pm25_tenths.to_le_bytes());
        frame[4..6].copy_from_slice(&pm10_tenths.to_le_bytes());
        frame[6] = 0x01; // device id
        frame[7] = 0x02;
        frame[8] = checksum(&frame[2..8]);
        frame[9] = 0xab;
        frame
    }

    #[test]
    fn decodes_tenths_of_micrograms() {
        let reading = decode_reply(&reply(123, 456)).unwrap();
        assert_eq!(reading.pm25, 12.3);
        assert_eq!(reading.pm10, 45.6);
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut frame = reply(123, 456);
        frame[8] = frame[8].wrapping_add(1);
        assert!(matches!(
            decode_reply(&frame),
            Err(SampleError::BadChecksum)
        ));
    }

    #[test]
    fn query_command_is_well_formed() {
        let cmd = query_command();
        assert_eq!(cmd.len(), 19);
        assert_eq!(cmd[0], 0xaa);
        assert_eq!(cmd[1], 0xb4);
        assert_eq!(cmd[18], 0xab);
        assert_eq!(cmd[17], 0x02); // 0x04 + 0xff + 0xff modulo 256
    }
}

// EOF
