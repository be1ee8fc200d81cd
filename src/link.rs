// link.rs

use async_trait::async_trait;
use log::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::*;

// Outbound wire frame, one JSON object per line.
#[derive(Serialize)]
struct PublishFrame<'a> {
    topic: &'a str,
    mid: u32,
    qos: u8,
    payload: &'a str,
}

#[derive(Deserialize)]
struct AckFrame {
    ack: u32,
}

/// Broker link over a plain TCP gateway bridge: newline-delimited JSON
/// frames out, acknowledgement frames back on the same socket. TLS and the
/// broker's own protocol terminate in the bridge.
pub struct TcpLink {
    addr: String,
    reader: Option<Lines<BufReader<OwnedReadHalf>>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpLink {
    pub fn new(addr: &str) -> Self {
        TcpLink {
            addr: addr.to_string(),
            reader: None,
            writer: None,
        }
    }
}

#[async_trait]
impl BrokerLink for TcpLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half).lines());
        self.writer = Some(write_half);
        info!("connected to {}", self.addr);
        Ok(())
    }

    async fn publish(&mut self, msg: &OutboundMessage) -> Result<(), LinkError> {
        let writer = self.writer.as_mut().ok_or(LinkError::NotConnected)?;
        let payload = String::from_utf8_lossy(&msg.payload);
        let frame = PublishFrame {
            topic: &msg.topic,
            mid: msg.mid,
            qos: match msg.qos {
                QoS::AtMostOnce => 0,
                QoS::AtLeastOnce => 1,
            },
            payload: payload.as_ref(),
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        Ok(())
    }

    async fn next_ack(&mut self) -> Result<u32, LinkError> {
        let reader = self.reader.as_mut().ok_or(LinkError::NotConnected)?;
        loop {
            match reader.next_line().await? {
                Some(line) => match serde_json::from_str::<AckFrame>(&line) {
                    Ok(frame) => return Ok(frame.ack),
                    Err(_) => debug!("ignoring unrecognized broker frame: {line}"),
                },
                None => return Err(LinkError::Closed),
            }
        }
    }

    async fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_and_acks_cross_the_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let frame: serde_json::Value = serde_json::from_str(&line).unwrap();
            let mid = frame["mid"].as_u64().unwrap();
            write_half
                .write_all(format!("{{\"ack\":{mid}}}\n").as_bytes())
                .await
                .unwrap();
            frame
        });

        let mut link = TcpLink::new(&addr.to_string());
        link.connect().await.unwrap();

        let msg = OutboundMessage {
            topic: "sensors/data".into(),
            payload: b"{\"sensor\":\"1\"}".to_vec(),
            qos: QoS::AtLeastOnce,
            mid: 7,
        };
        link.publish(&msg).await.unwrap();
        assert_eq!(link.next_ack().await.unwrap(), 7);

        let frame = server.await.unwrap();
        assert_eq!(frame["topic"], "sensors/data");
        assert_eq!(frame["qos"], 1);
    }
}

// EOF
