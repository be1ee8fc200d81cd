// diag.rs

use log::*;

use crate::*;

/// Operational narration on the info topic: channel init, retry failures,
/// connection transitions. Fire and forget; clones share the pipeline.
#[derive(Clone)]
pub struct DiagnosticsChannel {
    client: PublishClient,
    sensor_id: String,
    info_topic: String,
}

impl DiagnosticsChannel {
    pub fn new(client: PublishClient, sensor_id: &str, info_topic: &str) -> Self {
        DiagnosticsChannel {
            client,
            sensor_id: sensor_id.to_string(),
            info_topic: info_topic.to_string(),
        }
    }

    /// Publish one event. Encoding failures are swallowed with a log line;
    /// this path must never feed back into failure handling.
    pub async fn emit(&self, info: impl Into<String>) {
        let info = info.into();
        info!("[sensor {}] {info}", self.sensor_id);
        let event = DiagnosticEvent {
            sensor: self.sensor_id.clone(),
            timestamp: local_timestamp(),
            info,
        };
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                self.client
                    .publish(&self.info_topic, payload, QoS::AtMostOnce)
                    .await;
            }
            Err(e) => warn!("could not encode diagnostic event: {e}"),
        }
    }
}

// EOF
