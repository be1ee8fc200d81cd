// error.rs

use thiserror::Error;

/// A single sample attempt failed. Recovered by bounded retry; never
/// aborts a cycle.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("sensor returned no reading")]
    NoReading,
    #[error("sensor read timed out")]
    Timeout,
    #[error("truncated sensor frame")]
    ShortFrame,
    #[error("bad sensor frame header")]
    BadHeader,
    #[error("sensor frame checksum mismatch")]
    BadChecksum,
    #[error("sensor i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A channel's whole cycle buffer could not be reduced to a number.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("no readings left after trimming")]
    EmptyAfterTrim,
    #[error("no numeric readings left after trimming")]
    AllMissing,
}

/// Broker link fault. Recovered by reconnect with backoff; never fatal.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("broker connect timed out")]
    ConnectTimeout,
    #[error("broker closed the connection")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("link i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup configuration fault. The process refuses to run rather than
/// produce silently wrong aggregates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("trim count {trim} leaves nothing to average over a cycle of {cycle_length}")]
    TrimTooLarge { trim: usize, cycle_length: usize },
    #[error("outbound queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("drain rate must be at least 1 message per second")]
    ZeroDrainRate,
    #[error("backoff multiplier must be at least 1")]
    ZeroBackoffMultiplier,
}

// EOF
