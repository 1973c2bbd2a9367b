//! Error taxonomy for the streaming pipeline.
//!
//! Only [`StreamError::Acquisition`] stops a loop. Every other variant is
//! scoped to the frame that produced it: the loops log it, count it and move
//! on to the next frame.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Frame source exhausted or faulted.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// The codec rejected the raw frame.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The codec rejected the compressed payload.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Deserialization found missing or out-of-range fields.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The display sink could not present a frame.
    #[error("display failed: {0}")]
    Display(String),

    /// The transport refused a send.
    #[error("transmission failed: {0}")]
    Transmission(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the error should terminate the loop that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Acquisition(_))
    }
}

impl From<prost::DecodeError> for StreamError {
    fn from(e: prost::DecodeError) -> Self {
        StreamError::MalformedEnvelope(e.to_string())
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(e: config::ConfigError) -> Self {
        StreamError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_acquisition_is_fatal() {
        assert!(StreamError::Acquisition("eof".into()).is_fatal());
        assert!(!StreamError::Compression("x".into()).is_fatal());
        assert!(!StreamError::Decode("x".into()).is_fatal());
        assert!(!StreamError::MalformedEnvelope("x".into()).is_fatal());
        assert!(!StreamError::Transmission("x".into()).is_fatal());
        assert!(!StreamError::Display("x".into()).is_fatal());
    }

    #[test]
    fn display_faults_are_not_reported_as_decode_faults() {
        let e = StreamError::Display("render failed: lost context".into());
        assert_eq!(e.to_string(), "display failed: render failed: lost context");
    }

    #[test]
    fn display_messages() {
        let e = StreamError::Transmission("socket closed".into());
        assert!(e.to_string().contains("socket closed"));

        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StreamError = io_err.into();
        assert!(matches!(e, StreamError::Io(_)));
    }
}
