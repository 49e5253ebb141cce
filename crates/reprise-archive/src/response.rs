//! Control responses sent back to the client that requested a replay.
//!
//! Wire layout, little-endian:
//!
//! ```text
//! correlation_id  i64
//! code            u8    0 = OK, 1 = ERROR
//! message_length  u32
//! message         [u8; message_length]  UTF-8, empty on OK
//! ```

use std::error::Error;
use std::fmt;

use reprise_core::CorrelationId;
use reprise_logbuffer::{OfferResult, Publication};

/// Outcome carried by a [`ControlResponse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// The request was accepted.
    Ok = 0,
    /// The request failed; the message says why.
    Error = 1,
}

impl ResponseCode {
    fn from_u8(v: u8) -> Result<Self, ResponseDecodeError> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Error),
            other => Err(ResponseDecodeError::UnknownCode(other)),
        }
    }
}

/// A decoded control response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlResponse {
    /// Correlation id of the request being answered.
    pub correlation_id: CorrelationId,
    /// Success or failure.
    pub code: ResponseCode,
    /// Failure description; empty on success.
    pub error_message: String,
}

const FIXED_LENGTH: usize = 8 + 1 + 4;

impl ControlResponse {
    /// A success response.
    pub fn ok(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            code: ResponseCode::Ok,
            error_message: String::new(),
        }
    }

    /// An error response carrying `message`.
    pub fn error(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            code: ResponseCode::Error,
            error_message: message.into(),
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_length(&self) -> usize {
        FIXED_LENGTH + self.error_message.len()
    }

    /// Encode into a new buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_length());
        out.extend_from_slice(&self.correlation_id.0.to_le_bytes());
        out.push(self.code as u8);
        out.extend_from_slice(&(self.error_message.len() as u32).to_le_bytes());
        out.extend_from_slice(self.error_message.as_bytes());
        out
    }

    /// Decode from `bytes`, which must hold exactly one response.
    pub fn decode(bytes: &[u8]) -> Result<Self, ResponseDecodeError> {
        if bytes.len() < FIXED_LENGTH {
            return Err(ResponseDecodeError::Truncated {
                needed: FIXED_LENGTH,
                available: bytes.len(),
            });
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        let code = ResponseCode::from_u8(bytes[8])?;
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[9..FIXED_LENGTH]);
        let len = u32::from_le_bytes(len) as usize;

        let needed = FIXED_LENGTH + len;
        if bytes.len() < needed {
            return Err(ResponseDecodeError::Truncated {
                needed,
                available: bytes.len(),
            });
        }
        let error_message = std::str::from_utf8(&bytes[FIXED_LENGTH..needed])
            .map_err(|_| ResponseDecodeError::InvalidUtf8)?
            .to_owned();

        Ok(Self {
            correlation_id: CorrelationId(i64::from_le_bytes(id)),
            code,
            error_message,
        })
    }
}

/// Errors decoding a [`ControlResponse`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseDecodeError {
    /// Fewer bytes than the layout requires.
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },
    /// The code byte is neither OK nor ERROR.
    UnknownCode(u8),
    /// The message is not UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ResponseDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "response truncated: need {needed} bytes, have {available}")
            }
            Self::UnknownCode(code) => write!(f, "unknown response code {code}"),
            Self::InvalidUtf8 => write!(f, "response message is not valid UTF-8"),
        }
    }
}

impl Error for ResponseDecodeError {}

/// Sends control responses on behalf of a replay session.
pub trait ResponseProxy: Send {
    /// Send a response for `correlation_id` on `control`.
    ///
    /// `None` reports success. Returns whether the response was published.
    fn send_response(
        &mut self,
        control: &mut dyn Publication,
        error_message: Option<&str>,
        correlation_id: CorrelationId,
    ) -> bool;
}

/// Default number of offers made before a response is given up on.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;

/// A [`ResponseProxy`] that encodes [`ControlResponse`]s and offers them,
/// retrying backpressure a bounded number of times.
#[derive(Clone, Debug)]
pub struct ControlResponseProxy {
    max_attempts: u32,
}

impl ControlResponseProxy {
    /// Proxy making up to `max_attempts` offers per response.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for ControlResponseProxy {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_ATTEMPTS)
    }
}

impl ResponseProxy for ControlResponseProxy {
    fn send_response(
        &mut self,
        control: &mut dyn Publication,
        error_message: Option<&str>,
        correlation_id: CorrelationId,
    ) -> bool {
        let response = match error_message {
            None => ControlResponse::ok(correlation_id),
            Some(message) => ControlResponse::error(correlation_id, message),
        };
        let bytes = response.encode();

        for attempt in 1..=self.max_attempts {
            match control.offer(&bytes) {
                Ok(OfferResult::Published(_)) => return true,
                Ok(OfferResult::Rejected(status)) if status.is_transient() => {
                    tracing::trace!(%correlation_id, attempt, ?status, "response offer retry");
                }
                Ok(OfferResult::Rejected(status)) => {
                    tracing::warn!(%correlation_id, ?status, "control channel unavailable");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(%correlation_id, error = %e, "control response not sent");
                    return false;
                }
            }
        }
        tracing::warn!(
            %correlation_id,
            attempts = self.max_attempts,
            "control response dropped under backpressure"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_logbuffer::{ExclusivePublication, PublicationConfig};

    fn control() -> ExclusivePublication {
        ExclusivePublication::new(PublicationConfig {
            term_length: 1024,
            ..PublicationConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn encodes_documented_layout() {
        let bytes = ControlResponse::error(CorrelationId(7), "bad").encode();
        assert_eq!(&bytes[..8], &7i64.to_le_bytes());
        assert_eq!(bytes[8], 1);
        assert_eq!(&bytes[9..13], &3u32.to_le_bytes());
        assert_eq!(&bytes[13..], b"bad");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(
            ControlResponse::decode(&[0u8; 5]),
            Err(ResponseDecodeError::Truncated {
                needed: 13,
                available: 5
            })
        );
        let mut bytes = ControlResponse::ok(CorrelationId(1)).encode();
        bytes[8] = 9;
        assert_eq!(
            ControlResponse::decode(&bytes),
            Err(ResponseDecodeError::UnknownCode(9))
        );
        let mut bytes = ControlResponse::error(CorrelationId(1), "abc").encode();
        bytes.truncate(14);
        assert!(matches!(
            ControlResponse::decode(&bytes),
            Err(ResponseDecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn proxy_publishes_to_connected_channel() {
        let mut control = control();
        let mut reader = control.attach_reader().unwrap();
        let mut proxy = ControlResponseProxy::default();

        assert!(proxy.send_response(&mut control, None, CorrelationId(3)));
        assert!(proxy.send_response(&mut control, Some("no such recording"), CorrelationId(4)));

        let mut responses = Vec::new();
        reader.poll(
            |_, payload| responses.push(ControlResponse::decode(payload).unwrap()),
            10,
        );
        assert_eq!(
            responses,
            vec![
                ControlResponse::ok(CorrelationId(3)),
                ControlResponse::error(CorrelationId(4), "no such recording"),
            ]
        );
    }

    #[test]
    fn proxy_reports_disconnected_channel() {
        let mut control = control();
        let mut proxy = ControlResponseProxy::default();
        assert!(!proxy.send_response(&mut control, None, CorrelationId(1)));
    }

    #[test]
    fn proxy_gives_up_under_backpressure() {
        let mut control = control();
        let _reader = control.attach_reader().unwrap();
        // Fill the term without consuming it.
        while let Ok(OfferResult::Published(_)) = control.offer(&[0u8; 96]) {}
        let mut proxy = ControlResponseProxy::new(2);
        assert!(!proxy.send_response(&mut control, None, CorrelationId(1)));
    }
}
