//! The coordinator's wire vocabulary.
//!
//! Every payload is plain text so an existing coordinator keeps understanding it: the worker
//! always sends `"1"`, the coordinator answers with an acknowledgement or `"stop"`.

use std::{fmt, io};

use crate::{Deserialize, Serialize};

const SIGNAL: &str = "1";
const GO: &str = "go";
const CONTINUE: &str = "continue";
const LEGACY_CONTINUE: &str = "0";
const STOP: &str = "stop";

/// The worker's only request, meaning "ready" before round 1 and "published" afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal;

/// The coordinator's answer to a `Signal`.
///
/// Decoded once at the channel boundary: `"go"`, `"continue"` and `"0"` are acknowledgements,
/// `"stop"` ends training. Any other payload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Continue,
    Stop,
}

impl Signal {
    /// The signal's text, for transports that carry raw payloads.
    pub fn as_str(&self) -> &'static str {
        SIGNAL
    }
}

impl<'a> Serialize<'a> for Signal {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        Some(self.as_str().as_bytes())
    }
}

impl<'a> Deserialize<'a> for Signal {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        match as_text(buf)? {
            SIGNAL => Ok(Signal),
            other => Err(unexpected_payload("signal", other)),
        }
    }
}

impl<'a> Serialize<'a> for Reply {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        let text = match self {
            Reply::Continue => CONTINUE,
            Reply::Stop => STOP,
        };

        Some(text.as_bytes())
    }
}

impl<'a> Deserialize<'a> for Reply {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        match as_text(buf)? {
            GO | CONTINUE | LEGACY_CONTINUE => Ok(Reply::Continue),
            STOP => Ok(Reply::Stop),
            other => Err(unexpected_payload("reply", other)),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Continue => f.write_str(CONTINUE),
            Reply::Stop => f.write_str(STOP),
        }
    }
}

fn as_text(buf: &[u8]) -> io::Result<&str> {
    str::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn unexpected_payload(what: &str, got: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed coordinator {what}: {got:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> io::Result<Reply> {
        Reply::deserialize(text.as_bytes())
    }

    #[test]
    fn acknowledgements_decode_to_continue() {
        assert_eq!(decode("go").unwrap(), Reply::Continue);
        assert_eq!(decode("continue").unwrap(), Reply::Continue);
        assert_eq!(decode("0").unwrap(), Reply::Continue);
    }

    #[test]
    fn stop_decodes_to_stop() {
        assert_eq!(decode("stop").unwrap(), Reply::Stop);
    }

    #[test]
    fn malformed_replies_are_rejected() {
        for text in ["", "STOP", "stop ", "1", "halt"] {
            let err = decode(text).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "{text:?}");
        }

        let err = Reply::deserialize(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn signal_is_the_literal_one() {
        let mut buf = Vec::new();
        assert_eq!(Signal.serialize(&mut buf), Some(&b"1"[..]));
        assert!(buf.is_empty());
        assert!(Signal::deserialize(b"2").is_err());
    }
}
