use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// Writing end of a framed channel.
///
/// Every message becomes one frame: a big endian `u64` payload length followed by the payload.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            frame: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes it.
    ///
    /// # Errors
    /// `io::ErrorKind::InvalidInput` if the payload is larger than `MAX_FRAME_LEN`, in which
    /// case nothing is written. Otherwise any error of the underlying writer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, frame } = self;

        frame.clear();
        frame.resize(LEN_TYPE_SIZE, 0);
        if let Some(tail) = msg.serialize(frame) {
            frame.extend_from_slice(tail);
        }

        let len = frame.len() - LEN_TYPE_SIZE;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        frame[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());
        tx.write_all(frame).await?;
        tx.flush().await
    }
}
