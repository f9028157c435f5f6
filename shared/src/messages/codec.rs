//! Length-prefixed frame codec
//!
//! Wire layout: 4-byte big-endian payload length, then the payload encoded
//! with the negotiated `WireFormat`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::Frame;
use crate::errors::{SharedError, SharedResult};

/// Upper bound on a single frame payload
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Payload encoding used inside each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireFormat {
    #[default]
    Bincode,
    Json,
}

impl WireFormat {
    pub fn encode(self, frame: &Frame) -> SharedResult<Vec<u8>> {
        let data = match self {
            WireFormat::Bincode => bincode::serialize(frame).map_err(|e| SharedError::SerializationError {
                message: e.to_string(),
            })?,
            WireFormat::Json => serde_json::to_vec(frame).map_err(|e| SharedError::SerializationError {
                message: e.to_string(),
            })?,
        };

        if data.len() > MAX_FRAME_SIZE {
            return Err(SharedError::FrameTooLarge {
                size: data.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        Ok(data)
    }

    pub fn decode(self, data: &[u8]) -> SharedResult<Frame> {
        match self {
            WireFormat::Bincode => bincode::deserialize(data).map_err(|e| SharedError::DeserializationError {
                message: e.to_string(),
            }),
            WireFormat::Json => serde_json::from_slice(data).map_err(|e| SharedError::DeserializationError {
                message: e.to_string(),
            }),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Bincode => write!(f, "bincode"),
            WireFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bincode" => Ok(WireFormat::Bincode),
            "json" => Ok(WireFormat::Json),
            _ => Err(format!("Unknown wire format: {s}")),
        }
    }
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, format: WireFormat) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
{
    let data = format.encode(frame)?;
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
/// A stream that ends inside a frame is an `UnexpectedEof` I/O error.
pub async fn read_frame<R>(reader: &mut R, format: WireFormat) -> SharedResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame header",
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SharedError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    format.decode(&data).map(Some)
}
