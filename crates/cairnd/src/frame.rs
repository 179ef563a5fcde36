//! Frame codec — length-prefixed payloads over TCP.
//!
//! The wire format is described in `cairn_core::wire`: a `u32` little-endian
//! length prefix, then the payload. An empty payload is the null sentinel.
//! A clean close between frames is a normal end of conversation and reads
//! as `None`; a close inside a frame is an error.

use std::io::{Error, ErrorKind};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use cairn_core::wire::{WireError, MAX_FRAME};

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed inside a frame prefix",
            ));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME {
        return Err(Error::new(
            ErrorKind::InvalidData,
            WireError::FrameTooLarge(len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Write the null sentinel — an empty frame meaning "cannot serve".
pub async fn write_null<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &[]).await
}
