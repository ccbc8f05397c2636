//! Length-prefixed framing for the gateway stream protocol
//!
//! TCP provides no message boundaries, so every message is prefixed with a
//! u32 big-endian payload length. Frames are at least 1 byte and at most
//! 64 KiB; anything outside that range is a protocol violation that tears
//! the connection down.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size per frame
pub const MAX_FRAME: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame length {0} exceeds maximum {MAX_FRAME}")]
    TooLarge(usize),
    #[error("zero-length frame")]
    Empty,
}

/// Write one framed payload
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    if payload.len() > MAX_FRAME {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed payload. Returns `None` on a clean EOF before the
/// length prefix (remote closed between messages).
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > MAX_FRAME {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"hello").await.unwrap();
        write_frame(&mut client, b"world!").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"hello");
        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"world!");
        // Clean EOF between messages
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = tokio::io::duplex(16);
        let payload = vec![0u8; MAX_FRAME + 1];
        assert!(matches!(
            write_frame(&mut client, &payload).await,
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected_on_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &u32::MAX.to_be_bytes())
            .await
            .unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server).await,
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &0u32.to_be_bytes())
            .await
            .unwrap();
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(FrameError::Empty)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error_not_a_hang() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"abc")
            .await
            .unwrap();
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(FrameError::Io(_))));
    }
}
