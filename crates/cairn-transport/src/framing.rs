//! Length-prefixed message framing.
//!
//! Every message on a Cairn stream is framed as `[length:4 LE][data:length]`.
//! One RPC exchange is exactly one frame written by the initiator followed by
//! exactly one frame written by the responder.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Maximum size of a single frame payload.
pub const MAX_FRAME_SIZE: usize = 65536;

/// Write one length-prefixed frame.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if `data` exceeds
/// [`MAX_FRAME_SIZE`], or [`TransportError::Io`] if the write fails.
pub async fn write_frame<W>(stream: &mut W, data: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len = data.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if the announced length exceeds
/// [`MAX_FRAME_SIZE`], or [`TransportError::Io`] if the stream ends early.
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(MAX_FRAME_SIZE * 2);

        write_frame(&mut client, b"hello cairn").await.expect("write");
        let frame = read_frame(&mut server).await.expect("read");
        assert_eq!(frame, b"hello cairn");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"").await.expect("write");
        let frame = read_frame(&mut server).await.expect("read");
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (mut client, _server) = tokio::io::duplex(64);
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        let result = write_frame(&mut client, &big).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_announced_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let bogus_len = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &bogus_len)
            .await
            .expect("write");
        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_truncated_stream_errors() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = 10u32.to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len)
            .await
            .expect("write");
        tokio::io::AsyncWriteExt::write_all(&mut client, b"short")
            .await
            .expect("write");
        drop(client);
        let result = read_frame(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"one").await.expect("write");
        write_frame(&mut client, b"two").await.expect("write");
        assert_eq!(read_frame(&mut server).await.expect("read"), b"one");
        assert_eq!(read_frame(&mut server).await.expect("read"), b"two");
    }
}
