//! Wire Framing
//!
//! Every message on the wire is a 4-byte big-endian length prefix followed
//! by exactly that many payload bytes. A zero length, a length above the
//! frame cap, or a connection closed mid-frame is fatal for that
//! connection only - the reader reports the fault and the connection is
//! torn down through the ordinary cascade.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload.
///
/// The largest legitimate payload is a login snapshot carrying the chat
/// history; 1 MiB leaves two orders of magnitude of headroom while keeping
/// a hostile length prefix from forcing a giant allocation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing faults. All of them are connection-local.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Underlying socket error or connection closed mid-frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer declared a zero-length frame.
    #[error("Zero-length frame")]
    ZeroLength,

    /// The peer declared a frame larger than [`MAX_FRAME_LEN`].
    #[error("Frame of {0} bytes exceeds the cap")]
    Oversized(usize),
}

/// Read one length-prefixed frame, returning its payload bytes.
///
/// Blocks until a whole frame arrives; an EOF before the declared byte
/// count surfaces as [`FramingError::Io`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let declared = reader.read_u32().await? as usize;

    if declared == 0 {
        return Err(FramingError::ZeroLength);
    }
    if declared > MAX_FRAME_LEN {
        return Err(FramingError::Oversized(declared));
    }

    let mut payload = vec![0; declared];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_frame(&mut client, b"hello maze").await.unwrap();
        let payload = read_frame(&mut server).await.unwrap();

        assert_eq!(payload, b"hello maze");
    }

    #[tokio::test]
    async fn test_multiple_frames_preserve_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_frame(&mut client, b"first").await.unwrap();
        write_frame(&mut client, b"second").await.unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut server).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_zero_length_is_fatal() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_u32(0).await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FramingError::ZeroLength)));
    }

    #[tokio::test]
    async fn test_oversized_is_fatal() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_u32(u32::MAX).await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FramingError::Oversized(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_fatal() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Declare 100 bytes but deliver only 3, then hang up.
        client.write_u32(100).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FramingError::Io(_))));
    }

    #[tokio::test]
    async fn test_eof_before_prefix_is_io_fault() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(FramingError::Io(_))));
    }
}
