//! CBOR encoding and length-prefixed framing.
//!
//! Wire format for streams: `[length: u32 LE][CBOR Envelope]`.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::ProtoError, message::Envelope};

/// Maximum encoded envelope size: 1 MiB. Guards against allocation bombs.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Encode a value as CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, ProtoError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| ProtoError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode a CBOR value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Write one length-prefixed envelope and flush.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode(envelope)?;
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if size > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge { size, max: MAX_FRAME_SIZE });
    }

    writer.write_all(&size.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed envelope.
///
/// Returns `ProtoError::Io` with `UnexpectedEof` when the stream closes
/// between frames.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let size = u32::from_le_bytes(len_buf);

    if size > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge { size, max: MAX_FRAME_SIZE });
    }

    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;
    decode(&payload)
}
