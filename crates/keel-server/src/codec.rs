use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::address::Address;
use crate::error::{ServerError, ServerResult};

/// The first bytes written on every binary protocol connection.
/// Connections that open with anything else are served as HTTP.
pub const PREAMBLE: [u8; 4] = *b"KEL1";

/// Upper bound on a single encoded envelope.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// A message as it travels on the wire: the target actor name, the sender
/// address, a tag naming the message kind, and an opaque serialized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub to: String,
    pub from: Address,
    pub tag: String,
    pub payload: Vec<u8>,
}

/// A protocol message that can be carried as an envelope payload.
pub trait WireMessage: Serialize + DeserializeOwned + Send + 'static {
    fn tag(&self) -> &'static str;
}

pub fn encode_payload<M: Serialize>(message: &M) -> ServerResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        message,
        bincode::config::standard(),
    )?)
}

pub fn decode_payload<M: DeserializeOwned>(bytes: &[u8]) -> ServerResult<M> {
    let (message, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(message)
}

/// Encode an envelope as a length-prefixed frame.
pub fn encode_frame(envelope: &Envelope) -> ServerResult<Bytes> {
    let body = encode_payload(envelope)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ServerError::FrameTooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Read one envelope from the stream.
/// Returns [None] when the peer closes the connection at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> ServerResult<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ServerError::FrameTooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_payload(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(payload: Vec<u8>) -> Envelope {
        Envelope {
            to: "master".to_string(),
            from: Address::new("127.0.0.1", 5051, "slave"),
            tag: "RegisterSlave".to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let sent = envelope(b"hello".to_vec());
        let frame = encode_frame(&sent).unwrap();
        let mut reader = std::io::Cursor::new(frame.to_vec());
        let received = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(received.to, sent.to);
        assert_eq!(received.from, sent.from);
        assert_eq!(received.tag, sent.tag);
        assert_eq!(received.payload, sent.payload);
        // The stream is exhausted at a frame boundary.
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let sent = envelope(vec![0u8; MAX_FRAME_SIZE + 1]);
        assert!(matches!(
            encode_frame(&sent),
            Err(ServerError::FrameTooLarge(_))
        ));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::to_be_bytes(MAX_FRAME_SIZE as u32 + 1));
        let mut reader = std::io::Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ServerError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let sent = envelope(b"partial".to_vec());
        let frame = encode_frame(&sent).unwrap();
        let mut reader = std::io::Cursor::new(frame[..frame.len() - 2].to_vec());
        assert!(read_frame(&mut reader).await.is_err());
    }
}
