/// Length-prefixed JSON framing shared by the tracker client and peer RPC
/// (spec.md §4.6/§4.7): a 4-byte big-endian length prefix followed by a JSON
/// payload. Grounded on the teacher's use of `tokio_util::codec` features
/// (already in its Cargo.toml) generalized from bytes framing to JSON.
use crate::error::{DecentralisError, DecentralisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_json<T: Serialize>(stream: &mut TcpStream, value: &T) -> DecentralisResult<()> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(DecentralisError::PeerCommunication("outgoing frame too large".to_string()));
    }
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .map_err(|e| DecentralisError::PeerCommunication(format!("write length prefix: {e}")))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| DecentralisError::PeerCommunication(format!("write frame body: {e}")))?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(stream: &mut TcpStream) -> DecentralisResult<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| DecentralisError::PeerCommunication(format!("read length prefix: {e}")))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(DecentralisError::PeerCommunication("incoming frame too large".to_string()));
    }
    let mut buf = vec![0u8; len as usize];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| DecentralisError::PeerCommunication(format!("read frame body: {e}")))?;
    serde_json::from_slice(&buf).map_err(|e| DecentralisError::PeerCommunication(format!("decode frame: {e}")))
}
