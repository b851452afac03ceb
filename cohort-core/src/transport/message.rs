//! Wire format shared by peer client and server
//!
//! Each frame is a 4-byte big-endian length prefix followed by a bincode
//! payload. Oversized frames are rejected before allocation.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CohortError, Result};
use crate::membership::MemberIdentity;

/// Upper bound on one frame's payload
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Requests a member sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerRequest {
    /// Liveness probe
    Ping,
    /// Introduce the sender so the receiver can dial back
    Register { member: MemberIdentity },
    /// Placement push from the group leader
    Rebalance {
        member_number: u32,
        total_members: u32,
    },
    /// Sender is releasing the connection
    Close,
}

/// Replies a peer sends back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerResponse {
    Ok,
    Error { message: String },
}

/// Write one frame. `peer` labels transport errors.
pub async fn write_frame<W, T>(writer: &mut W, peer: &str, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(|e| CohortError::InvalidMessage {
        reason: e.to_string(),
    })?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CohortError::FrameTooLarge {
            len: payload.len(),
            limit: MAX_FRAME_LEN,
        });
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);

    writer
        .write_all(&frame)
        .await
        .map_err(|e| transport_error(peer, &e))?;
    writer.flush().await.map_err(|e| transport_error(peer, &e))?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean close at a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R, peer: &str) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport_error(peer, &e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CohortError::FrameTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }

    let mut payload = BytesMut::zeroed(len);
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| transport_error(peer, &e))?;

    let message = bincode::deserialize(&payload).map_err(|e| CohortError::InvalidMessage {
        reason: e.to_string(),
    })?;
    Ok(Some(message))
}

fn transport_error(peer: &str, e: &std::io::Error) -> CohortError {
    CohortError::TransportFailure {
        peer: peer.into(),
        message: e.to_string(),
    }
}
