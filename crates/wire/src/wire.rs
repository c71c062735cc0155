// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed JSON codec: 4-byte big-endian length prefix + payload.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::request::Request;
use crate::response::Response;

/// Frames larger than this are rejected before allocation.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors from the framed codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,

    #[error("frame of {0} bytes exceeds maximum")]
    TooLarge(usize),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

async fn read_frame<R>(reader: &mut R, timeout: Duration) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let frame = tokio::time::timeout(timeout, async {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(ProtocolError::TooLarge(len));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;
        Ok(buf)
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(frame)
}

async fn write_frame<W>(writer: &mut W, payload: &[u8], timeout: Duration) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::TooLarge(payload.len()));
    }
    tokio::time::timeout(timeout, async {
        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

fn eof_as_closed(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// Read one request frame (daemon side).
pub async fn read_request<R>(reader: &mut R, timeout: Duration) -> Result<Request, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let buf = read_frame(reader, timeout).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write one response frame (daemon side).
pub async fn write_response<W>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(response)?;
    write_frame(writer, &payload, timeout).await
}

/// Write one request frame (client side).
pub async fn write_request<W>(
    writer: &mut W,
    request: &Request,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(request)?;
    write_frame(writer, &payload, timeout).await
}

/// Read one response frame (client side).
pub async fn read_response<R>(reader: &mut R, timeout: Duration) -> Result<Response, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let buf = read_frame(reader, timeout).await?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
