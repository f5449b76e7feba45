// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket client for the taskd protocol.

use std::path::PathBuf;
use std::time::Duration;
use taskd_daemon::protocol::{
    decode, encode, read_message, write_message, ProtocolError, DEFAULT_TIMEOUT,
};
use taskd_daemon::{Request, Response};
use thiserror::Error;
use tokio::net::UnixStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(std::io::Error),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve the daemon socket path.
pub fn socket_path(state_dir: Option<PathBuf>) -> Result<PathBuf, String> {
    let root = match state_dir {
        Some(dir) => dir,
        None => taskd_daemon::env::state_dir().map_err(|e| e.to_string())?,
    };
    Ok(root.join("taskd.sock"))
}

/// Send one request and read its response.
pub async fn roundtrip(socket: &PathBuf, request: &Request) -> Result<Response, ClientError> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket))
        .await
        .map_err(|_| ClientError::ConnectTimeout)?
        .map_err(ClientError::Connect)?;

    let payload = encode(request)?;
    write_message(&mut stream, &payload).await?;

    let bytes = tokio::time::timeout(DEFAULT_TIMEOUT, read_message(&mut stream))
        .await
        .map_err(|_| ClientError::Protocol(ProtocolError::Timeout))??;
    Ok(decode(&bytes)?)
}
