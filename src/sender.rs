use anyhow::{Context, Result};
use serde_json::Value;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info};

/// Send one raw datagram to `target` on a short-lived socket.
///
/// Each send is independent: a fresh ephemeral-port socket per call, no
/// retries, and failures are reported to the caller without touching any
/// receiver state.
pub fn send_bytes(target: SocketAddr, payload: &[u8]) -> Result<usize> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to open transmit socket")?;
    let sent = socket
        .send_to(payload, target)
        .with_context(|| format!("failed to send datagram to {target}"))?;
    debug!("Sent {} bytes to {}", sent, target);
    Ok(sent)
}

/// Send a string as UTF-8 text.
pub fn send_text(target: SocketAddr, message: &str) -> Result<usize> {
    send_bytes(target, message.as_bytes())
}

/// Validate and send a JSON document. Malformed input is rejected before
/// anything touches the network; valid input is re-serialized compactly.
pub fn send_json(target: SocketAddr, document: &str) -> Result<usize> {
    let value: Value = serde_json::from_str(document)
        .with_context(|| format!("invalid JSON, nothing sent: {document:?}"))?;
    let encoded = serde_json::to_string(&value).context("failed to serialize JSON")?;
    let sent = send_text(target, &encoded)?;
    info!("Sent JSON document ({} bytes) to {}", sent, target);
    Ok(sent)
}
