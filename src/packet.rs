use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::net::SocketAddr;

use crate::analysis::ContentAnalysis;

/// Everything known about one received datagram. Built once per packet and
/// handed to the presentation sink; no history is retained beyond the
/// aggregator's running counters.
#[derive(Debug, Clone, Serialize)]
pub struct PacketRecord {
    pub received_at: DateTime<Utc>,
    pub sender: SocketAddr,
    /// 1-based ordinal in receipt order, scoped to one receiver session
    pub sequence: u64,
    pub size_bytes: usize,
    pub cumulative_bytes: u64,
    pub raw_hex: String,
    pub content: ContentAnalysis,
}

/// Lowercase hex rendering of a payload, for diagnostics.
pub fn to_hex(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len() * 2);
    for byte in payload {
        // Writing into a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x00, 0x0f, 0xde, 0xad]), "000fdead");
    }
}
