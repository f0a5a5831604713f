use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

/// Returned by [`StatsAggregator::record`] for each packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordReceipt {
    /// 1-based ordinal of this packet in receipt order
    pub sequence: u64,
    /// Total bytes received, inclusive of this packet
    pub cumulative_bytes: u64,
}

/// Point-in-time view of the running statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub runtime_seconds: f64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub average_packet_size: f64,
    pub packets_per_second: f64,
    pub last_packet_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    packet_count: u64,
    total_bytes: u64,
    last_packet_at: Option<DateTime<Utc>>,
}

/// Running traffic statistics for one receiver session.
///
/// Counters only ever grow. All mutation goes through [`record`], which holds
/// the lock for the whole update so sequence number and cumulative byte count
/// stay consistent under concurrent callers.
///
/// [`record`]: StatsAggregator::record
#[derive(Debug)]
pub struct StatsAggregator {
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Count one received packet of `size_bytes` seen at `at`.
    pub fn record(&self, size_bytes: usize, at: DateTime<Utc>) -> RecordReceipt {
        let mut counters = self.counters.lock();
        counters.packet_count += 1;
        counters.total_bytes += size_bytes as u64;
        counters.last_packet_at = Some(at);
        RecordReceipt {
            sequence: counters.packet_count,
            cumulative_bytes: counters.total_bytes,
        }
    }

    /// Derive the rate statistics without touching the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let (total_packets, total_bytes, last_packet_at) = {
            let counters = self.counters.lock();
            (
                counters.packet_count,
                counters.total_bytes,
                counters.last_packet_at,
            )
        };
        let runtime_seconds = self.started.elapsed().as_secs_f64();

        let average_packet_size = if total_packets > 0 {
            total_bytes as f64 / total_packets as f64
        } else {
            0.0
        };
        let packets_per_second = if runtime_seconds > 0.0 {
            total_packets as f64 / runtime_seconds
        } else {
            0.0
        };

        StatsSnapshot {
            runtime_seconds,
            total_packets,
            total_bytes,
            average_packet_size,
            packets_per_second,
            last_packet_at,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_sequences_and_totals() {
        let stats = StatsAggregator::new();
        let t1 = Utc::now();
        let t2 = Utc::now();

        let first = stats.record(10, t1);
        assert_eq!(first.sequence, 1);
        assert_eq!(first.cumulative_bytes, 10);

        let second = stats.record(20, t2);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.cumulative_bytes, 30);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_packets, 2);
        assert_eq!(snapshot.total_bytes, 30);
        assert_eq!(snapshot.average_packet_size, 15.0);
        assert_eq!(snapshot.last_packet_at, Some(t2));
    }

    #[test]
    fn test_empty_snapshot_divides_safely() {
        let stats = StatsAggregator::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_packets, 0);
        assert_eq!(snapshot.average_packet_size, 0.0);
        assert_eq!(snapshot.packets_per_second, 0.0);
        assert_eq!(snapshot.last_packet_at, None);
    }

    #[test]
    fn test_concurrent_records_lose_no_updates() {
        let stats = Arc::new(StatsAggregator::new());
        let threads = 8;
        let records_per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..records_per_thread {
                        stats.record(i + 1, Utc::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_packets, (threads * records_per_thread) as u64);
        // Each thread i contributed records_per_thread * (i + 1) bytes
        let expected: usize = (0..threads).map(|i| (i + 1) * records_per_thread).sum();
        assert_eq!(snapshot.total_bytes, expected as u64);
    }

    #[test]
    fn test_receipt_pairs_stay_consistent() {
        let stats = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    (0..200)
                        .map(|_| stats.record(7, Utc::now()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut receipts: Vec<RecordReceipt> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        receipts.sort_by_key(|r| r.sequence);

        // Sequences are a permutation of 1..=800 and every cumulative total
        // matches sequence * size exactly
        for (i, receipt) in receipts.iter().enumerate() {
            assert_eq!(receipt.sequence, i as u64 + 1);
            assert_eq!(receipt.cumulative_bytes, receipt.sequence * 7);
        }
    }
}
