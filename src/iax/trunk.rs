//! Meta-trunk frame aggregation (§3.2 `IAXMetaTrunkFrame`, §4.7 trunk pump).
//!
//! One aggregator per peer address buffers mini-frame payloads and
//! flushes them as a single UDP datagram on a periodic tick, grounded in
//! `engine.cpp`'s `processTrunkFrames`/`IAXMetaTrunkFrame::timerTick`.

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Configuration bundle consulted when constructing an aggregator or
/// attaching a transaction to one (§3.2 `IAXTrunkInfo`).
#[derive(Debug, Clone, Copy)]
pub struct TrunkInfo {
    pub trunk_timestamps: bool,
    pub trunk_maxlen: usize,
    pub trunk_sendinterval: Duration,
    /// Only start trunking once a second transaction exists to the peer.
    pub trunk_efficientuse: bool,
    pub trunk_in_sync_use_ts: bool,
    pub trunk_in_ts_diff_restart: u32,
}

impl Default for TrunkInfo {
    fn default() -> Self {
        Self {
            trunk_timestamps: true,
            trunk_maxlen: 1400,
            trunk_sendinterval: Duration::from_millis(2),
            trunk_efficientuse: false,
            trunk_in_sync_use_ts: true,
            trunk_in_ts_diff_restart: 0,
        }
    }
}

/// A per-peer mini-frame aggregator. The buffer never exceeds `max_len`
/// octets; it's flushed and emptied when full or when the send interval
/// elapses.
pub struct MetaTrunkFrame {
    pub addr: SocketAddr,
    pub trunk_timestamps: bool,
    pub max_len: usize,
    pub send_interval: Duration,
    buffer: Mutex<BytesMut>,
    last_sent: Mutex<Instant>,
    /// Set once a transaction actually attaches; mirrors the original's
    /// refcount check for whether anything still references this frame.
    referenced: AtomicBool,
}

impl MetaTrunkFrame {
    pub fn new(addr: SocketAddr, info: &TrunkInfo) -> Self {
        Self {
            addr,
            trunk_timestamps: info.trunk_timestamps,
            max_len: info.trunk_maxlen,
            send_interval: info.trunk_sendinterval,
            buffer: Mutex::new(BytesMut::new()),
            last_sent: Mutex::new(Instant::now()),
            referenced: AtomicBool::new(true),
        }
    }

    pub fn mark_unreferenced(&self) {
        self.referenced.store(false, Ordering::SeqCst);
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::SeqCst)
    }

    /// Append one mini-frame's call-number + (optional timestamp) +
    /// payload to the buffer. Returns a flushed datagram if the append
    /// would overflow `max_len`.
    pub fn append(&self, call_no: u16, timestamp: u16, payload: &[u8]) -> Option<Bytes> {
        let entry_len = 2 + if self.trunk_timestamps { 2 } else { 0 } + 2 + payload.len();
        let mut buf = self.buffer.lock().unwrap();
        let overflow = buf.len() + entry_len > self.max_len && !buf.is_empty();
        let flushed = if overflow {
            Some(buf.split().freeze())
        } else {
            None
        };
        buf.put_u16(call_no & 0x7fff);
        if self.trunk_timestamps {
            buf.put_u16(timestamp);
        }
        buf.put_u16(payload.len() as u16);
        buf.put_slice(payload);
        flushed
    }

    /// Flush the buffer if `send_interval` elapsed since the last flush.
    pub fn timer_tick(&self, now: Instant) -> Option<Bytes> {
        let mut last = self.last_sent.lock().unwrap();
        if now.duration_since(*last) < self.send_interval {
            return None;
        }
        *last = now;
        let mut buf = self.buffer.lock().unwrap();
        if buf.is_empty() {
            return None;
        }
        Some(buf.split().freeze())
    }
}

/// The engine-wide collection of per-peer aggregators (`m_trunkList`).
#[derive(Default)]
pub struct TrunkTable {
    frames: DashMap<SocketAddr, Arc<MetaTrunkFrame>>,
}

impl TrunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, addr: SocketAddr, info: &TrunkInfo) -> Arc<MetaTrunkFrame> {
        self.frames
            .entry(addr)
            .or_insert_with(|| Arc::new(MetaTrunkFrame::new(addr, info)))
            .clone()
    }

    /// One `processTrunkFrames` sweep: tick every aggregator, flushing
    /// those whose interval elapsed, and drop aggregators no longer
    /// referenced by any transaction.
    pub fn tick_all(&self, now: Instant) -> Vec<(SocketAddr, Bytes)> {
        let mut flushed = Vec::new();
        let mut dead = Vec::new();
        for entry in self.frames.iter() {
            let frame = entry.value();
            if !frame.is_referenced() {
                dead.push(*entry.key());
                continue;
            }
            if let Some(datagram) = frame.timer_tick(now) {
                flushed.push((frame.addr, datagram));
            }
        }
        for addr in dead {
            self.frames.remove(&addr);
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4569".parse().unwrap()
    }

    #[test]
    fn append_then_tick_flushes_the_buffer() {
        let info = TrunkInfo::default();
        let frame = MetaTrunkFrame::new(addr(), &info);
        assert!(frame.append(10, 0, &[1, 2, 3]).is_none());
        std::thread::sleep(Duration::from_millis(5));
        let flushed = frame.timer_tick(Instant::now());
        assert!(flushed.is_some());
        assert!(!flushed.unwrap().is_empty());
    }

    #[test]
    fn tick_before_interval_elapses_does_not_flush() {
        let info = TrunkInfo {
            trunk_sendinterval: Duration::from_secs(60),
            ..TrunkInfo::default()
        };
        let frame = MetaTrunkFrame::new(addr(), &info);
        frame.append(10, 0, &[1, 2, 3]);
        assert!(frame.timer_tick(Instant::now()).is_none());
    }

    #[test]
    fn buffer_never_exceeds_max_len_before_a_flush() {
        let info = TrunkInfo {
            trunk_maxlen: 10,
            trunk_timestamps: false,
            ..TrunkInfo::default()
        };
        let frame = MetaTrunkFrame::new(addr(), &info);
        assert!(frame.append(1, 0, &[1, 2, 3]).is_none());
        let flushed = frame.append(2, 0, &[4, 5, 6]);
        assert!(flushed.is_some());
    }

    #[test]
    fn unreferenced_aggregator_is_dropped_on_sweep() {
        let table = TrunkTable::new();
        let info = TrunkInfo::default();
        let frame = table.get_or_create(addr(), &info);
        frame.mark_unreferenced();
        assert_eq!(table.len(), 1);
        table.tick_all(Instant::now());
        assert_eq!(table.len(), 0);
    }
}
