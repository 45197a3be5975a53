//! MTU-driven message-type selection, segmentation, and reassembly (§4.3).

use super::address::SccpAddress;
use super::codec::MAX_OPT_LEN;
use super::messages::{MessageType, SccpMessage};
use crate::errors::SccpError;
use crate::types::{ProtocolClass, Segmentation};
use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The protocol's 4-bit remaining-segments counter caps a stream at 16
/// segments.
pub const MAX_SEGMENTS: u8 = crate::MAX_SCCP_SEGMENTS;

/// Rough per-address size estimator used only to size MTU ceilings; the
/// real encoded length is always re-checked by the codec.
fn estimate_address_len(addr: &SccpAddress) -> usize {
    let mut len = 1; // address indicator
    if addr.point_code.is_some() {
        len += addr.point_code.map(|pc| pc.wire_len()).unwrap_or(2);
    }
    if addr.subsystem_number.is_some() {
        len += 1;
    }
    if let Some(gt) = &addr.global_title {
        len += 3 + (gt.digits().len() + 1) / 2;
    }
    len
}

/// The three MTU-derived ceilings a sender chooses between (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct MtuLimits {
    pub udt_max: usize,
    pub xudt_max: usize,
    pub ludt_max: usize,
}

/// Compute `udt_max`/`xudt_max`/`ludt_max` from the route MTU and the
/// addresses that will be encoded, mirroring `SS7SCCP::getMaxDataLen`.
pub fn max_data_len(
    route_mtu: usize,
    called: &SccpAddress,
    calling: &SccpAddress,
) -> MtuLimits {
    let addr_overhead = estimate_address_len(called) + estimate_address_len(calling);
    // routing label + SIO are MTP's concern and already subtracted from
    // the MTU the transport reports; what's left is the SCCP payload
    // budget for type + class + pointers + addresses + data.
    let udt_fixed = 1 + 1 + 3; // type, class, 3 one-octet pointers
    let xudt_fixed = 1 + 1 + 1 + 4; // + hop counter, + optional pointer
    let ludt_fixed = 1 + 1 + 1 + 8; // two-octet pointers

    // UDT's pointers are one octet wide too, same ceiling as XUDT.
    let udt_max = route_mtu.saturating_sub(udt_fixed + addr_overhead + 3).min(255);
    // XUDT pointers are one octet wide, so its data length can never
    // exceed 255 regardless of how generous the route MTU is; beyond
    // that only LUDT's two-octet pointers can carry the payload.
    let xudt_max = route_mtu
        .saturating_sub(xudt_fixed + addr_overhead + 3 + MAX_OPT_LEN)
        .min(255);
    let ludt_max = if route_mtu > 272 {
        route_mtu.saturating_sub(ludt_fixed + addr_overhead + 6 + MAX_OPT_LEN)
    } else {
        0
    };

    MtuLimits { udt_max, xudt_max, ludt_max }
}

/// Split a payload into segment lengths per §4.3: the first segment is as
/// large as possible but reserves at least 2 octets for subsequent
/// segments; later segments are each `<= data_len`.
pub fn data_segments(total_len: usize, data_len: usize) -> Result<Vec<usize>, SccpError> {
    const MIN_DATA_SIZE: usize = 2;
    if data_len == 0 {
        return Err(SccpError::SegmentationFailure("zero-length segment size".into()));
    }
    if total_len > (MAX_SEGMENTS as usize) * data_len {
        return Err(SccpError::SegmentationFailure(format!(
            "{total_len} octets exceed {} segments of {data_len}",
            MAX_SEGMENTS
        )));
    }

    let mut first = data_len.saturating_sub(1).max(1);
    if first >= total_len {
        return Ok(vec![total_len]);
    }
    let remainder = total_len - first;
    if remainder < MIN_DATA_SIZE && first > MIN_DATA_SIZE {
        first -= MIN_DATA_SIZE - remainder;
    }

    let mut sizes = vec![first];
    let mut left = total_len - first;
    while left > 0 {
        let chunk = left.min(data_len);
        sizes.push(chunk);
        left -= chunk;
    }
    Ok(sizes)
}

/// Split `payload` into `(segment-bytes, Segmentation IE)` pairs. Encode
/// failures of an intermediate segment abort the whole stream without
/// rolling back segments already produced (§9 Open Questions).
pub fn segment_payload(
    payload: &Bytes,
    data_len: usize,
    protocol_class: ProtocolClass,
) -> Result<Vec<(Bytes, Segmentation)>, SccpError> {
    let sizes = data_segments(payload.len(), data_len)?;
    let n = sizes.len();
    if n > MAX_SEGMENTS as usize {
        return Err(SccpError::SegmentationFailure(format!("{n} segments exceeds {MAX_SEGMENTS}")));
    }
    let reference: u32 = rand::thread_rng().gen_range(0..=0x00FF_FFFF);

    let mut out = Vec::with_capacity(n);
    let mut offset = 0;
    for (i, size) in sizes.iter().enumerate() {
        let chunk = payload.slice(offset..offset + size);
        offset += size;
        let remaining = (n - 1 - i) as u8;
        let seg = Segmentation {
            first: i == 0,
            // Protocol class is forced to 1 for a segmented stream (§4.3).
            class: if protocol_class.class == 0 { 1 } else { protocol_class.class },
            remaining_segments: remaining,
            reference,
        };
        out.push((chunk, seg));
    }
    Ok(out)
}

/// Key identifying a reassembly stream (§3.1): routing-label OPC/DPC, the
/// calling-party-address sub-params, and the segmentation-local-reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub opc: u32,
    pub dpc: u32,
    pub calling_party_key: String,
    pub reference: u32,
}

struct ReassemblyEntry {
    payload: Vec<u8>,
    remaining: u8,
    first_segment_len: usize,
    deadline: Instant,
    message_return: bool,
    original: Option<SccpMessage>,
}

/// Reassembly table; DashMap gives concurrent per-key access matching the
/// segmentation engine's receive-side hot path.
pub struct ReassemblyTable {
    entries: DashMap<ReassemblyKey, ReassemblyEntry>,
    timeout: Duration,
}

/// Outcome of feeding one segment into the reassembly table.
pub enum ReassemblyOutcome {
    /// More segments are expected.
    Pending,
    /// The final segment arrived; here is the reconstructed payload and
    /// the `MessageReturn` flag carried by the first segment (§4.3: later
    /// segments always carry it as false, so it must be tracked from the
    /// opening segment for the reassembled message as a whole).
    Complete { payload: Bytes, message_return: bool },
    /// A segment violated the expected remaining-count or length
    /// invariant; the entry was dropped. Carries whether the caller
    /// should emit a service message (`MessageReturn` was set) and the
    /// partial payload to do so with.
    Rejected { message_return: bool, partial: Bytes },
}

impl ReassemblyTable {
    pub fn new(timeout: Duration) -> Self {
        Self { entries: DashMap::new(), timeout }
    }

    /// Feed one segment's data + Segmentation IE into the table.
    pub fn feed(
        &self,
        key: ReassemblyKey,
        seg: Segmentation,
        chunk: &[u8],
        message_return: bool,
    ) -> ReassemblyOutcome {
        if seg.first {
            self.entries.insert(
                key,
                ReassemblyEntry {
                    payload: chunk.to_vec(),
                    remaining: seg.remaining_segments,
                    first_segment_len: chunk.len(),
                    deadline: Instant::now() + self.timeout,
                    message_return,
                    original: None,
                },
            );
            return ReassemblyOutcome::Pending;
        }

        let Some(mut entry) = self.entries.get_mut(&key) else {
            debug!("segment arrived with no matching reassembly entry (stale/expired)");
            return ReassemblyOutcome::Rejected { message_return, partial: Bytes::new() };
        };

        if Instant::now() > entry.deadline {
            drop(entry);
            self.entries.remove(&key);
            return ReassemblyOutcome::Rejected { message_return, partial: Bytes::new() };
        }

        let expected = entry.remaining.wrapping_sub(1);
        if seg.remaining_segments != expected || chunk.len() > entry.first_segment_len {
            warn!("reassembly invariant violated, dropping entry");
            let partial = Bytes::copy_from_slice(&entry.payload);
            let mr = entry.message_return;
            drop(entry);
            self.entries.remove(&key);
            return ReassemblyOutcome::Rejected { message_return: mr, partial };
        }

        entry.payload.extend_from_slice(chunk);
        entry.remaining = seg.remaining_segments;

        if seg.remaining_segments == 0 {
            let payload = Bytes::copy_from_slice(&entry.payload);
            let message_return = entry.message_return;
            drop(entry);
            self.entries.remove(&key);
            ReassemblyOutcome::Complete { payload, message_return }
        } else {
            ReassemblyOutcome::Pending
        }
    }

    /// Drop entries past their deadline; called from the timer tick.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<ReassemblyKey> = self
            .entries
            .iter()
            .filter(|e| now > e.deadline)
            .map(|e| e.key().clone())
            .collect();
        let n = stale.len();
        for k in stale {
            self.entries.remove(&k);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pick the connectionless message type a payload fits in, given MTU
/// limits, per the §4.3 selection order.
pub fn select_message_type(payload_len: usize, limits: MtuLimits) -> MessageType {
    if payload_len <= limits.udt_max {
        MessageType::Udt
    } else if payload_len <= limits.xudt_max {
        MessageType::Xudt
    } else if limits.ludt_max > 0 && payload_len <= limits.ludt_max {
        MessageType::Ludt
    } else {
        MessageType::Xudt // caller must segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_respect_the_sixteen_segment_ceiling() {
        let err = data_segments(17 * 100, 100).unwrap_err();
        assert!(matches!(err, SccpError::SegmentationFailure(_)));
    }

    #[test]
    fn first_segment_is_at_least_as_large_as_later_ones() {
        let sizes = data_segments(300, 210).unwrap();
        assert!(sizes[0] >= *sizes[1..].iter().max().unwrap());
        assert_eq!(sizes.iter().sum::<usize>(), 300);
    }

    #[test]
    fn segment_payload_shares_one_reference_and_counts_down() {
        let payload = Bytes::from(vec![7u8; 300]);
        let segs = segment_payload(&payload, 210, ProtocolClass::CLASS_0).unwrap();
        let reference = segs[0].1.reference;
        assert!(segs.iter().all(|(_, s)| s.reference == reference));
        assert!(segs[0].1.first);
        assert!(!segs[1].1.first);
        assert_eq!(segs.last().unwrap().1.remaining_segments, 0);
        assert!(segs.windows(2).all(|w| w[0].1.remaining_segments > w[1].1.remaining_segments));
    }

    #[test]
    fn reassembly_reconstructs_in_order_segments() {
        let table = ReassemblyTable::new(Duration::from_secs(10));
        let key = ReassemblyKey { opc: 1, dpc: 2, calling_party_key: "8".into(), reference: 99 };
        let seg0 = Segmentation { first: true, class: 1, remaining_segments: 1, reference: 99 };
        let seg1 = Segmentation { first: false, class: 1, remaining_segments: 0, reference: 99 };

        let r0 = table.feed(key.clone(), seg0, b"hello ", false);
        assert!(matches!(r0, ReassemblyOutcome::Pending));
        let r1 = table.feed(key, seg1, b"world", false);
        match r1 {
            ReassemblyOutcome::Complete { payload, .. } => assert_eq!(&payload[..], b"hello world"),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn reassembly_rejects_out_of_order_remaining_count() {
        let table = ReassemblyTable::new(Duration::from_secs(10));
        let key = ReassemblyKey { opc: 1, dpc: 2, calling_party_key: "8".into(), reference: 5 };
        let seg0 = Segmentation { first: true, class: 1, remaining_segments: 2, reference: 5 };
        let bad_seg1 = Segmentation { first: false, class: 1, remaining_segments: 2, reference: 5 };

        table.feed(key.clone(), seg0, b"abc", true);
        let r1 = table.feed(key, bad_seg1, b"def", true);
        assert!(matches!(r1, ReassemblyOutcome::Rejected { message_return: true, .. }));
    }

    #[test]
    fn segment_arriving_after_the_deadline_is_rejected() {
        let table = ReassemblyTable::new(Duration::from_millis(5));
        let key = ReassemblyKey { opc: 1, dpc: 2, calling_party_key: "8".into(), reference: 7 };
        let seg0 = Segmentation { first: true, class: 1, remaining_segments: 1, reference: 7 };
        let seg1 = Segmentation { first: false, class: 1, remaining_segments: 0, reference: 7 };

        table.feed(key.clone(), seg0, b"abc", false);
        std::thread::sleep(Duration::from_millis(20));
        let r1 = table.feed(key, seg1, b"def", false);
        assert!(matches!(r1, ReassemblyOutcome::Rejected { message_return: false, .. }));
    }
}
