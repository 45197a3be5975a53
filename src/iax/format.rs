//! Per-transaction media format negotiation (§4.9).
//!
//! Grounded in `engine.cpp`'s `acceptFormatAndCapability`: intersect the
//! remote's advertised capability with the local engine's capability and
//! any per-call filter, then settle on one format from what remains.

/// The two media kinds a transaction negotiates a format for (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
}

/// One media type's negotiated state: an advertised capability bitmask
/// and the single format chosen from it (0 = none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IaxFormat {
    pub capability: u32,
    pub format: u32,
}

/// Outcome of [`negotiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub capability: u32,
    pub format: u32,
    pub accepted: bool,
}

/// Pick a format from `capability`, preferring `preferred` if it's in the
/// set, else the lowest set bit (`IAXFormat::pickFormat`).
fn pick_format(capability: u32, preferred: u32) -> u32 {
    if preferred != 0 && capability & preferred != 0 {
        return preferred;
    }
    if capability == 0 {
        0
    } else {
        1 << capability.trailing_zeros()
    }
}

/// Mirrors `IAXEngine::acceptFormatAndCapability`.
///
/// `transaction_capability` is this media type's bits of the
/// transaction's advertised capability; `engine_capability` is the
/// engine-wide capability for the same media type; `peer_filter` is an
/// optional additional mask (e.g. from a received frame's capability IE);
/// `remote_format` is the format the peer actually selected;
/// `engine_default` is the engine's own default for this media type
/// (audio: `m_format`, video: 0); `outgoing` selects which direction the
/// result is applied to by the caller.
pub fn negotiate(
    media: MediaType,
    transaction_capability: u32,
    engine_capability: u32,
    peer_filter: Option<u32>,
    remote_format: u32,
    engine_default: u32,
) -> Negotiated {
    let mut capability = transaction_capability & engine_capability;
    if let Some(filter) = peer_filter {
        capability &= filter;
    }
    if capability == 0 {
        return Negotiated {
            capability: 0,
            format: 0,
            accepted: false,
        };
    }
    let format = if remote_format & capability != 0 {
        remote_format
    } else {
        let preferred = match media {
            MediaType::Audio => engine_default,
            MediaType::Video => 0,
        };
        pick_format(capability, preferred)
    };
    Negotiated {
        capability,
        format,
        accepted: format != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_intersection_is_rejected() {
        let result = negotiate(MediaType::Audio, 0b0001, 0b0010, None, 0, 0);
        assert!(!result.accepted);
        assert_eq!(result.capability, 0);
    }

    #[test]
    fn remote_pick_within_intersection_is_honored() {
        let result = negotiate(MediaType::Audio, 0b0111, 0b0110, None, 0b0100, 0);
        assert!(result.accepted);
        assert_eq!(result.format, 0b0100);
    }

    #[test]
    fn falls_back_to_engine_default_when_remote_pick_is_outside_intersection() {
        let result = negotiate(MediaType::Audio, 0b0111, 0b0011, None, 0b0100, 0b0010);
        assert!(result.accepted);
        assert_eq!(result.format, 0b0010);
    }

    #[test]
    fn falls_back_to_lowest_bit_when_no_default_is_in_range() {
        let result = negotiate(MediaType::Video, 0b0110, 0b0110, None, 0b0001, 0);
        assert!(result.accepted);
        assert_eq!(result.format, 0b0010);
    }

    #[test]
    fn peer_filter_further_restricts_capability() {
        let result = negotiate(MediaType::Audio, 0b0111, 0b0111, Some(0b0100), 0b0100, 0);
        assert_eq!(result.capability, 0b0100);
        assert!(result.accepted);
    }
}
