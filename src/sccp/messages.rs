//! SCCP message types and the connectionless/service message bodies (§3.1, §4.1).

use super::address::SccpAddress;
use crate::errors::SccpError;
use crate::types::{PointCodeType, ProtocolClass, Segmentation};
use bytes::Bytes;

/// Wire-level SCCP message type octet (§3.1, §4.5 GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Cr = 0x01,
    Cc = 0x02,
    Cref = 0x03,
    Rlsd = 0x04,
    Rlc = 0x05,
    Dt1 = 0x06,
    Dt2 = 0x07,
    Ak = 0x08,
    Udt = 0x09,
    Udts = 0x0A,
    Ed = 0x0B,
    Ea = 0x0C,
    Rsr = 0x0D,
    Rsc = 0x0E,
    Err = 0x0F,
    It = 0x10,
    Xudt = 0x11,
    Xudts = 0x12,
    Ludt = 0x13,
    Ludts = 0x14,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => Self::Cr,
            0x02 => Self::Cc,
            0x03 => Self::Cref,
            0x04 => Self::Rlsd,
            0x05 => Self::Rlc,
            0x06 => Self::Dt1,
            0x07 => Self::Dt2,
            0x08 => Self::Ak,
            0x09 => Self::Udt,
            0x0A => Self::Udts,
            0x0B => Self::Ed,
            0x0C => Self::Ea,
            0x0D => Self::Rsr,
            0x0E => Self::Rsc,
            0x0F => Self::Err,
            0x10 => Self::It,
            0x11 => Self::Xudt,
            0x12 => Self::Xudts,
            0x13 => Self::Ludt,
            0x14 => Self::Ludts,
            _ => return None,
        })
    }

    /// Service ("return") counterpart of a connectionless data type, used
    /// when constructing UDTS/XUDTS/LUDTS (§4.4 `returnMessage`).
    pub fn service_variant(&self) -> Option<Self> {
        match self {
            Self::Udt => Some(Self::Udts),
            Self::Xudt => Some(Self::Xudts),
            Self::Ludt => Some(Self::Ludts),
            _ => None,
        }
    }

    pub fn is_long_data(&self) -> bool {
        matches!(self, Self::Ludt | Self::Ludts)
    }
}

/// Return-cause taxonomy lifted from Q.713 (§4.4), wire values preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReturnCause {
    NoTranslationAddressNature = 0,
    NoTranslationSpecificAddress = 1,
    SubsystemCongestion = 2,
    SubsystemFailure = 3,
    UnequippedUser = 4,
    MtpFailure = 5,
    NetworkCongestion = 6,
    Unqualified = 7,
    ErrorInMessageTransport = 8,
    ErrorInLocalProcessing = 9,
    DestinationCanNotPerformReassembly = 10,
    SccpFailure = 11,
    HopCounterViolation = 12,
    SegmentationNotSupported = 13,
    SegmentationFailure = 14,
    // ANSI-only values.
    AnsiReserved15 = 15,
    AnsiReserved16 = 16,
    AnsiReserved17 = 17,
    AnsiReserved18 = 18,
    AnsiReserved19 = 19,
    AnsiReserved20 = 20,
    AnsiReserved21 = 21,
    AnsiReserved22 = 22,
}

impl ReturnCause {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// A connectionless SCCP message and the small set of connection-oriented
/// shapes this crate needs only enough of to reject unexpected CR (§1
/// Non-goals).
#[derive(Debug, Clone)]
pub enum SccpMessage {
    /// Unitdata.
    Udt {
        protocol_class: ProtocolClass,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
    },
    /// Unitdata Service (returned on routing/subsystem failure).
    Udts {
        return_cause: ReturnCause,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
    },
    /// Extended Unitdata.
    Xudt {
        protocol_class: ProtocolClass,
        hop_counter: u8,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
        segmentation: Option<Segmentation>,
    },
    /// Extended Unitdata Service.
    Xudts {
        return_cause: ReturnCause,
        hop_counter: u8,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
        segmentation: Option<Segmentation>,
    },
    /// Long Unitdata (two-octet pointers).
    Ludt {
        protocol_class: ProtocolClass,
        hop_counter: u8,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
        segmentation: Option<Segmentation>,
    },
    /// Long Unitdata Service.
    Ludts {
        return_cause: ReturnCause,
        hop_counter: u8,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
        segmentation: Option<Segmentation>,
    },
    /// Connection Request — this crate only ever replies with `Cref`.
    Cr { source_local_reference: u32, protocol_class: ProtocolClass, called_party: SccpAddress },
    /// Connection Refused.
    Cref { destination_local_reference: u32, refusal_cause: u8 },
}

impl SccpMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Udt { .. } => MessageType::Udt,
            Self::Udts { .. } => MessageType::Udts,
            Self::Xudt { .. } => MessageType::Xudt,
            Self::Xudts { .. } => MessageType::Xudts,
            Self::Ludt { .. } => MessageType::Ludt,
            Self::Ludts { .. } => MessageType::Ludts,
            Self::Cr { .. } => MessageType::Cr,
            Self::Cref { .. } => MessageType::Cref,
        }
    }

    pub fn called_party(&self) -> Option<&SccpAddress> {
        match self {
            Self::Udt { called_party, .. }
            | Self::Udts { called_party, .. }
            | Self::Xudt { called_party, .. }
            | Self::Xudts { called_party, .. }
            | Self::Ludt { called_party, .. }
            | Self::Ludts { called_party, .. } => Some(called_party),
            Self::Cr { called_party, .. } => Some(called_party),
            Self::Cref { .. } => None,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Udt { data, .. }
            | Self::Udts { data, .. }
            | Self::Xudt { data, .. }
            | Self::Xudts { data, .. }
            | Self::Ludt { data, .. }
            | Self::Ludts { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Build the service ("return") message for a failed connectionless
    /// delivery per §4.4 `returnMessage`: swap addresses, force
    /// Importance=3 (tracked at the codec layer, not modelled here), reset
    /// HopCounter, carry the (possibly reassembled) original payload.
    pub fn into_service(
        self,
        cause: ReturnCause,
        default_hop_counter: u8,
    ) -> Result<SccpMessage, SccpError> {
        match self {
            Self::Udt { called_party, calling_party, data, .. } => Ok(Self::Udts {
                return_cause: cause,
                called_party: calling_party,
                calling_party: called_party,
                data,
            }),
            Self::Xudt { called_party, calling_party, data, .. } => Ok(Self::Xudts {
                return_cause: cause,
                hop_counter: default_hop_counter,
                called_party: calling_party,
                calling_party: called_party,
                data,
                segmentation: None,
            }),
            Self::Ludt { called_party, calling_party, data, .. } => Ok(Self::Ludts {
                return_cause: cause,
                hop_counter: default_hop_counter,
                called_party: calling_party,
                calling_party: called_party,
                data,
                segmentation: None,
            }),
            other => Err(SccpError::InvalidMessage(format!(
                "{:?} has no service variant",
                other.message_type()
            ))),
        }
    }

    pub fn variant(&self) -> PointCodeType {
        // Both called and calling parties are always encoded for the same
        // variant in a single message; called-party is authoritative.
        match self.called_party().and_then(|a| a.point_code) {
            Some(pc) => pc.pc_type(),
            None => PointCodeType::Itu,
        }
    }
}
