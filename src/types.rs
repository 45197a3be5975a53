//! Common types shared between the SCCP and IAX2 stacks.

use serde::{Deserialize, Serialize};

/// Which point-code variant a [`PointCode`] was built for.
///
/// Comparisons between point codes of different types are not meaningful
/// (§3.1): ITU packs 14 bits into 2 octets, ANSI packs 24 bits into 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointCodeType {
    Itu,
    Ansi,
}

/// A signalling point code, tagged with the variant it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointCode {
    value: u32,
    pc_type: PointCodeType,
}

impl PointCode {
    /// ITU point code from (zone, network, sp) — 3+8+3 bits packed into 14.
    pub fn itu(zone: u8, network: u8, sp: u8) -> Self {
        let value =
            ((zone as u32 & 0x07) << 11) | ((network as u32) << 3) | (sp as u32 & 0x07);
        Self { value: value & 0x3FFF, pc_type: PointCodeType::Itu }
    }

    /// ANSI point code from (network, cluster, member) — 8+8+8 bits.
    pub fn ansi(network: u8, cluster: u8, member: u8) -> Self {
        let value = ((network as u32) << 16) | ((cluster as u32) << 8) | (member as u32);
        Self { value, pc_type: PointCodeType::Ansi }
    }

    /// Build from a raw packed value and an explicit type tag.
    pub fn from_packed(value: u32, pc_type: PointCodeType) -> Self {
        let value = match pc_type {
            PointCodeType::Itu => value & 0x3FFF,
            PointCodeType::Ansi => value & 0x00FF_FFFF,
        };
        Self { value, pc_type }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn pc_type(&self) -> PointCodeType {
        self.pc_type
    }

    /// Octet width of this point code on the wire (§3.1).
    pub fn wire_len(&self) -> usize {
        match self.pc_type {
            PointCodeType::Itu => 2,
            PointCodeType::Ansi => 3,
        }
    }

    /// Encode little-endian into `wire_len()` octets, as the routing label
    /// and SCCP address codecs both require.
    pub fn encode_le(&self) -> Vec<u8> {
        let bytes = self.value.to_le_bytes();
        bytes[..self.wire_len()].to_vec()
    }

    /// Decode from little-endian octets of the given type's wire width.
    pub fn decode_le(buf: &[u8], pc_type: PointCodeType) -> Option<Self> {
        let len = match pc_type {
            PointCodeType::Itu => 2,
            PointCodeType::Ansi => 3,
        };
        if buf.len() < len {
            return None;
        }
        let mut raw = [0u8; 4];
        raw[..len].copy_from_slice(&buf[..len]);
        Some(Self::from_packed(u32::from_le_bytes(raw), pc_type))
    }

    /// Compare two point codes, only meaningful within the same type.
    pub fn same_type_eq(&self, other: &PointCode) -> bool {
        self.pc_type == other.pc_type && self.value == other.value
    }
}

/// Network Indicator carried in the MTP3 SIO octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NetworkIndicator {
    International = 0,
    InternationalSpare = 1,
    National = 2,
    NationalSpare = 3,
}

impl From<u8> for NetworkIndicator {
    fn from(v: u8) -> Self {
        match v & 0x03 {
            0 => Self::International,
            1 => Self::InternationalSpare,
            2 => Self::National,
            _ => Self::NationalSpare,
        }
    }
}

/// SCCP Protocol Class, with the class-1 "return on error" / sequence
/// control bit (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolClass {
    pub class: u8,
    pub return_on_error: bool,
}

impl ProtocolClass {
    pub const CLASS_0: Self = Self { class: 0, return_on_error: false };
    pub const CLASS_1: Self = Self { class: 1, return_on_error: false };

    pub fn with_return_on_error(mut self) -> Self {
        self.return_on_error = true;
        self
    }

    pub fn encode(&self) -> u8 {
        (self.class & 0x0F) | if self.return_on_error { 0x80 } else { 0 }
    }

    pub fn decode(v: u8) -> Self {
        Self { class: v & 0x0F, return_on_error: (v & 0x80) != 0 }
    }
}

/// Numbering Plan for Global Titles (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NumberingPlan {
    Unknown = 0,
    IsdnTelephony = 1, // E.164
    Generic = 2,
    Data = 3, // X.121
    Telex = 4,
    MaritimeMobile = 5,
    LandMobile = 6,
    IsdnMobile = 7,
}

impl NumberingPlan {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x0F {
            1 => Self::IsdnTelephony,
            2 => Self::Generic,
            3 => Self::Data,
            4 => Self::Telex,
            5 => Self::MaritimeMobile,
            6 => Self::LandMobile,
            7 => Self::IsdnMobile,
            _ => Self::Unknown,
        }
    }
}

/// Nature of Address for Global Titles (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NatureOfAddress {
    Unknown = 0,
    SubscriberNumber = 1,
    Reserved = 2,
    NationalSignificant = 3,
    International = 4,
}

impl NatureOfAddress {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x7F {
            1 => Self::SubscriberNumber,
            2 => Self::Reserved,
            3 => Self::NationalSignificant,
            4 => Self::International,
            _ => Self::Unknown,
        }
    }
}

/// Encoding Scheme for Global Title digits (§3.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncodingScheme {
    Unknown = 0,
    BcdOdd = 1,
    BcdEven = 2,
}

impl EncodingScheme {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x0F {
            1 => Self::BcdOdd,
            2 => Self::BcdEven,
            _ => Self::Unknown,
        }
    }

    pub fn is_odd(&self) -> bool {
        matches!(self, Self::BcdOdd)
    }
}

/// Segmentation optional parameter (§3.1, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmentation {
    pub first: bool,
    pub class: u8,
    pub remaining_segments: u8,
    pub reference: u32,
}

/// Reachability state of a remote point code, as consulted from MTP (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Allowed,
    Prohibited,
    Congestion,
    Unknown,
}

/// Reachability state of a subsystem, local or remote (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemState {
    Allowed,
    Prohibited,
    WaitForGrant,
    IgnoreTests,
    Unknown,
}
