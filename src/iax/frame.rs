//! IAX2 wire frames: full frames, mini frames, and the information-element
//! list carried by full frames (§3.2).
//!
//! Mirrors [`super::super::sccp::codec`]'s table-driven shape: a fixed
//! header layout plus an ordered IE list, encoded/decoded by the same
//! pointer-free walk on both sides.

use crate::errors::IaxError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Frame-type octet (`IAXFrame::Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Dtmf,
    VoiceFormat,
    VideoFormat,
    Control,
    Null,
    Iax,
    Text,
    Image,
    Html,
    Cng,
    Modem,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => FrameType::Dtmf,
            2 => FrameType::VoiceFormat,
            3 => FrameType::VideoFormat,
            4 => FrameType::Control,
            5 => FrameType::Null,
            6 => FrameType::Iax,
            7 => FrameType::Text,
            8 => FrameType::Image,
            9 => FrameType::Html,
            10 => FrameType::Cng,
            11 => FrameType::Modem,
            other => FrameType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FrameType::Dtmf => 1,
            FrameType::VoiceFormat => 2,
            FrameType::VideoFormat => 3,
            FrameType::Control => 4,
            FrameType::Null => 5,
            FrameType::Iax => 6,
            FrameType::Text => 7,
            FrameType::Image => 8,
            FrameType::Html => 9,
            FrameType::Cng => 10,
            FrameType::Modem => 11,
            FrameType::Unknown(v) => v,
        }
    }
}

/// IAX control subclasses (`IAXControl`), the ones this engine dispatches
/// on directly. Anything else decodes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IaxControl {
    New,
    Ping,
    Pong,
    Ack,
    Hangup,
    Reject,
    Accept,
    AuthReq,
    AuthRep,
    Inval,
    Lagrq,
    Lagrp,
    RegReq,
    RegAuth,
    RegAck,
    RegRej,
    RegRel,
    VNak,
    Dpreq,
    Dprep,
    Dpoff,
    FwDownl,
    FwData,
    TxReq,
    TxCnt,
    TxAcc,
    TxReady,
    TxRel,
    TxRej,
    Quelch,
    Unquelch,
    Poke,
    PageReq,
    PageAck,
    MwiReq,
    UnsupportF,
    Transfer,
    Provision,
    FwDownld,
    CallToken,
    Unknown(u8),
}

impl IaxControl {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => IaxControl::New,
            2 => IaxControl::Ping,
            3 => IaxControl::Pong,
            4 => IaxControl::Ack,
            5 => IaxControl::Hangup,
            6 => IaxControl::Reject,
            7 => IaxControl::Accept,
            8 => IaxControl::AuthReq,
            9 => IaxControl::AuthRep,
            10 => IaxControl::Inval,
            11 => IaxControl::Lagrq,
            12 => IaxControl::Lagrp,
            13 => IaxControl::RegReq,
            14 => IaxControl::RegAuth,
            15 => IaxControl::RegAck,
            16 => IaxControl::RegRej,
            17 => IaxControl::RegRel,
            18 => IaxControl::VNak,
            19 => IaxControl::Dpreq,
            20 => IaxControl::Dprep,
            21 => IaxControl::Dpoff,
            22 => IaxControl::FwDownl,
            23 => IaxControl::FwData,
            24 => IaxControl::TxReq,
            25 => IaxControl::TxCnt,
            26 => IaxControl::TxAcc,
            27 => IaxControl::TxReady,
            28 => IaxControl::TxRel,
            29 => IaxControl::TxRej,
            30 => IaxControl::Quelch,
            31 => IaxControl::Unquelch,
            32 => IaxControl::Poke,
            33 => IaxControl::PageReq,
            34 => IaxControl::PageAck,
            35 => IaxControl::MwiReq,
            36 => IaxControl::UnsupportF,
            37 => IaxControl::Transfer,
            38 => IaxControl::Provision,
            39 => IaxControl::FwDownld,
            40 => IaxControl::CallToken,
            other => IaxControl::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            IaxControl::New => 1,
            IaxControl::Ping => 2,
            IaxControl::Pong => 3,
            IaxControl::Ack => 4,
            IaxControl::Hangup => 5,
            IaxControl::Reject => 6,
            IaxControl::Accept => 7,
            IaxControl::AuthReq => 8,
            IaxControl::AuthRep => 9,
            IaxControl::Inval => 10,
            IaxControl::Lagrq => 11,
            IaxControl::Lagrp => 12,
            IaxControl::RegReq => 13,
            IaxControl::RegAuth => 14,
            IaxControl::RegAck => 15,
            IaxControl::RegRej => 16,
            IaxControl::RegRel => 17,
            IaxControl::VNak => 18,
            IaxControl::Dpreq => 19,
            IaxControl::Dprep => 20,
            IaxControl::Dpoff => 21,
            IaxControl::FwDownl => 22,
            IaxControl::FwData => 23,
            IaxControl::TxReq => 24,
            IaxControl::TxCnt => 25,
            IaxControl::TxAcc => 26,
            IaxControl::TxReady => 27,
            IaxControl::TxRel => 28,
            IaxControl::TxRej => 29,
            IaxControl::Quelch => 30,
            IaxControl::Unquelch => 31,
            IaxControl::Poke => 32,
            IaxControl::PageReq => 33,
            IaxControl::PageAck => 34,
            IaxControl::MwiReq => 35,
            IaxControl::UnsupportF => 36,
            IaxControl::Transfer => 37,
            IaxControl::Provision => 38,
            IaxControl::FwDownld => 39,
            IaxControl::CallToken => 40,
            IaxControl::Unknown(v) => v,
        }
    }
}

/// Information-element type codes this engine reads by identity; unknown
/// codes pass through as opaque blobs (§3.2 "Information Element list").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IeType {
    Cause,
    CallingNumber,
    CalledNumber,
    Username,
    Password,
    Capability,
    Format,
    Language,
    Version,
    AuthMethods,
    Challenge,
    Md5Result,
    ApparentAddr,
    RefreshSecs,
    CallToken,
    Unknown(u8),
}

impl IeType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            22 => IeType::Cause,
            4 => IeType::CallingNumber,
            6 => IeType::CalledNumber,
            10 => IeType::Username,
            11 => IeType::Password,
            12 => IeType::Capability,
            9 => IeType::Format,
            16 => IeType::Language,
            17 => IeType::Version,
            14 => IeType::AuthMethods,
            15 => IeType::Challenge,
            18 => IeType::Md5Result,
            33 => IeType::ApparentAddr,
            19 => IeType::RefreshSecs,
            54 => IeType::CallToken,
            other => IeType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            IeType::Cause => 22,
            IeType::CallingNumber => 4,
            IeType::CalledNumber => 6,
            IeType::Username => 10,
            IeType::Password => 11,
            IeType::Capability => 12,
            IeType::Format => 9,
            IeType::Language => 16,
            IeType::Version => 17,
            IeType::AuthMethods => 14,
            IeType::Challenge => 15,
            IeType::Md5Result => 18,
            IeType::ApparentAddr => 33,
            IeType::RefreshSecs => 19,
            IeType::CallToken => 54,
            IeType::Unknown(v) => v,
        }
    }
}

/// An opaque IE value; the engine never interprets these beyond the few
/// codes it looks up directly (CALLTOKEN, CAUSE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IeValue {
    Binary(Bytes),
    Text(String),
    Int(u32),
}

impl IeValue {
    pub fn as_bytes(&self) -> Bytes {
        match self {
            IeValue::Binary(b) => b.clone(),
            IeValue::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            IeValue::Int(i) => Bytes::copy_from_slice(&i.to_be_bytes()),
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            IeValue::Text(s) => Some(s.clone()),
            IeValue::Binary(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
            IeValue::Int(_) => None,
        }
    }
}

/// Ordered IE map, keyed by type code (§3.2). Re-serialized in insertion
/// order is not required by any peer so a `BTreeMap` (type-code order) is
/// fine and keeps encode deterministic for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeList(pub BTreeMap<IeType, IeValue>);

impl IeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_binary(&mut self, ie: IeType, data: Bytes) -> &mut Self {
        self.0.insert(ie, IeValue::Binary(data));
        self
    }

    pub fn append_string(&mut self, ie: IeType, s: impl Into<String>) -> &mut Self {
        self.0.insert(ie, IeValue::Text(s.into()));
        self
    }

    pub fn append_int(&mut self, ie: IeType, v: u32) -> &mut Self {
        self.0.insert(ie, IeValue::Int(v));
        self
    }

    pub fn get(&self, ie: IeType) -> Option<&IeValue> {
        self.0.get(&ie)
    }

    fn encode(&self, buf: &mut BytesMut) {
        for (ty, val) in &self.0 {
            let bytes = val.as_bytes();
            let len = bytes.len().min(255) as u8;
            buf.put_u8(ty.to_u8());
            buf.put_u8(len);
            buf.put_slice(&bytes[..len as usize]);
        }
    }

    fn decode(mut data: Bytes) -> Result<Self, IaxError> {
        let mut list = IeList::new();
        while data.has_remaining() {
            if data.remaining() < 2 {
                return Err(IaxError::Truncated {
                    expected: 2,
                    actual: data.remaining(),
                });
            }
            let ty = data.get_u8();
            let len = data.get_u8() as usize;
            if data.remaining() < len {
                return Err(IaxError::Truncated {
                    expected: len,
                    actual: data.remaining(),
                });
            }
            let val = data.split_to(len);
            list.0.insert(IeType::from_u8(ty), IeValue::Binary(val));
        }
        Ok(list)
    }
}

/// A parsed full frame: header fields plus trailing IE list or media
/// payload (§3.2 `IAXFullFrame`).
#[derive(Debug, Clone)]
pub struct FullFrame {
    pub retransmission: bool,
    pub source_call_no: u16,
    pub dest_call_no: u16,
    pub timestamp: u32,
    pub oseq: u8,
    pub iseq: u8,
    pub frame_type: FrameType,
    /// Subclass; for `FrameType::Iax` this is an [`IaxControl`] value.
    pub subclass: u32,
    pub ies: IeList,
    /// Raw media payload, present instead of `ies` for voice/video/text
    /// frame types that don't carry an IE list.
    pub payload: Bytes,
}

impl FullFrame {
    pub fn new(
        frame_type: FrameType,
        subclass: u32,
        dest_call_no: u16,
        source_call_no: u16,
        iseq: u8,
        oseq: u8,
        timestamp: u32,
    ) -> Self {
        Self {
            retransmission: false,
            source_call_no,
            dest_call_no,
            timestamp,
            oseq,
            iseq,
            frame_type,
            subclass,
            ies: IeList::new(),
            payload: Bytes::new(),
        }
    }

    pub fn iax_control(
        control: IaxControl,
        dest_call_no: u16,
        source_call_no: u16,
        iseq: u8,
        oseq: u8,
        timestamp: u32,
    ) -> Self {
        Self::new(
            FrameType::Iax,
            control.to_u8() as u32,
            dest_call_no,
            source_call_no,
            iseq,
            oseq,
            timestamp,
        )
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12 + self.ies.0.len() * 4 + self.payload.len());
        let src = (1u16 << 15) | (self.source_call_no & 0x7fff);
        buf.put_u16(src);
        let dst = ((self.retransmission as u16) << 15) | (self.dest_call_no & 0x7fff);
        buf.put_u16(dst);
        buf.put_u32(self.timestamp);
        buf.put_u8(self.oseq);
        buf.put_u8(self.iseq);
        buf.put_u8(self.frame_type.to_u8());
        if matches!(self.frame_type, FrameType::Iax) {
            buf.put_u8(self.subclass as u8);
            self.ies.encode(&mut buf);
        } else if self.subclass >= 0x80 {
            // extended subclass: C-bit set, 7-bit value
            buf.put_u8(0x80 | (self.subclass as u8 & 0x7f));
            buf.put_slice(&self.payload);
        } else {
            buf.put_u8(self.subclass as u8);
            buf.put_slice(&self.payload);
        }
        buf
    }

    pub fn decode(mut data: Bytes) -> Result<Self, IaxError> {
        if data.remaining() < 12 {
            return Err(IaxError::Truncated {
                expected: 12,
                actual: data.remaining(),
            });
        }
        let src_word = data.get_u16();
        let source_call_no = src_word & 0x7fff;
        let dst_word = data.get_u16();
        let retransmission = dst_word & 0x8000 != 0;
        let dest_call_no = dst_word & 0x7fff;
        let timestamp = data.get_u32();
        let oseq = data.get_u8();
        let iseq = data.get_u8();
        let frame_type = FrameType::from_u8(data.get_u8());
        let subclass_octet = data.get_u8();
        let (subclass, ies, payload) = if matches!(frame_type, FrameType::Iax) {
            (subclass_octet as u32, IeList::decode(data)?, Bytes::new())
        } else if subclass_octet & 0x80 != 0 {
            ((subclass_octet & 0x7f) as u32, IeList::new(), data)
        } else {
            (subclass_octet as u32, IeList::new(), data)
        };
        Ok(Self {
            retransmission,
            source_call_no,
            dest_call_no,
            timestamp,
            oseq,
            iseq,
            frame_type,
            subclass,
            ies,
            payload,
        })
    }

    pub fn control(&self) -> IaxControl {
        IaxControl::from_u8(self.subclass as u8)
    }
}

/// A mini frame: no control fields, matched solely by source-call-no ->
/// remote-call-no (§3.2).
#[derive(Debug, Clone)]
pub struct MiniFrame {
    pub source_call_no: u16,
    pub timestamp: u16,
    pub payload: Bytes,
}

impl MiniFrame {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        buf.put_u16(self.source_call_no & 0x7fff);
        buf.put_u16(self.timestamp);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(mut data: Bytes) -> Result<Self, IaxError> {
        if data.remaining() < 4 {
            return Err(IaxError::Truncated {
                expected: 4,
                actual: data.remaining(),
            });
        }
        let source_call_no = data.get_u16() & 0x7fff;
        let timestamp = data.get_u16();
        Ok(Self {
            source_call_no,
            timestamp,
            payload: data,
        })
    }
}

/// A parsed datagram: either a full frame (F-bit set) or a mini frame.
#[derive(Debug, Clone)]
pub enum IaxFrame {
    Full(FullFrame),
    Mini(MiniFrame),
}

impl IaxFrame {
    pub fn parse(buf: &[u8]) -> Result<Self, IaxError> {
        if buf.len() < 4 {
            return Err(IaxError::Truncated {
                expected: 4,
                actual: buf.len(),
            });
        }
        let data = Bytes::copy_from_slice(buf);
        let f_bit = data[0] & 0x80 != 0;
        if f_bit {
            Ok(IaxFrame::Full(FullFrame::decode(data)?))
        } else {
            Ok(IaxFrame::Mini(MiniFrame::decode(data)?))
        }
    }

    pub fn source_call_no(&self) -> u16 {
        match self {
            IaxFrame::Full(f) => f.source_call_no,
            IaxFrame::Mini(m) => m.source_call_no,
        }
    }

    pub fn full(&self) -> Option<&FullFrame> {
        match self {
            IaxFrame::Full(f) => Some(f),
            IaxFrame::Mini(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_with_ies_round_trips() {
        let mut frame = FullFrame::iax_control(IaxControl::New, 0, 42, 0, 0, 1000);
        frame.ies.append_string(IeType::Username, "alice");
        frame.ies.append_binary(IeType::CallToken, Bytes::from_static(b""));
        let encoded = frame.encode().freeze();
        let decoded = match IaxFrame::parse(&encoded).unwrap() {
            IaxFrame::Full(f) => f,
            IaxFrame::Mini(_) => panic!("expected full frame"),
        };
        assert_eq!(decoded.source_call_no, 42);
        assert_eq!(decoded.control(), IaxControl::New);
        assert_eq!(
            decoded.ies.get(IeType::Username).unwrap().as_str().unwrap(),
            "alice"
        );
        assert!(decoded.ies.get(IeType::CallToken).is_some());
    }

    #[test]
    fn mini_frame_round_trips_without_control_fields() {
        let mini = MiniFrame {
            source_call_no: 7,
            timestamp: 500,
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let encoded = mini.encode().freeze();
        let decoded = match IaxFrame::parse(&encoded).unwrap() {
            IaxFrame::Mini(m) => m,
            IaxFrame::Full(_) => panic!("expected mini frame"),
        };
        assert_eq!(decoded.source_call_no, 7);
        assert_eq!(decoded.timestamp, 500);
        assert_eq!(&decoded.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn dest_call_no_carries_the_retransmission_bit() {
        let mut frame = FullFrame::iax_control(IaxControl::Ack, 99, 1, 0, 0, 0);
        frame.retransmission = true;
        let encoded = frame.encode().freeze();
        let decoded = match IaxFrame::parse(&encoded).unwrap() {
            IaxFrame::Full(f) => f,
            IaxFrame::Mini(_) => panic!("expected full frame"),
        };
        assert_eq!(decoded.dest_call_no, 99);
        assert!(decoded.retransmission);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let err = IaxFrame::parse(&[0x80, 0x01]).unwrap_err();
        assert!(matches!(err, IaxError::Truncated { .. }));
    }
}
