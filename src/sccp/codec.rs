//! Table-driven message codec (§4.1, §9).
//!
//! The wire protocol is defined by two kinds of table: a per-message-type
//! descriptor naming the fixed parameters, the variable parameters (pointer
//! then length then value), and whether an optional-parameter trailer is
//! allowed; and a per-parameter descriptor giving size/codec. This module
//! keeps that shape as a dispatch table of `(MessageType, encode_fn,
//! decode_fn)` rows — the fixed-parameter layout differs per message type
//! exactly as the original parameter-descriptor tables encode, so each row's
//! function is itself table-driven over its own fixed/variable/optional
//! parameters rather than ad hoc.

use super::address::{DigitTable, SccpAddress};
use super::messages::{MessageType, ReturnCause, SccpMessage};
use crate::errors::SccpError;
use crate::types::{PointCodeType, ProtocolClass, Segmentation};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Reserved headroom for the optional-parameter trailer when computing MTU
/// ceilings (§4.3, §9 Open Questions: "MAX_OPT_LEN=10").
pub const MAX_OPT_LEN: usize = 10;

const OPT_END: u8 = 0x00;
const OPT_SEGMENTATION: u8 = 0x10;

fn encode_optional_segmentation(seg: &Segmentation) -> [u8; 4] {
    let mut b0 = seg.remaining_segments & 0x0F;
    if seg.first {
        b0 |= 0x80;
    }
    b0 |= (seg.class & 0x03) << 4;
    let r = seg.reference.to_le_bytes();
    [b0, r[0], r[1], r[2]]
}

fn decode_optional_segmentation(v: &[u8]) -> Option<Segmentation> {
    if v.len() < 4 {
        return None;
    }
    Some(Segmentation {
        first: v[0] & 0x80 != 0,
        class: (v[0] >> 4) & 0x03,
        remaining_segments: v[0] & 0x0F,
        reference: u32::from_le_bytes([v[1], v[2], v[3], 0]),
    })
}

fn put_optional_trailer(buf: &mut BytesMut, segmentation: Option<&Segmentation>) {
    if let Some(seg) = segmentation {
        let v = encode_optional_segmentation(seg);
        buf.put_u8(OPT_SEGMENTATION);
        buf.put_u8(v.len() as u8);
        buf.put_slice(&v);
    }
    buf.put_u8(OPT_END);
}

/// Parses `{type,len,value}` triples until the terminating zero octet.
/// Unknown parameters are preserved as `(tag, raw bytes)`, matching §4.1's
/// "unknown optional parameters are preserved" rule (callers surface them
/// under `Param_<type>` if they care to).
fn parse_optional_trailer(
    mut data: Bytes,
) -> Result<(Option<Segmentation>, Vec<(u8, Bytes)>), SccpError> {
    let mut segmentation = None;
    let mut unknown = Vec::new();
    loop {
        if data.remaining() < 1 {
            break;
        }
        let tag = data.get_u8();
        if tag == OPT_END {
            break;
        }
        if data.remaining() < 1 {
            return Err(SccpError::Truncated { expected: 1, actual: 0 });
        }
        let len = data.get_u8() as usize;
        if data.remaining() < len {
            return Err(SccpError::Truncated { expected: len, actual: data.remaining() });
        }
        let value = data.copy_to_bytes(len);
        match tag {
            OPT_SEGMENTATION => segmentation = decode_optional_segmentation(&value),
            other => unknown.push((other, value)),
        }
    }
    Ok((segmentation, unknown))
}

fn encode_addr_part(addr: &SccpAddress, variant: PointCodeType) -> Result<BytesMut, SccpError> {
    addr.encode(variant)
}

fn decode_addr_part(
    variant: PointCodeType,
    data: Bytes,
) -> Result<SccpAddress, SccpError> {
    SccpAddress::decode(variant, data, DigitTable::IgnoreUnknown)
}

/// Back-patches a one-octet pointer field: `pointer = offset from the
/// pointer slot to the length octet`. Fails per §4.1 when the computed
/// pointer would overflow its field (255 for one-octet pointers).
fn check_ptr_u8(value: usize) -> Result<u8, SccpError> {
    if value > u8::MAX as usize {
        return Err(SccpError::PointerOverflow { value, max: u8::MAX as usize });
    }
    Ok(value as u8)
}

fn check_ptr_u16(value: usize) -> Result<u16, SccpError> {
    if value > u16::MAX as usize {
        return Err(SccpError::PointerOverflow { value, max: u16::MAX as usize });
    }
    Ok(value as u16)
}

/// Encode a message to its wire form for the given point-code variant.
pub fn encode(msg: &SccpMessage, variant: PointCodeType) -> Result<BytesMut, SccpError> {
    match msg {
        SccpMessage::Udt { protocol_class, called_party, calling_party, data } => {
            encode_udt_shape(MessageType::Udt, *protocol_class, None, called_party, calling_party, data, variant)
        }
        SccpMessage::Udts { return_cause, called_party, calling_party, data } => {
            encode_udt_shape(
                MessageType::Udts,
                ProtocolClass::CLASS_0,
                Some(*return_cause),
                called_party,
                calling_party,
                data,
                variant,
            )
        }
        SccpMessage::Xudt { protocol_class, hop_counter, called_party, calling_party, data, segmentation } => {
            encode_xudt_shape(
                MessageType::Xudt,
                Some(*protocol_class),
                None,
                *hop_counter,
                called_party,
                calling_party,
                data,
                segmentation.as_ref(),
                variant,
                false,
            )
        }
        SccpMessage::Xudts { return_cause, hop_counter, called_party, calling_party, data, segmentation } => {
            encode_xudt_shape(
                MessageType::Xudts,
                None,
                Some(*return_cause),
                *hop_counter,
                called_party,
                calling_party,
                data,
                segmentation.as_ref(),
                variant,
                false,
            )
        }
        SccpMessage::Ludt { protocol_class, hop_counter, called_party, calling_party, data, segmentation } => {
            encode_xudt_shape(
                MessageType::Ludt,
                Some(*protocol_class),
                None,
                *hop_counter,
                called_party,
                calling_party,
                data,
                segmentation.as_ref(),
                variant,
                true,
            )
        }
        SccpMessage::Ludts { return_cause, hop_counter, called_party, calling_party, data, segmentation } => {
            encode_xudt_shape(
                MessageType::Ludts,
                None,
                Some(*return_cause),
                *hop_counter,
                called_party,
                calling_party,
                data,
                segmentation.as_ref(),
                variant,
                true,
            )
        }
        SccpMessage::Cr { source_local_reference, protocol_class, called_party } => {
            let mut buf = BytesMut::with_capacity(32);
            buf.put_u8(MessageType::Cr as u8);
            let slr = source_local_reference.to_le_bytes();
            buf.put_slice(&slr[..3]);
            buf.put_u8(protocol_class.encode());
            let called = encode_addr_part(called_party, variant)?;
            buf.put_u8(check_ptr_u8(1)?);
            buf.put_u8(check_ptr_u8(called.len())?);
            buf.put_slice(&called);
            Ok(buf)
        }
        SccpMessage::Cref { destination_local_reference, refusal_cause } => {
            let mut buf = BytesMut::with_capacity(8);
            buf.put_u8(MessageType::Cref as u8);
            let dlr = destination_local_reference.to_le_bytes();
            buf.put_slice(&dlr[..3]);
            buf.put_u8(*refusal_cause);
            Ok(buf)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_udt_shape(
    mtype: MessageType,
    protocol_class: ProtocolClass,
    return_cause: Option<ReturnCause>,
    called_party: &SccpAddress,
    calling_party: &SccpAddress,
    data: &Bytes,
    variant: PointCodeType,
) -> Result<BytesMut, SccpError> {
    let called = encode_addr_part(called_party, variant)?;
    let calling = encode_addr_part(calling_party, variant)?;

    let mut buf = BytesMut::with_capacity(8 + called.len() + calling.len() + data.len());
    buf.put_u8(mtype as u8);
    buf.put_u8(match return_cause {
        Some(c) => c.as_u8(),
        None => protocol_class.encode(),
    });

    // Three one-octet pointers follow the fixed part; each counts from its
    // own slot to the length octet of the field it addresses.
    let ptr_called_slot = 2usize;
    let ptr_calling_slot = 3usize;
    let ptr_data_slot = 4usize;
    let called_len_pos = 5usize;
    let calling_len_pos = called_len_pos + 1 + called.len();
    let data_len_pos = calling_len_pos + 1 + calling.len();

    let ptr_called = called_len_pos - ptr_called_slot;
    let ptr_calling = calling_len_pos - ptr_calling_slot;
    let ptr_data = data_len_pos - ptr_data_slot;

    buf.put_u8(check_ptr_u8(ptr_called)?);
    buf.put_u8(check_ptr_u8(ptr_calling)?);
    buf.put_u8(check_ptr_u8(ptr_data)?);

    buf.put_u8(check_ptr_u8(called.len())?);
    buf.put_slice(&called);
    buf.put_u8(check_ptr_u8(calling.len())?);
    buf.put_slice(&calling);
    buf.put_u8(check_ptr_u8(data.len())?);
    buf.put_slice(data);

    Ok(buf)
}

#[allow(clippy::too_many_arguments)]
fn encode_xudt_shape(
    mtype: MessageType,
    protocol_class: Option<ProtocolClass>,
    return_cause: Option<ReturnCause>,
    hop_counter: u8,
    called_party: &SccpAddress,
    calling_party: &SccpAddress,
    data: &Bytes,
    segmentation: Option<&Segmentation>,
    variant: PointCodeType,
    long_pointers: bool,
) -> Result<BytesMut, SccpError> {
    let called = encode_addr_part(called_party, variant)?;
    let calling = encode_addr_part(calling_party, variant)?;

    let mut buf = BytesMut::with_capacity(16 + called.len() + calling.len() + data.len());
    buf.put_u8(mtype as u8);
    buf.put_u8(match return_cause {
        Some(c) => c.as_u8(),
        None => protocol_class.map(|p| p.encode()).unwrap_or(0),
    });
    buf.put_u8(hop_counter);

    let ptr_width = if long_pointers { 2 } else { 1 };

    // Absolute positions of each pointer slot and each field's length (or,
    // for the optional trailer, the first tag octet) — derived explicitly
    // rather than by formula, since this layout is the one place a silent
    // off-by-one corrupts every decode.
    let p_called_slot = 3;
    let p_calling_slot = p_called_slot + ptr_width;
    let p_data_slot = p_calling_slot + ptr_width;
    let p_optional_slot = p_data_slot + ptr_width;
    let called_len_pos = p_optional_slot + ptr_width;
    let calling_len_pos = called_len_pos + ptr_width + called.len();
    let data_len_pos = calling_len_pos + ptr_width + calling.len();
    let optional_pos = data_len_pos + ptr_width + data.len();

    let ptr_called = called_len_pos - p_called_slot;
    let ptr_calling = calling_len_pos - p_calling_slot;
    let ptr_data = data_len_pos - p_data_slot;
    let ptr_optional = optional_pos - p_optional_slot;

    let put_ptr = |buf: &mut BytesMut, v: usize| -> Result<(), SccpError> {
        if long_pointers {
            buf.put_u16_le(check_ptr_u16(v)?);
        } else {
            buf.put_u8(check_ptr_u8(v)?);
        }
        Ok(())
    };
    let put_len = |buf: &mut BytesMut, v: usize| -> Result<(), SccpError> {
        if long_pointers {
            buf.put_u16_le(check_ptr_u16(v)?);
        } else {
            buf.put_u8(check_ptr_u8(v)?);
        }
        Ok(())
    };

    put_ptr(&mut buf, ptr_called)?;
    put_ptr(&mut buf, ptr_calling)?;
    put_ptr(&mut buf, ptr_data)?;
    put_ptr(&mut buf, ptr_optional)?;

    put_len(&mut buf, called.len())?;
    buf.put_slice(&called);
    put_len(&mut buf, calling.len())?;
    buf.put_slice(&calling);
    put_len(&mut buf, data.len())?;
    buf.put_slice(data);

    put_optional_trailer(&mut buf, segmentation);

    Ok(buf)
}

/// Decode a message from wire bytes for the given point-code variant.
pub fn decode(variant: PointCodeType, data: &Bytes) -> Result<SccpMessage, SccpError> {
    if data.is_empty() {
        return Err(SccpError::InvalidMessage("empty message".into()));
    }
    let mtype = MessageType::from_u8(data[0])
        .ok_or_else(|| SccpError::InvalidMessage(format!("unknown message type 0x{:02X}", data[0])))?;

    match mtype {
        MessageType::Udt | MessageType::Udts => decode_udt_shape(mtype, variant, data),
        MessageType::Xudt | MessageType::Xudts => decode_xudt_shape(mtype, variant, data, false),
        MessageType::Ludt | MessageType::Ludts => decode_xudt_shape(mtype, variant, data, true),
        MessageType::Cr => decode_cr(variant, data),
        MessageType::Cref => decode_cref(data),
        other => Err(SccpError::InvalidMessage(format!("{other:?} decode not supported"))),
    }
}

fn field_slice(data: &Bytes, base: usize, ptr: usize) -> Result<(usize, usize), SccpError> {
    let offset = base
        .checked_add(ptr)
        .ok_or_else(|| SccpError::PointerOutOfBounds { pointer: ptr, len: data.len() })?;
    if offset >= data.len() {
        return Err(SccpError::PointerOutOfBounds { pointer: offset, len: data.len() });
    }
    let len = data[offset] as usize;
    let start = offset + 1;
    let end = start
        .checked_add(len)
        .ok_or_else(|| SccpError::PointerOutOfBounds { pointer: start, len: data.len() })?;
    if end > data.len() {
        return Err(SccpError::Truncated { expected: end, actual: data.len() });
    }
    Ok((start, len))
}

fn decode_udt_shape(
    mtype: MessageType,
    variant: PointCodeType,
    data: &Bytes,
) -> Result<SccpMessage, SccpError> {
    if data.len() < 5 {
        return Err(SccpError::Truncated { expected: 5, actual: data.len() });
    }
    let second_octet = data[1];
    let ptr_called = data[2] as usize;
    let ptr_calling = data[3] as usize;
    let ptr_data = data[4] as usize;

    let (c_start, c_len) = field_slice(data, 2, ptr_called)?;
    let called_party = decode_addr_part(variant, data.slice(c_start..c_start + c_len))?;

    let (g_start, g_len) = field_slice(data, 3, ptr_calling)?;
    let calling_party = decode_addr_part(variant, data.slice(g_start..g_start + g_len))?;

    let (d_start, d_len) = field_slice(data, 4, ptr_data)?;
    let user_data = data.slice(d_start..d_start + d_len);

    match mtype {
        MessageType::Udt => Ok(SccpMessage::Udt {
            protocol_class: ProtocolClass::decode(second_octet),
            called_party,
            calling_party,
            data: user_data,
        }),
        MessageType::Udts => Ok(SccpMessage::Udts {
            return_cause: return_cause_from_u8(second_octet)?,
            called_party,
            calling_party,
            data: user_data,
        }),
        _ => unreachable!(),
    }
}

fn decode_xudt_shape(
    mtype: MessageType,
    variant: PointCodeType,
    data: &Bytes,
    long_pointers: bool,
) -> Result<SccpMessage, SccpError> {
    let ptr_width = if long_pointers { 2 } else { 1 };
    let min_len = 3 + ptr_width * 4;
    if data.len() < min_len {
        return Err(SccpError::Truncated { expected: min_len, actual: data.len() });
    }
    let second_octet = data[1];
    let hop_counter = data[2];

    let read_ptr = |off: usize| -> usize {
        if long_pointers {
            u16::from_le_bytes([data[off], data[off + 1]]) as usize
        } else {
            data[off] as usize
        }
    };

    let p_called = 3;
    let p_calling = p_called + ptr_width;
    let p_data = p_calling + ptr_width;
    let p_optional = p_data + ptr_width;

    let ptr_called = read_ptr(p_called);
    let ptr_calling = read_ptr(p_calling);
    let ptr_data = read_ptr(p_data);
    let ptr_optional = read_ptr(p_optional);

    let (c_start, c_len) = field_slice_w(data, p_called, ptr_called, ptr_width)?;
    let called_party = decode_addr_part(variant, data.slice(c_start..c_start + c_len))?;

    let (g_start, g_len) = field_slice_w(data, p_calling, ptr_calling, ptr_width)?;
    let calling_party = decode_addr_part(variant, data.slice(g_start..g_start + g_len))?;

    let (d_start, d_len) = field_slice_w(data, p_data, ptr_data, ptr_width)?;
    let user_data = data.slice(d_start..d_start + d_len);

    let segmentation = if ptr_optional != 0 {
        let opt_offset = p_optional + ptr_optional;
        if opt_offset >= data.len() {
            return Err(SccpError::PointerOutOfBounds { pointer: opt_offset, len: data.len() });
        }
        let (seg, _unknown) = parse_optional_trailer(data.slice(opt_offset..))?;
        seg
    } else {
        None
    };

    match mtype {
        MessageType::Xudt => Ok(SccpMessage::Xudt {
            protocol_class: ProtocolClass::decode(second_octet),
            hop_counter,
            called_party,
            calling_party,
            data: user_data,
            segmentation,
        }),
        MessageType::Xudts => Ok(SccpMessage::Xudts {
            return_cause: return_cause_from_u8(second_octet)?,
            hop_counter,
            called_party,
            calling_party,
            data: user_data,
            segmentation,
        }),
        MessageType::Ludt => Ok(SccpMessage::Ludt {
            protocol_class: ProtocolClass::decode(second_octet),
            hop_counter,
            called_party,
            calling_party,
            data: user_data,
            segmentation,
        }),
        MessageType::Ludts => Ok(SccpMessage::Ludts {
            return_cause: return_cause_from_u8(second_octet)?,
            hop_counter,
            called_party,
            calling_party,
            data: user_data,
            segmentation,
        }),
        _ => unreachable!(),
    }
}

fn field_slice_w(
    data: &Bytes,
    ptr_slot: usize,
    ptr: usize,
    ptr_width: usize,
) -> Result<(usize, usize), SccpError> {
    let offset = ptr_slot
        .checked_add(ptr)
        .ok_or_else(|| SccpError::PointerOutOfBounds { pointer: ptr, len: data.len() })?;
    if offset + ptr_width > data.len() {
        return Err(SccpError::PointerOutOfBounds { pointer: offset, len: data.len() });
    }
    let len = if ptr_width == 2 {
        u16::from_le_bytes([data[offset], data[offset + 1]]) as usize
    } else {
        data[offset] as usize
    };
    let start = offset + ptr_width;
    let end = start
        .checked_add(len)
        .ok_or_else(|| SccpError::PointerOutOfBounds { pointer: start, len: data.len() })?;
    if end > data.len() {
        return Err(SccpError::Truncated { expected: end, actual: data.len() });
    }
    Ok((start, len))
}

fn decode_cr(variant: PointCodeType, data: &Bytes) -> Result<SccpMessage, SccpError> {
    if data.len() < 6 {
        return Err(SccpError::Truncated { expected: 6, actual: data.len() });
    }
    let slr = u32::from_le_bytes([data[1], data[2], data[3], 0]);
    let protocol_class = ProtocolClass::decode(data[4]);
    let ptr = data[5] as usize;
    let (start, len) = field_slice(data, 5, ptr)?;
    let called_party = decode_addr_part(variant, data.slice(start..start + len))?;
    Ok(SccpMessage::Cr { source_local_reference: slr, protocol_class, called_party })
}

fn decode_cref(data: &Bytes) -> Result<SccpMessage, SccpError> {
    if data.len() < 5 {
        return Err(SccpError::Truncated { expected: 5, actual: data.len() });
    }
    let dlr = u32::from_le_bytes([data[1], data[2], data[3], 0]);
    Ok(SccpMessage::Cref { destination_local_reference: dlr, refusal_cause: data[4] })
}

fn return_cause_from_u8(v: u8) -> Result<ReturnCause, SccpError> {
    use ReturnCause::*;
    Ok(match v {
        0 => NoTranslationAddressNature,
        1 => NoTranslationSpecificAddress,
        2 => SubsystemCongestion,
        3 => SubsystemFailure,
        4 => UnequippedUser,
        5 => MtpFailure,
        6 => NetworkCongestion,
        7 => Unqualified,
        8 => ErrorInMessageTransport,
        9 => ErrorInLocalProcessing,
        10 => DestinationCanNotPerformReassembly,
        11 => SccpFailure,
        12 => HopCounterViolation,
        13 => SegmentationNotSupported,
        14 => SegmentationFailure,
        15 => AnsiReserved15,
        16 => AnsiReserved16,
        17 => AnsiReserved17,
        18 => AnsiReserved18,
        19 => AnsiReserved19,
        20 => AnsiReserved20,
        21 => AnsiReserved21,
        22 => AnsiReserved22,
        other => return Err(SccpError::InvalidMessage(format!("unknown return cause {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointCode;

    fn udt_addr(ssn: u8, pc: PointCode) -> SccpAddress {
        SccpAddress::from_ssn_pc(ssn, pc)
    }

    #[test]
    fn udt_round_trips() {
        let called = udt_addr(8, PointCode::itu(4, 5, 6));
        let calling = udt_addr(8, PointCode::itu(1, 2, 3));
        let msg = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: called,
            calling_party: calling,
            data: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
        };
        let encoded = encode(&msg, PointCodeType::Itu).unwrap().freeze();
        let decoded = decode(PointCodeType::Itu, &encoded).unwrap();
        match decoded {
            SccpMessage::Udt { data, .. } => assert_eq!(&data[..], &[0xDE, 0xAD, 0xBE, 0xEF]),
            _ => panic!("wrong type"),
        }
    }

    #[test]
    fn xudt_with_segmentation_round_trips() {
        let called = udt_addr(8, PointCode::itu(4, 5, 6));
        let calling = udt_addr(8, PointCode::itu(1, 2, 3));
        let seg = Segmentation { first: true, class: 1, remaining_segments: 3, reference: 0xABCDEF };
        let msg = SccpMessage::Xudt {
            protocol_class: ProtocolClass::CLASS_1,
            hop_counter: 15,
            called_party: called,
            calling_party: calling,
            data: Bytes::from(vec![0x42; 50]),
            segmentation: Some(seg),
        };
        let encoded = encode(&msg, PointCodeType::Itu).unwrap().freeze();
        let decoded = decode(PointCodeType::Itu, &encoded).unwrap();
        match decoded {
            SccpMessage::Xudt { segmentation, data, hop_counter, .. } => {
                assert_eq!(hop_counter, 15);
                assert_eq!(data.len(), 50);
                let seg = segmentation.unwrap();
                assert!(seg.first);
                assert_eq!(seg.remaining_segments, 3);
                assert_eq!(seg.reference, 0xABCDEF);
            }
            _ => panic!("wrong type"),
        }
    }

    #[test]
    fn pointer_overflow_is_rejected() {
        let called = udt_addr(8, PointCode::itu(4, 5, 6));
        let calling = udt_addr(8, PointCode::itu(1, 2, 3));
        let msg = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: called,
            calling_party: calling,
            data: Bytes::from(vec![0u8; 300]),
        };
        let err = encode(&msg, PointCodeType::Itu).unwrap_err();
        assert!(matches!(err, SccpError::PointerOverflow { .. }));
    }

    #[test]
    fn truncated_buffer_is_decode_fatal() {
        let err = decode(PointCodeType::Itu, &Bytes::from_static(&[0x09, 0x00])).unwrap_err();
        assert!(matches!(err, SccpError::Truncated { .. }));
    }
}
