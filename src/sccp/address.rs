//! SCCP addressing: address indicator, point code, SSN, Global Title (§4.2).

use crate::errors::SccpError;
use crate::types::{EncodingScheme, NatureOfAddress, NumberingPlan, PointCode, PointCodeType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Digit-to-nibble translation table selector (§4.2).
///
/// The default table treats 0xB/0xC as "unknown" digits and drops them;
/// the permissive table exposes the full 0xA..0xE range. Selected by the
/// `ignore-unknown-digits` configuration knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitTable {
    IgnoreUnknown,
    AllDigits,
}

const DIGIT_CHARS: [char; 16] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'];

fn nibble_to_char(nibble: u8, table: DigitTable) -> Option<char> {
    match (nibble, table) {
        (0..=9, _) => Some(DIGIT_CHARS[nibble as usize]),
        (0xB, DigitTable::IgnoreUnknown) | (0xC, DigitTable::IgnoreUnknown) => None,
        (0xA..=0xE, DigitTable::AllDigits) => Some(DIGIT_CHARS[nibble as usize]),
        _ => None,
    }
}

fn char_to_nibble(c: char) -> Option<u8> {
    c.to_digit(16).map(|d| d as u8)
}

/// SCCP Address Indicator octet (§3.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIndicator {
    /// Reserved-for-national-use bit (ITU only, bit 7).
    pub national_use: bool,
    /// Routing indicator: `true` = route on point-code+SSN, `false` =
    /// route on Global Title (bit 6, 0x40).
    pub route_on_ssn: bool,
    /// Global Title Indicator: 0 = absent, ITU 1-4, ANSI 1-2.
    pub gti: u8,
    pub ssn_present: bool,
    pub pc_present: bool,
}

impl AddressIndicator {
    pub fn encode(&self) -> u8 {
        let mut ai = 0u8;
        if self.national_use {
            ai |= 0x80;
        }
        if self.route_on_ssn {
            ai |= 0x40;
        }
        ai |= (self.gti & 0x0F) << 2;
        if self.ssn_present {
            ai |= 0x02;
        }
        if self.pc_present {
            ai |= 0x01;
        }
        ai
    }

    pub fn decode(v: u8) -> Self {
        Self {
            national_use: (v & 0x80) != 0,
            route_on_ssn: (v & 0x40) != 0,
            gti: (v >> 2) & 0x0F,
            ssn_present: (v & 0x02) != 0,
            pc_present: (v & 0x01) != 0,
        }
    }
}

/// Global Title, one of the ITU (0x01-0x04) or ANSI (0x01-0x02) subtypes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GlobalTitle {
    /// ITU GTI 0x01: nature-of-address only.
    Nai { nature_of_address: NatureOfAddress, odd: bool, digits: String },
    /// ITU GTI 0x02 / ANSI GTI 0x02: translation-type only.
    Tt { translation_type: u8, digits: String },
    /// ANSI GTI 0x01: translation-type + numbering-plan + encoding-scheme.
    TtNpEs {
        translation_type: u8,
        numbering_plan: NumberingPlan,
        encoding_scheme: EncodingScheme,
        digits: String,
    },
    /// ITU GTI 0x04: full form, tt+np+es+nai.
    TtNpEsNai {
        translation_type: u8,
        numbering_plan: NumberingPlan,
        encoding_scheme: EncodingScheme,
        nature_of_address: NatureOfAddress,
        digits: String,
    },
}

impl GlobalTitle {
    /// Build an E.164 Global Title in the common ITU full form.
    pub fn e164(digits: &str) -> Self {
        Self::TtNpEsNai {
            translation_type: 0,
            numbering_plan: NumberingPlan::IsdnTelephony,
            encoding_scheme: if digits.len() % 2 == 0 {
                EncodingScheme::BcdEven
            } else {
                EncodingScheme::BcdOdd
            },
            nature_of_address: NatureOfAddress::International,
            digits: digits.to_string(),
        }
    }

    pub fn gti(&self, variant: PointCodeType) -> u8 {
        match (self, variant) {
            (Self::Nai { .. }, _) => 1,
            (Self::Tt { .. }, PointCodeType::Itu) => 2,
            (Self::Tt { .. }, PointCodeType::Ansi) => 2,
            (Self::TtNpEs { .. }, _) => 1, // ANSI-only form
            (Self::TtNpEsNai { .. }, _) => 4,
        }
    }

    pub fn digits(&self) -> &str {
        match self {
            Self::Nai { digits, .. }
            | Self::Tt { digits, .. }
            | Self::TtNpEs { digits, .. }
            | Self::TtNpEsNai { digits, .. } => digits,
        }
    }

    fn is_odd(&self) -> bool {
        match self {
            Self::Nai { odd, .. } => *odd,
            Self::Tt { digits, .. } => digits.len() % 2 == 1,
            Self::TtNpEs { encoding_scheme, .. } | Self::TtNpEsNai { encoding_scheme, .. } => {
                encoding_scheme.is_odd()
            }
        }
    }

    fn encode_digits(&self) -> Vec<u8> {
        encode_bcd_digits(self.digits())
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        let digits = self.encode_digits();

        match self {
            Self::Nai { nature_of_address, odd, .. } => {
                let mut noa = *nature_of_address as u8 & 0x7F;
                if *odd {
                    noa |= 0x80;
                }
                buf.put_u8(noa);
                buf.put_slice(&digits);
            }
            Self::Tt { translation_type, .. } => {
                buf.put_u8(*translation_type);
                buf.put_slice(&digits);
            }
            Self::TtNpEs { translation_type, numbering_plan, encoding_scheme, .. } => {
                buf.put_u8(*translation_type);
                buf.put_u8(
                    (*encoding_scheme as u8 & 0x0F) | ((*numbering_plan as u8 & 0x0F) << 4),
                );
                buf.put_slice(&digits);
            }
            Self::TtNpEsNai {
                translation_type,
                numbering_plan,
                encoding_scheme,
                nature_of_address,
                ..
            } => {
                buf.put_u8(*translation_type);
                buf.put_u8(
                    (*encoding_scheme as u8 & 0x0F) | ((*numbering_plan as u8 & 0x0F) << 4),
                );
                buf.put_u8(*nature_of_address as u8 & 0x7F);
                buf.put_slice(&digits);
            }
        }

        buf
    }

    /// Decode a Global Title, dispatching on `(gti, variant)` per §3.1/§4.2.
    pub fn decode(
        gti: u8,
        variant: PointCodeType,
        mut data: Bytes,
        table: DigitTable,
    ) -> Result<Self, SccpError> {
        match (gti, variant) {
            (1, PointCodeType::Itu) => {
                if data.remaining() < 1 {
                    return Err(SccpError::Truncated { expected: 1, actual: 0 });
                }
                let noa_octet = data.get_u8();
                let odd = (noa_octet & 0x80) != 0;
                let digits = decode_bcd_digits(&data, odd, table);
                Ok(Self::Nai {
                    nature_of_address: NatureOfAddress::from_u8(noa_octet & 0x7F),
                    odd,
                    digits,
                })
            }
            (2, _) => {
                if data.remaining() < 1 {
                    return Err(SccpError::Truncated { expected: 1, actual: 0 });
                }
                let tt = data.get_u8();
                // GTI=2 carries no dedicated oddness bit; a trailing 0xF
                // filler nibble is what signals an odd digit count.
                let odd = data.last().map(|b| b & 0xF0 == 0xF0).unwrap_or(false);
                let digits = decode_bcd_digits(&data, odd, table);
                Ok(Self::Tt { translation_type: tt, digits })
            }
            (1, PointCodeType::Ansi) => {
                if data.remaining() < 2 {
                    return Err(SccpError::Truncated { expected: 2, actual: data.remaining() });
                }
                let tt = data.get_u8();
                let np_es = data.get_u8();
                let es = EncodingScheme::from_u8(np_es & 0x0F);
                let digits = decode_bcd_digits(&data, es.is_odd(), table);
                Ok(Self::TtNpEs {
                    translation_type: tt,
                    numbering_plan: NumberingPlan::from_u8((np_es >> 4) & 0x0F),
                    encoding_scheme: es,
                    digits,
                })
            }
            (4, PointCodeType::Itu) => {
                if data.remaining() < 3 {
                    return Err(SccpError::Truncated { expected: 3, actual: data.remaining() });
                }
                let tt = data.get_u8();
                let np_es = data.get_u8();
                let noa = data.get_u8();
                let es = EncodingScheme::from_u8(np_es & 0x0F);
                let digits = decode_bcd_digits(&data, es.is_odd(), table);
                Ok(Self::TtNpEsNai {
                    translation_type: tt,
                    numbering_plan: NumberingPlan::from_u8((np_es >> 4) & 0x0F),
                    encoding_scheme: es,
                    nature_of_address: NatureOfAddress::from_u8(noa & 0x7F),
                    digits,
                })
            }
            _ => Err(SccpError::InvalidMessage(format!(
                "unsupported GTI {gti} for {variant:?}"
            ))),
        }
    }
}

/// A full SCCP address (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SccpAddress {
    pub address_indicator: AddressIndicator,
    pub global_title: Option<GlobalTitle>,
    pub point_code: Option<PointCode>,
    pub subsystem_number: Option<u8>,
}

impl SccpAddress {
    /// Route-on-SSN address with point code.
    pub fn from_ssn_pc(ssn: u8, pc: PointCode) -> Self {
        Self {
            address_indicator: AddressIndicator {
                national_use: false,
                route_on_ssn: true,
                gti: 0,
                ssn_present: true,
                pc_present: true,
            },
            global_title: None,
            point_code: Some(pc),
            subsystem_number: Some(ssn),
        }
    }

    /// Route-on-GT address.
    pub fn from_gt(gt: GlobalTitle, variant: PointCodeType, ssn: Option<u8>) -> Self {
        Self {
            address_indicator: AddressIndicator {
                national_use: false,
                route_on_ssn: false,
                gti: gt.gti(variant),
                ssn_present: ssn.is_some(),
                pc_present: false,
            },
            global_title: Some(gt),
            point_code: None,
            subsystem_number: ssn,
        }
    }

    pub fn encode(&self, variant: PointCodeType) -> Result<BytesMut, SccpError> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.address_indicator.encode());

        if self.address_indicator.pc_present {
            let pc = self
                .point_code
                .ok_or_else(|| SccpError::AddressError("PC indicator set, no PC".into()))?;
            buf.put_slice(&pc.encode_le());
            let _ = variant;
        }

        if self.address_indicator.ssn_present {
            buf.put_u8(self.subsystem_number.unwrap_or(0));
        }

        if self.address_indicator.gti > 0 {
            let gt = self
                .global_title
                .as_ref()
                .ok_or_else(|| SccpError::AddressError("GTI set, no Global Title".into()))?;
            buf.put_slice(&gt.encode());
        }

        Ok(buf)
    }

    pub fn decode(
        variant: PointCodeType,
        mut data: Bytes,
        table: DigitTable,
    ) -> Result<Self, SccpError> {
        if data.remaining() < 1 {
            return Err(SccpError::Truncated { expected: 1, actual: 0 });
        }
        let ai = AddressIndicator::decode(data.get_u8());

        let point_code = if ai.pc_present {
            let pc = PointCode::decode_le(&data, variant)
                .ok_or_else(|| SccpError::Truncated { expected: 2, actual: data.remaining() })?;
            data.advance(pc.wire_len());
            Some(pc)
        } else {
            None
        };

        let subsystem_number = if ai.ssn_present {
            if data.remaining() < 1 {
                return Err(SccpError::Truncated { expected: 1, actual: 0 });
            }
            Some(data.get_u8())
        } else {
            None
        };

        let global_title = if ai.gti > 0 {
            Some(GlobalTitle::decode(ai.gti, variant, data, table)?)
        } else {
            None
        };

        Ok(Self { address_indicator: ai, global_title, point_code, subsystem_number })
    }
}

fn encode_bcd_digits(digits: &str) -> Vec<u8> {
    let nibbles: Vec<u8> = digits.chars().filter_map(char_to_nibble).collect();
    let mut result = Vec::with_capacity((nibbles.len() + 1) / 2);
    for chunk in nibbles.chunks(2) {
        let byte = if chunk.len() == 2 { chunk[0] | (chunk[1] << 4) } else { chunk[0] | 0xF0 };
        result.push(byte);
    }
    result
}

fn decode_bcd_digits(data: &Bytes, odd: bool, table: DigitTable) -> String {
    let mut result = String::new();
    let n = data.len();
    for (i, &byte) in data.iter().enumerate() {
        let low = byte & 0x0F;
        let high = (byte >> 4) & 0x0F;

        if let Some(c) = nibble_to_char(low, table) {
            result.push(c);
        }
        let is_last_byte = i == n - 1;
        if !(is_last_byte && odd) {
            if let Some(c) = nibble_to_char(high, table) {
                result.push(c);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_address_round_trips() {
        let pc = PointCode::itu(4, 5, 6);
        let gt = GlobalTitle::e164("2348012345678");
        let addr = SccpAddress::from_gt(gt, PointCodeType::Itu, Some(6));

        let encoded = addr.encode(PointCodeType::Itu).unwrap().freeze();
        let decoded = SccpAddress::decode(PointCodeType::Itu, encoded, DigitTable::IgnoreUnknown)
            .unwrap();

        assert_eq!(decoded.global_title.unwrap().digits(), "2348012345678");
        assert_eq!(decoded.subsystem_number, Some(6));
        let _ = pc;
    }

    #[test]
    fn ssn_pc_address_round_trips() {
        let pc = PointCode::itu(4, 5, 6);
        let addr = SccpAddress::from_ssn_pc(8, pc);
        let encoded = addr.encode(PointCodeType::Itu).unwrap().freeze();
        let decoded =
            SccpAddress::decode(PointCodeType::Itu, encoded, DigitTable::IgnoreUnknown).unwrap();
        assert_eq!(decoded.subsystem_number, Some(8));
        assert!(decoded.point_code.unwrap().same_type_eq(&pc));
    }

    #[test]
    fn digit_table_affects_b_and_c_nibbles() {
        let raw = Bytes::copy_from_slice(&[0xB1]);
        let permissive = decode_bcd_digits(&raw, false, DigitTable::AllDigits);
        let strict = decode_bcd_digits(&raw, false, DigitTable::IgnoreUnknown);
        assert_eq!(permissive, "1b");
        assert_eq!(strict, "1");
    }
}
