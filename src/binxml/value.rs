use std::borrow::Cow;
use std::fmt::Write as _;

use encoding::{DecoderTrap, Encoding, EncodingRef};
use serde_json::json;

use crate::err::{EvtxError, Result};
use crate::guid::Guid;
use crate::model::BinXmlNode;
use crate::sid::Sid;
use crate::utils::cursor::SliceCursor;
use crate::utils::time::{format_filetime, format_systemtime};
use crate::utils::utf16::{decode_utf16le, decode_utf16le_string, split_utf16le_string_array};
use crate::utils::bytes;

/// Bit 7 of a substitution type byte marks an array of the base type.
pub(crate) const ARRAY_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    BinXmlType,
}

impl BinXmlValueType {
    pub(crate) fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::NullType),
            0x01 => Some(BinXmlValueType::StringType),
            0x02 => Some(BinXmlValueType::AnsiStringType),
            0x03 => Some(BinXmlValueType::Int8Type),
            0x04 => Some(BinXmlValueType::UInt8Type),
            0x05 => Some(BinXmlValueType::Int16Type),
            0x06 => Some(BinXmlValueType::UInt16Type),
            0x07 => Some(BinXmlValueType::Int32Type),
            0x08 => Some(BinXmlValueType::UInt32Type),
            0x09 => Some(BinXmlValueType::Int64Type),
            0x0A => Some(BinXmlValueType::UInt64Type),
            0x0B => Some(BinXmlValueType::Real32Type),
            0x0C => Some(BinXmlValueType::Real64Type),
            0x0D => Some(BinXmlValueType::BoolType),
            0x0E => Some(BinXmlValueType::BinaryType),
            0x0F => Some(BinXmlValueType::GuidType),
            0x10 => Some(BinXmlValueType::SizeTType),
            0x11 => Some(BinXmlValueType::FileTimeType),
            0x12 => Some(BinXmlValueType::SysTimeType),
            0x13 => Some(BinXmlValueType::SidType),
            0x14 => Some(BinXmlValueType::HexInt32Type),
            0x15 => Some(BinXmlValueType::HexInt64Type),
            0x21 => Some(BinXmlValueType::BinXmlType),
            _ => None,
        }
    }

    /// Element stride for arrays of this type. `None` means arrays of this
    /// type are not supported and fall back to a hex dump.
    fn array_element_size(self) -> Option<usize> {
        match self {
            BinXmlValueType::Int8Type | BinXmlValueType::UInt8Type => Some(1),
            BinXmlValueType::Int16Type | BinXmlValueType::UInt16Type => Some(2),
            BinXmlValueType::Int32Type
            | BinXmlValueType::UInt32Type
            | BinXmlValueType::Real32Type
            | BinXmlValueType::HexInt32Type => Some(4),
            BinXmlValueType::Int64Type
            | BinXmlValueType::UInt64Type
            | BinXmlValueType::Real64Type
            | BinXmlValueType::FileTimeType
            | BinXmlValueType::HexInt64Type => Some(8),
            BinXmlValueType::GuidType | BinXmlValueType::SysTimeType => Some(16),
            _ => None,
        }
    }
}

/// A decoded substitution (or inline) value.
///
/// Time, GUID, SID, and hex kinds are rendered to their canonical strings at
/// decode time; the numeric kinds stay typed so the JSON encoder can emit
/// real scalars.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BinXmlValue {
    NullType,
    StringType(String),
    AnsiStringType(String),
    Int8Type(i8),
    UInt8Type(u8),
    Int16Type(i16),
    UInt16Type(u16),
    Int32Type(i32),
    UInt32Type(u32),
    Int64Type(i64),
    UInt64Type(u64),
    Real32Type(f32),
    Real64Type(f64),
    BoolType(bool),
    BinaryType(Vec<u8>),
    GuidType(Guid),
    SizeTType(String),
    FileTimeType(String),
    SysTimeType(String),
    SidType(Sid),
    HexInt32Type(String),
    HexInt64Type(String),
    /// An embedded BinXml document, already parsed to nodes.
    BinXmlType(Vec<BinXmlNode>),
    ArrayType(Vec<BinXmlValue>),
}

fn lowercase_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_ansi(data: &[u8], codec: EncodingRef) -> String {
    // Stop at the first NUL, like the UTF-16 string kinds do.
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    match codec.decode(&data[..end], DecoderTrap::Replace) {
        Ok(s) => s,
        Err(_) => lowercase_hex(&data[..end]),
    }
}

fn read_uint_le(data: &[u8]) -> u64 {
    let mut v = 0_u64;
    for (i, &b) in data.iter().take(8).enumerate() {
        v |= u64::from(b) << (8 * i);
    }
    v
}

impl BinXmlValue {
    /// Decode a substitution slot of an explicit `size`, excluding the
    /// embedded-BinXml kind (0x21), which the interpreter parses itself.
    ///
    /// `data` is the chunk, `offset` chunk-relative. An unrecognised base
    /// type falls back to a lowercase hex rendering of the raw bytes.
    pub(crate) fn decode_slot(
        data: &[u8],
        offset: usize,
        size: u16,
        type_byte: u8,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let raw = bytes::slice_r(data, offset, size as usize, "substitution value")?;

        let base = type_byte & !ARRAY_FLAG;
        let Some(value_type) = BinXmlValueType::from_u8(base) else {
            return Ok(BinXmlValue::BinaryType(raw.to_vec()));
        };

        if size == 0 {
            return Ok(BinXmlValue::NullType);
        }

        if type_byte & ARRAY_FLAG != 0 {
            return Ok(Self::decode_array(raw, value_type, ansi_codec));
        }

        Self::decode_scalar(raw, value_type, ansi_codec)
    }

    fn decode_scalar(
        raw: &[u8],
        value_type: BinXmlValueType,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let need = |n: usize| -> Result<()> {
            if raw.len() < n {
                Err(EvtxError::Truncated {
                    what: "substitution value",
                    offset: 0,
                    need: n,
                    have: raw.len(),
                })
            } else {
                Ok(())
            }
        };

        let value = match value_type {
            BinXmlValueType::NullType => BinXmlValue::NullType,
            BinXmlValueType::StringType => {
                BinXmlValue::StringType(decode_utf16le_string(raw))
            }
            BinXmlValueType::AnsiStringType => {
                BinXmlValue::AnsiStringType(decode_ansi(raw, ansi_codec))
            }
            BinXmlValueType::Int8Type => {
                need(1)?;
                BinXmlValue::Int8Type(raw[0] as i8)
            }
            BinXmlValueType::UInt8Type => {
                need(1)?;
                BinXmlValue::UInt8Type(raw[0])
            }
            BinXmlValueType::Int16Type => {
                need(2)?;
                BinXmlValue::Int16Type(read_uint_le(&raw[..2]) as u16 as i16)
            }
            BinXmlValueType::UInt16Type => {
                need(2)?;
                BinXmlValue::UInt16Type(read_uint_le(&raw[..2]) as u16)
            }
            BinXmlValueType::Int32Type => {
                need(4)?;
                BinXmlValue::Int32Type(read_uint_le(&raw[..4]) as u32 as i32)
            }
            BinXmlValueType::UInt32Type => {
                need(4)?;
                BinXmlValue::UInt32Type(read_uint_le(&raw[..4]) as u32)
            }
            BinXmlValueType::Int64Type => {
                need(8)?;
                BinXmlValue::Int64Type(read_uint_le(&raw[..8]) as i64)
            }
            BinXmlValueType::UInt64Type => {
                need(8)?;
                BinXmlValue::UInt64Type(read_uint_le(&raw[..8]))
            }
            BinXmlValueType::Real32Type => {
                need(4)?;
                BinXmlValue::Real32Type(f32::from_le_bytes(
                    raw[..4].try_into().expect("length checked"),
                ))
            }
            BinXmlValueType::Real64Type => {
                need(8)?;
                BinXmlValue::Real64Type(f64::from_le_bytes(
                    raw[..8].try_into().expect("length checked"),
                ))
            }
            BinXmlValueType::BoolType => {
                // A 32-bit int on disk; tolerate shorter encodings.
                BinXmlValue::BoolType(read_uint_le(raw) != 0)
            }
            BinXmlValueType::BinaryType => BinXmlValue::BinaryType(raw.to_vec()),
            BinXmlValueType::GuidType => BinXmlValue::GuidType(Guid::from_buf(raw, 0)?),
            BinXmlValueType::SizeTType => {
                let value = match raw.len() {
                    4 => format!("0x{:08x}", read_uint_le(&raw[..4])),
                    _ => {
                        need(8)?;
                        format!("0x{:016x}", read_uint_le(&raw[..8]))
                    }
                };
                BinXmlValue::SizeTType(value)
            }
            BinXmlValueType::FileTimeType => {
                need(8)?;
                let ticks = read_uint_le(&raw[..8]);
                if ticks == 0 {
                    BinXmlValue::NullType
                } else {
                    match format_filetime(ticks) {
                        Some(s) => BinXmlValue::FileTimeType(s),
                        None => BinXmlValue::NullType,
                    }
                }
            }
            BinXmlValueType::SysTimeType => {
                need(16)?;
                let field = |i: usize| read_uint_le(&raw[i * 2..i * 2 + 2]) as u16;
                BinXmlValue::SysTimeType(format_systemtime(
                    field(0),
                    field(1),
                    // Field 2 is day-of-week, skipped.
                    field(3),
                    field(4),
                    field(5),
                    field(6),
                    field(7),
                ))
            }
            BinXmlValueType::SidType => BinXmlValue::SidType(Sid::from_buf(raw, 0, raw.len())?),
            BinXmlValueType::HexInt32Type => {
                need(4)?;
                BinXmlValue::HexInt32Type(format!("0x{:08x}", read_uint_le(&raw[..4])))
            }
            BinXmlValueType::HexInt64Type => {
                need(8)?;
                BinXmlValue::HexInt64Type(format!("0x{:016x}", read_uint_le(&raw[..8])))
            }
            // The interpreter routes 0x21 through its own nested parse.
            BinXmlValueType::BinXmlType => BinXmlValue::BinaryType(raw.to_vec()),
        };

        Ok(value)
    }

    fn decode_array(
        raw: &[u8],
        value_type: BinXmlValueType,
        ansi_codec: EncodingRef,
    ) -> BinXmlValue {
        if value_type == BinXmlValueType::StringType {
            return BinXmlValue::ArrayType(
                split_utf16le_string_array(raw)
                    .into_iter()
                    .map(BinXmlValue::StringType)
                    .collect(),
            );
        }

        let Some(elem_size) = value_type.array_element_size() else {
            // Arrays of Binary / BinXml (and anything else without a fixed
            // stride) are not representable; fall back to hex.
            return BinXmlValue::BinaryType(raw.to_vec());
        };

        let mut elements = Vec::with_capacity(raw.len() / elem_size);
        for chunk in raw.chunks_exact(elem_size) {
            match Self::decode_scalar(chunk, value_type, ansi_codec) {
                Ok(v) => elements.push(v),
                Err(_) => return BinXmlValue::BinaryType(raw.to_vec()),
            }
        }
        BinXmlValue::ArrayType(elements)
    }

    /// Read a self-describing inline value (the payload of a `Value` token).
    /// The type byte has already been consumed by the caller.
    pub(crate) fn read_inline(
        cursor: &mut SliceCursor<'_>,
        type_byte: u8,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let Some(value_type) = BinXmlValueType::from_u8(type_byte) else {
            return Err(EvtxError::UnknownToken {
                value: type_byte,
                offset: cursor.pos() as u64 - 1,
            });
        };

        let value = match value_type {
            BinXmlValueType::NullType => BinXmlValue::NullType,
            BinXmlValueType::StringType => {
                let num_chars = cursor.u16("inline string length")? as usize;
                let raw = cursor.take_bytes(num_chars * 2, "inline string")?;
                BinXmlValue::StringType(decode_utf16le(raw))
            }
            BinXmlValueType::AnsiStringType => {
                let num_bytes = cursor.u16("inline ansi string length")? as usize;
                let raw = cursor.take_bytes(num_bytes, "inline ansi string")?;
                BinXmlValue::AnsiStringType(decode_ansi(raw, ansi_codec))
            }
            BinXmlValueType::Int8Type
            | BinXmlValueType::UInt8Type
            | BinXmlValueType::Int16Type
            | BinXmlValueType::UInt16Type
            | BinXmlValueType::Int32Type
            | BinXmlValueType::UInt32Type
            | BinXmlValueType::Int64Type
            | BinXmlValueType::UInt64Type
            | BinXmlValueType::Real32Type
            | BinXmlValueType::Real64Type
            | BinXmlValueType::BoolType
            | BinXmlValueType::GuidType
            | BinXmlValueType::SizeTType
            | BinXmlValueType::FileTimeType
            | BinXmlValueType::SysTimeType
            | BinXmlValueType::HexInt32Type
            | BinXmlValueType::HexInt64Type => {
                let width = match value_type {
                    BinXmlValueType::Int8Type | BinXmlValueType::UInt8Type => 1,
                    BinXmlValueType::Int16Type | BinXmlValueType::UInt16Type => 2,
                    BinXmlValueType::Int32Type
                    | BinXmlValueType::UInt32Type
                    | BinXmlValueType::Real32Type
                    | BinXmlValueType::BoolType
                    | BinXmlValueType::HexInt32Type => 4,
                    BinXmlValueType::GuidType | BinXmlValueType::SysTimeType => 16,
                    _ => 8,
                };
                let raw = cursor.take_bytes(width, "inline value")?;
                Self::decode_scalar(raw, value_type, ansi_codec)?
            }
            BinXmlValueType::SidType => {
                // Length depends on the sub-authority count byte.
                let header = bytes::slice_r(cursor.buf(), cursor.pos(), 8, "inline sid")?;
                let len = 8 + header[1] as usize * 4;
                let raw = cursor.take_bytes(len, "inline sid")?;
                BinXmlValue::SidType(Sid::from_buf(raw, 0, raw.len())?)
            }
            BinXmlValueType::BinaryType | BinXmlValueType::BinXmlType => {
                return Err(EvtxError::UnknownToken {
                    value: type_byte,
                    offset: cursor.pos() as u64 - 1,
                });
            }
        };

        Ok(value)
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            BinXmlValue::NullType => true,
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => s.is_empty(),
            BinXmlValue::BinaryType(b) => b.is_empty(),
            BinXmlValue::ArrayType(a) => a.is_empty(),
            _ => false,
        }
    }

    /// Render to plain (unescaped) text, the way XML character data shows
    /// it. Arrays join their elements with `", "`.
    pub(crate) fn render_to_text(&self) -> Cow<'_, str> {
        match self {
            BinXmlValue::NullType => Cow::Borrowed(""),
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => Cow::Borrowed(s),
            BinXmlValue::Int8Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::UInt8Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::Int16Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::UInt16Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::Int32Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::UInt32Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::Int64Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::UInt64Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::Real32Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::Real64Type(v) => Cow::Owned(v.to_string()),
            BinXmlValue::BoolType(v) => Cow::Owned(v.to_string()),
            BinXmlValue::BinaryType(b) => Cow::Owned(lowercase_hex(b)),
            BinXmlValue::GuidType(g) => Cow::Owned(g.to_string()),
            BinXmlValue::SizeTType(s)
            | BinXmlValue::FileTimeType(s)
            | BinXmlValue::SysTimeType(s)
            | BinXmlValue::HexInt32Type(s)
            | BinXmlValue::HexInt64Type(s) => Cow::Borrowed(s),
            BinXmlValue::SidType(sid) => Cow::Owned(sid.to_string()),
            // Structural; the interpreter splices these into the tree and
            // the render paths handle them before asking for text.
            BinXmlValue::BinXmlType(_) => Cow::Borrowed(""),
            BinXmlValue::ArrayType(elements) => Cow::Owned(
                elements
                    .iter()
                    .map(|e| e.render_to_text().into_owned())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }

    /// The typed JSON rendering: scalar types follow the substitution
    /// value type.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            BinXmlValue::NullType => serde_json::Value::Null,
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => json!(s),
            BinXmlValue::Int8Type(v) => json!(v),
            BinXmlValue::UInt8Type(v) => json!(v),
            BinXmlValue::Int16Type(v) => json!(v),
            BinXmlValue::UInt16Type(v) => json!(v),
            BinXmlValue::Int32Type(v) => json!(v),
            BinXmlValue::UInt32Type(v) => json!(v),
            BinXmlValue::Int64Type(v) => json!(v),
            BinXmlValue::UInt64Type(v) => json!(v),
            BinXmlValue::Real32Type(v) => json!(f64::from(*v)),
            BinXmlValue::Real64Type(v) => json!(v),
            BinXmlValue::BoolType(v) => json!(v),
            BinXmlValue::ArrayType(elements) => {
                serde_json::Value::Array(elements.iter().map(BinXmlValue::to_json).collect())
            }
            // Everything else is its canonical string form.
            other => json!(other.render_to_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEC: EncodingRef = encoding::all::ISO_8859_1;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn guid_substitution_renders_braced_lowercase() {
        let raw = [
            0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x34, 0x12, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x07, 0x08,
        ];
        let v = BinXmlValue::decode_slot(&raw, 0, 16, 0x0F, CODEC).unwrap();
        assert_eq!(
            v.render_to_text(),
            "{12345678-1234-1234-0102-030405060708}"
        );
    }

    #[test]
    fn filetime_zero_is_null() {
        let raw = [0_u8; 8];
        let v = BinXmlValue::decode_slot(&raw, 0, 8, 0x11, CODEC).unwrap();
        assert_eq!(v, BinXmlValue::NullType);
    }

    #[test]
    fn filetime_renders_iso8601_with_seven_digits() {
        let raw = 132_514_560_000_000_000_u64.to_le_bytes();
        let v = BinXmlValue::decode_slot(&raw, 0, 8, 0x11, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "2021-01-01T00:00:00.0000000Z");
    }

    #[test]
    fn systemtime_skips_day_of_week() {
        let fields: [u16; 8] = [2020, 2, 6, 29, 23, 59, 58, 7];
        let raw: Vec<u8> = fields.iter().flat_map(|f| f.to_le_bytes()).collect();
        let v = BinXmlValue::decode_slot(&raw, 0, 16, 0x12, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "2020-02-29T23:59:58.007Z");
    }

    #[test]
    fn hex_kinds_are_zero_padded() {
        let v = BinXmlValue::decode_slot(&0x1F_u32.to_le_bytes(), 0, 4, 0x14, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "0x0000001f");

        let v = BinXmlValue::decode_slot(&0x1F_u64.to_le_bytes(), 0, 8, 0x15, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "0x000000000000001f");
    }

    #[test]
    fn sizet_width_follows_size() {
        let v = BinXmlValue::decode_slot(&0xABCD_u32.to_le_bytes(), 0, 4, 0x10, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "0x0000abcd");

        let v = BinXmlValue::decode_slot(&0xABCD_u64.to_le_bytes(), 0, 8, 0x10, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "0x000000000000abcd");
    }

    #[test]
    fn binary_is_lowercase_hex_without_separator() {
        let v = BinXmlValue::decode_slot(&[0xDE, 0xAD, 0xBE, 0xEF], 0, 4, 0x0E, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "deadbeef");
    }

    #[test]
    fn bool_is_32_bit_nonzero() {
        let v = BinXmlValue::decode_slot(&[0, 1, 0, 0], 0, 4, 0x0D, CODEC).unwrap();
        assert_eq!(v, BinXmlValue::BoolType(true));
        assert_eq!(v.to_json(), json!(true));

        let v = BinXmlValue::decode_slot(&[0, 0, 0, 0], 0, 4, 0x0D, CODEC).unwrap();
        assert_eq!(v, BinXmlValue::BoolType(false));
    }

    #[test]
    fn string_strips_one_trailing_nul() {
        let mut raw = utf16("hello");
        raw.extend_from_slice(&[0, 0]);
        let v = BinXmlValue::decode_slot(&raw, 0, raw.len() as u16, 0x01, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "hello");
    }

    #[test]
    fn ansi_string_is_byte_per_code_point() {
        let raw = [0x41, 0xE9, 0x00, 0x42];
        let v = BinXmlValue::decode_slot(&raw, 0, 4, 0x02, CODEC).unwrap();
        // 0xE9 is é in latin-1; decoding stops at NUL.
        assert_eq!(v.render_to_text(), "A\u{e9}");
    }

    #[test]
    fn uint16_array_joins_with_comma_space() {
        let raw: Vec<u8> = [1_u16, 2, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let v = BinXmlValue::decode_slot(&raw, 0, raw.len() as u16, 0x86, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "1, 2, 3");
        assert_eq!(v.to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn string_array_drops_empty_fragments() {
        let mut raw = utf16("alpha");
        raw.extend_from_slice(&[0, 0]);
        raw.extend_from_slice(&utf16("beta"));
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let v = BinXmlValue::decode_slot(&raw, 0, raw.len() as u16, 0x81, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "alpha, beta");
    }

    #[test]
    fn binary_array_falls_back_to_hex() {
        let raw = [0xAB, 0xCD];
        let v = BinXmlValue::decode_slot(&raw, 0, 2, 0x8E, CODEC).unwrap();
        assert_eq!(v, BinXmlValue::BinaryType(vec![0xAB, 0xCD]));
    }

    #[test]
    fn unknown_type_falls_back_to_hex() {
        let raw = [0x01, 0x02];
        let v = BinXmlValue::decode_slot(&raw, 0, 2, 0x7F, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "0102");
    }

    #[test]
    fn zero_size_is_null_for_every_type() {
        for ty in [0x01_u8, 0x08, 0x0E, 0x11, 0x13] {
            let v = BinXmlValue::decode_slot(&[], 0, 0, ty, CODEC).unwrap();
            assert_eq!(v, BinXmlValue::NullType);
        }
    }

    #[test]
    fn sid_substitution() {
        let raw = [
            0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x12, 0x00, 0x00, 0x00,
        ];
        let v = BinXmlValue::decode_slot(&raw, 0, 12, 0x13, CODEC).unwrap();
        assert_eq!(v.render_to_text(), "S-1-5-18");
    }

    #[test]
    fn large_u64_keeps_full_precision_in_json() {
        let raw = u64::MAX.to_le_bytes();
        let v = BinXmlValue::decode_slot(&raw, 0, 8, 0x0A, CODEC).unwrap();
        assert_eq!(v.to_json(), json!(u64::MAX));
    }
}
