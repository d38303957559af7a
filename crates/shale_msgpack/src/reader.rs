use crate::error::{decode_format, SerializationError};
use crate::format::{self, FormatCode, TokenKind};

/// Pull-model MessagePack token reader over a borrowed byte slice.
///
/// Every `read_*` call advances the cursor past exactly one token. The reader
/// is `Copy`-cheap to clone, which is how callers peek: clone, read, discard.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(SerializationError::TruncatedInput.into());
        }
        let (taken, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(taken)
    }

    #[inline]
    fn take_byte(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Returns the format code of the next token without consuming it.
    pub fn peek_format(&self) -> anyhow::Result<FormatCode> {
        match self.bytes.first() {
            Some(&byte) => Ok(FormatCode(byte)),
            None => Err(SerializationError::TruncatedInput.into()),
        }
    }

    /// Consumes a nil token if one is next. Never fails on a non-nil token.
    pub fn try_read_nil(&mut self) -> anyhow::Result<bool> {
        if self.peek_format()? == format::NIL {
            self.bytes = &self.bytes[1..];
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn read_bool(&mut self) -> anyhow::Result<bool> {
        match FormatCode(self.take_byte()?) {
            format::TRUE => Ok(true),
            format::FALSE => Ok(false),
            code => Err(decode_format(format!(
                "expected bool, got format code 0x{:02x}",
                code.0
            ))),
        }
    }

    /// Reads any integer representation, range-checked into `i64`.
    pub fn read_int(&mut self) -> anyhow::Result<i64> {
        let code = FormatCode(self.take_byte()?);
        if code.is_positive_fixint() {
            return Ok(code.0 as i64);
        }
        if code.is_negative_fixint() {
            return Ok(code.0 as i8 as i64);
        }
        match code {
            format::UINT8 => Ok(self.take_byte()? as i64),
            format::UINT16 => Ok(u16::from_be_bytes(self.take(2)?.try_into()?) as i64),
            format::UINT32 => Ok(u32::from_be_bytes(self.take(4)?.try_into()?) as i64),
            format::UINT64 => {
                let value = u64::from_be_bytes(self.take(8)?.try_into()?);
                i64::try_from(value)
                    .map_err(|_| decode_format(format!("unsigned value {value} exceeds i64 range")))
            }
            format::INT8 => Ok(self.take_byte()? as i8 as i64),
            format::INT16 => Ok(i16::from_be_bytes(self.take(2)?.try_into()?) as i64),
            format::INT32 => Ok(i32::from_be_bytes(self.take(4)?.try_into()?) as i64),
            format::INT64 => Ok(i64::from_be_bytes(self.take(8)?.try_into()?)),
            _ => Err(decode_format(format!(
                "expected integer, got format code 0x{:02x}",
                code.0
            ))),
        }
    }

    /// Reads any non-negative integer representation as `u64`.
    pub fn read_uint(&mut self) -> anyhow::Result<u64> {
        let code = self.peek_format()?;
        if code == format::UINT64 {
            self.bytes = &self.bytes[1..];
            return Ok(u64::from_be_bytes(self.take(8)?.try_into()?));
        }

        let value = self.read_int()?;
        u64::try_from(value)
            .map_err(|_| decode_format(format!("negative value {value} where unsigned expected")))
    }

    pub fn read_f32(&mut self) -> anyhow::Result<f32> {
        match FormatCode(self.take_byte()?) {
            format::FLOAT32 => Ok(f32::from_be_bytes(self.take(4)?.try_into()?)),
            format::FLOAT64 => {
                let wide = f64::from_be_bytes(self.take(8)?.try_into()?);
                let narrow = wide as f32;
                if narrow as f64 == wide || wide.is_nan() {
                    Ok(narrow)
                } else {
                    Err(decode_format(format!("float64 {wide} not representable as f32")))
                }
            }
            code => Err(decode_format(format!(
                "expected float, got format code 0x{:02x}",
                code.0
            ))),
        }
    }

    pub fn read_f64(&mut self) -> anyhow::Result<f64> {
        match self.peek_format()? {
            format::FLOAT64 => {
                self.bytes = &self.bytes[1..];
                Ok(f64::from_be_bytes(self.take(8)?.try_into()?))
            }
            format::FLOAT32 => {
                self.bytes = &self.bytes[1..];
                Ok(f32::from_be_bytes(self.take(4)?.try_into()?) as f64)
            }
            code if code.kind() == TokenKind::Integer => Ok(self.read_int()? as f64),
            code => Err(decode_format(format!(
                "expected float, got format code 0x{:02x}",
                code.0
            ))),
        }
    }

    pub fn read_string_header(&mut self) -> anyhow::Result<u32> {
        let code = FormatCode(self.take_byte()?);
        if code.is_fixstr() {
            return Ok((code.0 & 0x1f) as u32);
        }
        match code {
            format::STR8 => Ok(self.take_byte()? as u32),
            format::STR16 => Ok(u16::from_be_bytes(self.take(2)?.try_into()?) as u32),
            format::STR32 => Ok(u32::from_be_bytes(self.take(4)?.try_into()?)),
            _ => Err(decode_format(format!(
                "expected string, got format code 0x{:02x}",
                code.0
            ))),
        }
    }

    /// Reads a string token, returning a borrowed view of its UTF-8 bytes
    /// without validation. Used for span-keyed property lookup.
    pub fn read_str_bytes(&mut self) -> anyhow::Result<&'a [u8]> {
        let len = self.read_string_header()? as usize;
        self.take(len)
    }

    pub fn read_str(&mut self) -> anyhow::Result<&'a str> {
        let bytes = self.read_str_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| decode_format(format!("invalid utf-8 in string: {e}")))
    }

    pub fn read_bin(&mut self) -> anyhow::Result<&'a [u8]> {
        let len = match FormatCode(self.take_byte()?) {
            format::BIN8 => self.take_byte()? as usize,
            format::BIN16 => u16::from_be_bytes(self.take(2)?.try_into()?) as usize,
            format::BIN32 => u32::from_be_bytes(self.take(4)?.try_into()?) as usize,
            code => {
                return Err(decode_format(format!(
                    "expected bin, got format code 0x{:02x}",
                    code.0
                )))
            }
        };
        self.take(len)
    }

    pub fn read_ext(&mut self) -> anyhow::Result<(i8, &'a [u8])> {
        let len = match FormatCode(self.take_byte()?) {
            format::FIXEXT1 => 1,
            format::FIXEXT2 => 2,
            format::FIXEXT4 => 4,
            format::FIXEXT8 => 8,
            format::FIXEXT16 => 16,
            format::EXT8 => self.take_byte()? as usize,
            format::EXT16 => u16::from_be_bytes(self.take(2)?.try_into()?) as usize,
            format::EXT32 => u32::from_be_bytes(self.take(4)?.try_into()?) as usize,
            code => {
                return Err(decode_format(format!(
                    "expected ext, got format code 0x{:02x}",
                    code.0
                )))
            }
        };
        let type_code = self.take_byte()? as i8;
        Ok((type_code, self.take(len)?))
    }

    pub fn read_array_header(&mut self) -> anyhow::Result<u32> {
        match self.try_read_array_header()? {
            Some(len) => Ok(len),
            None => {
                let code = self.peek_format()?;
                Err(decode_format(format!(
                    "expected array, got format code 0x{:02x}",
                    code.0
                )))
            }
        }
    }

    /// Consumes an array header if one is next; leaves the cursor untouched
    /// otherwise.
    pub fn try_read_array_header(&mut self) -> anyhow::Result<Option<u32>> {
        let code = self.peek_format()?;
        if code.is_fixarray() {
            self.bytes = &self.bytes[1..];
            return Ok(Some((code.0 & 0x0f) as u32));
        }
        match code {
            format::ARRAY16 => {
                self.bytes = &self.bytes[1..];
                Ok(Some(u16::from_be_bytes(self.take(2)?.try_into()?) as u32))
            }
            format::ARRAY32 => {
                self.bytes = &self.bytes[1..];
                Ok(Some(u32::from_be_bytes(self.take(4)?.try_into()?)))
            }
            _ => Ok(None),
        }
    }

    pub fn read_map_header(&mut self) -> anyhow::Result<u32> {
        match self.try_read_map_header()? {
            Some(len) => Ok(len),
            None => {
                let code = self.peek_format()?;
                Err(decode_format(format!(
                    "expected map, got format code 0x{:02x}",
                    code.0
                )))
            }
        }
    }

    pub fn try_read_map_header(&mut self) -> anyhow::Result<Option<u32>> {
        let code = self.peek_format()?;
        if code.is_fixmap() {
            self.bytes = &self.bytes[1..];
            return Ok(Some((code.0 & 0x0f) as u32));
        }
        match code {
            format::MAP16 => {
                self.bytes = &self.bytes[1..];
                Ok(Some(u16::from_be_bytes(self.take(2)?.try_into()?) as u32))
            }
            format::MAP32 => {
                self.bytes = &self.bytes[1..];
                Ok(Some(u32::from_be_bytes(self.take(4)?.try_into()?)))
            }
            _ => Ok(None),
        }
    }

    /// Skips exactly one complete structure (scalar, array, map or ext),
    /// without decoding it. Iterative, so hostile nesting cannot overflow the
    /// stack.
    pub fn skip_value(&mut self) -> anyhow::Result<()> {
        let mut pending: u64 = 1;
        while pending > 0 {
            pending -= 1;
            pending = pending
                .checked_add(self.skip_token()?)
                .ok_or_else(|| decode_format("structure element count overflow"))?;
        }
        Ok(())
    }

    /// Consumes one token, returning how many child values follow it.
    fn skip_token(&mut self) -> anyhow::Result<u64> {
        let code = FormatCode(self.take_byte()?);
        if code.is_positive_fixint() || code.is_negative_fixint() {
            return Ok(0);
        }
        if code.is_fixstr() {
            self.take((code.0 & 0x1f) as usize)?;
            return Ok(0);
        }
        if code.is_fixarray() {
            return Ok((code.0 & 0x0f) as u64);
        }
        if code.is_fixmap() {
            return Ok((code.0 & 0x0f) as u64 * 2);
        }
        match code {
            format::NIL | format::TRUE | format::FALSE => Ok(0),
            format::UINT8 | format::INT8 => {
                self.take(1)?;
                Ok(0)
            }
            format::UINT16 | format::INT16 => {
                self.take(2)?;
                Ok(0)
            }
            format::UINT32 | format::INT32 | format::FLOAT32 => {
                self.take(4)?;
                Ok(0)
            }
            format::UINT64 | format::INT64 | format::FLOAT64 => {
                self.take(8)?;
                Ok(0)
            }
            format::STR8 | format::BIN8 => {
                let len = self.take_byte()? as usize;
                self.take(len)?;
                Ok(0)
            }
            format::STR16 | format::BIN16 => {
                let len = u16::from_be_bytes(self.take(2)?.try_into()?) as usize;
                self.take(len)?;
                Ok(0)
            }
            format::STR32 | format::BIN32 => {
                let len = u32::from_be_bytes(self.take(4)?.try_into()?) as usize;
                self.take(len)?;
                Ok(0)
            }
            format::FIXEXT1 => {
                self.take(2)?;
                Ok(0)
            }
            format::FIXEXT2 => {
                self.take(3)?;
                Ok(0)
            }
            format::FIXEXT4 => {
                self.take(5)?;
                Ok(0)
            }
            format::FIXEXT8 => {
                self.take(9)?;
                Ok(0)
            }
            format::FIXEXT16 => {
                self.take(17)?;
                Ok(0)
            }
            format::EXT8 => {
                let len = self.take_byte()? as usize;
                self.take(len + 1)?;
                Ok(0)
            }
            format::EXT16 => {
                let len = u16::from_be_bytes(self.take(2)?.try_into()?) as usize;
                self.take(len + 1)?;
                Ok(0)
            }
            format::EXT32 => {
                let len = u32::from_be_bytes(self.take(4)?.try_into()?) as usize;
                self.take(len + 1)?;
                Ok(0)
            }
            format::ARRAY16 => Ok(u16::from_be_bytes(self.take(2)?.try_into()?) as u64),
            format::ARRAY32 => Ok(u32::from_be_bytes(self.take(4)?.try_into()?) as u64),
            format::MAP16 => Ok(u16::from_be_bytes(self.take(2)?.try_into()?) as u64 * 2),
            format::MAP32 => Ok(u32::from_be_bytes(self.take(4)?.try_into()?) as u64 * 2),
            _ => Err(decode_format(format!("invalid format code 0x{:02x}", code.0))),
        }
    }

    /// Scans one complete structure and returns its raw byte range, leaving
    /// the cursor past it. The async path uses this to isolate a nested
    /// structure into a contiguous slice for synchronous decoding.
    pub fn read_next_structure(&mut self) -> anyhow::Result<&'a [u8]> {
        let start = self.bytes;
        self.skip_value()?;
        Ok(&start[..start.len() - self.bytes.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OutputBuffer;
    use crate::writer::Writer;

    fn encode(write: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut buffer = OutputBuffer::new();
        write(&mut Writer::new(&mut buffer));
        buffer.into_written()
    }

    #[test]
    fn int_readback_across_widths() {
        for value in [
            0i64,
            1,
            127,
            128,
            255,
            256,
            65535,
            65536,
            -1,
            -32,
            -33,
            -128,
            -129,
            -32768,
            -32769,
            i64::MIN,
            i64::MAX,
        ] {
            let bytes = encode(|w| w.write_int(value));
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_int().unwrap(), value, "value {value}");
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn uint_and_cross_family_reads() {
        let bytes = encode(|w| w.write_uint(u64::MAX));
        assert_eq!(Reader::new(&bytes).read_uint().unwrap(), u64::MAX);
        assert!(Reader::new(&bytes).read_int().is_err());

        // A small signed encoding reads back as unsigned.
        let bytes = encode(|w| w.write_int(42));
        assert_eq!(Reader::new(&bytes).read_uint().unwrap(), 42);

        // A negative value does not.
        let bytes = encode(|w| w.write_int(-1));
        assert!(Reader::new(&bytes).read_uint().is_err());
    }

    #[test]
    fn float_widening_and_narrowing() {
        let bytes = encode(|w| w.write_f32(1.5));
        assert_eq!(Reader::new(&bytes).read_f64().unwrap(), 1.5);

        let bytes = encode(|w| w.write_f64(1.5));
        assert_eq!(Reader::new(&bytes).read_f32().unwrap(), 1.5);

        let bytes = encode(|w| w.write_f64(1.0000000001));
        assert!(Reader::new(&bytes).read_f32().is_err());

        let bytes = encode(|w| w.write_int(3));
        assert_eq!(Reader::new(&bytes).read_f64().unwrap(), 3.0);
    }

    #[test]
    fn str_and_bin_views() {
        let bytes = encode(|w| w.write_str("hello"));
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_str().unwrap(), "hello");
        assert!(reader.is_empty());

        let bytes = encode(|w| w.write_bin(&[1, 2, 3]));
        assert_eq!(Reader::new(&bytes).read_bin().unwrap(), &[1, 2, 3]);

        // str and bin headers do not cross-match.
        assert!(Reader::new(&bytes).read_str().is_err());
    }

    #[test]
    fn ext_roundtrip() {
        let bytes = encode(|w| w.write_ext(7, &[9, 9, 9]));
        let (code, data) = Reader::new(&bytes).read_ext().unwrap();
        assert_eq!(code, 7);
        assert_eq!(data, &[9, 9, 9]);
    }

    #[test]
    fn truncated_reads_fail_with_truncated_input() {
        let bytes = encode(|w| w.write_str("hello"));
        let err = Reader::new(&bytes[..3]).read_str().unwrap_err();
        assert!(crate::error::is_truncated(&err));

        let err = Reader::new(&[]).read_int().unwrap_err();
        assert!(crate::error::is_truncated(&err));
    }

    #[test]
    fn skip_value_spans_nested_structures() {
        let bytes = encode(|w| {
            w.write_array_header(3);
            w.write_map_header(1);
            w.write_str("k");
            w.write_array_header(2);
            w.write_int(1);
            w.write_str("deep");
            w.write_nil();
            w.write_bin(&[1, 2]);
            w.write_int(99); // trailing value outside the structure
        });
        let mut reader = Reader::new(&bytes);
        let structure = reader.read_next_structure().unwrap();
        assert_eq!(structure.len(), bytes.len() - 2);
        assert_eq!(reader.read_int().unwrap(), 99);
        assert!(reader.is_empty());
    }

    #[test]
    fn skip_value_rejects_truncation() {
        let bytes = encode(|w| {
            w.write_array_header(2);
            w.write_int(1);
        });
        assert!(Reader::new(&bytes).skip_value().is_err());
    }
}
