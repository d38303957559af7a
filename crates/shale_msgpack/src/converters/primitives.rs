//! Built-in converters for intrinsic types, and the table resolving them by
//! `TypeId`.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};

use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::converters::collections::MAX_PREALLOCATED_ELEMENTS;
use crate::error::decode_format;
use crate::format::{EXT_DURATION, EXT_TIMESTAMP, EXT_UUID};
use crate::reader::Reader;
use crate::shape::{Shaped, TypeShape};
use crate::writer::Writer;

pub(crate) struct BoolConverter;

#[async_trait]
impl Converter<bool> for BoolConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &bool,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_bool(*value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<bool> {
        reader.read_bool()
    }
}

macro_rules! uint_converter {
    ($typ:tt) => {
        paste::paste! {
            pub(crate) struct [<$typ:camel Converter>];

            #[async_trait]
            impl Converter<$typ> for [<$typ:camel Converter>] {
                fn write(
                    &self,
                    writer: &mut Writer<'_>,
                    value: &$typ,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<()> {
                    writer.write_uint(*value as u64);
                    Ok(())
                }

                fn read(
                    &self,
                    reader: &mut Reader<'_>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<$typ> {
                    let raw = reader.read_uint()?;
                    <$typ>::try_from(raw).map_err(|_| {
                        decode_format(format!(
                            "{raw} is out of range for {}",
                            stringify!($typ)
                        ))
                    })
                }
            }
        }
    };
}

uint_converter!(u8);
uint_converter!(u16);
uint_converter!(u32);
uint_converter!(u64);

macro_rules! int_converter {
    ($typ:tt) => {
        paste::paste! {
            pub(crate) struct [<$typ:camel Converter>];

            #[async_trait]
            impl Converter<$typ> for [<$typ:camel Converter>] {
                fn write(
                    &self,
                    writer: &mut Writer<'_>,
                    value: &$typ,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<()> {
                    writer.write_int(*value as i64);
                    Ok(())
                }

                fn read(
                    &self,
                    reader: &mut Reader<'_>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<$typ> {
                    let raw = reader.read_int()?;
                    <$typ>::try_from(raw).map_err(|_| {
                        decode_format(format!(
                            "{raw} is out of range for {}",
                            stringify!($typ)
                        ))
                    })
                }
            }
        }
    };
}

int_converter!(i8);
int_converter!(i16);
int_converter!(i32);
int_converter!(i64);

/// 128-bit integers have no MessagePack integer family; values outside the
/// 64-bit wire range encode as 16-byte big-endian `bin`.
pub(crate) struct U128Converter;

#[async_trait]
impl Converter<u128> for U128Converter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &u128,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if *value <= u64::MAX as u128 {
            writer.write_uint(*value as u64);
        } else {
            writer.write_bin(&value.to_be_bytes());
        }
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<u128> {
        if reader.peek_format()?.kind() == crate::format::TokenKind::Bin {
            let bytes = reader.read_bin()?;
            if bytes.len() != 16 {
                return Err(decode_format(format!(
                    "u128 bin payload must be 16 bytes, got {}",
                    bytes.len()
                )));
            }
            return Ok(BigEndian::read_u128(bytes));
        }
        Ok(reader.read_uint()? as u128)
    }
}

pub(crate) struct I128Converter;

#[async_trait]
impl Converter<i128> for I128Converter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &i128,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if (0..=u64::MAX as i128).contains(value) {
            writer.write_uint(*value as u64);
        } else if (i64::MIN as i128..0).contains(value) {
            writer.write_int(*value as i64);
        } else {
            writer.write_bin(&value.to_be_bytes());
        }
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<i128> {
        match reader.peek_format()? {
            code if code.kind() == crate::format::TokenKind::Bin => {
                let bytes = reader.read_bin()?;
                if bytes.len() != 16 {
                    return Err(decode_format(format!(
                        "i128 bin payload must be 16 bytes, got {}",
                        bytes.len()
                    )));
                }
                Ok(BigEndian::read_i128(bytes))
            }
            crate::format::UINT64 => Ok(reader.read_uint()? as i128),
            _ => Ok(reader.read_int()? as i128),
        }
    }
}

pub(crate) struct F32Converter;

#[async_trait]
impl Converter<f32> for F32Converter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &f32,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_f32(*value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<f32> {
        reader.read_f32()
    }
}

pub(crate) struct F64Converter;

#[async_trait]
impl Converter<f64> for F64Converter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &f64,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_f64(*value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<f64> {
        reader.read_f64()
    }
}

/// A single character encodes as a string of length one.
pub(crate) struct CharConverter;

#[async_trait]
impl Converter<char> for CharConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &char,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let mut buf = [0u8; 4];
        writer.write_str(value.encode_utf8(&mut buf));
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<char> {
        let text = reader.read_str()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(decode_format(format!(
                "expected a single-character string, got {} chars",
                text.chars().count()
            ))),
        }
    }
}

pub(crate) struct StringConverter;

#[async_trait]
impl Converter<String> for StringConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &String,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_str(value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<String> {
        Ok(reader.read_str()?.to_owned())
    }
}

pub(crate) struct UnitConverter;

#[async_trait]
impl Converter<()> for UnitConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        _value: &(),
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_nil();
        Ok(())
    }

    fn read(&self, reader: &mut Reader<'_>, _ctx: &mut SerializationContext) -> anyhow::Result<()> {
        if reader.try_read_nil()? {
            Ok(())
        } else {
            Err(decode_format("expected nil for unit value"))
        }
    }
}

pub(crate) struct ByteVecConverter;

#[async_trait]
impl Converter<Vec<u8>> for ByteVecConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Vec<u8>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_bin(value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(reader.read_bin()?.to_vec())
    }
}

pub(crate) struct BytesConverter;

#[async_trait]
impl Converter<bytes::Bytes> for BytesConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &bytes::Bytes,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_bin(value);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<bytes::Bytes> {
        Ok(bytes::Bytes::copy_from_slice(reader.read_bin()?))
    }
}

/// MessagePack timestamp extension (type -1), in its 32/64/96-bit forms.
pub(crate) struct SystemTimeConverter;

#[async_trait]
impl Converter<SystemTime> for SystemTimeConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &SystemTime,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let (secs, nanos) = match value.duration_since(UNIX_EPOCH) {
            Ok(since) => (since.as_secs() as i64, since.subsec_nanos()),
            Err(before_epoch) => {
                let before = before_epoch.duration();
                let mut secs = -(before.as_secs() as i64);
                let mut nanos = before.subsec_nanos();
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                (secs, nanos)
            }
        };

        if secs >= 0 && secs >> 34 == 0 {
            let packed = (u64::from(nanos) << 34) | secs as u64;
            if packed & 0xffff_ffff_0000_0000 == 0 {
                let mut body = [0u8; 4];
                BigEndian::write_u32(&mut body, secs as u32);
                writer.write_ext(EXT_TIMESTAMP, &body);
            } else {
                let mut body = [0u8; 8];
                BigEndian::write_u64(&mut body, packed);
                writer.write_ext(EXT_TIMESTAMP, &body);
            }
        } else {
            let mut body = [0u8; 12];
            BigEndian::write_u32(&mut body[..4], nanos);
            BigEndian::write_i64(&mut body[4..], secs);
            writer.write_ext(EXT_TIMESTAMP, &body);
        }
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<SystemTime> {
        let (type_code, body) = reader.read_ext()?;
        if type_code != EXT_TIMESTAMP {
            return Err(decode_format(format!(
                "expected timestamp extension, got ext type {type_code}"
            )));
        }
        let (secs, nanos) = match body.len() {
            4 => (i64::from(BigEndian::read_u32(body)), 0),
            8 => {
                let packed = BigEndian::read_u64(body);
                ((packed & 0x3_ffff_ffff) as i64, (packed >> 34) as u32)
            }
            12 => (BigEndian::read_i64(&body[4..]), BigEndian::read_u32(&body[..4])),
            len => {
                return Err(decode_format(format!(
                    "timestamp extension of invalid length {len}"
                )))
            }
        };
        if nanos >= 1_000_000_000 {
            return Err(decode_format(format!("timestamp nanoseconds {nanos} out of range")));
        }

        let time = if secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(secs as u64, nanos))
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::new(secs.unsigned_abs(), 0))
                .and_then(|t| t.checked_add(Duration::new(0, nanos)))
        };
        time.ok_or_else(|| decode_format(format!("timestamp {secs}s out of representable range")))
    }
}

/// Time spans use their own extension type: 8 bytes of seconds plus 4 bytes
/// of nanoseconds, both big-endian.
pub(crate) struct DurationConverter;

#[async_trait]
impl Converter<Duration> for DurationConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Duration,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let mut body = [0u8; 12];
        BigEndian::write_u64(&mut body[..8], value.as_secs());
        BigEndian::write_u32(&mut body[8..], value.subsec_nanos());
        writer.write_ext(EXT_DURATION, &body);
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<Duration> {
        let (type_code, body) = reader.read_ext()?;
        if type_code != EXT_DURATION {
            return Err(decode_format(format!(
                "expected duration extension, got ext type {type_code}"
            )));
        }
        if body.len() != 12 {
            return Err(decode_format(format!(
                "duration extension of invalid length {}",
                body.len()
            )));
        }
        let secs = BigEndian::read_u64(&body[..8]);
        let nanos = BigEndian::read_u32(&body[8..]);
        if nanos >= 1_000_000_000 {
            return Err(decode_format(format!("duration nanoseconds {nanos} out of range")));
        }
        Ok(Duration::new(secs, nanos))
    }
}

/// Half-precision floats have no MessagePack family; they widen to float32
/// on the wire. Decoding rejects values a `f16` cannot hold exactly.
pub(crate) struct F16Converter;

#[async_trait]
impl Converter<half::f16> for F16Converter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &half::f16,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_f32(value.to_f32());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<half::f16> {
        let wide = reader.read_f32()?;
        let narrow = half::f16::from_f32(wide);
        if narrow.to_f32() == wide || wide.is_nan() {
            Ok(narrow)
        } else {
            Err(decode_format(format!("float {wide} not representable as f16")))
        }
    }
}

/// Decimals keep their scale through the string form.
pub(crate) struct DecimalConverter;

#[async_trait]
impl Converter<rust_decimal::Decimal> for DecimalConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &rust_decimal::Decimal,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_str(&value.to_string());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<rust_decimal::Decimal> {
        let text = reader.read_str()?;
        text.parse()
            .map_err(|e| decode_format(format!("invalid decimal `{text}`: {e}")))
    }
}

/// Arbitrary-precision integers encode as `bin` holding the signed
/// big-endian two's-complement bytes.
pub(crate) struct BigIntConverter;

#[async_trait]
impl Converter<num_bigint::BigInt> for BigIntConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &num_bigint::BigInt,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_bin(&value.to_signed_bytes_be());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<num_bigint::BigInt> {
        let bytes = reader.read_bin()?;
        if bytes.is_empty() {
            return Err(decode_format("big integer payload cannot be empty"));
        }
        Ok(num_bigint::BigInt::from_signed_bytes_be(bytes))
    }
}

/// UUIDs use their own extension type with the 16 raw bytes as the body.
pub(crate) struct UuidConverter;

#[async_trait]
impl Converter<uuid::Uuid> for UuidConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &uuid::Uuid,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_ext(EXT_UUID, value.as_bytes());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<uuid::Uuid> {
        let (type_code, body) = reader.read_ext()?;
        if type_code != EXT_UUID {
            return Err(decode_format(format!(
                "expected uuid extension, got ext type {type_code}"
            )));
        }
        let bytes: [u8; 16] = body.try_into().map_err(|_| {
            decode_format(format!("uuid extension of invalid length {}", body.len()))
        })?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }
}

pub(crate) struct VersionConverter;

#[async_trait]
impl Converter<semver::Version> for VersionConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &semver::Version,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_str(&value.to_string());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<semver::Version> {
        let text = reader.read_str()?;
        semver::Version::parse(text)
            .map_err(|e| decode_format(format!("invalid version `{text}`: {e}")))
    }
}

pub(crate) struct UrlConverter;

#[async_trait]
impl Converter<url::Url> for UrlConverter {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &url::Url,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_str(value.as_str());
        Ok(())
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<url::Url> {
        let text = reader.read_str()?;
        url::Url::parse(text).map_err(|e| decode_format(format!("invalid url `{text}`: {e}")))
    }
}

// Specialized whole-array converters: one monomorphic loop, no per-element
// dynamic dispatch.

macro_rules! int_array_converter {
    ($typ:tt) => {
        paste::paste! {
            pub(crate) struct [<$typ:camel ArrayConverter>];

            #[async_trait]
            impl Converter<Vec<$typ>> for [<$typ:camel ArrayConverter>] {
                fn write(
                    &self,
                    writer: &mut Writer<'_>,
                    value: &Vec<$typ>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<()> {
                    writer.write_array_header(value.len() as u32);
                    for element in value {
                        writer.write_int(*element as i64);
                    }
                    Ok(())
                }

                fn read(
                    &self,
                    reader: &mut Reader<'_>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<Vec<$typ>> {
                    let count = reader.read_array_header()? as usize;
                    let mut out = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                    for _ in 0..count {
                        let raw = reader.read_int()?;
                        out.push(<$typ>::try_from(raw).map_err(|_| {
                            decode_format(format!(
                                "{raw} is out of range for {}",
                                stringify!($typ)
                            ))
                        })?);
                    }
                    Ok(out)
                }
            }
        }
    };
}

int_array_converter!(i32);
int_array_converter!(i64);

macro_rules! float_array_converter {
    ($typ:tt, $write:ident, $read:ident) => {
        paste::paste! {
            pub(crate) struct [<$typ:camel ArrayConverter>];

            #[async_trait]
            impl Converter<Vec<$typ>> for [<$typ:camel ArrayConverter>] {
                fn write(
                    &self,
                    writer: &mut Writer<'_>,
                    value: &Vec<$typ>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<()> {
                    writer.write_array_header(value.len() as u32);
                    for element in value {
                        writer.$write(*element);
                    }
                    Ok(())
                }

                fn read(
                    &self,
                    reader: &mut Reader<'_>,
                    _ctx: &mut SerializationContext,
                ) -> anyhow::Result<Vec<$typ>> {
                    let count = reader.read_array_header()? as usize;
                    let mut out = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                    for _ in 0..count {
                        out.push(reader.$read()?);
                    }
                    Ok(out)
                }
            }
        }
    };
}

float_array_converter!(f32, write_f32, read_f32);
float_array_converter!(f64, write_f64, read_f64);

// ---------------------------------------------------------------------------
// Resolution by TypeId

fn cast_converter<T: 'static, U: 'static>(converter: ArcConverter<U>) -> Option<ArcConverter<T>> {
    let boxed: Box<dyn Any> = Box::new(converter);
    boxed.downcast::<ArcConverter<T>>().ok().map(|c| *c)
}

/// The built-in primitive table, consulted before shape dispatch.
pub(crate) fn builtin_converter<T: Send + Sync + 'static>() -> Option<ArcConverter<T>> {
    macro_rules! builtin {
        ($typ:ty, $converter:expr) => {
            if TypeId::of::<T>() == TypeId::of::<$typ>() {
                let converter: ArcConverter<$typ> = Arc::new($converter);
                return cast_converter::<T, $typ>(converter);
            }
        };
    }

    builtin!(bool, BoolConverter);
    builtin!(u8, U8Converter);
    builtin!(u16, U16Converter);
    builtin!(u32, U32Converter);
    builtin!(u64, U64Converter);
    builtin!(u128, U128Converter);
    builtin!(i8, I8Converter);
    builtin!(i16, I16Converter);
    builtin!(i32, I32Converter);
    builtin!(i64, I64Converter);
    builtin!(i128, I128Converter);
    builtin!(f32, F32Converter);
    builtin!(f64, F64Converter);
    builtin!(half::f16, F16Converter);
    builtin!(char, CharConverter);
    builtin!(String, StringConverter);
    builtin!((), UnitConverter);
    builtin!(Vec<u8>, ByteVecConverter);
    builtin!(bytes::Bytes, BytesConverter);
    builtin!(SystemTime, SystemTimeConverter);
    builtin!(Duration, DurationConverter);
    builtin!(rust_decimal::Decimal, DecimalConverter);
    builtin!(num_bigint::BigInt, BigIntConverter);
    builtin!(uuid::Uuid, UuidConverter);
    builtin!(semver::Version, VersionConverter);
    builtin!(url::Url, UrlConverter);
    builtin!(Vec<i32>, I32ArrayConverter);
    builtin!(Vec<i64>, I64ArrayConverter);
    builtin!(Vec<f32>, F32ArrayConverter);
    builtin!(Vec<f64>, F64ArrayConverter);
    None
}

macro_rules! primitive_shaped {
    ($($typ:ty),* $(,)?) => {
        $(
            impl Shaped for $typ {
                fn shape() -> TypeShape<Self> {
                    TypeShape::primitive()
                }
            }
        )*
    };
}

primitive_shaped!(
    bool, u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, half::f16, char, String,
    (), bytes::Bytes, SystemTime, Duration, rust_decimal::Decimal, num_bigint::BigInt,
    uuid::Uuid, semver::Version, url::Url,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OutputBuffer;
    use crate::options::SerializerOptions;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> SerializationContext {
        SerializationContext::new(&SerializerOptions::default(), CancellationToken::new())
    }

    fn roundtrip<T: Send + Sync + 'static>(converter: &dyn Converter<T>, value: T) -> T
    where
        T: PartialEq + std::fmt::Debug,
    {
        let mut ctx = test_ctx();
        let mut buffer = OutputBuffer::new();
        converter
            .write(&mut Writer::new(&mut buffer), &value, &mut ctx)
            .unwrap();
        let bytes = buffer.into_written();
        let mut reader = Reader::new(&bytes);
        let decoded = converter.read(&mut reader, &mut ctx).unwrap();
        assert!(reader.is_empty(), "converter left {} bytes", reader.remaining());
        assert_eq!(decoded, value);
        decoded
    }

    #[test]
    fn integer_builtins_roundtrip() {
        roundtrip(&U8Converter, 0u8);
        roundtrip(&U8Converter, 255u8);
        roundtrip(&I8Converter, -128i8);
        roundtrip(&U64Converter, u64::MAX);
        roundtrip(&I64Converter, i64::MIN);
    }

    #[test]
    fn narrowing_rejects_out_of_range() {
        let mut ctx = test_ctx();
        let mut buffer = OutputBuffer::new();
        U64Converter
            .write(&mut Writer::new(&mut buffer), &300u64, &mut ctx)
            .unwrap();
        let bytes = buffer.into_written();
        assert!(U8Converter.read(&mut Reader::new(&bytes), &mut ctx).is_err());
    }

    #[test]
    fn wide_integers_roundtrip() {
        roundtrip(&U128Converter, 7u128);
        roundtrip(&U128Converter, u64::MAX as u128);
        roundtrip(&U128Converter, u128::MAX);
        roundtrip(&I128Converter, -5i128);
        roundtrip(&I128Converter, i128::MIN);
        roundtrip(&I128Converter, u64::MAX as i128);
    }

    #[test]
    fn char_requires_single_character() {
        roundtrip(&CharConverter, 'x');
        roundtrip(&CharConverter, '✓');

        let mut ctx = test_ctx();
        let mut buffer = OutputBuffer::new();
        StringConverter
            .write(&mut Writer::new(&mut buffer), &String::from("ab"), &mut ctx)
            .unwrap();
        let bytes = buffer.into_written();
        assert!(CharConverter.read(&mut Reader::new(&bytes), &mut ctx).is_err());
    }

    #[test]
    fn timestamp_forms_roundtrip() {
        // 32-bit seconds-only form.
        roundtrip(
            &SystemTimeConverter,
            UNIX_EPOCH + Duration::from_secs(1_650_000_000),
        );
        // 64-bit form with nanoseconds.
        roundtrip(
            &SystemTimeConverter,
            UNIX_EPOCH + Duration::new(1_650_000_000, 123_456_789),
        );
        // 96-bit form before the epoch.
        roundtrip(
            &SystemTimeConverter,
            UNIX_EPOCH - Duration::new(100, 0) + Duration::new(0, 250),
        );
        roundtrip(&DurationConverter, Duration::new(86_400, 999_999_999));
    }

    #[test]
    fn timestamp_body_widths() {
        let mut ctx = test_ctx();
        let mut buffer = OutputBuffer::new();
        SystemTimeConverter
            .write(
                &mut Writer::new(&mut buffer),
                &(UNIX_EPOCH + Duration::from_secs(1)),
                &mut ctx,
            )
            .unwrap();
        // fixext4 with type -1
        assert_eq!(buffer.get_written()[..2], [0xd6, 0xff]);
    }

    #[test]
    fn registry_backed_builtins_roundtrip() {
        roundtrip(&F16Converter, half::f16::from_f32(1.5));
        roundtrip(&F16Converter, half::f16::from_f32(-0.0));
        roundtrip(
            &DecimalConverter,
            rust_decimal::Decimal::new(314_159, 5),
        );
        roundtrip(
            &BigIntConverter,
            num_bigint::BigInt::from(-9_876_543_210_987_654_321i128)
                * num_bigint::BigInt::from(1_000_000_007u64),
        );
        roundtrip(&UuidConverter, uuid::Uuid::from_bytes([0xab; 16]));
        roundtrip(
            &VersionConverter,
            semver::Version::parse("1.2.3-alpha.1+build.5").unwrap(),
        );
        roundtrip(
            &UrlConverter,
            url::Url::parse("https://example.com/a/b?q=1#frag").unwrap(),
        );
    }

    #[test]
    fn registry_backed_wire_forms() {
        let mut ctx = test_ctx();

        // Decimals are strings, scale preserved.
        let mut buffer = OutputBuffer::new();
        DecimalConverter
            .write(
                &mut Writer::new(&mut buffer),
                &rust_decimal::Decimal::new(15, 1),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(buffer.get_written(), [0xa3, b'1', b'.', b'5']);

        // UUIDs are fixext16 with their own type code.
        let mut buffer = OutputBuffer::new();
        UuidConverter
            .write(
                &mut Writer::new(&mut buffer),
                &uuid::Uuid::from_bytes([7; 16]),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(buffer.get_written()[..2], [0xd8, EXT_UUID as u8]);

        // Big integers are bin even when small.
        let mut buffer = OutputBuffer::new();
        BigIntConverter
            .write(
                &mut Writer::new(&mut buffer),
                &num_bigint::BigInt::from(-1),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(buffer.get_written(), [0xc4, 1, 0xff]);

        // A half keeps only values it can hold exactly.
        let mut buffer = OutputBuffer::new();
        Writer::new(&mut buffer).write_f32(1.00001);
        assert!(F16Converter
            .read(&mut Reader::new(buffer.get_written()), &mut ctx)
            .is_err());
    }

    #[test]
    fn specialized_arrays_roundtrip() {
        roundtrip(&I32ArrayConverter, vec![1i32, -1, i32::MAX, i32::MIN]);
        roundtrip(&F64ArrayConverter, vec![0.5f64, -2.25]);
        roundtrip(&ByteVecConverter, vec![0u8, 1, 255]);
    }
}
