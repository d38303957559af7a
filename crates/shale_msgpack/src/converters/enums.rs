use async_trait::async_trait;

use crate::context::SerializationContext;
use crate::converter::Converter;
use crate::error::decode_format;
use crate::reader::Reader;
use crate::writer::Writer;

/// Enums serialize as their underlying integer.
pub(crate) struct EnumConverter<T> {
    type_name: &'static str,
    to_int: fn(&T) -> i64,
    from_int: fn(i64) -> Option<T>,
}

impl<T> EnumConverter<T> {
    pub(crate) fn new(
        type_name: &'static str,
        to_int: fn(&T) -> i64,
        from_int: fn(i64) -> Option<T>,
    ) -> Self {
        EnumConverter {
            type_name,
            to_int,
            from_int,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for EnumConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_int((self.to_int)(value));
        Ok(())
    }

    fn read(&self, reader: &mut Reader<'_>, _ctx: &mut SerializationContext) -> anyhow::Result<T> {
        let raw = reader.read_int()?;
        (self.from_int)(raw).ok_or_else(|| {
            decode_format(format!("{raw} is not a valid `{}` value", self.type_name))
        })
    }
}
