//! Polymorphic dispatch over a closed subtype set.
//!
//! Wire form is always a 2-element array `[alias, payload]`: nil alias for
//! the declared type itself, an integer alias for a known subtype.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::error::{decode_format, SerializationError};
use crate::reader::Reader;
use crate::writer::Writer;

/// One case of a union: probes values on the write side, decodes payloads on
/// the read side.
#[async_trait]
pub(crate) trait UnionCase<T: Send + Sync + 'static>: Send + Sync {
    /// Writes the alias and payload if the value belongs to this case.
    /// Returns false (writing nothing) otherwise.
    fn try_write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<bool>;

    fn read_payload(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T>;

    async fn try_write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<bool>;

    async fn read_payload_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T>;

    fn prefer_async(&self) -> bool;
}

pub(crate) struct TypedUnionCase<T, S> {
    alias: Option<i32>,
    project: for<'x> fn(&'x T) -> Option<&'x S>,
    erase: fn(S) -> T,
    converter: ArcConverter<S>,
}

impl<T, S> TypedUnionCase<T, S> {
    pub(crate) fn new(
        alias: Option<i32>,
        project: for<'x> fn(&'x T) -> Option<&'x S>,
        erase: fn(S) -> T,
        converter: ArcConverter<S>,
    ) -> Self {
        TypedUnionCase {
            alias,
            project,
            erase,
            converter,
        }
    }

    fn write_alias(&self, writer: &mut Writer<'_>) {
        match self.alias {
            Some(alias) => writer.write_int(alias as i64),
            None => writer.write_nil(),
        }
    }
}

#[async_trait]
impl<T, S> UnionCase<T> for TypedUnionCase<T, S>
where
    T: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn try_write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<bool> {
        match (self.project)(value) {
            None => Ok(false),
            Some(case) => {
                self.write_alias(writer);
                self.converter.write(writer, case, ctx)?;
                Ok(true)
            }
        }
    }

    fn read_payload(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        Ok((self.erase)(self.converter.read(reader, ctx)?))
    }

    async fn try_write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<bool> {
        match (self.project)(value) {
            None => Ok(false),
            Some(case) => {
                self.write_alias(&mut writer.sync_writer());
                self.converter.write_async(writer, case, ctx).await?;
                Ok(true)
            }
        }
    }

    async fn read_payload_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        let value = if self.converter.prefer_async() {
            self.converter.read_async(reader, ctx).await?
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.converter.read(&mut Reader::new(&structure), ctx)?
        };
        Ok((self.erase)(value))
    }

    fn prefer_async(&self) -> bool {
        self.converter.prefer_async()
    }
}

pub(crate) struct UnionConverter<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) base: Arc<dyn UnionCase<T>>,
    pub(crate) subtypes: Vec<Arc<dyn UnionCase<T>>>,
    pub(crate) by_alias: HashMap<i32, Arc<dyn UnionCase<T>>>,
    pub(crate) prefer_async: bool,
}

impl<T: Send + Sync + 'static> UnionConverter<T> {
    fn unknown_runtime_type(&self) -> anyhow::Error {
        SerializationError::NotSupported(format!(
            "value is not the declared `{}` nor one of its known subtypes",
            self.type_name
        ))
        .into()
    }

    fn case_for_alias(&self, alias: i64) -> anyhow::Result<&Arc<dyn UnionCase<T>>> {
        let alias = i32::try_from(alias)
            .map_err(|_| decode_format(format!("subtype alias {alias} out of range")))?;
        self.by_alias.get(&alias).ok_or_else(|| {
            decode_format(format!(
                "unknown subtype alias {alias} for `{}`",
                self.type_name
            ))
        })
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for UnionConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            writer.write_array_header(2);
            for case in &self.subtypes {
                if case.try_write(writer, value, ctx)? {
                    return Ok(());
                }
            }
            if self.base.try_write(writer, value, ctx)? {
                return Ok(());
            }
            Err(self.unknown_runtime_type())
        })();
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(SerializationError::UnexpectedNil(self.type_name).into());
        }
        ctx.depth_step()?;
        let result = (|| {
            let count = reader.read_array_header()?;
            if count != 2 {
                return Err(decode_format(format!(
                    "union must be a 2-element array, got {count} elements"
                )));
            }
            if reader.try_read_nil()? {
                self.base.read_payload(reader, ctx)
            } else {
                let alias = reader.read_int()?;
                self.case_for_alias(alias)?.read_payload(reader, ctx)
            }
        })();
        ctx.depth_unstep();
        result
    }

    fn prefer_async(&self) -> bool {
        self.prefer_async
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        writer.sync_writer().write_array_header(2);
        let mut written = false;
        for case in &self.subtypes {
            if case.try_write_async(writer, value, ctx).await? {
                written = true;
                break;
            }
        }
        if !written && !self.base.try_write_async(writer, value, ctx).await? {
            return Err(self.unknown_runtime_type());
        }
        ctx.depth_unstep();
        Ok(())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        if reader.try_read_nil(ctx).await? {
            return Err(SerializationError::UnexpectedNil(self.type_name).into());
        }
        ctx.depth_step()?;
        let count = reader.read_array_header(ctx).await?;
        if count != 2 {
            return Err(decode_format(format!(
                "union must be a 2-element array, got {count} elements"
            )));
        }
        let value = if reader.try_read_nil(ctx).await? {
            self.base.read_payload_async(reader, ctx).await?
        } else {
            let alias = reader.read_int(ctx).await?;
            self.case_for_alias(alias)?
                .read_payload_async(reader, ctx)
                .await?
        };
        ctx.depth_unstep();
        Ok(value)
    }
}
