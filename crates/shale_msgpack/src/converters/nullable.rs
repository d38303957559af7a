use async_trait::async_trait;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::reader::Reader;
use crate::writer::Writer;

/// Writes nil for absence and delegates otherwise.
pub(crate) struct NullableConverter<E> {
    inner: ArcConverter<E>,
}

impl<E> NullableConverter<E> {
    pub(crate) fn new(inner: ArcConverter<E>) -> Self {
        NullableConverter { inner }
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<Option<E>> for NullableConverter<E> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Option<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        match value {
            None => {
                writer.write_nil();
                Ok(())
            }
            Some(inner) => self.inner.write(writer, inner, ctx),
        }
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Option<E>> {
        if reader.try_read_nil()? {
            return Ok(None);
        }
        Ok(Some(self.inner.read(reader, ctx)?))
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &Option<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        match value {
            None => {
                writer.sync_writer().write_nil();
                writer.flush_if_needed(ctx).await
            }
            Some(inner) => self.inner.write_async(writer, inner, ctx).await,
        }
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Option<E>> {
        if reader.try_read_nil(ctx).await? {
            return Ok(None);
        }
        if self.inner.prefer_async() {
            return Ok(Some(self.inner.read_async(reader, ctx).await?));
        }
        let structure = reader.read_next_structure(ctx).await?;
        Ok(Some(self.inner.read(&mut Reader::new(&structure), ctx)?))
    }
}

/// Transparent delegation through a `Box`.
pub(crate) struct BoxConverter<E> {
    inner: ArcConverter<E>,
}

impl<E> BoxConverter<E> {
    pub(crate) fn new(inner: ArcConverter<E>) -> Self {
        BoxConverter { inner }
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<Box<E>> for BoxConverter<E> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Box<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        self.inner.write(writer, value, ctx)
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Box<E>> {
        Ok(Box::new(self.inner.read(reader, ctx)?))
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &Box<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        self.inner.write_async(writer, value, ctx).await
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Box<E>> {
        if self.inner.prefer_async() {
            return Ok(Box::new(self.inner.read_async(reader, ctx).await?));
        }
        let structure = reader.read_next_structure(ctx).await?;
        Ok(Box::new(self.inner.read(&mut Reader::new(&structure), ctx)?))
    }
}
