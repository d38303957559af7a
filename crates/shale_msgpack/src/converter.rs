use std::sync::Arc;

use async_trait::async_trait;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::reader::Reader;
use crate::writer::Writer;

/// A reusable encode/decode routine pair for one type.
///
/// Converters are referentially immutable once published to the registry and
/// compose by `Arc` reference. They hold no per-call state; everything
/// call-scoped travels in the [`SerializationContext`].
///
/// The async defaults implement the buffering policy of the engine: a
/// converter that does not [`prefer_async`](Self::prefer_async) is fed one
/// whole structure isolated into a contiguous slice and decodes it
/// synchronously, and writes synchronously into the output buffer with a
/// cooperative flush afterwards. Converters that suspend mid-value (large
/// collections, objects with async-preferring members) override them.
#[async_trait]
pub trait Converter<T: Send + Sync + 'static>: Send + Sync {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T>;

    /// True if this converter wants to drive the async reader itself rather
    /// than receive a buffered structure.
    fn prefer_async(&self) -> bool {
        false
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        self.write(&mut writer.sync_writer(), value, ctx)?;
        writer.flush_if_needed(ctx).await
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        let structure = reader.read_next_structure(ctx).await?;
        self.read(&mut Reader::new(&structure), ctx)
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for dyn Converter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter").finish_non_exhaustive()
    }
}

/// How converters are held and composed.
pub type ArcConverter<T> = Arc<dyn Converter<T>>;
