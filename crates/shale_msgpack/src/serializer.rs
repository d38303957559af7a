use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::buffer::OutputBuffer;
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::converters::reference::{acquire_tracker, release_tracker};
use crate::error::decode_format;
use crate::options::SerializerOptions;
use crate::reader::Reader;
use crate::registry::ConverterRegistry;
use crate::shape::Shaped;
use crate::writer::Writer;

/// The serializer instance: configuration plus the per-instance converter
/// registry. Cheap to share by reference across threads; converters are
/// synthesized once per (serializer, type).
#[derive(Default)]
pub struct MessagePackSerializer {
    options: SerializerOptions,
    registry: ConverterRegistry,
}

impl MessagePackSerializer {
    pub fn new(options: SerializerOptions) -> MessagePackSerializer {
        MessagePackSerializer {
            options,
            registry: ConverterRegistry::default(),
        }
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Registers a user-supplied converter for `T`. Takes precedence over
    /// the built-in table and shape synthesis; register before first use of
    /// the type.
    pub fn register_converter<T: Send + Sync + 'static>(
        &mut self,
        converter: impl Converter<T> + 'static,
    ) {
        self.registry
            .insert_ready::<T>(Arc::new(converter) as ArcConverter<T>);
    }

    /// Returns the memoized converter for `T`, synthesizing it on first use.
    /// Construction errors for ill-formed shapes surface here.
    pub fn converter<T: Shaped>(&self) -> anyhow::Result<ArcConverter<T>> {
        self.registry.get_or_synthesize::<T>(self)
    }

    fn begin_context(&self, cancel: CancellationToken) -> ContextScope {
        let mut ctx = SerializationContext::new(&self.options, cancel);
        if self.options.preserve_references {
            ctx.ref_tracker = Some(acquire_tracker());
        }
        ContextScope { ctx }
    }

    /// Encodes one value as one MessagePack structure.
    pub fn to_vec<T: Shaped>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        let converter = self.converter::<T>()?;
        let mut scope = self.begin_context(CancellationToken::new());
        let mut buffer = OutputBuffer::new();
        converter.write(&mut Writer::new(&mut buffer), value, scope.context())?;
        Ok(buffer.into_written())
    }

    /// Decodes one value from a buffer holding exactly one structure.
    pub fn from_slice<T: Shaped>(&self, bytes: &[u8]) -> anyhow::Result<T> {
        let converter = self.converter::<T>()?;
        let mut scope = self.begin_context(CancellationToken::new());
        let mut reader = Reader::new(bytes);
        let value = converter.read(&mut reader, scope.context())?;
        if !reader.is_empty() {
            return Err(decode_format(format!(
                "{} trailing byte(s) after the value",
                reader.remaining()
            )));
        }
        Ok(value)
    }

    /// Encodes one value to an async sink, flushing cooperatively once the
    /// unflushed buffer passes the configured threshold.
    pub async fn write_async<T: Shaped>(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        value: &T,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let converter = self.converter::<T>()?;
        let mut scope = self.begin_context(cancel);
        let mut writer = AsyncWriter::new(sink);
        converter
            .write_async(&mut writer, value, scope.context())
            .await?;
        writer.finish(scope.context()).await
    }

    /// Decodes one value from an async source.
    pub async fn read_async<T: Shaped>(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        cancel: CancellationToken,
    ) -> anyhow::Result<T> {
        let converter = self.converter::<T>()?;
        let mut scope = self.begin_context(cancel);
        let mut reader = AsyncReader::new(source);
        converter.read_async(&mut reader, scope.context()).await
    }
}

/// Scopes a context to one top-level operation; returns a borrowed tracker
/// to the pool on every exit path.
struct ContextScope {
    ctx: SerializationContext,
}

impl ContextScope {
    fn context(&mut self) -> &mut SerializationContext {
        &mut self.ctx
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if let Some(tracker) = self.ctx.ref_tracker.take() {
            release_tracker(tracker);
        }
    }
}
