//! Suspending counterparts of the wire codec.
//!
//! The async reader owns a forward-only fill buffer over an [`AsyncRead`];
//! token reads run the synchronous decoder against the buffered bytes and
//! refill on truncation. The async writer accumulates into an
//! [`OutputBuffer`] and drains it to the sink at cooperative flush points.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::OutputBuffer;
use crate::context::SerializationContext;
use crate::error::{is_truncated, SerializationError};
use crate::format::FormatCode;
use crate::reader::Reader;
use crate::writer::Writer;

pub struct AsyncWriter<'a> {
    sink: &'a mut (dyn AsyncWrite + Send + Unpin),
    buffer: OutputBuffer,
}

impl<'a> AsyncWriter<'a> {
    pub fn new(sink: &'a mut (dyn AsyncWrite + Send + Unpin)) -> AsyncWriter<'a> {
        AsyncWriter {
            sink,
            buffer: OutputBuffer::new(),
        }
    }

    /// Synchronous token writer into the unflushed buffer. Converters write
    /// through this and flush at element boundaries.
    pub fn sync_writer(&mut self) -> Writer<'_> {
        Writer::new(&mut self.buffer)
    }

    pub fn unflushed(&self) -> usize {
        self.buffer.len()
    }

    /// True once the unflushed buffer has reached the context's threshold.
    pub fn is_time_to_flush(&self, ctx: &SerializationContext) -> bool {
        self.buffer.len() >= ctx.unflushed_bytes_threshold()
    }

    /// Cooperative flush point: drains the buffer only once the threshold is
    /// exceeded, so small aggregates do not fragment the transport.
    pub async fn flush_if_needed(&mut self, ctx: &SerializationContext) -> anyhow::Result<()> {
        if self.is_time_to_flush(ctx) {
            self.flush(ctx).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self, ctx: &SerializationContext) -> anyhow::Result<()> {
        ctx.ensure_not_cancelled()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        let written = self.buffer.get_written();
        tokio::select! {
            _ = ctx.cancel_token().cancelled() => {
                return Err(SerializationError::Cancelled.into());
            }
            result = self.sink.write_all(written) => result?,
        }
        self.buffer.clear();
        Ok(())
    }

    /// Drains the remainder and flushes the transport itself.
    pub async fn finish(&mut self, ctx: &SerializationContext) -> anyhow::Result<()> {
        self.flush(ctx).await?;
        self.sink.flush().await?;
        Ok(())
    }
}

pub struct AsyncReader<'a> {
    source: &'a mut (dyn AsyncRead + Send + Unpin),
    buffer: BytesMut,
}

impl<'a> AsyncReader<'a> {
    pub fn new(source: &'a mut (dyn AsyncRead + Send + Unpin)) -> AsyncReader<'a> {
        AsyncReader {
            source,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Awaits at least one more byte from the source. End of stream while a
    /// value is outstanding is a truncation.
    async fn fill_more(&mut self, ctx: &SerializationContext) -> anyhow::Result<()> {
        ctx.ensure_not_cancelled()?;
        let read = tokio::select! {
            _ = ctx.cancel_token().cancelled() => {
                return Err(SerializationError::Cancelled.into());
            }
            result = self.source.read_buf(&mut self.buffer) => result?,
        };
        if read == 0 {
            return Err(SerializationError::TruncatedInput.into());
        }
        Ok(())
    }

    /// Runs a synchronous token read against the buffered bytes, refilling
    /// and retrying while it reports truncation. `decode` must not consume
    /// the reader on failure paths other than truncation.
    pub(crate) async fn with_sync<R>(
        &mut self,
        ctx: &SerializationContext,
        decode: impl Fn(&mut Reader<'_>) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        loop {
            let buffered = self.buffer.len();
            let outcome = {
                let mut reader = Reader::new(&self.buffer);
                match decode(&mut reader) {
                    Ok(value) => Some((value, buffered - reader.remaining())),
                    Err(e) if is_truncated(&e) => None,
                    Err(e) => return Err(e),
                }
            };
            match outcome {
                Some((value, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(value);
                }
                None => self.fill_more(ctx).await?,
            }
        }
    }

    /// Isolates one complete structure into a contiguous owned slice and
    /// advances past it. Non-async-preferring converters decode the result
    /// synchronously; this is the throughput-critical buffering rule.
    pub async fn read_next_structure(
        &mut self,
        ctx: &SerializationContext,
    ) -> anyhow::Result<Bytes> {
        let len = loop {
            let mut reader = Reader::new(&self.buffer);
            match reader.read_next_structure() {
                Ok(slice) => break slice.len(),
                Err(e) if is_truncated(&e) => self.fill_more(ctx).await?,
                Err(e) => return Err(e),
            }
        };
        Ok(self.buffer.split_to(len).freeze())
    }

    pub async fn peek_format(&mut self, ctx: &SerializationContext) -> anyhow::Result<FormatCode> {
        if self.buffer.is_empty() {
            self.fill_more(ctx).await?;
        }
        Ok(FormatCode(self.buffer[0]))
    }

    pub async fn try_read_nil(&mut self, ctx: &SerializationContext) -> anyhow::Result<bool> {
        if self.peek_format(ctx).await? == crate::format::NIL {
            self.buffer.advance(1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub async fn read_array_header(&mut self, ctx: &SerializationContext) -> anyhow::Result<u32> {
        self.with_sync(ctx, |r| r.read_array_header()).await
    }

    pub async fn read_map_header(&mut self, ctx: &SerializationContext) -> anyhow::Result<u32> {
        self.with_sync(ctx, |r| r.read_map_header()).await
    }

    pub async fn read_int(&mut self, ctx: &SerializationContext) -> anyhow::Result<i64> {
        self.with_sync(ctx, |r| r.read_int()).await
    }

    /// Owned copy of a string token's bytes (property keys are short).
    pub async fn read_str_bytes(&mut self, ctx: &SerializationContext) -> anyhow::Result<Vec<u8>> {
        self.with_sync(ctx, |r| r.read_str_bytes().map(<[u8]>::to_vec))
            .await
    }

    pub async fn skip_value(&mut self, ctx: &SerializationContext) -> anyhow::Result<()> {
        self.read_next_structure(ctx).await?;
        Ok(())
    }
}
