//! Reference preservation.
//!
//! Rust values carry no object identity, so the engine provides [`Shared`],
//! an `Arc`-backed handle that does. With `preserve_references` enabled,
//! every `Shared` occurrence after the first encodes as an extension token
//! carrying the previously assigned sequence number, and decoding restores
//! pointer identity — including cycles, because the handle is recorded
//! *before* its payload is decoded and filled afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::error::{decode_format, SerializationError};
use crate::format::{TokenKind, EXT_REFERENCE};
use crate::reader::Reader;
use crate::writer::Writer;

/// An identity-bearing smart pointer. Two clones of one `Shared` are the
/// same object for reference-preservation purposes; two `Shared::new` calls
/// over equal values are not.
pub struct Shared<T>(Arc<OnceCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Shared<T> {
        Shared(Arc::new(OnceCell::with_value(value)))
    }

    /// An empty handle recorded into the tracker before its payload decodes;
    /// this is what lets cyclic graphs resolve.
    fn unfilled() -> Shared<T> {
        Shared(Arc::new(OnceCell::new()))
    }

    fn fill(&self, value: T) -> Result<(), T> {
        self.0.set(value)
    }

    /// # Panics
    /// Panics if called on a handle whose cyclic graph has not finished
    /// decoding. Outside converter internals the cell is always filled.
    pub fn get(&self) -> &T {
        self.0
            .get()
            .expect("shared value accessed before its graph finished decoding")
    }

    /// Builds a cyclic value: the closure receives the handle being
    /// constructed and may stash clones of it inside the value it returns.
    pub fn new_cyclic(build: impl FnOnce(&Shared<T>) -> T) -> Shared<T> {
        let handle: Shared<T> = Shared::unfilled();
        let value = build(&handle);
        let _ = handle.fill(value);
        handle
    }

    pub fn ptr_eq(a: &Shared<T>, b: &Shared<T>) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Shared::new(T::default())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(value) => value.fmt(f),
            None => f.write_str("<unfilled>"),
        }
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Shared::ptr_eq(self, other) || self.0.get() == other.0.get()
    }
}

impl<T: Eq> Eq for Shared<T> {}

// ---------------------------------------------------------------------------
// Tracker and pool

/// Per-operation identity state: written identities to sequence numbers, and
/// decoded sequence numbers to type-erased `Shared` handles.
#[derive(Default)]
pub(crate) struct RefTracker {
    write_ids: HashMap<usize, u64>,
    read_values: Vec<Box<dyn Any + Send + Sync>>,
}

impl RefTracker {
    fn tracked_id(&self, identity: usize) -> Option<u64> {
        self.write_ids.get(&identity).copied()
    }

    fn track_written(&mut self, identity: usize) -> u64 {
        let seq = self.write_ids.len() as u64;
        self.write_ids.insert(identity, seq);
        seq
    }

    fn record_read(&mut self, handle: Box<dyn Any + Send + Sync>) {
        self.read_values.push(handle);
    }

    fn resolve(&self, seq: u64) -> Option<&(dyn Any + Send + Sync)> {
        self.read_values.get(seq as usize).map(Box::as_ref)
    }

    pub(crate) fn reset(&mut self) {
        self.write_ids.clear();
        self.read_values.clear();
    }
}

const MAX_POOLED_TRACKERS: usize = 16;

static TRACKER_POOL: Lazy<Mutex<Vec<RefTracker>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Takes a tracker from the pool, or allocates if the pool is depleted.
pub(crate) fn acquire_tracker() -> RefTracker {
    TRACKER_POOL.lock().unwrap().pop().unwrap_or_default()
}

pub(crate) fn release_tracker(mut tracker: RefTracker) {
    tracker.reset();
    let mut pool = TRACKER_POOL.lock().unwrap();
    if pool.len() < MAX_POOLED_TRACKERS {
        pool.push(tracker);
    }
}

// ---------------------------------------------------------------------------
// The interposing converter

pub(crate) fn shared_converter<E: Send + Sync + 'static>(
    inner: ArcConverter<E>,
) -> ArcConverter<Shared<E>> {
    Arc::new(SharedValueConverter { inner })
}

struct SharedValueConverter<E> {
    inner: ArcConverter<E>,
}

/// Consumes a reference-extension token if one is next; leaves the cursor
/// untouched for any other token.
fn try_consume_reference(reader: &mut Reader<'_>) -> anyhow::Result<Option<u64>> {
    let mut probe = *reader;
    if probe.peek_format()?.kind() != TokenKind::Ext {
        return Ok(None);
    }
    let (type_code, body) = probe.read_ext()?;
    if type_code != EXT_REFERENCE {
        return Ok(None);
    }
    let mut cursor = body;
    let seq = leb128::read::unsigned(&mut cursor)
        .map_err(|e| decode_format(format!("malformed reference id: {e}")))?;
    *reader = probe;
    Ok(Some(seq))
}

fn resolve_reference<E: Send + Sync + 'static>(
    tracker: &RefTracker,
    seq: u64,
) -> anyhow::Result<Shared<E>> {
    let slot = tracker.resolve(seq).ok_or_else(|| {
        SerializationError::NotSupported(format!("reference id {seq} has no recorded value"))
    })?;
    slot.downcast_ref::<Shared<E>>()
        .cloned()
        .ok_or_else(|| decode_format(format!("reference id {seq} resolves to a different type")))
}

fn encode_reference(writer: &mut Writer<'_>, seq: u64) -> anyhow::Result<()> {
    let mut body = Vec::with_capacity(10);
    leb128::write::unsigned(&mut body, seq)?;
    writer.write_ext(EXT_REFERENCE, &body);
    Ok(())
}

#[async_trait]
impl<E: Send + Sync + 'static> Converter<Shared<E>> for SharedValueConverter<E> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &Shared<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if let Some(tracker) = ctx.ref_tracker.as_mut() {
            if let Some(seq) = tracker.tracked_id(value.identity()) {
                return encode_reference(writer, seq);
            }
            tracker.track_written(value.identity());
        }
        self.inner.write(writer, value.get(), ctx)
    }

    fn read(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Shared<E>> {
        if ctx.ref_tracker.is_none() {
            return Ok(Shared::new(self.inner.read(reader, ctx)?));
        }

        if let Some(seq) = try_consume_reference(reader)? {
            let tracker = ctx
                .ref_tracker
                .as_ref()
                .ok_or_else(|| decode_format("reference token without reference tracking"))?;
            return resolve_reference(tracker, seq);
        }

        // Record the handle before descending so cycles terminate.
        let handle: Shared<E> = Shared::unfilled();
        if let Some(tracker) = ctx.ref_tracker.as_mut() {
            tracker.record_read(Box::new(handle.clone()));
        }
        let value = self.inner.read(reader, ctx)?;
        if handle.fill(value).is_err() {
            return Err(decode_format("shared value decoded twice for one handle"));
        }
        Ok(handle)
    }

    fn prefer_async(&self) -> bool {
        self.inner.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &Shared<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if let Some(tracker) = ctx.ref_tracker.as_mut() {
            if let Some(seq) = tracker.tracked_id(value.identity()) {
                encode_reference(&mut writer.sync_writer(), seq)?;
                return writer.flush_if_needed(ctx).await;
            }
            tracker.track_written(value.identity());
        }
        self.inner.write_async(writer, value.get(), ctx).await
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Shared<E>> {
        if ctx.ref_tracker.is_none() {
            let value = if self.inner.prefer_async() {
                self.inner.read_async(reader, ctx).await?
            } else {
                let structure = reader.read_next_structure(ctx).await?;
                self.inner.read(&mut Reader::new(&structure), ctx)?
            };
            return Ok(Shared::new(value));
        }

        let seq = reader.with_sync(ctx, |r| try_consume_reference(r)).await?;
        if let Some(seq) = seq {
            let tracker = ctx
                .ref_tracker
                .as_ref()
                .ok_or_else(|| decode_format("reference token without reference tracking"))?;
            return resolve_reference(tracker, seq);
        }

        let handle: Shared<E> = Shared::unfilled();
        if let Some(tracker) = ctx.ref_tracker.as_mut() {
            tracker.record_read(Box::new(handle.clone()));
        }
        let value = if self.inner.prefer_async() {
            self.inner.read_async(reader, ctx).await?
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.inner.read(&mut Reader::new(&structure), ctx)?
        };
        if handle.fill(value).is_err() {
            return Err(decode_format("shared value decoded twice for one handle"));
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_identity_semantics() {
        let a = Shared::new(String::from("x"));
        let b = a.clone();
        let c = Shared::new(String::from("x"));

        assert!(Shared::ptr_eq(&a, &b));
        assert!(!Shared::ptr_eq(&a, &c));
        assert_eq!(a, c); // value equality still holds
        assert_eq!(&*a, "x");
    }

    #[test]
    fn tracker_assigns_sequential_ids() {
        let mut tracker = RefTracker::default();
        assert_eq!(tracker.track_written(0x1000), 0);
        assert_eq!(tracker.track_written(0x2000), 1);
        assert_eq!(tracker.tracked_id(0x1000), Some(0));
        assert_eq!(tracker.tracked_id(0x3000), None);

        tracker.record_read(Box::new(Shared::new(5u32)));
        assert!(tracker.resolve(0).is_some());
        assert!(tracker.resolve(1).is_none());

        tracker.reset();
        assert_eq!(tracker.tracked_id(0x1000), None);
    }

    #[test]
    fn pool_reuses_trackers() {
        let tracker = acquire_tracker();
        release_tracker(tracker);
        let tracker = acquire_tracker();
        assert!(tracker.tracked_id(0).is_none());
        release_tracker(tracker);
    }
}
