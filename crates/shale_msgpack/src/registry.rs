//! Per-serializer converter memoization and cycle resolution.
//!
//! At most one thread constructs a converter for a given type. A thread that
//! re-enters the registry for a type it is itself constructing (a recursive
//! shape) receives a delayed converter holding the construction slot; any
//! other thread blocks until the slot is fulfilled.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::error::SerializationError;
use crate::reader::Reader;
use crate::serializer::MessagePackSerializer;
use crate::shape::Shaped;
use crate::visitor::{synthesize, Synthesizer};
use crate::writer::Writer;

type ErasedConverter = Arc<dyn Any + Send + Sync>;

enum Entry {
    UnderConstruction { thread: ThreadId, slot: Arc<Slot> },
    Ready(ErasedConverter),
}

enum SlotState {
    Empty,
    Failed(String),
    Filled(ErasedConverter),
}

/// The shared cell a delayed converter forwards to; fulfilled exactly once
/// when the visitor finishes.
pub(crate) struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Arc<Slot> {
        Arc::new(Slot {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        })
    }

    fn fulfill(&self, outcome: Result<ErasedConverter, String>) {
        let mut state = self.state.lock().unwrap();
        *state = match outcome {
            Ok(converter) => SlotState::Filled(converter),
            Err(message) => SlotState::Failed(message),
        };
        self.ready.notify_all();
    }

    fn wait_for<T: Send + Sync + 'static>(&self) -> anyhow::Result<ArcConverter<T>> {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                SlotState::Filled(converter) => return downcast::<T>(converter),
                SlotState::Failed(message) => {
                    return Err(SerializationError::ShapeConstruction(message.clone()).into())
                }
                SlotState::Empty => state = self.ready.wait(state).unwrap(),
            }
        }
    }

    fn get<T: Send + Sync + 'static>(&self) -> anyhow::Result<ArcConverter<T>> {
        match &*self.state.lock().unwrap() {
            SlotState::Filled(converter) => downcast::<T>(converter),
            SlotState::Failed(message) => {
                Err(SerializationError::ShapeConstruction(message.clone()).into())
            }
            SlotState::Empty => Err(SerializationError::ShapeConstruction(format!(
                "converter for `{}` used before its construction completed",
                std::any::type_name::<T>()
            ))
            .into()),
        }
    }
}

fn downcast<T: Send + Sync + 'static>(erased: &ErasedConverter) -> anyhow::Result<ArcConverter<T>> {
    erased
        .downcast_ref::<ArcConverter<T>>()
        .cloned()
        .ok_or_else(|| {
            SerializationError::ShapeConstruction(format!(
                "registry entry for `{}` holds a converter of another type",
                std::any::type_name::<T>()
            ))
            .into()
        })
}

fn erase<T: Send + Sync + 'static>(converter: &ArcConverter<T>) -> ErasedConverter {
    Arc::new(converter.clone())
}

#[derive(Default)]
pub(crate) struct ConverterRegistry {
    entries: Mutex<HashMap<TypeId, Entry>>,
}

impl ConverterRegistry {
    /// Seeds a user-supplied converter; it wins over both the built-in table
    /// and shape synthesis.
    pub(crate) fn insert_ready<T: Send + Sync + 'static>(&self, converter: ArcConverter<T>) {
        self.entries
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), Entry::Ready(erase(&converter)));
    }

    pub(crate) fn get_or_synthesize<T: Shaped>(
        &self,
        serializer: &MessagePackSerializer,
    ) -> anyhow::Result<ArcConverter<T>> {
        let slot = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&TypeId::of::<T>()) {
                Some(Entry::Ready(converter)) => return downcast::<T>(converter),
                Some(Entry::UnderConstruction { thread, slot }) => {
                    if *thread == thread::current().id() {
                        // Recursive shape: hand out a placeholder that
                        // forwards to the slot once it is fulfilled.
                        trace!(type_name = std::any::type_name::<T>(), "delaying recursive converter");
                        return Ok(Arc::new(DelayedConverter::<T> {
                            slot: slot.clone(),
                            resolved: OnceCell::new(),
                        }));
                    }
                    let slot = slot.clone();
                    drop(entries);
                    return slot.wait_for::<T>();
                }
                None => {
                    let slot = Slot::new();
                    entries.insert(
                        TypeId::of::<T>(),
                        Entry::UnderConstruction {
                            thread: thread::current().id(),
                            slot: slot.clone(),
                        },
                    );
                    slot
                }
            }
        };

        let mut synthesizer = Synthesizer::new(serializer);
        let result = synthesize::<T>(&mut synthesizer);

        let mut entries = self.entries.lock().unwrap();
        match result {
            Ok(converter) => {
                trace!(type_name = std::any::type_name::<T>(), "converter synthesized");
                entries.insert(TypeId::of::<T>(), Entry::Ready(erase(&converter)));
                slot.fulfill(Ok(erase(&converter)));
                Ok(converter)
            }
            Err(error) => {
                entries.remove(&TypeId::of::<T>());
                slot.fulfill(Err(error.to_string()));
                Err(error)
            }
        }
    }
}

/// Stands in for a converter still under construction. All value-level calls
/// happen after the slot is fulfilled; the first call caches the resolved
/// converter.
struct DelayedConverter<T: Send + Sync + 'static> {
    slot: Arc<Slot>,
    resolved: OnceCell<ArcConverter<T>>,
}

impl<T: Send + Sync + 'static> DelayedConverter<T> {
    fn resolve(&self) -> anyhow::Result<&ArcConverter<T>> {
        self.resolved.get_or_try_init(|| self.slot.get::<T>())
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for DelayedConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        self.resolve()?.write(writer, value, ctx)
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        self.resolve()?.read(reader, ctx)
    }

    fn prefer_async(&self) -> bool {
        self.resolve().map(|c| c.prefer_async()).unwrap_or(false)
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        self.resolve()?.write_async(writer, value, ctx).await
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        self.resolve()?.read_async(reader, ctx).await
    }
}
