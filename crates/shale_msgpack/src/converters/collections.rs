use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::error::{decode_format, SerializationError};
use crate::options::MultiDimensionalArrayFormat;
use crate::reader::Reader;
use crate::shape::{ConstructionStrategy, Shaped};
use crate::visitor::Synthesizer;
use crate::writer::Writer;

/// Decode headers can claim absurd element counts; never pre-reserve more
/// than this many slots up front.
pub(crate) const MAX_PREALLOCATED_ELEMENTS: usize = 4096;

pub(crate) type IterFn<T, E> = for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>;
pub(crate) type EntryIterFn<T, K, V> =
    for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + Send + 'x>;

/// The construction/iteration handles a collection shape captured. Which of
/// the optional handles are present follows from the construction strategy.
pub(crate) struct EnumerableHandles<T, E> {
    pub new: Option<fn() -> T>,
    pub push: Option<fn(&mut T, E)>,
    pub from_vec: Option<fn(Vec<E>) -> T>,
    pub from_iter: Option<fn(&mut dyn Iterator<Item = E>) -> T>,
    pub len: fn(&T) -> usize,
    pub iter: IterFn<T, E>,
}

impl<T, E> Clone for EnumerableHandles<T, E> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, E> Copy for EnumerableHandles<T, E> {}

pub(crate) struct DictionaryHandles<T, K, V> {
    pub new: Option<fn() -> T>,
    pub insert: Option<fn(&mut T, K, V)>,
    pub from_vec: Option<fn(Vec<(K, V)>) -> T>,
    pub from_iter: Option<fn(&mut dyn Iterator<Item = (K, V)>) -> T>,
    pub len: fn(&T) -> usize,
    pub iter: EntryIterFn<T, K, V>,
}

impl<T, K, V> Clone for DictionaryHandles<T, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, K, V> Copy for DictionaryHandles<T, K, V> {}

/// Populates an existing instance from the wire, which is how getter-only
/// collection properties deserialize. Nil leaves the instance untouched; the
/// caller checks that.
#[async_trait]
pub(crate) trait ReadInto<T: Send + Sync + 'static>: Send + Sync {
    fn read_into(
        &self,
        reader: &mut Reader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    async fn read_into_async(
        &self,
        reader: &mut AsyncReader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;
}

fn missing_handle<T>(strategy: ConstructionStrategy) -> anyhow::Error {
    SerializationError::ShapeConstruction(format!(
        "`{}` collection shape is missing the handle its {strategy:?} strategy requires",
        std::any::type_name::<T>()
    ))
    .into()
}

fn short_iterator() -> anyhow::Error {
    SerializationError::NotSupported(
        "multi-dimensional flat iterator yields fewer elements than its dims".to_owned(),
    )
    .into()
}

fn not_constructible(type_name: &'static str) -> anyhow::Error {
    SerializationError::NotSupported(format!(
        "`{type_name}` cannot be constructed during deserialization"
    ))
    .into()
}

// ---------------------------------------------------------------------------
// Array-encoded enumerables

enum ArrayReadPlan<T, E> {
    None,
    Mutable {
        new: fn() -> T,
        push: fn(&mut T, E),
    },
    Span {
        from_vec: fn(Vec<E>) -> T,
    },
    Enumerable {
        from_iter: fn(&mut dyn Iterator<Item = E>) -> T,
    },
}

impl<T: 'static, E: 'static> ArrayReadPlan<T, E> {
    fn from_handles(
        strategy: ConstructionStrategy,
        handles: &EnumerableHandles<T, E>,
    ) -> anyhow::Result<Self> {
        Ok(match strategy {
            ConstructionStrategy::None => ArrayReadPlan::None,
            ConstructionStrategy::Mutable => match (handles.new, handles.push) {
                (Some(new), Some(push)) => ArrayReadPlan::Mutable { new, push },
                _ => return Err(missing_handle::<T>(strategy)),
            },
            ConstructionStrategy::Span => match handles.from_vec {
                Some(from_vec) => ArrayReadPlan::Span { from_vec },
                None => return Err(missing_handle::<T>(strategy)),
            },
            ConstructionStrategy::Enumerable => match handles.from_iter {
                Some(from_iter) => ArrayReadPlan::Enumerable { from_iter },
                None => return Err(missing_handle::<T>(strategy)),
            },
        })
    }
}

pub(crate) fn enumerable_converter<T: Send + Sync + 'static, E: Shaped>(
    strategy: ConstructionStrategy,
    handles: EnumerableHandles<T, E>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    // Byte-element collections take the bin encoding, not an array of ints.
    if let Some(bytes) = downcast_byte_handles(handles) {
        return Ok(Arc::new(ByteCollectionConverter {
            type_name: std::any::type_name::<T>(),
            plan: ArrayReadPlan::from_handles(strategy, &bytes)?,
            iter: bytes.iter,
            len: bytes.len,
        }));
    }

    let element = syn.converter::<E>()?;
    Ok(Arc::new(ArrayConverter {
        type_name: std::any::type_name::<T>(),
        plan: ArrayReadPlan::from_handles(strategy, &handles)?,
        len: handles.len,
        iter: handles.iter,
        element,
    }))
}

pub(crate) fn enumerable_read_into<T: Send + Sync + 'static, E: Shaped>(
    handles: EnumerableHandles<T, E>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<Arc<dyn ReadInto<T>>> {
    let push = handles
        .push
        .ok_or_else(|| missing_handle::<T>(ConstructionStrategy::Mutable))?;
    let element = syn.converter::<E>()?;
    Ok(Arc::new(ArrayReadInto { push, element }))
}

fn downcast_byte_handles<T: 'static, E: 'static>(
    handles: EnumerableHandles<T, E>,
) -> Option<EnumerableHandles<T, u8>> {
    let boxed: Box<dyn Any> = Box::new(handles);
    boxed.downcast::<EnumerableHandles<T, u8>>().ok().map(|b| *b)
}

struct ArrayConverter<T, E> {
    type_name: &'static str,
    plan: ArrayReadPlan<T, E>,
    len: fn(&T) -> usize,
    iter: IterFn<T, E>,
    element: ArcConverter<E>,
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> ArrayConverter<T, E> {
    fn read_elements(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        let count = reader.read_array_header()? as usize;
        match &self.plan {
            ArrayReadPlan::None => Err(not_constructible(self.type_name)),
            ArrayReadPlan::Mutable { new, push } => {
                let mut out = new();
                for _ in 0..count {
                    push(&mut out, self.element.read(reader, ctx)?);
                }
                Ok(out)
            }
            ArrayReadPlan::Span { from_vec } => {
                Ok(from_vec(self.read_buffer(reader, count, ctx)?))
            }
            ArrayReadPlan::Enumerable { from_iter } => {
                let buffer = self.read_buffer(reader, count, ctx)?;
                Ok(from_iter(&mut buffer.into_iter()))
            }
        }
    }

    fn read_buffer(
        &self,
        reader: &mut Reader<'_>,
        count: usize,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Vec<E>> {
        let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        for _ in 0..count {
            buffer.push(self.element.read(reader, ctx)?);
        }
        Ok(buffer)
    }

    async fn read_element_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<E> {
        if self.element.prefer_async() {
            self.element.read_async(reader, ctx).await
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.element.read(&mut Reader::new(&structure), ctx)
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static, E: Send + Sync + 'static> Converter<T> for ArrayConverter<T, E> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            writer.write_array_header((self.len)(value) as u32);
            for element in (self.iter)(value) {
                self.element.write(writer, element, ctx)?;
            }
            Ok(())
        })();
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(SerializationError::UnexpectedNil(self.type_name).into());
        }
        ctx.depth_step()?;
        let result = self.read_elements(reader, ctx);
        ctx.depth_unstep();
        result
    }

    fn prefer_async(&self) -> bool {
        self.element.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        writer
            .sync_writer()
            .write_array_header((self.len)(value) as u32);
        for element in (self.iter)(value) {
            ctx.ensure_not_cancelled()?;
            self.element.write_async(writer, element, ctx).await?;
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
        let count = reader.read_array_header(ctx).await? as usize;
        let value = match &self.plan {
            ArrayReadPlan::None => return Err(not_constructible(self.type_name)),
            ArrayReadPlan::Mutable { new, push } => {
                let mut out = new();
                for _ in 0..count {
                    ctx.ensure_not_cancelled()?;
                    let element = self.read_element_async(reader, ctx).await?;
                    push(&mut out, element);
                }
                out
            }
            ArrayReadPlan::Span { from_vec } => {
                from_vec(self.read_buffer_async(reader, count, ctx).await?)
            }
            ArrayReadPlan::Enumerable { from_iter } => {
                let buffer = self.read_buffer_async(reader, count, ctx).await?;
                from_iter(&mut buffer.into_iter())
            }
        };
        ctx.depth_unstep();
        Ok(value)
    }
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> ArrayConverter<T, E> {
    async fn read_buffer_async(
        &self,
        reader: &mut AsyncReader<'_>,
        count: usize,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<Vec<E>> {
        let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        for _ in 0..count {
            ctx.ensure_not_cancelled()?;
            let element = self.read_element_async(reader, ctx).await?;
            buffer.push(element);
        }
        Ok(buffer)
    }
}

struct ArrayReadInto<T, E> {
    push: fn(&mut T, E),
    element: ArcConverter<E>,
}

#[async_trait]
impl<T: Send + Sync + 'static, E: Send + Sync + 'static> ReadInto<T> for ArrayReadInto<T, E> {
    fn read_into(
        &self,
        reader: &mut Reader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            let count = reader.read_array_header()?;
            for _ in 0..count {
                (self.push)(target, self.element.read(reader, ctx)?);
            }
            Ok(())
        })();
        ctx.depth_unstep();
        result
    }

    async fn read_into_async(
        &self,
        reader: &mut AsyncReader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let count = reader.read_array_header(ctx).await?;
        for _ in 0..count {
            ctx.ensure_not_cancelled()?;
            let element = if self.element.prefer_async() {
                self.element.read_async(reader, ctx).await?
            } else {
                let structure = reader.read_next_structure(ctx).await?;
                self.element.read(&mut Reader::new(&structure), ctx)?
            };
            (self.push)(target, element);
        }
        ctx.depth_unstep();
        Ok(())
    }
}

/// Byte-element collections encode as `bin`, not `array`.
struct ByteCollectionConverter<T> {
    type_name: &'static str,
    plan: ArrayReadPlan<T, u8>,
    iter: IterFn<T, u8>,
    len: fn(&T) -> usize,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for ByteCollectionConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        _ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let mut bytes = Vec::with_capacity((self.len)(value));
        bytes.extend((self.iter)(value).copied());
        writer.write_bin(&bytes);
        Ok(())
    }

    fn read(&self, reader: &mut Reader<'_>, _ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(SerializationError::UnexpectedNil(self.type_name).into());
        }
        let bytes = reader.read_bin()?;
        match &self.plan {
            ArrayReadPlan::None => Err(not_constructible(self.type_name)),
            ArrayReadPlan::Mutable { new, push } => {
                let mut out = new();
                for byte in bytes {
                    push(&mut out, *byte);
                }
                Ok(out)
            }
            ArrayReadPlan::Span { from_vec } => Ok(from_vec(bytes.to_vec())),
            ArrayReadPlan::Enumerable { from_iter } => {
                Ok(from_iter(&mut bytes.iter().copied()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Map-encoded dictionaries

enum MapReadPlan<T, K, V> {
    None,
    Mutable {
        new: fn() -> T,
        insert: fn(&mut T, K, V),
    },
    Span {
        from_vec: fn(Vec<(K, V)>) -> T,
    },
    Enumerable {
        from_iter: fn(&mut dyn Iterator<Item = (K, V)>) -> T,
    },
}

impl<T: 'static, K: 'static, V: 'static> MapReadPlan<T, K, V> {
    fn from_handles(
        strategy: ConstructionStrategy,
        handles: &DictionaryHandles<T, K, V>,
    ) -> anyhow::Result<Self> {
        Ok(match strategy {
            ConstructionStrategy::None => MapReadPlan::None,
            ConstructionStrategy::Mutable => match (handles.new, handles.insert) {
                (Some(new), Some(insert)) => MapReadPlan::Mutable { new, insert },
                _ => return Err(missing_handle::<T>(strategy)),
            },
            ConstructionStrategy::Span => match handles.from_vec {
                Some(from_vec) => MapReadPlan::Span { from_vec },
                None => return Err(missing_handle::<T>(strategy)),
            },
            ConstructionStrategy::Enumerable => match handles.from_iter {
                Some(from_iter) => MapReadPlan::Enumerable { from_iter },
                None => return Err(missing_handle::<T>(strategy)),
            },
        })
    }
}

pub(crate) fn dictionary_converter<T: Send + Sync + 'static, K: Shaped, V: Shaped>(
    strategy: ConstructionStrategy,
    handles: DictionaryHandles<T, K, V>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    let key = syn.converter::<K>()?;
    let value = syn.converter::<V>()?;
    Ok(Arc::new(MapConverter {
        type_name: std::any::type_name::<T>(),
        plan: MapReadPlan::from_handles(strategy, &handles)?,
        len: handles.len,
        iter: handles.iter,
        key,
        value,
    }))
}

pub(crate) fn dictionary_read_into<T: Send + Sync + 'static, K: Shaped, V: Shaped>(
    handles: DictionaryHandles<T, K, V>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<Arc<dyn ReadInto<T>>> {
    let insert = handles
        .insert
        .ok_or_else(|| missing_handle::<T>(ConstructionStrategy::Mutable))?;
    let key = syn.converter::<K>()?;
    let value = syn.converter::<V>()?;
    Ok(Arc::new(MapReadInto { insert, key, value }))
}

struct MapConverter<T, K, V> {
    type_name: &'static str,
    plan: MapReadPlan<T, K, V>,
    len: fn(&T) -> usize,
    iter: EntryIterFn<T, K, V>,
    key: ArcConverter<K>,
    value: ArcConverter<V>,
}

impl<T, K, V> MapConverter<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn read_entry(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<(K, V)> {
        let key = self.key.read(reader, ctx)?;
        let value = self.value.read(reader, ctx)?;
        Ok((key, value))
    }

    async fn read_entry_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<(K, V)> {
        let key = if self.key.prefer_async() {
            self.key.read_async(reader, ctx).await?
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.key.read(&mut Reader::new(&structure), ctx)?
        };
        let value = if self.value.prefer_async() {
            self.value.read_async(reader, ctx).await?
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.value.read(&mut Reader::new(&structure), ctx)?
        };
        Ok((key, value))
    }

    fn read_entries(
        &self,
        reader: &mut Reader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        let count = reader.read_map_header()? as usize;
        match &self.plan {
            MapReadPlan::None => Err(not_constructible(self.type_name)),
            MapReadPlan::Mutable { new, insert } => {
                let mut out = new();
                for _ in 0..count {
                    let (key, value) = self.read_entry(reader, ctx)?;
                    insert(&mut out, key, value);
                }
                Ok(out)
            }
            MapReadPlan::Span { from_vec } => {
                let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..count {
                    buffer.push(self.read_entry(reader, ctx)?);
                }
                Ok(from_vec(buffer))
            }
            MapReadPlan::Enumerable { from_iter } => {
                let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..count {
                    buffer.push(self.read_entry(reader, ctx)?);
                }
                Ok(from_iter(&mut buffer.into_iter()))
            }
        }
    }
}

#[async_trait]
impl<T, K, V> Converter<T> for MapConverter<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            writer.write_map_header((self.len)(value) as u32);
            for (entry_key, entry_value) in (self.iter)(value) {
                self.key.write(writer, entry_key, ctx)?;
                self.value.write(writer, entry_value, ctx)?;
            }
            Ok(())
        })();
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(SerializationError::UnexpectedNil(self.type_name).into());
        }
        ctx.depth_step()?;
        let result = self.read_entries(reader, ctx);
        ctx.depth_unstep();
        result
    }

    fn prefer_async(&self) -> bool {
        self.key.prefer_async() || self.value.prefer_async()
    }

    async fn write_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        writer
            .sync_writer()
            .write_map_header((self.len)(value) as u32);
        for (entry_key, entry_value) in (self.iter)(value) {
            ctx.ensure_not_cancelled()?;
            self.key.write_async(writer, entry_key, ctx).await?;
            self.value.write_async(writer, entry_value, ctx).await?;
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
        let count = reader.read_map_header(ctx).await? as usize;
        let out = match &self.plan {
            MapReadPlan::None => return Err(not_constructible(self.type_name)),
            MapReadPlan::Mutable { new, insert } => {
                let mut out = new();
                for _ in 0..count {
                    ctx.ensure_not_cancelled()?;
                    let (key, value) = self.read_entry_async(reader, ctx).await?;
                    insert(&mut out, key, value);
                }
                out
            }
            MapReadPlan::Span { from_vec } => {
                let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..count {
                    ctx.ensure_not_cancelled()?;
                    let entry = self.read_entry_async(reader, ctx).await?;
                    buffer.push(entry);
                }
                from_vec(buffer)
            }
            MapReadPlan::Enumerable { from_iter } => {
                let mut buffer = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..count {
                    ctx.ensure_not_cancelled()?;
                    let entry = self.read_entry_async(reader, ctx).await?;
                    buffer.push(entry);
                }
                from_iter(&mut buffer.into_iter())
            }
        };
        ctx.depth_unstep();
        Ok(out)
    }
}

struct MapReadInto<T, K, V> {
    insert: fn(&mut T, K, V),
    key: ArcConverter<K>,
    value: ArcConverter<V>,
}

#[async_trait]
impl<T, K, V> ReadInto<T> for MapReadInto<T, K, V>
where
    T: Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn read_into(
        &self,
        reader: &mut Reader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            let count = reader.read_map_header()?;
            for _ in 0..count {
                let key = self.key.read(reader, ctx)?;
                let value = self.value.read(reader, ctx)?;
                (self.insert)(target, key, value);
            }
            Ok(())
        })();
        ctx.depth_unstep();
        result
    }

    async fn read_into_async(
        &self,
        reader: &mut AsyncReader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let count = reader.read_map_header(ctx).await?;
        for _ in 0..count {
            ctx.ensure_not_cancelled()?;
            let structure = reader.read_next_structure(ctx).await?;
            let mut sync = Reader::new(&structure);
            let key = self.key.read(&mut sync, ctx)?;
            let structure = reader.read_next_structure(ctx).await?;
            let mut sync = Reader::new(&structure);
            let value = self.value.read(&mut sync, ctx)?;
            (self.insert)(target, key, value);
        }
        ctx.depth_unstep();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Multi-dimensional arrays

pub(crate) struct MultiDimHandles<T, E> {
    pub rank: usize,
    pub dims: fn(&T) -> Vec<usize>,
    pub flat: IterFn<T, E>,
    pub from_parts: fn(Vec<usize>, Vec<E>) -> anyhow::Result<T>,
}

impl<T, E> Clone for MultiDimHandles<T, E> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T, E> Copy for MultiDimHandles<T, E> {}

pub(crate) fn multi_dim_converter<T: Send + Sync + 'static, E: Shaped>(
    handles: MultiDimHandles<T, E>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    if handles.rank == 0 {
        return Err(SerializationError::ShapeConstruction(format!(
            "`{}` multi-dimensional shape must have rank >= 1",
            std::any::type_name::<T>()
        ))
        .into());
    }
    let element = syn.converter::<E>()?;
    let converter = MultiDimConverter {
        type_name: std::any::type_name::<T>(),
        handles,
        element,
        flat: syn.options().multi_dimensional_array_format == MultiDimensionalArrayFormat::Flat,
    };
    Ok(Arc::new(converter))
}

struct MultiDimConverter<T, E> {
    type_name: &'static str,
    handles: MultiDimHandles<T, E>,
    element: ArcConverter<E>,
    flat: bool,
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> MultiDimConverter<T, E> {
    fn write_nested(
        &self,
        writer: &mut Writer<'_>,
        dims: &[usize],
        elements: &mut dyn Iterator<Item = &E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        match dims.split_first() {
            None => Ok(()),
            Some((&extent, rest)) if rest.is_empty() => {
                writer.write_array_header(extent as u32);
                for _ in 0..extent {
                    let element = elements.next().ok_or_else(short_iterator)?;
                    self.element.write(writer, element, ctx)?;
                }
                Ok(())
            }
            Some((&extent, rest)) => {
                writer.write_array_header(extent as u32);
                for _ in 0..extent {
                    self.write_nested(writer, rest, elements, ctx)?;
                }
                Ok(())
            }
        }
    }

    fn read_nested(
        &self,
        reader: &mut Reader<'_>,
        level: usize,
        dims: &mut [Option<usize>],
        elements: &mut Vec<E>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let extent = reader.read_array_header()? as usize;
        match dims[level] {
            Some(known) if known != extent => {
                return Err(decode_format(format!(
                    "ragged nested array: expected extent {known}, got {extent}"
                )));
            }
            _ => dims[level] = Some(extent),
        }
        if level + 1 == self.handles.rank {
            for _ in 0..extent {
                elements.push(self.element.read(reader, ctx)?);
            }
        } else {
            for _ in 0..extent {
                self.read_nested(reader, level + 1, dims, elements, ctx)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + Sync + 'static, E: Send + Sync + 'static> Converter<T> for MultiDimConverter<T, E> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = (|| {
            let dims = (self.handles.dims)(value);
            let mut elements = (self.handles.flat)(value);
            if self.flat {
                let total: usize = dims.iter().product();
                writer.write_array_header((dims.len() + total) as u32);
                for extent in &dims {
                    writer.write_uint(*extent as u64);
                }
                for _ in 0..total {
                    let element = elements.next().ok_or_else(short_iterator)?;
                    self.element.write(writer, element, ctx)?;
                }
                Ok(())
            } else {
                self.write_nested(writer, &dims, &mut elements, ctx)
            }
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
            let rank = self.handles.rank;
            if self.flat {
                let count = reader.read_array_header()? as usize;
                if count < rank {
                    return Err(decode_format(format!(
                        "flat array of {count} entries cannot hold {rank} dimensions"
                    )));
                }
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dims.push(reader.read_uint()? as usize);
                }
                let total: usize = dims.iter().product();
                if count - rank != total {
                    return Err(decode_format(format!(
                        "flat array holds {} elements but dims require {total}",
                        count - rank
                    )));
                }
                let mut elements = Vec::with_capacity(total.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..total {
                    elements.push(self.element.read(reader, ctx)?);
                }
                (self.handles.from_parts)(dims, elements)
            } else {
                let mut dims = vec![None; rank];
                let mut elements = Vec::new();
                self.read_nested(reader, 0, &mut dims, &mut elements, ctx)?;
                let dims = dims.into_iter().map(|d| d.unwrap_or(0)).collect();
                (self.handles.from_parts)(dims, elements)
            }
        })();
        ctx.depth_unstep();
        result
    }
}
