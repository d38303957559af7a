//! Map-shaped and array-shaped object converters.
//!
//! Property decode is span-keyed: the lookup table is keyed by the
//! pre-computed UTF-8 bytes of each serialized name, so no string is
//! allocated per field. Unknown keys skip one structure.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::async_io::{AsyncReader, AsyncWriter};
use crate::context::SerializationContext;
use crate::converter::{ArcConverter, Converter};
use crate::converters::collections::ReadInto;
use crate::error::SerializationError;
use crate::reader::Reader;
use crate::writer::Writer;

/// One property's contribution to its declaring type's converter.
#[async_trait]
pub(crate) trait PropertyHandler<T: Send + Sync + 'static>: Send + Sync {
    /// Whether the current value should be emitted, honoring default-value
    /// suppression when `serialize_default_values` is off.
    fn should_serialize(&self, value: &T, serialize_default_values: bool) -> bool;

    fn write_value(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    fn read_value(
        &self,
        reader: &mut Reader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    async fn write_value_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    async fn read_value_async(
        &self,
        reader: &mut AsyncReader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    fn prefer_async(&self) -> bool;
}

type MutGetter<T, P> = for<'x> fn(&'x mut T) -> &'x mut P;

pub(crate) struct TypedProperty<T, P> {
    getter: Option<for<'x> fn(&'x T) -> &'x P>,
    setter: Option<fn(&mut T, P)>,
    read_into: Option<(MutGetter<T, P>, Arc<dyn ReadInto<P>>)>,
    converter: ArcConverter<P>,
    default_pred: Option<Arc<dyn Fn(&P) -> bool + Send + Sync>>,
}

impl<T, P> TypedProperty<T, P> {
    pub(crate) fn new(
        getter: Option<for<'x> fn(&'x T) -> &'x P>,
        setter: Option<fn(&mut T, P)>,
        read_into: Option<(MutGetter<T, P>, Arc<dyn ReadInto<P>>)>,
        converter: ArcConverter<P>,
        default_pred: Option<Arc<dyn Fn(&P) -> bool + Send + Sync>>,
    ) -> Self {
        TypedProperty {
            getter,
            setter,
            read_into,
            converter,
            default_pred,
        }
    }
}

fn no_getter() -> anyhow::Error {
    SerializationError::NotSupported("property has no getter to serialize from".to_owned()).into()
}

#[async_trait]
impl<T, P> PropertyHandler<T> for TypedProperty<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn should_serialize(&self, value: &T, serialize_default_values: bool) -> bool {
        let Some(getter) = self.getter else {
            return false;
        };
        if serialize_default_values {
            return true;
        }
        match &self.default_pred {
            Some(is_default) => !is_default(getter(value)),
            None => true,
        }
    }

    fn write_value(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        match self.getter {
            Some(getter) => self.converter.write(writer, getter(value), ctx),
            None => Err(no_getter()),
        }
    }

    fn read_value(
        &self,
        reader: &mut Reader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if let Some(setter) = self.setter {
            let value = self.converter.read(reader, ctx)?;
            setter(target, value);
            return Ok(());
        }
        if let Some((mut_getter, read_into)) = &self.read_into {
            // Nil leaves the existing collection untouched.
            if reader.try_read_nil()? {
                return Ok(());
            }
            return read_into.read_into(reader, mut_getter(target), ctx);
        }
        reader.skip_value()
    }

    async fn write_value_async(
        &self,
        writer: &mut AsyncWriter<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        match self.getter {
            Some(getter) => self.converter.write_async(writer, getter(value), ctx).await,
            None => Err(no_getter()),
        }
    }

    async fn read_value_async(
        &self,
        reader: &mut AsyncReader<'_>,
        target: &mut T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        if let Some(setter) = self.setter {
            let value = if self.converter.prefer_async() {
                self.converter.read_async(reader, ctx).await?
            } else {
                let structure = reader.read_next_structure(ctx).await?;
                self.converter.read(&mut Reader::new(&structure), ctx)?
            };
            setter(target, value);
            return Ok(());
        }
        if let Some((mut_getter, read_into)) = &self.read_into {
            if reader.try_read_nil(ctx).await? {
                return Ok(());
            }
            return read_into
                .read_into_async(reader, mut_getter(target), ctx)
                .await;
        }
        reader.skip_value(ctx).await
    }

    fn prefer_async(&self) -> bool {
        self.converter.prefer_async()
    }
}

/// One constructor parameter: reads its value straight into the type-erased
/// argument state.
#[async_trait]
pub(crate) trait ParamHandler: Send + Sync {
    fn read_into_state(
        &self,
        reader: &mut Reader<'_>,
        state: &mut (dyn Any + Send),
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    async fn read_into_state_async(
        &self,
        reader: &mut AsyncReader<'_>,
        state: &mut (dyn Any + Send),
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()>;

    fn prefer_async(&self) -> bool;
}

pub(crate) struct TypedParam<S, P> {
    store: fn(&mut S, P),
    converter: ArcConverter<P>,
}

impl<S, P> TypedParam<S, P> {
    pub(crate) fn new(store: fn(&mut S, P), converter: ArcConverter<P>) -> Self {
        TypedParam { store, converter }
    }
}

fn state_mismatch() -> anyhow::Error {
    SerializationError::ShapeConstruction("argument state type mismatch".to_owned()).into()
}

#[async_trait]
impl<S, P> ParamHandler for TypedParam<S, P>
where
    S: Send + 'static,
    P: Send + Sync + 'static,
{
    fn read_into_state(
        &self,
        reader: &mut Reader<'_>,
        state: &mut (dyn Any + Send),
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let state = state.downcast_mut::<S>().ok_or_else(state_mismatch)?;
        let value = self.converter.read(reader, ctx)?;
        (self.store)(state, value);
        Ok(())
    }

    async fn read_into_state_async(
        &self,
        reader: &mut AsyncReader<'_>,
        state: &mut (dyn Any + Send),
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        let value = if self.converter.prefer_async() {
            self.converter.read_async(reader, ctx).await?
        } else {
            let structure = reader.read_next_structure(ctx).await?;
            self.converter.read(&mut Reader::new(&structure), ctx)?
        };
        let state = state.downcast_mut::<S>().ok_or_else(state_mismatch)?;
        (self.store)(state, value);
        Ok(())
    }

    fn prefer_async(&self) -> bool {
        self.converter.prefer_async()
    }
}

// ---------------------------------------------------------------------------
// Shared pieces

pub(crate) struct WriteProperty<T: Send + Sync + 'static> {
    /// Pre-encoded MessagePack string token (header + UTF-8 name).
    pub(crate) encoded_name: Box<[u8]>,
    pub(crate) handler: Arc<dyn PropertyHandler<T>>,
}

pub(crate) type StateFactory = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;
pub(crate) type StateInvoker<T> =
    Box<dyn Fn(Box<dyn Any + Send>) -> anyhow::Result<T> + Send + Sync>;

fn not_constructible(type_name: &'static str) -> anyhow::Error {
    SerializationError::NotSupported(format!(
        "`{type_name}` has no constructor usable for deserialization"
    ))
    .into()
}

fn unexpected_nil(type_name: &'static str) -> anyhow::Error {
    SerializationError::UnexpectedNil(type_name).into()
}

fn write_property_map<T: Send + Sync + 'static>(
    writer: &mut Writer<'_>,
    value: &T,
    properties: &[WriteProperty<T>],
    serialize_default_values: bool,
    ctx: &mut SerializationContext,
) -> anyhow::Result<()> {
    let count = properties
        .iter()
        .filter(|p| p.handler.should_serialize(value, serialize_default_values))
        .count();
    writer.write_map_header(count as u32);
    for property in properties {
        if !property.handler.should_serialize(value, serialize_default_values) {
            continue;
        }
        writer.write_raw(&property.encoded_name);
        property.handler.write_value(writer, value, ctx)?;
    }
    Ok(())
}

async fn write_property_map_async<T: Send + Sync + 'static>(
    writer: &mut AsyncWriter<'_>,
    value: &T,
    properties: &[WriteProperty<T>],
    serialize_default_values: bool,
    ctx: &mut SerializationContext,
) -> anyhow::Result<()> {
    let count = properties
        .iter()
        .filter(|p| p.handler.should_serialize(value, serialize_default_values))
        .count();
    writer.sync_writer().write_map_header(count as u32);
    for property in properties {
        if !property.handler.should_serialize(value, serialize_default_values) {
            continue;
        }
        ctx.ensure_not_cancelled()?;
        writer.sync_writer().write_raw(&property.encoded_name);
        property.handler.write_value_async(writer, value, ctx).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Map-shaped, parameterless constructor

pub(crate) struct ObjectMapConverter<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) serialize_default_values: bool,
    pub(crate) write_properties: Vec<WriteProperty<T>>,
    pub(crate) read_table: HashMap<Box<[u8]>, Arc<dyn PropertyHandler<T>>>,
    pub(crate) default_ctor: Option<fn() -> T>,
    pub(crate) prefer_async: bool,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for ObjectMapConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = write_property_map(
            writer,
            value,
            &self.write_properties,
            self.serialize_default_values,
            ctx,
        );
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let result = (|| {
            let ctor = self
                .default_ctor
                .ok_or_else(|| not_constructible(self.type_name))?;
            let mut instance = ctor();
            let count = reader.read_map_header()?;
            for _ in 0..count {
                let key = reader.read_str_bytes()?;
                match self.read_table.get(key) {
                    Some(handler) => handler.read_value(reader, &mut instance, ctx)?,
                    None => reader.skip_value()?,
                }
            }
            Ok(instance)
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
        write_property_map_async(
            writer,
            value,
            &self.write_properties,
            self.serialize_default_values,
            ctx,
        )
        .await?;
        ctx.depth_unstep();
        Ok(())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        if reader.try_read_nil(ctx).await? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let ctor = self
            .default_ctor
            .ok_or_else(|| not_constructible(self.type_name))?;
        let mut instance = ctor();
        let count = reader.read_map_header(ctx).await?;
        for _ in 0..count {
            ctx.ensure_not_cancelled()?;
            let key = reader.read_str_bytes(ctx).await?;
            match self.read_table.get(key.as_slice()) {
                Some(handler) => {
                    handler.read_value_async(reader, &mut instance, ctx).await?;
                }
                None => reader.skip_value(ctx).await?,
            }
        }
        ctx.depth_unstep();
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// Map-shaped, non-default constructor (argument-state flow)

pub(crate) struct ObjectMapCtorConverter<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) serialize_default_values: bool,
    pub(crate) write_properties: Vec<WriteProperty<T>>,
    /// Parameter readers, keyed by both camelCase and PascalCase names.
    pub(crate) params: HashMap<Box<[u8]>, Arc<dyn ParamHandler>>,
    /// Settable properties with no matching constructor parameter; applied
    /// after materialization from buffered payload slices.
    pub(crate) late_properties: HashMap<Box<[u8]>, Arc<dyn PropertyHandler<T>>>,
    pub(crate) new_state: StateFactory,
    pub(crate) invoke: StateInvoker<T>,
    pub(crate) prefer_async: bool,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for ObjectMapCtorConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = write_property_map(
            writer,
            value,
            &self.write_properties,
            self.serialize_default_values,
            ctx,
        );
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let result = (|| {
            let mut state = (self.new_state)();
            let mut deferred: Vec<(&Arc<dyn PropertyHandler<T>>, &[u8])> = Vec::new();
            let count = reader.read_map_header()?;
            for _ in 0..count {
                let key = reader.read_str_bytes()?;
                if let Some(param) = self.params.get(key) {
                    param.read_into_state(reader, state.as_mut(), ctx)?;
                } else if let Some(handler) = self.late_properties.get(key) {
                    deferred.push((handler, reader.read_next_structure()?));
                } else {
                    reader.skip_value()?;
                }
            }
            let mut instance = (self.invoke)(state)?;
            for (handler, bytes) in deferred {
                handler.read_value(&mut Reader::new(bytes), &mut instance, ctx)?;
            }
            Ok(instance)
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
        write_property_map_async(
            writer,
            value,
            &self.write_properties,
            self.serialize_default_values,
            ctx,
        )
        .await?;
        ctx.depth_unstep();
        Ok(())
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        if reader.try_read_nil(ctx).await? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let mut state = (self.new_state)();
        let mut deferred: Vec<(&Arc<dyn PropertyHandler<T>>, bytes::Bytes)> = Vec::new();
        let count = reader.read_map_header(ctx).await?;
        for _ in 0..count {
            ctx.ensure_not_cancelled()?;
            let key = reader.read_str_bytes(ctx).await?;
            if let Some(param) = self.params.get(key.as_slice()) {
                param
                    .read_into_state_async(reader, state.as_mut(), ctx)
                    .await?;
            } else if let Some(handler) = self.late_properties.get(key.as_slice()) {
                deferred.push((handler, reader.read_next_structure(ctx).await?));
            } else {
                reader.skip_value(ctx).await?;
            }
        }
        let mut instance = (self.invoke)(state)?;
        for (handler, bytes) in deferred {
            handler.read_value(&mut Reader::new(&bytes), &mut instance, ctx)?;
        }
        ctx.depth_unstep();
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// Array-shaped (keyed) objects

pub(crate) struct ArraySlot<T: Send + Sync + 'static> {
    pub(crate) handler: Arc<dyn PropertyHandler<T>>,
    pub(crate) writable: bool,
    pub(crate) readable: bool,
}

fn write_property_array<T: Send + Sync + 'static>(
    writer: &mut Writer<'_>,
    value: &T,
    slots: &[Option<ArraySlot<T>>],
    ctx: &mut SerializationContext,
) -> anyhow::Result<()> {
    writer.write_array_header(slots.len() as u32);
    for slot in slots {
        match slot {
            Some(slot) if slot.writable => slot.handler.write_value(writer, value, ctx)?,
            _ => writer.write_nil(),
        }
    }
    Ok(())
}

pub(crate) struct ObjectArrayConverter<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) slots: Vec<Option<ArraySlot<T>>>,
    pub(crate) default_ctor: Option<fn() -> T>,
    pub(crate) prefer_async: bool,
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for ObjectArrayConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = write_property_array(writer, value, &self.slots, ctx);
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let result = (|| {
            let ctor = self
                .default_ctor
                .ok_or_else(|| not_constructible(self.type_name))?;
            let mut instance = ctor();
            let count = reader.read_array_header()? as usize;
            for index in 0..count {
                match self.slots.get(index).and_then(Option::as_ref) {
                    Some(slot) if slot.readable => {
                        slot.handler.read_value(reader, &mut instance, ctx)?;
                    }
                    _ => reader.skip_value()?,
                }
            }
            // Missing trailing slots keep their constructed defaults.
            Ok(instance)
        })();
        ctx.depth_unstep();
        result
    }

    fn prefer_async(&self) -> bool {
        self.prefer_async
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        if reader.try_read_nil(ctx).await? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let ctor = self
            .default_ctor
            .ok_or_else(|| not_constructible(self.type_name))?;
        let mut instance = ctor();
        let count = reader.read_array_header(ctx).await? as usize;
        for index in 0..count {
            ctx.ensure_not_cancelled()?;
            match self.slots.get(index).and_then(Option::as_ref) {
                Some(slot) if slot.readable => {
                    slot.handler
                        .read_value_async(reader, &mut instance, ctx)
                        .await?;
                }
                _ => reader.skip_value(ctx).await?,
            }
        }
        ctx.depth_unstep();
        Ok(instance)
    }
}

/// Array-shaped with a parameterized constructor: slots either feed the
/// argument state or defer to post-construction application.
pub(crate) enum CtorArraySlot<T: Send + Sync + 'static> {
    Param {
        handler: Arc<dyn ParamHandler>,
        writer: Option<Arc<dyn PropertyHandler<T>>>,
    },
    Late(ArraySlot<T>),
}

pub(crate) struct ObjectArrayCtorConverter<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) slots: Vec<Option<CtorArraySlot<T>>>,
    pub(crate) new_state: StateFactory,
    pub(crate) invoke: StateInvoker<T>,
    pub(crate) prefer_async: bool,
}

impl<T: Send + Sync + 'static> ObjectArrayCtorConverter<T> {
    fn write_slots(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        writer.write_array_header(self.slots.len() as u32);
        for slot in &self.slots {
            match slot {
                Some(CtorArraySlot::Param {
                    writer: Some(handler),
                    ..
                }) => handler.write_value(writer, value, ctx)?,
                Some(CtorArraySlot::Late(slot)) if slot.writable => {
                    slot.handler.write_value(writer, value, ctx)?;
                }
                _ => writer.write_nil(),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Converter<T> for ObjectArrayCtorConverter<T> {
    fn write(
        &self,
        writer: &mut Writer<'_>,
        value: &T,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<()> {
        ctx.depth_step()?;
        let result = self.write_slots(writer, value, ctx);
        ctx.depth_unstep();
        result
    }

    fn read(&self, reader: &mut Reader<'_>, ctx: &mut SerializationContext) -> anyhow::Result<T> {
        if reader.try_read_nil()? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let result = (|| {
            let mut state = (self.new_state)();
            let mut deferred: Vec<(&ArraySlot<T>, &[u8])> = Vec::new();
            let count = reader.read_array_header()? as usize;
            for index in 0..count {
                match self.slots.get(index).and_then(Option::as_ref) {
                    Some(CtorArraySlot::Param { handler, .. }) => {
                        handler.read_into_state(reader, state.as_mut(), ctx)?;
                    }
                    Some(CtorArraySlot::Late(slot)) if slot.readable => {
                        deferred.push((slot, reader.read_next_structure()?));
                    }
                    _ => reader.skip_value()?,
                }
            }
            let mut instance = (self.invoke)(state)?;
            for (slot, bytes) in deferred {
                slot.handler
                    .read_value(&mut Reader::new(bytes), &mut instance, ctx)?;
            }
            Ok(instance)
        })();
        ctx.depth_unstep();
        result
    }

    fn prefer_async(&self) -> bool {
        self.prefer_async
    }

    async fn read_async(
        &self,
        reader: &mut AsyncReader<'_>,
        ctx: &mut SerializationContext,
    ) -> anyhow::Result<T> {
        if reader.try_read_nil(ctx).await? {
            return Err(unexpected_nil(self.type_name));
        }
        ctx.depth_step()?;
        let mut state = (self.new_state)();
        let mut deferred: Vec<(&ArraySlot<T>, bytes::Bytes)> = Vec::new();
        let count = reader.read_array_header(ctx).await? as usize;
        for index in 0..count {
            ctx.ensure_not_cancelled()?;
            match self.slots.get(index).and_then(Option::as_ref) {
                Some(CtorArraySlot::Param { handler, .. }) => {
                    handler
                        .read_into_state_async(reader, state.as_mut(), ctx)
                        .await?;
                }
                Some(CtorArraySlot::Late(slot)) if slot.readable => {
                    deferred.push((slot, reader.read_next_structure(ctx).await?));
                }
                _ => reader.skip_value(ctx).await?,
            }
        }
        let mut instance = (self.invoke)(state)?;
        for (slot, bytes) in deferred {
            slot.handler
                .read_value(&mut Reader::new(&bytes), &mut instance, ctx)?;
        }
        ctx.depth_unstep();
        Ok(instance)
    }
}

/// Pre-encodes a serialized property name as its MessagePack string token.
pub(crate) fn encode_property_name(name: &str) -> Box<[u8]> {
    let mut buffer = crate::buffer::OutputBuffer::with_min_capacity(name.len() + 5);
    Writer::new(&mut buffer).write_str(name);
    buffer.into_written().into_boxed_slice()
}
