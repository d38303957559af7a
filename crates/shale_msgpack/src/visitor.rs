//! Converter synthesis: walks a type shape and composes a converter for it
//! from smaller converters.
//!
//! Resolution policy on entry for any type: a user-registered converter wins
//! (seeded as a ready registry entry), then the built-in primitive table,
//! then structural dispatch on the shape kind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::converter::ArcConverter;
use crate::converters::object::{
    encode_property_name, ArraySlot, CtorArraySlot, ObjectArrayConverter,
    ObjectArrayCtorConverter, ObjectMapConverter, ObjectMapCtorConverter, ParamHandler,
    PropertyHandler, WriteProperty,
};
use crate::converters::primitives::builtin_converter;
use crate::converters::union::UnionConverter;
use crate::error::SerializationError;
use crate::options::{to_camel_case, to_pascal_case, SerializerOptions};
use crate::serializer::MessagePackSerializer;
use crate::shape::{
    BuiltProperty, ConstructorKind, ConstructorShape, ObjectShape, ShapeKind, Shaped, UnionShape,
};

/// Keyed properties index into a positional array; cap the array size a
/// shape can demand.
const MAX_KEY_INDEX: u32 = 16 * 1024;

/// The synthesis visitor's view of the serializer: options plus recursive
/// converter acquisition through the registry.
pub struct Synthesizer<'a> {
    serializer: &'a MessagePackSerializer,
}

impl<'a> Synthesizer<'a> {
    pub(crate) fn new(serializer: &'a MessagePackSerializer) -> Synthesizer<'a> {
        Synthesizer { serializer }
    }

    pub fn options(&self) -> &SerializerOptions {
        self.serializer.options()
    }

    /// Acquires the converter for a component type, recursing into the
    /// registry (which breaks cycles with delayed converters).
    pub fn converter<P: Shaped>(&mut self) -> anyhow::Result<ArcConverter<P>> {
        self.serializer.converter::<P>()
    }
}

fn shape_error(message: String) -> anyhow::Error {
    SerializationError::ShapeConstruction(message).into()
}

pub(crate) fn synthesize<T: Shaped>(syn: &mut Synthesizer<'_>) -> anyhow::Result<ArcConverter<T>> {
    if let Some(builtin) = builtin_converter::<T>() {
        return Ok(builtin);
    }

    debug!(type_name = std::any::type_name::<T>(), "synthesizing converter");
    let shape = T::shape();
    match shape.kind {
        ShapeKind::Primitive => Err(shape_error(format!(
            "`{}` declares a primitive shape but has no built-in converter",
            std::any::type_name::<T>()
        ))),
        ShapeKind::Object(object) => synthesize_object(object, syn),
        ShapeKind::Union(union) => synthesize_union(union, syn),
        ShapeKind::Collection(collection) => {
            trace!(strategy = ?collection.strategy, "collection construction strategy");
            (collection.synth)(syn)
        }
        ShapeKind::Enum { synth }
        | ShapeKind::Optional { synth }
        | ShapeKind::SharedRef { synth }
        | ShapeKind::MultiDim { synth }
        | ShapeKind::Delegate { synth } => synth(syn),
    }
}

struct PlannedProperty<T: Send + Sync + 'static> {
    serialized_name: String,
    key: Option<u32>,
    built: BuiltProperty<T>,
    /// Index of the case-insensitively matching constructor parameter.
    param: Option<usize>,
}

impl<T: Send + Sync + 'static> PlannedProperty<T> {
    /// A read-only property with no matching constructor parameter would be
    /// lossy to serialize, so it is elided.
    fn suppressed(&self) -> bool {
        !self.built.has_setter && self.param.is_none()
    }

    fn writable(&self) -> bool {
        self.built.has_getter && !self.suppressed()
    }
}

fn synthesize_object<T: Send + Sync + 'static>(
    shape: ObjectShape<T>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    let type_name = shape.type_name;

    let keyed = shape.properties.iter().filter(|p| p.key.is_some()).count();
    if keyed != 0 && keyed != shape.properties.len() {
        return Err(shape_error(format!(
            "`{type_name}` mixes keyed and named properties; key indexes are all-or-nothing"
        )));
    }

    let naming = syn.options().naming_policy.clone();
    let serialize_default_values = syn.options().serialize_default_values;

    let constructor = shape.constructor;
    let param_names: Vec<&'static str> = constructor
        .as_ref()
        .map(|c| c.parameters.iter().map(|p| p.name).collect())
        .unwrap_or_default();

    let mut planned: Vec<PlannedProperty<T>> = Vec::with_capacity(shape.properties.len());
    for property in &shape.properties {
        let serialized_name = match property.rename {
            Some(rename) => rename.to_owned(),
            None => naming.apply(property.name),
        };
        let param = param_names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(property.name));
        let built = (property.accept)(syn)?;
        planned.push(PlannedProperty {
            serialized_name,
            key: property.key,
            built,
            param,
        });
    }
    let prefer_async = planned.iter().any(|p| p.built.prefer_async);

    if keyed != 0 {
        synthesize_array_object(
            type_name,
            planned,
            constructor,
            prefer_async,
            syn,
        )
    } else {
        synthesize_map_object(
            type_name,
            planned,
            constructor,
            serialize_default_values,
            prefer_async,
            syn,
        )
    }
}

fn synthesize_map_object<T: Send + Sync + 'static>(
    type_name: &'static str,
    planned: Vec<PlannedProperty<T>>,
    constructor: Option<ConstructorShape<T>>,
    serialize_default_values: bool,
    mut prefer_async: bool,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    let write_properties: Vec<WriteProperty<T>> = planned
        .iter()
        .filter(|p| p.writable())
        .map(|p| WriteProperty {
            encoded_name: encode_property_name(&p.serialized_name),
            handler: p.built.handler.clone(),
        })
        .collect();

    match constructor {
        Some(ConstructorShape {
            parameters,
            kind: ConstructorKind::State { new_state, invoke },
        }) => {
            let mut params: HashMap<Box<[u8]>, Arc<dyn ParamHandler>> = HashMap::new();
            for parameter in &parameters {
                let handler = (parameter.accept)(syn)?;
                prefer_async |= handler.prefer_async();
                params.insert(
                    to_camel_case(parameter.name).into_bytes().into_boxed_slice(),
                    handler.clone(),
                );
                params.insert(
                    to_pascal_case(parameter.name).into_bytes().into_boxed_slice(),
                    handler,
                );
            }

            // Settable properties the constructor does not cover are applied
            // after materialization.
            let late_properties: HashMap<Box<[u8]>, Arc<dyn PropertyHandler<T>>> = planned
                .iter()
                .filter(|p| p.built.has_setter)
                .filter(|p| !params.contains_key(p.serialized_name.as_bytes()))
                .map(|p| {
                    (
                        p.serialized_name.clone().into_bytes().into_boxed_slice(),
                        p.built.handler.clone(),
                    )
                })
                .collect();

            Ok(Arc::new(ObjectMapCtorConverter {
                type_name,
                serialize_default_values,
                write_properties,
                params,
                late_properties,
                new_state,
                invoke,
                prefer_async,
            }))
        }
        other => {
            let default_ctor = match other {
                Some(ConstructorShape {
                    kind: ConstructorKind::Default(ctor),
                    ..
                }) => Some(ctor),
                _ => None,
            };
            let read_table: HashMap<Box<[u8]>, Arc<dyn PropertyHandler<T>>> = planned
                .iter()
                .filter(|p| p.built.has_setter)
                .map(|p| {
                    (
                        p.serialized_name.clone().into_bytes().into_boxed_slice(),
                        p.built.handler.clone(),
                    )
                })
                .collect();

            Ok(Arc::new(ObjectMapConverter {
                type_name,
                serialize_default_values,
                write_properties,
                read_table,
                default_ctor,
                prefer_async,
            }))
        }
    }
}

fn synthesize_array_object<T: Send + Sync + 'static>(
    type_name: &'static str,
    planned: Vec<PlannedProperty<T>>,
    constructor: Option<ConstructorShape<T>>,
    mut prefer_async: bool,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    let mut seen = HashSet::new();
    let mut max_index = 0u32;
    for property in &planned {
        let Some(key) = property.key else {
            return Err(shape_error(format!(
                "`{type_name}` mixes keyed and named properties; key indexes are all-or-nothing"
            )));
        };
        if key > MAX_KEY_INDEX {
            return Err(shape_error(format!(
                "`{type_name}` key index {key} exceeds the supported maximum {MAX_KEY_INDEX}"
            )));
        }
        if !seen.insert(key) {
            return Err(shape_error(format!(
                "`{type_name}` defines key index {key} more than once"
            )));
        }
        max_index = max_index.max(key);
    }
    let slot_count = max_index as usize + 1;

    match constructor {
        Some(ConstructorShape {
            parameters,
            kind: ConstructorKind::State { new_state, invoke },
        }) => {
            let mut slots: Vec<Option<CtorArraySlot<T>>> =
                (0..slot_count).map(|_| None).collect();
            for property in planned {
                let Some(key) = property.key else { continue };
                let slot = match property.param {
                    Some(index) => {
                        let handler = (parameters[index].accept)(syn)?;
                        prefer_async |= handler.prefer_async();
                        CtorArraySlot::Param {
                            handler,
                            writer: property
                                .built
                                .has_getter
                                .then(|| property.built.handler.clone()),
                        }
                    }
                    None => CtorArraySlot::Late(ArraySlot {
                        writable: property.writable(),
                        readable: property.built.has_setter,
                        handler: property.built.handler.clone(),
                    }),
                };
                slots[key as usize] = Some(slot);
            }

            Ok(Arc::new(ObjectArrayCtorConverter {
                type_name,
                slots,
                new_state,
                invoke,
                prefer_async,
            }))
        }
        other => {
            let default_ctor = match other {
                Some(ConstructorShape {
                    kind: ConstructorKind::Default(ctor),
                    ..
                }) => Some(ctor),
                _ => None,
            };
            let mut slots: Vec<Option<ArraySlot<T>>> = (0..slot_count).map(|_| None).collect();
            for property in planned {
                let Some(key) = property.key else { continue };
                slots[key as usize] = Some(ArraySlot {
                    writable: property.writable(),
                    readable: property.built.has_setter,
                    handler: property.built.handler.clone(),
                });
            }

            Ok(Arc::new(ObjectArrayConverter {
                type_name,
                slots,
                default_ctor,
                prefer_async,
            }))
        }
    }
}

fn synthesize_union<T: Send + Sync + 'static>(
    shape: UnionShape<T>,
    syn: &mut Synthesizer<'_>,
) -> anyhow::Result<ArcConverter<T>> {
    let type_name = shape.type_name;

    let mut seen_aliases = HashSet::new();
    let mut seen_types = HashSet::new();
    seen_types.insert(shape.base.case_type);

    let base = (shape.base.accept)(syn)?;
    let mut prefer_async = base.prefer_async();

    let mut subtypes = Vec::with_capacity(shape.subtypes.len());
    let mut by_alias = HashMap::with_capacity(shape.subtypes.len());
    for case in &shape.subtypes {
        let alias = case.alias.ok_or_else(|| {
            shape_error(format!(
                "`{type_name}` subtype `{}` has no alias",
                case.case_name
            ))
        })?;
        if !seen_aliases.insert(alias) {
            return Err(shape_error(format!(
                "`{type_name}` declares subtype alias {alias} more than once"
            )));
        }
        if !seen_types.insert(case.case_type) {
            return Err(shape_error(format!(
                "`{type_name}` declares subtype `{}` more than once",
                case.case_name
            )));
        }
        let built = (case.accept)(syn)?;
        prefer_async |= built.prefer_async();
        by_alias.insert(alias, built.clone());
        subtypes.push(built);
    }

    Ok(Arc::new(UnionConverter {
        type_name,
        base,
        subtypes,
        by_alias,
        prefer_async,
    }))
}
