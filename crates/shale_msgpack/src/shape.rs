//! Structural descriptions of user types.
//!
//! Rust has no runtime reflection, so a shape bakes the per-type dispatch in
//! at construction: every generic sub-type (property type, element type,
//! union case type) is captured by a monomorphized glue closure that the
//! synthesis visitor drives later. Providers implement [`Shaped`] per type;
//! the builders below are the vocabulary they use.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::converter::ArcConverter;
use crate::converters::collections::{
    dictionary_converter, dictionary_read_into, enumerable_converter, enumerable_read_into,
    multi_dim_converter, DictionaryHandles, EnumerableHandles, MultiDimHandles, ReadInto,
};
use crate::converters::nullable::{BoxConverter, NullableConverter};
use crate::converters::enums::EnumConverter;
use crate::converters::object::{ParamHandler, PropertyHandler, TypedParam, TypedProperty};
use crate::converters::reference::{shared_converter, Shared};
use crate::converters::union::{TypedUnionCase, UnionCase};
use crate::visitor::Synthesizer;

/// Implemented by (or generated for) every serializable type.
pub trait Shaped: Send + Sync + Sized + 'static {
    fn shape() -> TypeShape<Self>;
}

/// How a collection type is built during decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstructionStrategy {
    /// Not constructible; decoding fails.
    None,
    /// Default-construct, then add elements one by one.
    Mutable,
    /// Fill a buffer of known size, then hand it over wholesale.
    Span,
    /// Hand over a streaming iterator of elements.
    Enumerable,
}

pub(crate) type SynthFn<T> =
    Box<dyn Fn(&mut Synthesizer<'_>) -> anyhow::Result<ArcConverter<T>> + Send + Sync>;

type ReadIntoSynth<T> =
    Box<dyn Fn(&mut Synthesizer<'_>) -> anyhow::Result<Arc<dyn ReadInto<T>>> + Send + Sync>;

pub struct TypeShape<T: Send + Sync + 'static> {
    pub(crate) kind: ShapeKind<T>,
}

pub(crate) enum ShapeKind<T: Send + Sync + 'static> {
    /// Resolved against the built-in converter table by `TypeId`.
    Primitive,
    Object(ObjectShape<T>),
    Collection(CollectionShape<T>),
    Enum {
        synth: SynthFn<T>,
    },
    Optional {
        synth: SynthFn<T>,
    },
    SharedRef {
        synth: SynthFn<T>,
    },
    Union(UnionShape<T>),
    MultiDim {
        synth: SynthFn<T>,
    },
    /// Transparent wrappers (e.g. `Box`) that delegate to their inner type.
    Delegate {
        synth: SynthFn<T>,
    },
}

/// Enumerables and dictionaries share this skeleton; they differ only in the
/// handles their glue captured.
pub(crate) struct CollectionShape<T: Send + Sync + 'static> {
    pub(crate) strategy: ConstructionStrategy,
    pub(crate) synth: SynthFn<T>,
    /// Present for `Mutable` collections: populates an existing instance,
    /// which is how getter-only collection properties deserialize.
    pub(crate) read_into: Option<ReadIntoSynth<T>>,
}

impl<T: Send + Sync + 'static> TypeShape<T> {
    pub fn primitive() -> Self {
        TypeShape {
            kind: ShapeKind::Primitive,
        }
    }

    pub fn object(shape: ObjectShape<T>) -> Self {
        TypeShape {
            kind: ShapeKind::Object(shape),
        }
    }

    pub fn union(shape: UnionShape<T>) -> Self {
        TypeShape {
            kind: ShapeKind::Union(shape),
        }
    }

    /// An enum serialized as its underlying integer.
    pub fn enumeration(to_int: fn(&T) -> i64, from_int: fn(i64) -> Option<T>) -> Self {
        let type_name = std::any::type_name::<T>();
        TypeShape {
            kind: ShapeKind::Enum {
                synth: Box::new(move |_| {
                    Ok(Arc::new(EnumConverter::new(type_name, to_int, from_int)) as ArcConverter<T>)
                }),
            },
        }
    }

    pub fn enumerable_mutable<E: Shaped>(
        new: fn() -> T,
        push: fn(&mut T, E),
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>,
    ) -> Self {
        let handles = EnumerableHandles {
            new: Some(new),
            push: Some(push),
            from_vec: None,
            from_iter: None,
            len,
            iter,
        };
        TypeShape {
            kind: ShapeKind::Collection(CollectionShape {
                strategy: ConstructionStrategy::Mutable,
                synth: Box::new(move |syn| {
                    enumerable_converter(ConstructionStrategy::Mutable, handles, syn)
                }),
                read_into: Some(Box::new(move |syn| enumerable_read_into(handles, syn))),
            }),
        }
    }

    pub fn enumerable_from_vec<E: Shaped>(
        from_vec: fn(Vec<E>) -> T,
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>,
    ) -> Self {
        let handles = EnumerableHandles {
            new: None,
            push: None,
            from_vec: Some(from_vec),
            from_iter: None,
            len,
            iter,
        };
        Self::collection_shape(ConstructionStrategy::Span, handles)
    }

    pub fn enumerable_from_iter<E: Shaped>(
        from_iter: fn(&mut dyn Iterator<Item = E>) -> T,
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>,
    ) -> Self {
        let handles = EnumerableHandles {
            new: None,
            push: None,
            from_vec: None,
            from_iter: Some(from_iter),
            len,
            iter,
        };
        Self::collection_shape(ConstructionStrategy::Enumerable, handles)
    }

    pub fn enumerable_write_only<E: Shaped>(
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>,
    ) -> Self {
        let handles = EnumerableHandles::<T, E> {
            new: None,
            push: None,
            from_vec: None,
            from_iter: None,
            len,
            iter,
        };
        Self::collection_shape(ConstructionStrategy::None, handles)
    }

    fn collection_shape<E: Shaped>(
        strategy: ConstructionStrategy,
        handles: EnumerableHandles<T, E>,
    ) -> Self {
        TypeShape {
            kind: ShapeKind::Collection(CollectionShape {
                strategy,
                synth: Box::new(move |syn| enumerable_converter(strategy, handles, syn)),
                read_into: None,
            }),
        }
    }

    pub fn dictionary_mutable<K: Shaped, V: Shaped>(
        new: fn() -> T,
        insert: fn(&mut T, K, V),
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + Send + 'x>,
    ) -> Self {
        let handles = DictionaryHandles {
            new: Some(new),
            insert: Some(insert),
            from_vec: None,
            from_iter: None,
            len,
            iter,
        };
        TypeShape {
            kind: ShapeKind::Collection(CollectionShape {
                strategy: ConstructionStrategy::Mutable,
                synth: Box::new(move |syn| {
                    dictionary_converter(ConstructionStrategy::Mutable, handles, syn)
                }),
                read_into: Some(Box::new(move |syn| dictionary_read_into(handles, syn))),
            }),
        }
    }

    pub fn dictionary_from_vec<K: Shaped, V: Shaped>(
        from_vec: fn(Vec<(K, V)>) -> T,
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + Send + 'x>,
    ) -> Self {
        let handles = DictionaryHandles {
            new: None,
            insert: None,
            from_vec: Some(from_vec),
            from_iter: None,
            len,
            iter,
        };
        Self::dictionary_shape(ConstructionStrategy::Span, handles)
    }

    pub fn dictionary_from_iter<K: Shaped, V: Shaped>(
        from_iter: fn(&mut dyn Iterator<Item = (K, V)>) -> T,
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + Send + 'x>,
    ) -> Self {
        let handles = DictionaryHandles {
            new: None,
            insert: None,
            from_vec: None,
            from_iter: Some(from_iter),
            len,
            iter,
        };
        Self::dictionary_shape(ConstructionStrategy::Enumerable, handles)
    }

    pub fn dictionary_write_only<K: Shaped, V: Shaped>(
        len: fn(&T) -> usize,
        iter: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = (&'x K, &'x V)> + Send + 'x>,
    ) -> Self {
        let handles = DictionaryHandles::<T, K, V> {
            new: None,
            insert: None,
            from_vec: None,
            from_iter: None,
            len,
            iter,
        };
        Self::dictionary_shape(ConstructionStrategy::None, handles)
    }

    fn dictionary_shape<K: Shaped, V: Shaped>(
        strategy: ConstructionStrategy,
        handles: DictionaryHandles<T, K, V>,
    ) -> Self {
        TypeShape {
            kind: ShapeKind::Collection(CollectionShape {
                strategy,
                synth: Box::new(move |syn| dictionary_converter(strategy, handles, syn)),
                read_into: None,
            }),
        }
    }

    /// A rank-`rank` rectangular array. The wire form (nested vs flat) is
    /// picked by the serializer's configuration at synthesis time.
    pub fn multi_dimensional<E: Shaped>(
        rank: usize,
        dims: fn(&T) -> Vec<usize>,
        flat: for<'x> fn(&'x T) -> Box<dyn Iterator<Item = &'x E> + Send + 'x>,
        from_parts: fn(Vec<usize>, Vec<E>) -> anyhow::Result<T>,
    ) -> Self {
        let handles = MultiDimHandles {
            rank,
            dims,
            flat,
            from_parts,
        };
        TypeShape {
            kind: ShapeKind::MultiDim {
                synth: Box::new(move |syn| multi_dim_converter(handles, syn)),
            },
        }
    }

    /// Builds the populate-in-place reader for `Mutable` collections, used by
    /// getter-only collection properties.
    pub(crate) fn build_read_into(
        self,
        syn: &mut Synthesizer<'_>,
    ) -> anyhow::Result<Option<Arc<dyn ReadInto<T>>>> {
        match self.kind {
            ShapeKind::Collection(c) => c.read_into.map(|f| f(syn)).transpose(),
            _ => Ok(None),
        }
    }
}

impl<E: Shaped> TypeShape<Option<E>> {
    pub fn optional() -> Self {
        TypeShape {
            kind: ShapeKind::Optional {
                synth: Box::new(|syn| {
                    let inner = syn.converter::<E>()?;
                    Ok(Arc::new(NullableConverter::new(inner)) as ArcConverter<Option<E>>)
                }),
            },
        }
    }
}

impl<E: Shaped> TypeShape<Box<E>> {
    pub fn boxed() -> Self {
        TypeShape {
            kind: ShapeKind::Delegate {
                synth: Box::new(|syn| {
                    let inner = syn.converter::<E>()?;
                    Ok(Arc::new(BoxConverter::new(inner)) as ArcConverter<Box<E>>)
                }),
            },
        }
    }
}

impl<E: Shaped> TypeShape<Shared<E>> {
    pub fn shared() -> Self {
        TypeShape {
            kind: ShapeKind::SharedRef {
                synth: Box::new(|syn| {
                    let inner = syn.converter::<E>()?;
                    Ok(shared_converter(inner))
                }),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Object shapes

pub struct ObjectShape<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) properties: Vec<PropertyShape<T>>,
    pub(crate) constructor: Option<ConstructorShape<T>>,
}

impl<T: Send + Sync + 'static> ObjectShape<T> {
    pub fn new(type_name: &'static str) -> Self {
        ObjectShape {
            type_name,
            properties: Vec::new(),
            constructor: None,
        }
    }

    pub fn property(mut self, property: impl Into<PropertyShape<T>>) -> Self {
        self.properties.push(property.into());
        self
    }

    pub fn constructor(mut self, constructor: ConstructorShape<T>) -> Self {
        self.constructor = Some(constructor);
        self
    }
}

pub struct PropertyShape<T: Send + Sync + 'static> {
    pub(crate) name: &'static str,
    pub(crate) key: Option<u32>,
    pub(crate) rename: Option<&'static str>,
    #[allow(dead_code)]
    pub(crate) nullable: bool,
    pub(crate) accept:
        Box<dyn Fn(&mut Synthesizer<'_>) -> anyhow::Result<BuiltProperty<T>> + Send + Sync>,
}

/// What a property shape resolves to once its type's converter is acquired.
pub(crate) struct BuiltProperty<T: Send + Sync + 'static> {
    pub(crate) handler: Arc<dyn PropertyHandler<T>>,
    pub(crate) has_getter: bool,
    pub(crate) has_setter: bool,
    pub(crate) prefer_async: bool,
}

/// Starts a property description. The getter borrows the property value from
/// the declaring type.
pub fn property<T: Send + Sync + 'static, P: Shaped>(
    name: &'static str,
    getter: for<'x> fn(&'x T) -> &'x P,
) -> PropertyBuilder<T, P> {
    PropertyBuilder {
        name,
        getter: Some(getter),
        setter: None,
        mut_getter: None,
        key: None,
        rename: None,
        nullable: false,
        default_pred: None,
    }
}

pub struct PropertyBuilder<T: Send + Sync + 'static, P: Shaped> {
    name: &'static str,
    getter: Option<for<'x> fn(&'x T) -> &'x P>,
    setter: Option<fn(&mut T, P)>,
    mut_getter: Option<for<'x> fn(&'x mut T) -> &'x mut P>,
    key: Option<u32>,
    rename: Option<&'static str>,
    nullable: bool,
    default_pred: Option<Arc<dyn Fn(&P) -> bool + Send + Sync>>,
}

impl<T: Send + Sync + 'static, P: Shaped> PropertyBuilder<T, P> {
    pub fn setter(mut self, setter: fn(&mut T, P)) -> Self {
        self.setter = Some(setter);
        self
    }

    /// For getter-only collection properties populated in place.
    pub fn mut_getter(mut self, mut_getter: for<'x> fn(&'x mut T) -> &'x mut P) -> Self {
        self.mut_getter = Some(mut_getter);
        self
    }

    /// The explicit integer index that switches the type to array-shaped
    /// encoding. All-or-nothing across a type's properties.
    pub fn key(mut self, index: u32) -> Self {
        self.key = Some(index);
        self
    }

    pub fn rename(mut self, serialized_name: &'static str) -> Self {
        self.rename = Some(serialized_name);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Declares the property's default as `P::default()`, enabling omission
    /// when the serializer suppresses default values.
    pub fn suppress_default(mut self) -> Self
    where
        P: Default + PartialEq,
    {
        self.default_pred = Some(Arc::new(|value: &P| *value == P::default()));
        self
    }

    /// Declares an explicit default value for suppression purposes.
    pub fn default_value(mut self, default: P) -> Self
    where
        P: PartialEq,
    {
        self.default_pred = Some(Arc::new(move |value: &P| *value == default));
        self
    }
}

impl<T: Send + Sync + 'static, P: Shaped> From<PropertyBuilder<T, P>> for PropertyShape<T> {
    fn from(builder: PropertyBuilder<T, P>) -> PropertyShape<T> {
        let PropertyBuilder {
            name,
            getter,
            setter,
            mut_getter,
            key,
            rename,
            nullable,
            default_pred,
        } = builder;

        PropertyShape {
            name,
            key,
            rename,
            nullable,
            accept: Box::new(move |syn| {
                let converter = syn.converter::<P>()?;

                // Getter-only collections deserialize into the existing
                // instance when their shape supports population.
                let read_into = match (setter, mut_getter) {
                    (None, Some(mut_getter)) => P::shape()
                        .build_read_into(syn)?
                        .map(|reader| (mut_getter, reader)),
                    _ => None,
                };

                let prefer_async = converter.prefer_async();
                let has_setter = setter.is_some() || read_into.is_some();
                Ok(BuiltProperty {
                    handler: Arc::new(TypedProperty::new(
                        getter,
                        setter,
                        read_into,
                        converter,
                        default_pred.clone(),
                    )),
                    has_getter: getter.is_some(),
                    has_setter,
                    prefer_async,
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Constructor shapes

pub struct ConstructorShape<T: Send + Sync + 'static> {
    pub(crate) parameters: Vec<ParameterShape>,
    pub(crate) kind: ConstructorKind<T>,
}

pub(crate) enum ConstructorKind<T> {
    /// Parameterless; decode populates through setters.
    Default(fn() -> T),
    /// Decode fills an argument-state value, then materializes.
    State {
        new_state: Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>,
        invoke: Box<dyn Fn(Box<dyn Any + Send>) -> anyhow::Result<T> + Send + Sync>,
    },
}

pub struct ParameterShape {
    pub(crate) name: &'static str,
    pub(crate) accept:
        Box<dyn Fn(&mut Synthesizer<'_>) -> anyhow::Result<Arc<dyn ParamHandler>> + Send + Sync>,
}

impl<T: Send + Sync + 'static> ConstructorShape<T> {
    pub fn parameterless(ctor: fn() -> T) -> Self {
        ConstructorShape {
            parameters: Vec::new(),
            kind: ConstructorKind::Default(ctor),
        }
    }

    /// Begins the argument-state flow: `S` is the scratch aggregate filled
    /// during decode and consumed by the parameterized constructor.
    pub fn with_state<S: Default + Send + 'static>() -> ConstructorBuilder<T, S> {
        ConstructorBuilder {
            parameters: Vec::new(),
            _marker: PhantomData,
        }
    }
}

pub struct ConstructorBuilder<T, S> {
    parameters: Vec<ParameterShape>,
    _marker: PhantomData<fn(S) -> T>,
}

impl<T: Send + Sync + 'static, S: Default + Send + 'static> ConstructorBuilder<T, S> {
    pub fn parameter<P: Shaped>(mut self, name: &'static str, store: fn(&mut S, P)) -> Self {
        self.parameters.push(ParameterShape {
            name,
            accept: Box::new(move |syn| {
                let converter = syn.converter::<P>()?;
                Ok(Arc::new(TypedParam::new(store, converter)) as Arc<dyn ParamHandler>)
            }),
        });
        self
    }

    pub fn construct(self, invoke: fn(S) -> anyhow::Result<T>) -> ConstructorShape<T> {
        ConstructorShape {
            parameters: self.parameters,
            kind: ConstructorKind::State {
                new_state: Box::new(|| Box::new(S::default())),
                invoke: Box::new(move |state| match state.downcast::<S>() {
                    Ok(state) => invoke(*state),
                    Err(_) => Err(anyhow::anyhow!("argument state type mismatch")),
                }),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Union shapes

/// A closed polymorphic family: one base case (alias nil on the wire) plus
/// integer-aliased subtype cases.
pub struct UnionShape<T: Send + Sync + 'static> {
    pub(crate) type_name: &'static str,
    pub(crate) base: UnionCaseShape<T>,
    pub(crate) subtypes: Vec<UnionCaseShape<T>>,
}

impl<T: Send + Sync + 'static> UnionShape<T> {
    pub fn new(type_name: &'static str, base: UnionCaseShape<T>) -> Self {
        UnionShape {
            type_name,
            base,
            subtypes: Vec::new(),
        }
    }

    pub fn subtype(mut self, case: UnionCaseShape<T>) -> Self {
        self.subtypes.push(case);
        self
    }
}

pub struct UnionCaseShape<T: Send + Sync + 'static> {
    pub(crate) alias: Option<i32>,
    pub(crate) case_type: TypeId,
    pub(crate) case_name: &'static str,
    pub(crate) accept:
        Box<dyn Fn(&mut Synthesizer<'_>) -> anyhow::Result<Arc<dyn UnionCase<T>>> + Send + Sync>,
}

impl<T: Send + Sync + 'static> UnionCaseShape<T> {
    /// A known subtype with its integer alias. `project` answers "is this
    /// value an `S`" on the write side; `erase` lifts a decoded `S` back into
    /// the declared type.
    pub fn subtype<S: Shaped>(
        alias: i32,
        project: for<'x> fn(&'x T) -> Option<&'x S>,
        erase: fn(S) -> T,
    ) -> Self {
        Self::case(Some(alias), project, erase)
    }

    /// The declared type's own case, encoded with a nil alias.
    pub fn base<S: Shaped>(
        project: for<'x> fn(&'x T) -> Option<&'x S>,
        erase: fn(S) -> T,
    ) -> Self {
        Self::case(None, project, erase)
    }

    fn case<S: Shaped>(
        alias: Option<i32>,
        project: for<'x> fn(&'x T) -> Option<&'x S>,
        erase: fn(S) -> T,
    ) -> Self {
        UnionCaseShape {
            alias,
            case_type: TypeId::of::<S>(),
            case_name: std::any::type_name::<S>(),
            accept: Box::new(move |syn| {
                let converter = syn.converter::<S>()?;
                Ok(Arc::new(TypedUnionCase::new(alias, project, erase, converter))
                    as Arc<dyn UnionCase<T>>)
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Shapes for common standard-library carriers

impl<E: Shaped> Shaped for Option<E> {
    fn shape() -> TypeShape<Self> {
        TypeShape::optional()
    }
}

impl<E: Shaped> Shaped for Box<E> {
    fn shape() -> TypeShape<Self> {
        TypeShape::boxed()
    }
}

impl<E: Shaped> Shaped for Shared<E> {
    fn shape() -> TypeShape<Self> {
        TypeShape::shared()
    }
}

fn slice_iter<E: Sync>(v: &Vec<E>) -> Box<dyn Iterator<Item = &E> + Send + '_> {
    Box::new(v.iter())
}

impl<E: Shaped> Shaped for Vec<E> {
    fn shape() -> TypeShape<Self> {
        TypeShape::enumerable_mutable(Vec::new, Vec::push, Vec::len, slice_iter)
    }
}

fn boxed_slice_iter<E: Sync>(v: &Box<[E]>) -> Box<dyn Iterator<Item = &E> + Send + '_> {
    Box::new(v.iter())
}

impl<E: Shaped> Shaped for Box<[E]> {
    fn shape() -> TypeShape<Self> {
        TypeShape::enumerable_from_vec(
            Vec::into_boxed_slice,
            |v| v.len(),
            boxed_slice_iter,
        )
    }
}

fn hash_map_insert<K: Eq + std::hash::Hash, V>(
    map: &mut std::collections::HashMap<K, V>,
    key: K,
    value: V,
) {
    map.insert(key, value);
}

fn hash_map_iter<K: Sync, V: Sync>(
    map: &std::collections::HashMap<K, V>,
) -> Box<dyn Iterator<Item = (&K, &V)> + Send + '_> {
    Box::new(map.iter())
}

impl<K: Shaped + Eq + std::hash::Hash, V: Shaped> Shaped for std::collections::HashMap<K, V> {
    fn shape() -> TypeShape<Self> {
        TypeShape::dictionary_mutable(
            std::collections::HashMap::new,
            hash_map_insert,
            std::collections::HashMap::len,
            hash_map_iter,
        )
    }
}

fn btree_map_insert<K: Ord, V>(map: &mut std::collections::BTreeMap<K, V>, key: K, value: V) {
    map.insert(key, value);
}

fn btree_map_iter<K: Sync, V: Sync>(
    map: &std::collections::BTreeMap<K, V>,
) -> Box<dyn Iterator<Item = (&K, &V)> + Send + '_> {
    Box::new(map.iter())
}

impl<K: Shaped + Ord, V: Shaped> Shaped for std::collections::BTreeMap<K, V> {
    fn shape() -> TypeShape<Self> {
        TypeShape::dictionary_mutable(
            std::collections::BTreeMap::new,
            btree_map_insert,
            std::collections::BTreeMap::len,
            btree_map_iter,
        )
    }
}
