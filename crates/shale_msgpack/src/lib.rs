//! Shape-driven MessagePack serialization.
//!
//! Given a structural description of a type (a [`TypeShape`], provided by
//! implementing [`Shaped`]), the engine synthesizes a reusable converter
//! pair that encodes values to the MessagePack binary format and decodes
//! them back — including recursive types, closed polymorphic unions,
//! reference-preserved object graphs and an async streaming variant.

pub mod async_io;
pub mod buffer;
pub mod context;
pub mod converter;
mod converters;
pub mod error;
pub mod format;
pub mod options;
pub mod reader;
mod registry;
pub mod serializer;
pub mod shape;
mod visitor;
pub mod writer;

pub use async_io::{AsyncReader, AsyncWriter};
pub use buffer::OutputBuffer;
pub use context::SerializationContext;
pub use converter::{ArcConverter, Converter};
pub use converters::reference::Shared;
pub use error::SerializationError;
pub use options::{MultiDimensionalArrayFormat, NamingPolicy, SerializerOptions};
pub use reader::Reader;
pub use serializer::MessagePackSerializer;
pub use shape::{
    property, ConstructionStrategy, ConstructorShape, ObjectShape, PropertyShape, Shaped,
    TypeShape, UnionCaseShape, UnionShape,
};
pub use writer::Writer;

pub use tokio_util::sync::CancellationToken;
