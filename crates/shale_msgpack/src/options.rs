use std::sync::Arc;

/// Serializer-wide configuration. Plain data; cloned into each serializer.
#[derive(Clone)]
pub struct SerializerOptions {
    /// Dedupe [`crate::Shared`] identities with reference-extension tokens.
    pub preserve_references: bool,
    /// When false, map-shaped properties whose value equals their declared
    /// default are omitted from the encoded map.
    pub serialize_default_values: bool,
    pub multi_dimensional_array_format: MultiDimensionalArrayFormat,
    pub naming_policy: NamingPolicy,
    pub max_depth: i32,
    pub unflushed_bytes_threshold: usize,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            preserve_references: false,
            serialize_default_values: true,
            multi_dimensional_array_format: MultiDimensionalArrayFormat::Nested,
            naming_policy: NamingPolicy::Identity,
            max_depth: 64,
            unflushed_bytes_threshold: 64 * 1024,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MultiDimensionalArrayFormat {
    /// Nested arrays matching the rank.
    Nested,
    /// One array of `[dim1, ..., dimK, v0, v1, ...]`.
    Flat,
}

/// Transforms declared property names into serialized names.
#[derive(Clone)]
pub enum NamingPolicy {
    Identity,
    CamelCase,
    PascalCase,
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl NamingPolicy {
    pub fn apply(&self, name: &str) -> String {
        match self {
            NamingPolicy::Identity => name.to_owned(),
            NamingPolicy::CamelCase => to_camel_case(name),
            NamingPolicy::PascalCase => to_pascal_case(name),
            NamingPolicy::Custom(f) => f(name),
        }
    }
}

impl std::fmt::Debug for NamingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingPolicy::Identity => f.write_str("Identity"),
            NamingPolicy::CamelCase => f.write_str("CamelCase"),
            NamingPolicy::PascalCase => f.write_str("PascalCase"),
            NamingPolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

pub(crate) fn to_camel_case(name: &str) -> String {
    transform_first_word(name, char::to_lowercase)
}

pub(crate) fn to_pascal_case(name: &str) -> String {
    transform_first_word(name, char::to_uppercase)
}

/// Transforms the leading alphabetic run: `FirstName` <-> `firstName`,
/// `first_name` -> `First_name`. Only the first character changes case, which
/// matches how serialized names are produced from either convention.
fn transform_first_word<I: Iterator<Item = char>>(name: &str, case: fn(char) -> I) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => case(first).chain(chars).collect(),
        None => String::new(),
    }
}
