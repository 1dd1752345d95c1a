//! Entry schema — function specs, sampler kinds, kwarg values, and aliases.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::resolver::SamplerFn;

/// How an entry's sampling function is specified.
///
/// Resolution happens eagerly when the engine is built (and again per
/// overridden snapshot), never at draw time.
#[derive(Clone, Default)]
pub enum FuncSpec {
    /// A directly supplied sampler closure, used as-is.
    Callable(SamplerFn),
    /// A name looked up in the engine's built-in table, then on the host.
    Named(String),
    /// No function given; resolve `draw_<entry_name>` by convention.
    #[default]
    Convention,
}

impl FuncSpec {
    /// The specification string this func resolves through, used in
    /// resolution errors and forwarded to `SizeAndFunc` samplers.
    pub fn spec_string(&self, entry: &str) -> String {
        match self {
            FuncSpec::Callable(_) => "<callable>".to_string(),
            FuncSpec::Named(name) => name.clone(),
            FuncSpec::Convention => format!("draw_{entry}"),
        }
    }
}

impl fmt::Debug for FuncSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncSpec::Callable(_) => f.write_str("Callable(..)"),
            FuncSpec::Named(name) => write!(f, "Named({name:?})"),
            FuncSpec::Convention => f.write_str("Convention"),
        }
    }
}

/// The calling convention an entry's sampler follows.
///
/// Chosen by the document author; the engine never inspects the callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplerKind {
    /// The sampler returns one sample per requested row.
    #[default]
    FixedSize,
    /// Like `FixedSize`, but the sampler also receives the spec string it
    /// was resolved from, so one generic host callable can serve several
    /// entries.
    SizeAndFunc,
    /// The sampler returns a `(grid, weights)` probability-density pair;
    /// the engine materializes rows by weighted choice over the grid.
    PdfGrid,
}

/// A keyword-argument value: a literal scalar, literal text, or a literal
/// array. Text containing `@` is an inter-entry reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KwValue {
    Scalar(f64),
    Text(String),
    Array(Vec<f64>),
}

impl From<f64> for KwValue {
    fn from(value: f64) -> Self {
        KwValue::Scalar(value)
    }
}

impl From<&str> for KwValue {
    fn from(value: &str) -> Self {
        KwValue::Text(value.to_string())
    }
}

impl From<String> for KwValue {
    fn from(value: String) -> Self {
        KwValue::Text(value)
    }
}

impl From<Vec<f64>> for KwValue {
    fn from(value: Vec<f64>) -> Self {
        KwValue::Array(value)
    }
}

/// The output column name(s) an entry's draw is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Alias {
    /// Same as the entry name.
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

/// One named unit of the model document.
#[derive(Debug, Clone, Default)]
pub struct EntrySpec {
    pub func: FuncSpec,
    pub kind: SamplerKind,
    pub kwargs: IndexMap<String, KwValue>,
    pub alias: Alias,
}

impl EntrySpec {
    pub fn new(func: FuncSpec) -> Self {
        EntrySpec {
            func,
            ..Default::default()
        }
    }

    /// Entry drawn by a named sampler (built-in or host-provided).
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(FuncSpec::Named(name.into()))
    }

    /// Entry drawn by `draw_<entry_name>` convention lookup.
    pub fn convention() -> Self {
        Self::new(FuncSpec::Convention)
    }

    /// Entry drawn by a directly supplied closure.
    pub fn callable(func: SamplerFn) -> Self {
        Self::new(FuncSpec::Callable(func))
    }

    pub fn with_kind(mut self, kind: SamplerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<KwValue>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Alias::One(alias.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alias = Alias::Many(aliases.into_iter().map(Into::into).collect());
        self
    }

    /// Explode the alias into the concrete output column names.
    pub fn output_columns(&self, name: &str) -> Vec<String> {
        match &self.alias {
            Alias::None => vec![name.to_string()],
            Alias::One(alias) => vec![alias.clone()],
            Alias::Many(aliases) => aliases.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_defaults_to_entry_name() {
        let spec = EntrySpec::named("uniform");
        assert_eq!(spec.output_columns("t0"), vec!["t0".to_string()]);
    }

    #[test]
    fn alias_one_overrides_name() {
        let spec = EntrySpec::named("normal").with_alias("x1");
        assert_eq!(spec.output_columns("stretch"), vec!["x1".to_string()]);
    }

    #[test]
    fn alias_many_explodes() {
        let spec = EntrySpec::named("normal").with_aliases(["ra", "dec"]);
        assert_eq!(
            spec.output_columns("position"),
            vec!["ra".to_string(), "dec".to_string()]
        );
    }

    #[test]
    fn kwvalue_from_impls() {
        assert_eq!(KwValue::from(1.5), KwValue::Scalar(1.5));
        assert_eq!(KwValue::from("@a"), KwValue::Text("@a".to_string()));
        assert_eq!(
            KwValue::from(vec![1.0, 2.0]),
            KwValue::Array(vec![1.0, 2.0])
        );
    }

    #[test]
    fn funcspec_spec_strings() {
        assert_eq!(FuncSpec::Named("uniform".into()).spec_string("t0"), "uniform");
        assert_eq!(FuncSpec::Convention.spec_string("t0"), "draw_t0");
    }

    #[test]
    fn funcspec_defaults_to_convention() {
        assert!(matches!(FuncSpec::default(), FuncSpec::Convention));
    }
}
