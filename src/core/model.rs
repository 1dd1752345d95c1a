//! The model document — ordered entries, construction-time validation,
//! override patches, and RON loading.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::core::deps::{parse_reference, DependencyIndex, GraphError};
use crate::schema::entry::{Alias, EntrySpec, FuncSpec, KwValue, SamplerKind};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no entry named '{0}' in the model document")]
    UnknownEntry(String),
    #[error("entry '{entry}' references unknown column '{reference}'")]
    UnknownReference { entry: String, reference: String },
    #[error("entry '{entry}' references '{reference}', which is produced later in the document")]
    ForwardReference { entry: String, reference: String },
    #[error("output column '{column}' is produced by both '{first}' and '{second}'")]
    DuplicateColumn {
        column: String,
        first: String,
        second: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// An ordered mapping from entry name to spec. Document order is the
/// evaluation order; validation guarantees every reference points to an
/// earlier entry's output.
#[derive(Debug, Clone, Default)]
pub struct ModelDocument {
    entries: IndexMap<String, EntrySpec>,
}

impl ModelDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, spec: EntrySpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: EntrySpec) {
        self.entries.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&EntrySpec> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntrySpec)> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The exploded output column set, document order, deduplicated.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for (name, spec) in &self.entries {
            for column in spec.output_columns(name) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    /// Reject a malformed document before any draw is attempted:
    /// duplicate output columns, references to unknown columns, cycles,
    /// and references to columns produced later in document order.
    pub fn validate(&self) -> Result<(), ModelError> {
        // Producer position per exploded column, flagging duplicates.
        let mut producer: IndexMap<String, (usize, String)> = IndexMap::new();
        for (position, (name, spec)) in self.entries.iter().enumerate() {
            for column in spec.output_columns(name) {
                if let Some((_, first)) = producer.get(&column) {
                    return Err(ModelError::DuplicateColumn {
                        column,
                        first: first.clone(),
                        second: name.clone(),
                    });
                }
                producer.insert(column, (position, name.clone()));
            }
        }

        DependencyIndex::build(self).check_acyclic()?;

        for (position, (name, spec)) in self.entries.iter().enumerate() {
            for value in spec.kwargs.values() {
                let Some(reference) = parse_reference(value) else {
                    continue;
                };
                match producer.get(reference) {
                    None => {
                        return Err(ModelError::UnknownReference {
                            entry: name.clone(),
                            reference: reference.to_string(),
                        });
                    }
                    Some((produced_at, _)) if *produced_at >= position => {
                        return Err(ModelError::ForwardReference {
                            entry: name.clone(),
                            reference: reference.to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    /// A validated copy with the patch applied; the stored document is
    /// untouched.
    pub fn patched(&self, patch: &ModelPatch) -> Result<ModelDocument, ModelError> {
        let mut copy = self.clone();
        for (name, func) in &patch.funcs {
            let entry = copy
                .entries
                .get_mut(name)
                .ok_or_else(|| ModelError::UnknownEntry(name.clone()))?;
            entry.func = func.clone();
        }
        for (name, kwargs) in &patch.kwargs {
            let entry = copy
                .entries
                .get_mut(name)
                .ok_or_else(|| ModelError::UnknownEntry(name.clone()))?;
            // Shallow merge: named keys overwritten, the rest preserved.
            for (key, value) in kwargs {
                entry.kwargs.insert(key.clone(), value.clone());
            }
        }
        copy.validate()?;
        Ok(copy)
    }

    /// Commit a patch into this document.
    pub fn apply(&mut self, patch: &ModelPatch) -> Result<(), ModelError> {
        *self = self.patched(patch)?;
        Ok(())
    }

    /// Parse a model document from a RON string. Entries keep file order.
    pub fn parse_ron(input: &str) -> Result<ModelDocument, ModelError> {
        let raw: IndexMap<String, RonEntry> = ron::from_str(input)?;
        let mut document = ModelDocument::new();
        for (name, entry) in raw {
            let func = match entry.func {
                Some(name) => FuncSpec::Named(name),
                None => FuncSpec::Convention,
            };
            let alias = match entry.alias {
                None => Alias::None,
                Some(RonAlias::One(alias)) => Alias::One(alias),
                Some(RonAlias::Many(aliases)) => Alias::Many(aliases),
            };
            document.insert(
                name,
                EntrySpec {
                    func,
                    kind: entry.kind,
                    kwargs: entry.kwargs,
                    alias,
                },
            );
        }
        document.validate()?;
        Ok(document)
    }

    /// Load and validate a model document from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<ModelDocument, ModelError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }
}

/// Parameter overrides for a draw: replacement funcs and per-entry kwarg
/// merges. Applied to copies by `patched`, committed by `apply`.
#[derive(Debug, Clone, Default)]
pub struct ModelPatch {
    funcs: IndexMap<String, FuncSpec>,
    kwargs: IndexMap<String, IndexMap<String, KwValue>>,
}

impl ModelPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an entry's sampling function.
    pub fn func(mut self, entry: impl Into<String>, func: FuncSpec) -> Self {
        self.funcs.insert(entry.into(), func);
        self
    }

    /// Override one kwarg key of one entry; other keys are preserved.
    pub fn kwarg(
        mut self,
        entry: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<KwValue>,
    ) -> Self {
        self.kwargs
            .entry(entry.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty() && self.kwargs.is_empty()
    }
}

// RON deserialization intermediates — the file format uses `func` as an
// optional sampler name and `as` for the alias, so the internal types
// are built up from these.

#[derive(Debug, Deserialize)]
struct RonEntry {
    #[serde(default)]
    func: Option<String>,
    #[serde(default)]
    kind: SamplerKind,
    #[serde(default)]
    kwargs: IndexMap<String, KwValue>,
    #[serde(default, rename = "as")]
    alias: Option<RonAlias>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RonAlias {
    One(String),
    Many(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_entry_document() -> ModelDocument {
        ModelDocument::new()
            .with_entry(
                "t0",
                EntrySpec::named("uniform")
                    .with_kwarg("low", 0.0)
                    .with_kwarg("high", 10.0)
                    .with_kwarg("tag", "first epoch"),
            )
            .with_entry(
                "mag",
                EntrySpec::named("normal")
                    .with_kwarg("loc", "@t0")
                    .with_kwarg("scale", 0.1),
            )
    }

    #[test]
    fn valid_document_passes() {
        two_entry_document().validate().unwrap();
    }

    #[test]
    fn patched_merges_only_named_keys() {
        let document = two_entry_document();
        let patch = ModelPatch::new()
            .kwarg("t0", "low", 5.0)
            .kwarg("t0", "high", 6.0);
        let patched = document.patched(&patch).unwrap();

        let kwargs = &patched.get("t0").unwrap().kwargs;
        assert_eq!(kwargs["low"], KwValue::Scalar(5.0));
        assert_eq!(kwargs["high"], KwValue::Scalar(6.0));
        assert_eq!(kwargs["tag"], KwValue::Text("first epoch".into()));
        // other entries untouched
        assert_eq!(
            patched.get("mag").unwrap().kwargs["scale"],
            KwValue::Scalar(0.1)
        );
        // stored document untouched
        assert_eq!(
            document.get("t0").unwrap().kwargs["low"],
            KwValue::Scalar(0.0)
        );
    }

    #[test]
    fn apply_commits() {
        let mut document = two_entry_document();
        document
            .apply(&ModelPatch::new().kwarg("t0", "low", 2.0))
            .unwrap();
        assert_eq!(
            document.get("t0").unwrap().kwargs["low"],
            KwValue::Scalar(2.0)
        );
    }

    #[test]
    fn patch_of_unknown_entry_rejected() {
        let err = two_entry_document()
            .patched(&ModelPatch::new().kwarg("nope", "low", 1.0))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownEntry(name) if name == "nope"));
    }

    #[test]
    fn forward_reference_rejected() {
        let document = ModelDocument::new()
            .with_entry("b", EntrySpec::named("normal").with_kwarg("loc", "@a"))
            .with_entry("a", EntrySpec::named("uniform"));
        let err = document.validate().unwrap_err();
        assert!(matches!(
            err,
            ModelError::ForwardReference { entry, reference }
                if entry == "b" && reference == "a"
        ));
    }

    #[test]
    fn unknown_reference_rejected() {
        let document = ModelDocument::new()
            .with_entry("b", EntrySpec::named("normal").with_kwarg("loc", "@ghost"));
        let err = document.validate().unwrap_err();
        assert!(matches!(err, ModelError::UnknownReference { .. }));
    }

    #[test]
    fn self_reference_is_cyclic() {
        let document = ModelDocument::new()
            .with_entry("a", EntrySpec::named("normal").with_kwarg("loc", "@a"));
        let err = document.validate().unwrap_err();
        assert!(matches!(
            err,
            ModelError::Graph(GraphError::CyclicDependency(_))
        ));
    }

    #[test]
    fn duplicate_output_column_rejected() {
        let document = ModelDocument::new()
            .with_entry("a", EntrySpec::named("uniform").with_alias("x"))
            .with_entry("b", EntrySpec::named("uniform").with_alias("x"));
        let err = document.validate().unwrap_err();
        assert!(matches!(
            err,
            ModelError::DuplicateColumn { column, first, second }
                if column == "x" && first == "a" && second == "b"
        ));
    }

    #[test]
    fn output_columns_explode_aliases() {
        let document = ModelDocument::new()
            .with_entry("t0", EntrySpec::named("uniform"))
            .with_entry("stretch", EntrySpec::named("normal").with_alias("x1"))
            .with_entry(
                "position",
                EntrySpec::named("normal").with_aliases(["ra", "dec"]),
            );
        assert_eq!(document.output_columns(), vec!["t0", "x1", "ra", "dec"]);
    }

    #[test]
    fn parse_ron_document() {
        let input = r#"{
            "t0": (func: Some("uniform"), kwargs: {"low": 58000.0, "high": 58100.0}),
            "stretch": (func: Some("normal"), as: Some("x1")),
            "mag": (func: Some("normal"), kwargs: {"loc": "@x1 stretch term", "scale": 0.1}),
        }"#;
        let document = ModelDocument::parse_ron(input).unwrap();
        assert_eq!(document.len(), 3);
        assert_eq!(document.output_columns(), vec!["t0", "x1", "mag"]);
        assert_eq!(
            document.get("t0").unwrap().kwargs["low"],
            KwValue::Scalar(58000.0)
        );
        assert!(matches!(
            &document.get("mag").unwrap().func,
            FuncSpec::Named(name) if name == "normal"
        ));
    }

    #[test]
    fn parse_ron_rejects_forward_reference() {
        let input = r#"{
            "b": (func: Some("normal"), kwargs: {"loc": "@a"}),
            "a": (func: Some("uniform")),
        }"#;
        assert!(ModelDocument::parse_ron(input).is_err());
    }
}
