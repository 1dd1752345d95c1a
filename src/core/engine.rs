//! The draw engine — orchestrates entries in document order, substitutes
//! resolved dependency values, and assembles the result table.

use indexmap::IndexMap;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::deps::{parse_reference, DependencyIndex, GraphError};
use crate::core::model::{ModelDocument, ModelError, ModelPatch};
use crate::core::resolver::{
    self, PdfWeights, ResolveError, ResolvedValue, SamplerArgs, SamplerError, SamplerFn,
    SamplerHost, SamplerOutput,
};
use crate::core::samplers;
use crate::schema::entry::{EntrySpec, KwValue, SamplerKind};
use crate::schema::table::{DrawTable, TableError};

#[derive(Debug, Error)]
pub enum DrawError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("entry '{entry}': sampler failed: {source}")]
    Sampler {
        entry: String,
        source: SamplerError,
    },
    #[error("entry '{entry}': referenced column '{column}' is not in the working table")]
    MissingColumn { entry: String, column: String },
    #[error("entry '{entry}': no size requested and none implied by references or input data")]
    MissingSize { entry: String },
    #[error("entry '{entry}': expected {expected} values, sampler produced {actual}")]
    LengthMismatch {
        entry: String,
        expected: usize,
        actual: usize,
    },
    #[error("entry '{entry}': sampler output does not match kind {kind:?}")]
    KindMismatch { entry: String, kind: SamplerKind },
    #[error("invalid pdf: {0}")]
    InvalidPdf(String),
    #[error("redrawing '{name}' would also redraw '{other}', which was requested alongside it")]
    SimultaneousRedraw { name: String, other: String },
}

/// Options for one draw call.
#[derive(Clone, Default)]
pub struct DrawOptions<'a> {
    size: Option<usize>,
    limit_to: Option<Vec<String>>,
    data: Option<&'a DrawTable>,
    patch: Option<&'a ModelPatch>,
}

impl<'a> DrawOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested number of rows. `0` short-circuits into an empty table
    /// with the full column set, invoking no sampler.
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Only evaluate entries whose name or output columns appear here.
    pub fn limit_to<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.limit_to = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Starting table. Copied, never mutated; its columns satisfy
    /// references of entries that are skipped or reference-driven.
    pub fn data(mut self, data: &'a DrawTable) -> Self {
        self.data = Some(data);
        self
    }

    /// Parameter overrides applied to a snapshot of the document for this
    /// call only.
    pub fn patch(mut self, patch: &'a ModelPatch) -> Self {
        self.patch = Some(patch);
        self
    }
}

/// The engine: a validated model document, the built-in sampler table, and
/// an optional host. Holds no per-draw state; every draw runs on its own
/// snapshot and working table.
pub struct DrawEngine {
    model: ModelDocument,
    builtins: HashMap<String, SamplerFn>,
    host: Option<Box<dyn SamplerHost + Send + Sync>>,
}

/// Builder for a `DrawEngine`. Validation and sampler resolution happen in
/// `build`, so a misconfigured model fails before any draw.
#[derive(Default)]
pub struct DrawEngineBuilder {
    model: ModelDocument,
    extra_samplers: HashMap<String, SamplerFn>,
    host: Option<Box<dyn SamplerHost + Send + Sync>>,
}

impl DrawEngineBuilder {
    pub fn model(mut self, model: ModelDocument) -> Self {
        self.model = model;
        self
    }

    pub fn entry(mut self, name: impl Into<String>, spec: EntrySpec) -> Self {
        self.model.insert(name, spec);
        self
    }

    /// Attach the host object consulted for named and conventional lookups.
    pub fn host(mut self, host: impl SamplerHost + Send + Sync + 'static) -> Self {
        self.host = Some(Box::new(host));
        self
    }

    /// Register an extra named sampler alongside the built-ins.
    pub fn sampler(mut self, name: impl Into<String>, func: SamplerFn) -> Self {
        self.extra_samplers.insert(name.into(), func);
        self
    }

    pub fn build(self) -> Result<DrawEngine, DrawError> {
        let mut builtins = samplers::builtin_table();
        builtins.extend(self.extra_samplers);

        let engine = DrawEngine {
            model: self.model,
            builtins,
            host: self.host,
        };
        engine.model.validate()?;
        engine.resolve_all(&engine.model)?;
        Ok(engine)
    }
}

impl DrawEngine {
    pub fn builder() -> DrawEngineBuilder {
        DrawEngineBuilder::default()
    }

    pub fn model(&self) -> &ModelDocument {
        &self.model
    }

    /// A validated, parameter-overridden copy of the stored document.
    pub fn get_model(&self, patch: &ModelPatch) -> Result<ModelDocument, ModelError> {
        self.model.patched(patch)
    }

    /// Commit overrides into the stored document; fails fast if the
    /// patched document no longer validates or resolves.
    pub fn change_model(&mut self, patch: &ModelPatch) -> Result<(), DrawError> {
        let patched = self.model.patched(patch)?;
        self.resolve_all(&patched)?;
        self.model = patched;
        Ok(())
    }

    /// The exploded output column names, document order.
    pub fn entries(&self) -> Vec<String> {
        self.model.output_columns()
    }

    /// Derived dependency/consumer indices over the stored document.
    pub fn dependency_index(&self) -> DependencyIndex {
        DependencyIndex::build(&self.model)
    }

    /// Columns transitively affected if `name` changes.
    pub fn forward_entries(&self, name: &str, include_self: bool) -> Vec<String> {
        self.dependency_index().forward_closure(&[name], include_self)
    }

    /// Columns `name` transitively depends on.
    pub fn backward_entries(&self, name: &str, include_self: bool) -> Vec<String> {
        self.dependency_index().backward_closure(&[name], include_self)
    }

    /// Graphviz DOT text for the dependency graph.
    pub fn to_dot(&self) -> String {
        self.dependency_index().to_dot()
    }

    /// Draw `size` rows from the stored document.
    pub fn draw(&self, size: usize, rng: &mut StdRng) -> Result<DrawTable, DrawError> {
        self.draw_with(DrawOptions::new().size(size), rng)
    }

    /// Draw with explicit options; see `DrawOptions`.
    pub fn draw_with(&self, opts: DrawOptions<'_>, rng: &mut StdRng) -> Result<DrawTable, DrawError> {
        let model = match opts.patch {
            Some(patch) => self.model.patched(patch)?,
            None => self.model.clone(),
        };

        // Schema introspection short-circuit: the column set without a
        // single sampler call.
        if opts.size == Some(0) {
            return Ok(DrawTable::with_empty_columns(model.output_columns()));
        }

        let mut working = opts.data.cloned().unwrap_or_default();
        let limit: Option<FxHashSet<&str>> = opts
            .limit_to
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect());

        for (name, spec) in model.iter() {
            let columns = spec.output_columns(name);
            if let Some(limit) = &limit {
                let selected = limit.contains(name.as_str())
                    || columns.iter().any(|c| limit.contains(c.as_str()));
                if !selected {
                    continue;
                }
            }

            let (rows, samples) = self.draw_param(name, spec, opts.size, &working, rng)?;

            if columns.len() == 1 {
                if samples.len() != rows {
                    return Err(DrawError::LengthMismatch {
                        entry: name.clone(),
                        expected: rows,
                        actual: samples.len(),
                    });
                }
                working.insert(columns.into_iter().next().unwrap_or_default(), samples)?;
            } else {
                // Multi-alias entries return their columns concatenated,
                // one row-block per alias.
                let expected = rows * columns.len();
                if samples.len() != expected {
                    return Err(DrawError::LengthMismatch {
                        entry: name.clone(),
                        expected,
                        actual: samples.len(),
                    });
                }
                for (i, column) in columns.into_iter().enumerate() {
                    working.insert(column, samples[i * rows..(i + 1) * rows].to_vec())?;
                }
            }
        }

        Ok(working)
    }

    /// Re-draw starting from the given entries: their forward closures are
    /// recomputed, everything else passes through from `data` unchanged.
    ///
    /// Several names are accepted only when none lies inside another's
    /// forward closure.
    pub fn redraw_from(
        &self,
        names: &[&str],
        data: &DrawTable,
        incl_name: bool,
        rng: &mut StdRng,
    ) -> Result<DrawTable, DrawError> {
        if names.is_empty() {
            return Ok(data.clone());
        }
        let index = self.dependency_index();

        let limit = if names.len() > 1 {
            let closures: Vec<Vec<String>> = names
                .iter()
                .map(|&name| index.forward_closure(&[name], false))
                .collect();
            for (i, closure) in closures.iter().enumerate() {
                for (j, requested) in names.iter().enumerate() {
                    if i != j && closure.iter().any(|c| c == requested) {
                        return Err(DrawError::SimultaneousRedraw {
                            name: names[i].to_string(),
                            other: requested.to_string(),
                        });
                    }
                }
            }

            let mut seen = FxHashSet::default();
            let mut limit = Vec::new();
            for closure in closures {
                for column in closure {
                    if seen.insert(column.clone()) {
                        limit.push(column);
                    }
                }
            }
            if incl_name {
                for name in names {
                    if seen.insert(name.to_string()) {
                        limit.push(name.to_string());
                    }
                }
            }
            limit
        } else {
            index.forward_closure(names, incl_name)
        };

        self.draw_with(DrawOptions::new().limit_to(limit).data(data), rng)
    }

    /// Single-entry draw: resolve references against the working table,
    /// settle the row count, invoke the sampler per its kind.
    fn draw_param(
        &self,
        name: &str,
        spec: &EntrySpec,
        requested: Option<usize>,
        working: &DrawTable,
        rng: &mut StdRng,
    ) -> Result<(usize, Vec<f64>), DrawError> {
        let mut resolved: IndexMap<String, ResolvedValue> = IndexMap::new();
        let mut implied: Option<usize> = None;

        for (key, value) in &spec.kwargs {
            match parse_reference(value) {
                Some(reference) => {
                    let column =
                        working
                            .column(reference)
                            .ok_or_else(|| DrawError::MissingColumn {
                                entry: name.to_string(),
                                column: reference.to_string(),
                            })?;
                    match implied {
                        Some(n) if n != column.len() => {
                            return Err(DrawError::LengthMismatch {
                                entry: name.to_string(),
                                expected: n,
                                actual: column.len(),
                            });
                        }
                        _ => implied = Some(column.len()),
                    }
                    resolved.insert(key.clone(), ResolvedValue::Column(column.to_vec()));
                }
                None => {
                    let literal = match value {
                        KwValue::Scalar(x) => ResolvedValue::Scalar(*x),
                        KwValue::Text(text) => ResolvedValue::Text(text.clone()),
                        KwValue::Array(values) => ResolvedValue::Column(values.clone()),
                    };
                    resolved.insert(key.clone(), literal);
                }
            }
        }

        // References imply the row count; the requested size only applies
        // to reference-free entries.
        let rows = match implied {
            Some(n) => n,
            None => match requested {
                Some(n) => n,
                None if working.nrows() > 0 => working.nrows(),
                None => {
                    return Err(DrawError::MissingSize {
                        entry: name.to_string(),
                    });
                }
            },
        };

        let sampler = resolver::resolve(name, &spec.func, &self.builtins, self.host_ref())?;
        let spec_string = spec.func.spec_string(name);
        let output = (sampler.as_ref())(SamplerArgs {
            size: Some(rows),
            name,
            spec: match spec.kind {
                SamplerKind::SizeAndFunc => Some(spec_string.as_str()),
                _ => None,
            },
            kwargs: &resolved,
            rng: &mut *rng,
        })
        .map_err(|source| DrawError::Sampler {
            entry: name.to_string(),
            source,
        })?;

        let samples = match (spec.kind, output) {
            (SamplerKind::FixedSize | SamplerKind::SizeAndFunc, SamplerOutput::Samples(v)) => v,
            (SamplerKind::PdfGrid, SamplerOutput::PdfGrid { grid, weights }) => {
                draw_from_pdf(&grid, &weights, rows, rng)?
            }
            (kind, _) => {
                return Err(DrawError::KindMismatch {
                    entry: name.to_string(),
                    kind,
                });
            }
        };

        Ok((rows, samples))
    }

    fn resolve_all(&self, model: &ModelDocument) -> Result<(), ResolveError> {
        for (name, spec) in model.iter() {
            resolver::resolve(name, &spec.func, &self.builtins, self.host_ref())?;
        }
        Ok(())
    }

    fn host_ref(&self) -> Option<&dyn SamplerHost> {
        match &self.host {
            Some(host) => {
                let host: &dyn SamplerHost = host.as_ref();
                Some(host)
            }
            None => None,
        }
    }
}

/// Materialize `size` values from a pdf grid by weighted random choice.
/// Weights are relative; they need not sum to 1.
pub fn draw_from_pdf(
    grid: &[f64],
    weights: &PdfWeights,
    size: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>, DrawError> {
    if grid.is_empty() {
        return Err(DrawError::InvalidPdf("empty grid".to_string()));
    }
    match weights {
        PdfWeights::Shared(weights) => {
            if weights.len() != grid.len() {
                return Err(DrawError::InvalidPdf(format!(
                    "{} weights for a {}-point grid",
                    weights.len(),
                    grid.len()
                )));
            }
            let dist =
                WeightedIndex::new(weights).map_err(|e| DrawError::InvalidPdf(e.to_string()))?;
            Ok((0..size).map(|_| grid[dist.sample(rng)]).collect())
        }
        PdfWeights::PerRow(rows) => {
            if rows.len() != size {
                return Err(DrawError::InvalidPdf(format!(
                    "{} weight rows for {} samples",
                    rows.len(),
                    size
                )));
            }
            let mut out = Vec::with_capacity(size);
            for row in rows {
                if row.len() != grid.len() {
                    return Err(DrawError::InvalidPdf(format!(
                        "{} weights for a {}-point grid",
                        row.len(),
                        grid.len()
                    )));
                }
                let dist =
                    WeightedIndex::new(row).map_err(|e| DrawError::InvalidPdf(e.to_string()))?;
                out.push(grid[dist.sample(rng)]);
            }
            Ok(out)
        }
    }
}
