//! Sampler resolution — the callable contract, the host trait, and the
//! fixed-precedence lookup from a `FuncSpec` to an invocable sampler.

use indexmap::IndexMap;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::schema::entry::FuncSpec;

/// An invocable sampling callable.
pub type SamplerFn =
    Arc<dyn Fn(SamplerArgs<'_>) -> Result<SamplerOutput, SamplerError> + Send + Sync>;

/// The "owner object": anything that can hand out samplers by name.
///
/// Only name lookup is required of a host; the engine asks it once per
/// entry during resolution and never introspects further.
pub trait SamplerHost {
    fn sampler(&self, name: &str) -> Option<SamplerFn>;
}

/// A kwarg value after reference substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Scalar(f64),
    Text(String),
    /// A literal array, or a column materialized from an `@` reference.
    Column(Vec<f64>),
}

impl ResolvedValue {
    /// Broadcast access: scalars repeat for every row, columns index by row.
    pub fn value_at(&self, row: usize) -> Option<f64> {
        match self {
            ResolvedValue::Scalar(x) => Some(*x),
            ResolvedValue::Column(values) => values.get(row).copied(),
            ResolvedValue::Text(_) => None,
        }
    }

    /// The row count this value implies, if any.
    pub fn len(&self) -> Option<usize> {
        match self {
            ResolvedValue::Column(values) => Some(values.len()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResolvedValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Everything a sampler receives for one entry draw.
pub struct SamplerArgs<'a> {
    /// Requested row count; `None` when the caller expects the sampler to
    /// infer it from a column kwarg.
    pub size: Option<usize>,
    /// The entry being drawn.
    pub name: &'a str,
    /// For `SizeAndFunc` entries, the spec string the sampler was resolved
    /// from; `None` otherwise.
    pub spec: Option<&'a str>,
    /// Literal and reference-resolved kwargs.
    pub kwargs: &'a IndexMap<String, ResolvedValue>,
    pub rng: &'a mut StdRng,
}

impl SamplerArgs<'_> {
    /// The row count to produce: the requested size, else the longest
    /// column kwarg.
    pub fn rows(&self) -> Result<usize, SamplerError> {
        if let Some(n) = self.size {
            return Ok(n);
        }
        self.kwargs
            .values()
            .filter_map(ResolvedValue::len)
            .max()
            .ok_or_else(|| {
                SamplerError::InvalidParam("row count neither requested nor implied".to_string())
            })
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.kwargs.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&ResolvedValue, SamplerError> {
        self.kwargs
            .get(key)
            .ok_or_else(|| SamplerError::MissingKwarg(key.to_string()))
    }
}

/// What a sampler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerOutput {
    /// Direct samples, one per row.
    Samples(Vec<f64>),
    /// A probability-density grid; the engine draws rows from it by
    /// weighted choice. Weights need not sum to 1.
    PdfGrid { grid: Vec<f64>, weights: PdfWeights },
}

/// Unnormalized weights over a pdf grid.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfWeights {
    /// One weight vector shared by every output row.
    Shared(Vec<f64>),
    /// One independent weight vector per output row.
    PerRow(Vec<Vec<f64>>),
}

/// Failure inside a sampler body.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("missing kwarg '{0}'")]
    MissingKwarg(String),
    #[error("kwarg '{key}': {reason}")]
    BadKwarg { key: String, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

/// A `FuncSpec` that could not be turned into a callable.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("entry '{entry}': cannot resolve sampler '{spec}'")]
    Unresolved { entry: String, spec: String },
}

/// Resolve an entry's func to a callable, in fixed precedence order:
/// direct callable, then the built-in table, then the host; convention
/// entries look up `draw_<entry_name>` through the same two tables.
pub fn resolve(
    entry: &str,
    func: &FuncSpec,
    builtins: &HashMap<String, SamplerFn>,
    host: Option<&dyn SamplerHost>,
) -> Result<SamplerFn, ResolveError> {
    let lookup = |name: &str| {
        builtins
            .get(name)
            .cloned()
            .or_else(|| host.and_then(|h| h.sampler(name)))
    };

    match func {
        FuncSpec::Callable(f) => Ok(f.clone()),
        FuncSpec::Named(name) => lookup(name).ok_or_else(|| ResolveError::Unresolved {
            entry: entry.to_string(),
            spec: name.clone(),
        }),
        FuncSpec::Convention => {
            let conventional = format!("draw_{entry}");
            lookup(&conventional).ok_or_else(|| ResolveError::Unresolved {
                entry: entry.to_string(),
                spec: conventional,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_sampler(value: f64) -> SamplerFn {
        Arc::new(move |args: SamplerArgs<'_>| {
            let rows = args.rows()?;
            Ok(SamplerOutput::Samples(vec![value; rows]))
        })
    }

    struct TestHost;

    impl SamplerHost for TestHost {
        fn sampler(&self, name: &str) -> Option<SamplerFn> {
            match name {
                "shadowed" => Some(constant_sampler(2.0)),
                "host_only" => Some(constant_sampler(3.0)),
                "draw_t0" => Some(constant_sampler(4.0)),
                _ => None,
            }
        }
    }

    fn invoke(sampler: &SamplerFn, rows: usize) -> Vec<f64> {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(0);
        let kwargs = IndexMap::new();
        let out = (sampler.as_ref())(SamplerArgs {
            size: Some(rows),
            name: "test",
            spec: None,
            kwargs: &kwargs,
            rng: &mut rng,
        })
        .unwrap();
        match out {
            SamplerOutput::Samples(v) => v,
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn builtin_shadows_host() {
        let mut builtins = HashMap::new();
        builtins.insert("shadowed".to_string(), constant_sampler(1.0));
        let host = TestHost;
        let f = resolve(
            "e",
            &FuncSpec::Named("shadowed".into()),
            &builtins,
            Some(&host),
        )
        .unwrap();
        assert_eq!(invoke(&f, 2), vec![1.0, 1.0]);
    }

    #[test]
    fn host_fallback_for_named() {
        let builtins = HashMap::new();
        let host = TestHost;
        let f = resolve(
            "e",
            &FuncSpec::Named("host_only".into()),
            &builtins,
            Some(&host),
        )
        .unwrap();
        assert_eq!(invoke(&f, 1), vec![3.0]);
    }

    #[test]
    fn convention_resolves_draw_prefix() {
        let builtins = HashMap::new();
        let host = TestHost;
        let f = resolve("t0", &FuncSpec::Convention, &builtins, Some(&host)).unwrap();
        assert_eq!(invoke(&f, 1), vec![4.0]);
    }

    #[test]
    fn unresolved_names_entry_and_spec() {
        let builtins = HashMap::new();
        let err = resolve("t0", &FuncSpec::Named("nope".into()), &builtins, None).err().unwrap();
        let ResolveError::Unresolved { entry, spec } = err;
        assert_eq!(entry, "t0");
        assert_eq!(spec, "nope");
    }

    #[test]
    fn rows_falls_back_to_column_length() {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(0);
        let mut kwargs = IndexMap::new();
        kwargs.insert("loc".to_string(), ResolvedValue::Column(vec![0.0; 5]));
        let args = SamplerArgs {
            size: None,
            name: "x",
            spec: None,
            kwargs: &kwargs,
            rng: &mut rng,
        };
        assert_eq!(args.rows().unwrap(), 5);
    }

    #[test]
    fn broadcast_value_at() {
        assert_eq!(ResolvedValue::Scalar(2.5).value_at(99), Some(2.5));
        let col = ResolvedValue::Column(vec![1.0, 2.0]);
        assert_eq!(col.value_at(1), Some(2.0));
        assert_eq!(col.value_at(2), None);
        assert_eq!(ResolvedValue::Text("x".into()).value_at(0), None);
    }
}
