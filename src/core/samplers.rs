//! Built-in named samplers, registered into every engine's lookup table.
//!
//! These cover the usual distribution callables a model document feeds to
//! entries: `uniform`, `normal`, `constant`, and `choice`. Distribution
//! parameters accept either a scalar or a per-row column (broadcast), so a
//! reference-resolved column can drive e.g. the per-row mean of `normal`.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use rand_distr::Normal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::resolver::{ResolvedValue, SamplerArgs, SamplerError, SamplerFn, SamplerOutput};

/// The default built-in table.
pub fn builtin_table() -> HashMap<String, SamplerFn> {
    let mut table: HashMap<String, SamplerFn> = HashMap::new();
    table.insert("uniform".to_string(), Arc::new(uniform) as SamplerFn);
    table.insert("normal".to_string(), Arc::new(normal) as SamplerFn);
    table.insert("constant".to_string(), Arc::new(constant) as SamplerFn);
    table.insert("choice".to_string(), Arc::new(choice) as SamplerFn);
    table
}

fn value_at(value: &ResolvedValue, key: &str, row: usize) -> Result<f64, SamplerError> {
    value.value_at(row).ok_or_else(|| SamplerError::BadKwarg {
        key: key.to_string(),
        reason: format!("expected a scalar or a column with at least {} rows", row + 1),
    })
}

fn param_or(args: &SamplerArgs<'_>, key: &str, default: f64) -> ResolvedValue {
    args.get(key)
        .cloned()
        .unwrap_or(ResolvedValue::Scalar(default))
}

/// `uniform(low = 0, high = 1)` — one draw from `[low, high)` per row.
fn uniform(args: SamplerArgs<'_>) -> Result<SamplerOutput, SamplerError> {
    let rows = args.rows()?;
    let low = param_or(&args, "low", 0.0);
    let high = param_or(&args, "high", 1.0);

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let lo = value_at(&low, "low", row)?;
        let hi = value_at(&high, "high", row)?;
        if hi < lo {
            return Err(SamplerError::InvalidParam(format!(
                "uniform: high {hi} < low {lo}"
            )));
        }
        out.push(if hi > lo { args.rng.gen_range(lo..hi) } else { lo });
    }
    Ok(SamplerOutput::Samples(out))
}

/// `normal(loc = 0, scale = 1)` — Gaussian draws, per-row parameters.
fn normal(args: SamplerArgs<'_>) -> Result<SamplerOutput, SamplerError> {
    let rows = args.rows()?;
    let loc = param_or(&args, "loc", 0.0);
    let scale = param_or(&args, "scale", 1.0);

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let mean = value_at(&loc, "loc", row)?;
        let sigma = value_at(&scale, "scale", row)?;
        let dist = Normal::new(mean, sigma)
            .map_err(|e| SamplerError::InvalidParam(format!("normal: {e}")))?;
        out.push(dist.sample(args.rng));
    }
    Ok(SamplerOutput::Samples(out))
}

/// `constant(value)` — repeats a scalar, or passes a column through.
fn constant(args: SamplerArgs<'_>) -> Result<SamplerOutput, SamplerError> {
    let rows = args.rows()?;
    let value = args.require("value")?.clone();

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        out.push(value_at(&value, "value", row)?);
    }
    Ok(SamplerOutput::Samples(out))
}

/// `choice(values, p = uniform)` — weighted choice over a literal array.
fn choice(args: SamplerArgs<'_>) -> Result<SamplerOutput, SamplerError> {
    let rows = args.rows()?;
    let values = match args.require("values")? {
        ResolvedValue::Column(values) => values.clone(),
        _ => {
            return Err(SamplerError::BadKwarg {
                key: "values".to_string(),
                reason: "expected an array".to_string(),
            });
        }
    };
    if values.is_empty() {
        return Err(SamplerError::InvalidParam("choice: empty values".to_string()));
    }

    let p = args.get("p").cloned();
    let out = match p {
        None => (0..rows)
            .map(|_| values[args.rng.gen_range(0..values.len())])
            .collect(),
        Some(ResolvedValue::Column(weights)) => {
            if weights.len() != values.len() {
                return Err(SamplerError::BadKwarg {
                    key: "p".to_string(),
                    reason: format!(
                        "{} weights for {} values",
                        weights.len(),
                        values.len()
                    ),
                });
            }
            let dist = WeightedIndex::new(&weights)
                .map_err(|e| SamplerError::InvalidParam(format!("choice: {e}")))?;
            (0..rows).map(|_| values[dist.sample(args.rng)]).collect()
        }
        Some(_) => {
            return Err(SamplerError::BadKwarg {
                key: "p".to_string(),
                reason: "expected an array of weights".to_string(),
            });
        }
    };
    Ok(SamplerOutput::Samples(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(
        name: &str,
        size: usize,
        kwargs: IndexMap<String, ResolvedValue>,
    ) -> Result<Vec<f64>, SamplerError> {
        let table = builtin_table();
        let sampler = &table[name];
        let mut rng = StdRng::seed_from_u64(7);
        let out = (sampler.as_ref())(SamplerArgs {
            size: Some(size),
            name: "test",
            spec: None,
            kwargs: &kwargs,
            rng: &mut rng,
        })?;
        match out {
            SamplerOutput::Samples(v) => Ok(v),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn uniform_respects_bounds() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("low".to_string(), ResolvedValue::Scalar(2.0));
        kwargs.insert("high".to_string(), ResolvedValue::Scalar(3.0));
        let samples = run("uniform", 100, kwargs).unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|x| (2.0..3.0).contains(x)));
    }

    #[test]
    fn uniform_inverted_bounds_rejected() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("low".to_string(), ResolvedValue::Scalar(3.0));
        kwargs.insert("high".to_string(), ResolvedValue::Scalar(2.0));
        assert!(run("uniform", 1, kwargs).is_err());
    }

    #[test]
    fn normal_tracks_per_row_mean() {
        let mut kwargs = IndexMap::new();
        kwargs.insert(
            "loc".to_string(),
            ResolvedValue::Column(vec![0.0, 100.0, -100.0]),
        );
        kwargs.insert("scale".to_string(), ResolvedValue::Scalar(1e-9));
        let samples = run("normal", 3, kwargs).unwrap();
        assert!((samples[0] - 0.0).abs() < 1e-3);
        assert!((samples[1] - 100.0).abs() < 1e-3);
        assert!((samples[2] + 100.0).abs() < 1e-3);
    }

    #[test]
    fn constant_repeats_value() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("value".to_string(), ResolvedValue::Scalar(4.2));
        assert_eq!(run("constant", 3, kwargs).unwrap(), vec![4.2, 4.2, 4.2]);
    }

    #[test]
    fn constant_requires_value() {
        assert!(matches!(
            run("constant", 1, IndexMap::new()),
            Err(SamplerError::MissingKwarg(key)) if key == "value"
        ));
    }

    #[test]
    fn choice_with_one_hot_weights() {
        let mut kwargs = IndexMap::new();
        kwargs.insert(
            "values".to_string(),
            ResolvedValue::Column(vec![1.0, 2.0, 3.0]),
        );
        kwargs.insert("p".to_string(), ResolvedValue::Column(vec![0.0, 5.0, 0.0]));
        let samples = run("choice", 10, kwargs).unwrap();
        assert!(samples.iter().all(|x| *x == 2.0));
    }

    #[test]
    fn choice_weight_length_mismatch_rejected() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("values".to_string(), ResolvedValue::Column(vec![1.0, 2.0]));
        kwargs.insert("p".to_string(), ResolvedValue::Column(vec![1.0]));
        assert!(run("choice", 1, kwargs).is_err());
    }
}
