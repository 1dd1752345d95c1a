//! Runtime machinery: model registry, dependency index, sampler resolution,
//! built-in samplers, and the draw engine.

pub mod deps;
pub mod engine;
pub mod model;
pub mod resolver;
pub mod samplers;
