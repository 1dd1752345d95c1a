//! Paramdag — dependency-aware random-parameter sampling.
//!
//! A declarative model document names a set of entries, each with a sampling
//! function, keyword arguments, and an output alias. Kwargs may reference
//! columns already produced by earlier entries via the `@name` syntax; a draw
//! walks the document in order, substitutes the realized dependency values,
//! and assembles a column-per-alias result table.

pub mod core;
pub mod schema;
