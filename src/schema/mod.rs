//! Declarative data model: entry specifications and the draw table.

pub mod entry;
pub mod table;
