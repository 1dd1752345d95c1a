//! Reference parsing, the dependency index, and closure traversal.

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::core::model::ModelDocument;
use crate::schema::entry::KwValue;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cyclic dependency through '{0}'")]
    CyclicDependency(String),
}

/// Extract the referenced column name from a text value, if any.
///
/// A value is a reference iff it contains `@`; the name is the token after
/// the last `@`, cut at the first whitespace. Trailing text is ignored.
pub fn reference_name(text: &str) -> Option<&str> {
    let (_, after) = text.rsplit_once('@')?;
    let name = after.split(char::is_whitespace).next().unwrap_or("");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Reference extraction over a kwargs value; non-text values are literals.
pub fn parse_reference(value: &KwValue) -> Option<&str> {
    match value {
        KwValue::Text(text) => reference_name(text),
        _ => None,
    }
}

/// Derived view of the inter-entry reference graph, keyed by output column.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    /// Exploded output columns, document order, deduplicated.
    pub columns: Vec<String>,
    /// column -> columns it references.
    pub dependencies: IndexMap<String, Vec<String>>,
    /// column -> columns that consume it.
    pub input_of: IndexMap<String, Vec<String>>,
}

impl DependencyIndex {
    pub fn build(document: &ModelDocument) -> Self {
        let mut index = DependencyIndex::default();
        let mut seen = FxHashSet::default();

        for (name, spec) in document.iter() {
            let refs: Vec<String> = spec
                .kwargs
                .values()
                .filter_map(parse_reference)
                .map(str::to_string)
                .collect();

            for column in spec.output_columns(name) {
                if seen.insert(column.clone()) {
                    index.columns.push(column.clone());
                }
                for referenced in &refs {
                    index
                        .input_of
                        .entry(referenced.clone())
                        .or_default()
                        .push(column.clone());
                }
                if !refs.is_empty() {
                    index.dependencies.insert(column, refs.clone());
                }
            }
        }

        index
    }

    /// All columns transitively affected if any of `names` changes.
    pub fn forward_closure(&self, names: &[&str], include_self: bool) -> Vec<String> {
        self.expand(&self.input_of, names, include_self)
    }

    /// All columns any of `names` transitively depends on.
    pub fn backward_closure(&self, names: &[&str], include_self: bool) -> Vec<String> {
        self.expand(&self.dependencies, names, include_self)
    }

    /// Iterative frontier expansion, bounded by a visited set so that even
    /// a cyclic graph terminates. Cycles are rejected separately by
    /// `check_acyclic` at document validation.
    fn expand(
        &self,
        edges: &IndexMap<String, Vec<String>>,
        names: &[&str],
        include_self: bool,
    ) -> Vec<String> {
        let mut visited: FxHashSet<String> = names.iter().map(|n| n.to_string()).collect();
        let mut out: Vec<String> = if include_self {
            names.iter().map(|n| n.to_string()).collect()
        } else {
            Vec::new()
        };
        let mut frontier: Vec<String> = names.iter().map(|n| n.to_string()).collect();

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for name in &frontier {
                let Some(targets) = edges.get(name) else {
                    continue;
                };
                for target in targets {
                    if visited.insert(target.clone()) {
                        out.push(target.clone());
                        next.push(target.clone());
                    }
                }
            }
            frontier = next;
        }

        out
    }

    /// Kahn's algorithm over the reference graph; names a column on a
    /// cycle if one exists.
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut nodes: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let mut present: FxHashSet<&str> = nodes.iter().copied().collect();
        for referenced in self.input_of.keys() {
            if present.insert(referenced) {
                nodes.push(referenced);
            }
        }

        let mut indegree: IndexMap<&str, usize> = nodes.iter().map(|n| (*n, 0)).collect();
        for (consumer, refs) in &self.dependencies {
            if let Some(count) = indegree.get_mut(consumer.as_str()) {
                *count = refs.len();
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut processed = 0usize;

        while let Some(node) = ready.pop() {
            processed += 1;
            if let Some(consumers) = self.input_of.get(node) {
                for consumer in consumers {
                    if let Some(count) = indegree.get_mut(consumer.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(consumer);
                        }
                    }
                }
            }
        }

        if processed == nodes.len() {
            Ok(())
        } else {
            let stuck = indegree
                .iter()
                .find(|(_, count)| **count > 0)
                .map(|(n, _)| n.to_string())
                .unwrap_or_default();
            Err(GraphError::CyclicDependency(stuck))
        }
    }

    /// Graphviz DOT rendering of the node/edge structure. Plain text only;
    /// layout and image export belong to external tooling.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph model {\n");
        for column in &self.columns {
            out.push_str(&format!("    \"{column}\";\n"));
        }
        for (dependency, consumers) in &self.input_of {
            for consumer in consumers {
                out.push_str(&format!("    \"{dependency}\" -> \"{consumer}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }
}
