//! Names of exported values
//!
//! Every value of the program graph gets exactly one ONNX name per export.
//! Module attributes are named by their dotted path, the `None` constant by
//! the empty string (an omitted optional input), and everything else by
//! the last module of its producer's scope followed by its debug name:
//! `fc.12` for value `%12` produced inside `Net/__module.fc`.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{ExportError, ExportResult};
use crate::graph::{ProgramGraph, ValueId};

const MODULE_PREFIX: &str = "__module.";

/// Value name table plus attribute path aliases
#[derive(Debug, Clone, Default)]
pub struct ValueNames {
    aliases: FxHashMap<ValueId, String>,
    table: FxHashMap<ValueId, String>,
}

impl ValueNames {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the attribute path a value was read from
    pub fn add_alias(&mut self, value: ValueId, path: String) {
        self.aliases.insert(value, path);
    }

    /// Attribute path of a value
    pub fn alias(&self, value: ValueId) -> Option<&str> {
        self.aliases.get(&value).map(String::as_str)
    }

    /// Every aliased value with its attribute path
    pub fn aliases(&self) -> impl Iterator<Item = (ValueId, &str)> {
        self.aliases.iter().map(|(&v, path)| (v, path.as_str()))
    }

    /// Fix the name of a boundary value before anything is resolved
    pub fn assign(&mut self, value: ValueId, name: &str) {
        self.table.insert(value, name.to_string());
    }

    /// Name already assigned to a value
    pub fn get(&self, value: ValueId) -> Option<&str> {
        self.table.get(&value).map(String::as_str)
    }

    /// Number of named values
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no value has been named yet
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Name of `value`, assigning it on first use
    ///
    /// Later calls for the same value return the same name even if the
    /// graph changed in between.
    pub fn resolve(&mut self, graph: &ProgramGraph, value: ValueId) -> String {
        if let Some(name) = self.table.get(&value) {
            return name.clone();
        }
        let name = self.derive(graph, value);
        self.table.insert(value, name.clone());
        name
    }

    fn derive(&self, graph: &ProgramGraph, value: ValueId) -> String {
        if let Some(alias) = self.aliases.get(&value) {
            return alias.clone();
        }
        if graph.is_none_constant(value) {
            return String::new();
        }
        let scope = graph
            .producing_node(value)
            .map(|n| graph.scope(n))
            .unwrap_or("");
        let module = scope.rsplit('/').next().unwrap_or("");
        let module = module.strip_prefix(MODULE_PREFIX).unwrap_or(module);
        if module.is_empty() {
            graph.debug_name(value)
        } else {
            format!("{}.{}", module, graph.debug_name(value))
        }
    }

    /// Apply caller supplied names to the root boundary
    ///
    /// The module object input is skipped. Input names must match the
    /// remaining inputs one to one; output names are matched positionally
    /// and a count mismatch is only reported.
    pub fn assign_boundary(
        &mut self,
        graph: &ProgramGraph,
        self_value: Option<ValueId>,
        input_names: Option<&[String]>,
        output_names: Option<&[String]>,
    ) -> ExportResult<()> {
        if let Some(names) = input_names {
            let inputs: Vec<ValueId> = graph
                .inputs()
                .iter()
                .copied()
                .filter(|&v| Some(v) != self_value)
                .collect();
            if inputs.len() != names.len() {
                return Err(ExportError::NameCountMismatch {
                    expected: inputs.len(),
                    actual: names.len(),
                });
            }
            for (value, name) in inputs.into_iter().zip(names) {
                self.assign(value, name);
            }
        }

        if let Some(names) = output_names {
            let outputs = graph.outputs();
            if names.len() != outputs.len() {
                warn!(
                    "{} output names given for {} graph outputs",
                    names.len(),
                    outputs.len()
                );
            }
            for (&value, name) in outputs.iter().zip(names) {
                self.assign(value, name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    #[test]
    fn test_scope_names() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        b.scope("Net/__module.encoder/__module.encoder.fc");
        let y = b.op("aten::relu", &[x], JitType::tensor());
        b.scope("");
        let z = b.op("aten::neg", &[y], JitType::tensor());
        b.output(z);
        let g = b.build();

        let mut names = ValueNames::new();
        assert_eq!(names.resolve(&g, x), "x");
        assert_eq!(names.resolve(&g, y), format!("encoder.fc.{}", y.index()));
        assert_eq!(names.resolve(&g, z), z.index().to_string());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        b.output(x);
        let mut g = b.build();

        let mut names = ValueNames::new();
        let first = names.resolve(&g, x);
        g.set_debug_name(x, "renamed").unwrap();
        assert_eq!(names.resolve(&g, x), first);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_alias_and_none() {
        let mut b = GraphBuilder::new("m");
        let this = b.self_input("Net");
        let w = b.get_attr(this, "weight", JitType::tensor());
        let none = b.none();
        let g = b.build();

        let mut names = ValueNames::new();
        names.add_alias(w, "fc.weight".to_string());
        assert_eq!(names.resolve(&g, w), "fc.weight");
        assert_eq!(names.resolve(&g, none), "");
    }

    #[test]
    fn test_boundary_names() {
        let mut b = GraphBuilder::new("m");
        let this = b.self_input("Net");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::relu", &[x], JitType::tensor());
        b.output(y);
        let g = b.build();

        let mut names = ValueNames::new();
        let inputs = vec!["input".to_string()];
        let outputs = vec!["out".to_string(), "extra".to_string()];
        names
            .assign_boundary(&g, Some(this), Some(&inputs), Some(&outputs))
            .unwrap();
        assert_eq!(names.resolve(&g, x), "input");
        assert_eq!(names.resolve(&g, y), "out");

        let too_many = vec!["a".to_string(), "b".to_string()];
        let err = ValueNames::new()
            .assign_boundary(&g, Some(this), Some(&too_many), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::NameCountMismatch { expected: 1, actual: 2 }
        ));
    }
}
