//! Symbolic lowering functions
//!
//! A lowering function rewrites one traced node into ONNX nodes. It receives
//! a [`SymbolicContext`] to create nodes with and a [`SymbolicCall`]
//! describing the node being replaced, and returns exactly one value per
//! output of the original node.
//!
//! [`SymbolicRegistry`] stores lowerings by operator name and the first
//! opset they are valid for. A lookup at opset `v` picks the newest
//! registration whose version is `<= v`.
//!
//! # Example
//!
//! ```ignore
//! use trace2onnx::symbolic::SymbolicRegistry;
//!
//! let mut registry = SymbolicRegistry::with_default_ops();
//! registry.register("hardswish", 14, |ctx, call| {
//!     Ok(vec![ctx.op("HardSwish", &call.inputs[..1], &[])])
//! });
//! ```

pub mod context;
pub mod ops;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::ExportResult;
use crate::graph::{Attributes, IValue, ValueId};
use crate::traits::SymbolicLookup;

pub use context::SymbolicContext;

/// Lowering function for one operator
pub type SymbolicFn =
    Arc<dyn Fn(&mut SymbolicContext<'_>, &SymbolicCall) -> ExportResult<Vec<ValueId>> + Send + Sync>;

/// The node a lowering function replaces
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicCall {
    /// Kind of the original node, e.g. `aten::add_`
    pub kind: String,
    /// Inputs of the original node
    pub inputs: Vec<ValueId>,
    /// Attributes of the original node, `inplace` removed
    pub attrs: Attributes,
    /// Extra scalar arguments of `prim::PythonOp` nodes
    pub scalar_args: Vec<IValue>,
    /// Number of outputs the lowering must return
    pub num_outputs: usize,
}

impl SymbolicCall {
    /// Input at `index`
    pub fn input(&self, index: usize) -> Option<ValueId> {
        self.inputs.get(index).copied()
    }

    /// Integer attribute
    pub fn int_attr(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(|a| a.to_ivalue().as_int())
    }
}

/// Opset-versioned table of lowering functions
#[derive(Clone, Default)]
pub struct SymbolicRegistry {
    ops: FxHashMap<String, BTreeMap<i64, SymbolicFn>>,
}

impl fmt::Debug for SymbolicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SymbolicRegistry")
            .field("ops", &names)
            .finish()
    }
}

impl SymbolicRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in lowerings
    pub fn with_default_ops() -> Self {
        let mut registry = Self::new();
        ops::register_default_ops(&mut registry);
        registry
    }

    /// Register `func` for `op`, valid from `since_opset` on
    ///
    /// A later registration for the same op and version replaces the
    /// earlier one.
    pub fn register<F>(&mut self, op: &str, since_opset: i64, func: F)
    where
        F: Fn(&mut SymbolicContext<'_>, &SymbolicCall) -> ExportResult<Vec<ValueId>>
            + Send
            + Sync
            + 'static,
    {
        self.ops
            .entry(op.to_string())
            .or_default()
            .insert(since_opset, Arc::new(func));
    }

    /// Whether any version of `op` is registered
    pub fn contains(&self, op: &str) -> bool {
        self.ops.contains_key(op)
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl SymbolicLookup for SymbolicRegistry {
    fn lookup(&self, op: &str, opset: i64) -> Option<SymbolicFn> {
        self.ops
            .get(op)?
            .range(..=opset)
            .next_back()
            .map(|(_, func)| Arc::clone(func))
    }
}

/// Registry key of a node kind
///
/// Inplace suffixes are stripped, `prim` operators get a `prim_` prefix and
/// `prim::PythonOp` nodes are keyed by their `name` attribute.
pub fn lookup_key(kind: &str, attrs: &Attributes) -> String {
    let (ns, op) = kind.split_once("::").unwrap_or(("", kind));
    let op = op.strip_suffix('_').unwrap_or(op);
    match (ns, op) {
        ("prim", "PythonOp") => attrs
            .get("name")
            .and_then(|a| a.as_str())
            .unwrap_or(op)
            .to_string(),
        ("prim", _) => format!("prim_{}", op),
        _ => op.to_string(),
    }
}
