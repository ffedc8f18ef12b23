//! Program graph
//!
//! Arena-backed intermediate representation of a traced program:
//!
//! - [`ProgramGraph`]: nodes, values and blocks stored by index
//! - [`JitType`]: value types (tensor, list, scalar, module object)
//! - [`AttrValue`] / [`IValue`]: node attributes and constant payloads
//! - [`GraphBuilder`]: records graphs in execution order
//!
//! # Example
//!
//! ```
//! use trace2onnx::graph::{GraphBuilder, JitType};
//! use trace2onnx::tensor::ScalarType;
//!
//! let mut b = GraphBuilder::new("Net");
//! let x = b.tensor_input("x", ScalarType::Float, &[2, 3]);
//! let y = b.op("aten::relu", &[x], JitType::tensor_of(ScalarType::Float, &[2, 3]));
//! b.output(y);
//!
//! let graph = b.build();
//! assert!(graph.lint().is_ok());
//! assert_eq!(graph.nodes().len(), 1);
//! ```
//!
//! # Ownership
//!
//! Nodes never own each other. A node lists its input and output values; a
//! value records its producer and its uses. Nested blocks (branches of
//! `prim::If`) are owned by their node and may read any value defined
//! before that node in an enclosing block.

pub mod accessors;
pub mod attr;
pub mod builder;
pub mod context;
pub mod display;
pub mod lint;
pub mod mutators;
pub mod types;

// Re-export main types
pub use attr::{AttrValue, Attributes, IValue};
pub use builder::GraphBuilder;
pub use context::{BlockId, NodeId, ProgramGraph, Producer, Use, ValueId};
pub use types::{Dim, JitType, TensorType};
