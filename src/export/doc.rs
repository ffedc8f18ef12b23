//! Doc strings attached to the exported model

use std::fmt::Write;

use rustc_hash::FxHashMap;
use tracing::info;

use crate::graph::{NodeId, ProgramGraph};

/// Doc strings of lowered nodes, by node
pub type NodeDocs = FxHashMap<NodeId, String>;

/// Verbose section log, mirrored into the root graph doc string
#[derive(Debug, Clone)]
pub struct DocLog {
    verbose: bool,
    keep: bool,
    text: String,
}

impl DocLog {
    /// Start the log of model `name`
    pub fn new(name: &str, verbose: bool, keep_doc_strings: bool) -> Self {
        Self {
            verbose,
            keep: keep_doc_strings,
            text: format!("\n# Model: {}\n", name),
        }
    }

    /// Record a section; `body` is only rendered in verbose mode
    pub fn log<F: FnOnce() -> String>(&mut self, title: &str, body: F) {
        if !self.verbose {
            return;
        }
        let body = body();
        info!("{}\n{}", title, body);
        if self.keep {
            let _ = write!(self.text, "\n## {}\n{}\n", title, body);
        }
    }

    /// Accumulated graph doc string
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Doc string of a node produced by lowering `original`
pub fn symbolic_node_doc(graph: &ProgramGraph, symbolic: NodeId, original: NodeId) -> String {
    format!(
        "## Symbolic node\n{}\n{}",
        graph.node_to_string(symbolic),
        original_node_doc(graph, original)
    )
}

/// Sections describing the traced node a lowered node came from
pub fn original_node_doc(graph: &ProgramGraph, original: NodeId) -> String {
    format!(
        "## Original node\n{}\n## Scope\n{}\n## Source Range\n```\n{}\n```\n",
        graph.node_to_string(original),
        graph.scope(original),
        graph.source_range(original)
    )
}
