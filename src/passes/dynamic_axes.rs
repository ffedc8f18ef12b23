//! Mark dynamic axes on named graph inputs

use tracing::warn;

use crate::error::ExportResult;
use crate::graph::{Dim, JitType, ProgramGraph};
use crate::passes::common::{PassContext, PassResult};
use crate::tensor::normalize_axis;
use crate::traits::GraphPass;

/// Replace the marked dimensions of graph inputs by symbolic dimensions
///
/// Inputs are matched by debug name, so this runs after [`RenameInputs`].
/// Names that match no input are left to the emitter, which applies them to
/// outputs.
///
/// [`RenameInputs`]: crate::passes::RenameInputs
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkDynamicAxes;

impl MarkDynamicAxes {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for MarkDynamicAxes {
    fn name(&self) -> &'static str {
        "MarkDynamicAxes"
    }

    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for (name, axes) in &ctx.options.dynamic_axes {
            let value = match graph
                .inputs()
                .iter()
                .copied()
                .find(|&v| graph.explicit_debug_name(v) == Some(name.as_str()))
            {
                Some(v) => v,
                None => continue,
            };
            let mut tensor = match graph.value_type(value) {
                JitType::Tensor(t) => t.clone(),
                other => {
                    warn!("dynamic axes given for non-tensor input {} ({})", name, other);
                    continue;
                }
            };
            let sizes = match tensor.sizes.as_mut() {
                Some(sizes) => sizes,
                None => continue,
            };
            let rank = sizes.len();
            for (axis, dim_name) in axes.resolve(name) {
                let axis = normalize_axis(axis, rank)?;
                sizes[axis] = Dim::Dynamic(Some(dim_name));
            }
            graph.set_type(value, JitType::Tensor(tensor));
            result.record("input");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{DynamicAxes, ExportOptions};
    use crate::graph::GraphBuilder;
    use crate::tensor::ScalarType;

    #[test]
    fn test_axes_marked() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2, 3]);
        b.output(x);
        let mut g = b.build();

        let opts =
            ExportOptions::default().with_dynamic_axes("x", DynamicAxes::Axes(vec![0]));
        let res = MarkDynamicAxes::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert_eq!(res.rewrites, 1);
        let sizes = g.value_type(x).as_tensor().unwrap().sizes.clone().unwrap();
        assert_eq!(
            sizes,
            vec![Dim::Dynamic(Some("x_dynamic_axes_1".into())), Dim::Static(3)]
        );
    }

    #[test]
    fn test_axis_out_of_range() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        b.output(x);
        let mut g = b.build();

        let opts =
            ExportOptions::default().with_dynamic_axes("x", DynamicAxes::Axes(vec![3]));
        assert!(MarkDynamicAxes::new()
            .run(&mut g, &PassContext::new(&opts))
            .is_err());
    }
}
