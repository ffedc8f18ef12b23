//! Export options
//!
//! One immutable [`ExportOptions`] value is threaded by reference through
//! every stage of an export. Nothing is stored in globals.

use indexmap::IndexMap;

use crate::error::{ExportError, ExportResult};
use crate::opset::{OperatorExportType, DEFAULT_OPSET};
use crate::trace::TraceOptions;
use crate::{SUPPORTED_OPSET_MAX, SUPPORTED_OPSET_MIN};

/// Training mode of the exported graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    /// Inference graph: dropout and similar ops are removed
    Eval,
    /// Keep whatever mode the traced ops were recorded in
    Preserve,
    /// Training graph: dropout is kept
    Train,
}

/// Dynamic axes of one named input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicAxes {
    /// Axis indices; names are generated as `<value>_dynamic_axes_<k>`
    Axes(Vec<i64>),
    /// Axis index to symbolic name
    Named(IndexMap<i64, String>),
}

impl DynamicAxes {
    /// Axis index and symbolic dimension name pairs for `value_name`
    pub fn resolve(&self, value_name: &str) -> Vec<(i64, String)> {
        match self {
            DynamicAxes::Axes(axes) => axes
                .iter()
                .enumerate()
                .map(|(k, &axis)| (axis, format!("{}_dynamic_axes_{}", value_name, k + 1)))
                .collect(),
            DynamicAxes::Named(named) => named
                .iter()
                .map(|(&axis, name)| (axis, name.clone()))
                .collect(),
        }
    }
}

/// Options of one export
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Target opset of the default domain
    pub opset_version: i64,
    /// Re-run and compare the trace
    pub check_trace: bool,
    /// Strict tracing (no mutable containers in outputs)
    pub strict_trace: bool,
    /// Log intermediate graphs and attach them to the model doc string
    pub verbose: bool,
    /// Omit every doc string from the model
    pub strip_doc_string: bool,
    /// Run constant propagation in the optimizer pipeline
    pub constant_propagation: bool,
    /// Run the validator on the finished model
    pub enable_checker: bool,
    /// Let the validator infer intermediate value shapes
    pub shape_inference: bool,
    /// Treat inference warnings as errors
    pub strict_mode: bool,
    /// Check operand types during validation
    pub check_type: bool,
    /// Propagate constant shape data during inference
    pub data_prop: bool,
    /// Names for the (non-self) graph inputs
    pub input_names: Option<Vec<String>>,
    /// Names for the graph outputs
    pub output_names: Option<Vec<String>>,
    /// Fold constant subgraphs after lowering
    pub do_constant_folding: bool,
    /// How operators without an ONNX lowering are exported
    pub operator_export_type: OperatorExportType,
    /// Training mode, `None` for the exporter default (eval)
    pub training_mode: Option<TrainingMode>,
    /// Dynamic axes by input or output name
    pub dynamic_axes: IndexMap<String, DynamicAxes>,
    /// Opset versions of custom domains
    pub custom_opsets: IndexMap<String, i64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            opset_version: DEFAULT_OPSET,
            check_trace: false,
            strict_trace: true,
            verbose: false,
            strip_doc_string: false,
            constant_propagation: true,
            enable_checker: true,
            shape_inference: true,
            strict_mode: false,
            check_type: false,
            data_prop: true,
            input_names: None,
            output_names: None,
            do_constant_folding: true,
            operator_export_type: OperatorExportType::Onnx,
            training_mode: None,
            dynamic_axes: IndexMap::new(),
            custom_opsets: IndexMap::new(),
        }
    }
}

impl ExportOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target opset
    pub fn with_opset(mut self, version: i64) -> Self {
        self.opset_version = version;
        self
    }

    /// Enable verbose logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Strip doc strings
    pub fn with_strip_doc_string(mut self, strip: bool) -> Self {
        self.strip_doc_string = strip;
        self
    }

    /// Toggle constant propagation before lowering
    pub fn with_constant_propagation(mut self, enabled: bool) -> Self {
        self.constant_propagation = enabled;
        self
    }

    /// Toggle constant folding after lowering
    pub fn with_constant_folding(mut self, enabled: bool) -> Self {
        self.do_constant_folding = enabled;
        self
    }

    /// Toggle the validator
    pub fn with_checker(mut self, enabled: bool) -> Self {
        self.enable_checker = enabled;
        self
    }

    /// Name the graph inputs
    pub fn with_input_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Name the graph outputs
    pub fn with_output_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.output_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the operator export type
    pub fn with_operator_export_type(mut self, export_type: OperatorExportType) -> Self {
        self.operator_export_type = export_type;
        self
    }

    /// Set the training mode
    pub fn with_training_mode(mut self, mode: TrainingMode) -> Self {
        self.training_mode = Some(mode);
        self
    }

    /// Mark dynamic axes of an input or output
    pub fn with_dynamic_axes(mut self, name: &str, axes: DynamicAxes) -> Self {
        self.dynamic_axes.insert(name.to_string(), axes);
        self
    }

    /// Set the opset version of a custom domain
    pub fn with_custom_opset(mut self, domain: &str, version: i64) -> Self {
        self.custom_opsets.insert(domain.to_string(), version);
        self
    }

    /// Effective training mode
    pub fn training(&self) -> TrainingMode {
        self.training_mode.unwrap_or(TrainingMode::Eval)
    }

    /// Tracer settings derived from these options
    pub fn trace_options(&self) -> TraceOptions {
        TraceOptions {
            check_trace: self.check_trace,
            strict: self.strict_trace,
            force_outplace: false,
        }
    }

    /// Whether doc strings are emitted
    pub fn keep_doc_strings(&self) -> bool {
        !self.strip_doc_string
    }

    /// Check option consistency
    pub fn validate(&self) -> ExportResult<()> {
        if !(SUPPORTED_OPSET_MIN..=SUPPORTED_OPSET_MAX).contains(&self.opset_version) {
            return Err(ExportError::UnsupportedOpset {
                version: self.opset_version,
                min: SUPPORTED_OPSET_MIN,
                max: SUPPORTED_OPSET_MAX,
            });
        }
        for (domain, &version) in &self.custom_opsets {
            if domain.is_empty() || version < 1 {
                return Err(ExportError::Internal(format!(
                    "invalid custom opset {:?} version {}",
                    domain, version
                )));
            }
        }
        Ok(())
    }
}
