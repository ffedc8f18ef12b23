//! Opset tables
//!
//! Operator export modes, supported opset ranges, the opset to IR version
//! table and the mapping from node kinds to ONNX domains.
//!
//! | Opset | IR version |
//! |-------|------------|
//! | ..=8  | 3 |
//! | 9     | 4 |
//! | 10    | 5 |
//! | 11    | 6 |
//! | 12-14 | 7 |
//! | 15-18 | 8 |
//! | 19-20 | 9 |
//! | 21    | 10 |

use std::ops::RangeInclusive;

use indexmap::{IndexMap, IndexSet};

use crate::proto::extensions::make_opsetid;
use crate::proto::OperatorSetIdProto;

/// Default ONNX domain identifier
pub const ONNX_DOMAIN: &str = "";

/// Domain of native-op fallback nodes
pub const ATEN_DOMAIN: &str = "org.pytorch.aten";

/// Kind of native-op fallback nodes
pub const ATEN_FALLBACK_KIND: &str = "org.pytorch.aten::ATen";

/// Opset used when none is configured
pub const DEFAULT_OPSET: i64 = 12;

/// Opsets the constant folder supports
pub const CONSTANT_FOLDING_OPSETS: RangeInclusive<i64> = 9..=17;

/// How operators without an ONNX lowering are exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatorExportType {
    /// Standard ONNX ops only; missing lowerings are an error
    #[default]
    Onnx,
    /// Standard ONNX ops, falling back to ATen nodes for missing lowerings
    OnnxAtenFallback,
    /// Every operator becomes an ATen node
    OnnxAten,
    /// Every operator passes through as an ATen node untouched
    OnnxFallthrough,
}

impl OperatorExportType {
    /// Whether every node is exported as a native op, regardless of lookup
    pub fn always_native(self) -> bool {
        matches!(
            self,
            OperatorExportType::OnnxAten | OperatorExportType::OnnxFallthrough
        )
    }

    /// Whether a failed lookup may fall back to a native op
    pub fn allows_fallback(self) -> bool {
        self != OperatorExportType::Onnx
    }
}

/// IR version matching an opset
pub fn ir_version_for_opset(opset: i64) -> i64 {
    match opset {
        i64::MIN..=8 => 3,
        9 => 4,
        10 => 5,
        11 => 6,
        12..=14 => 7,
        15..=18 => 8,
        19..=20 => 9,
        _ => 10,
    }
}

/// Whether constant folding is available at this opset
pub fn supports_constant_folding(opset: i64) -> bool {
    CONSTANT_FOLDING_OPSETS.contains(&opset)
}

/// ONNX domain for a node kind
///
/// Namespaces that look like domains (contain a dot) are used verbatim;
/// `onnx`, `aten` and `prim` map to the default domain.
pub fn domain_of_kind(kind: &str) -> &str {
    match kind.split_once("::") {
        Some((ns, _)) if ns.contains('.') => ns,
        _ => ONNX_DOMAIN,
    }
}

/// Operator type for a node kind (the part after `::`)
pub fn op_type_of_kind(kind: &str) -> &str {
    kind.rsplit("::").next().unwrap_or(kind)
}

/// Opset imports for the default domain plus every custom domain in use
///
/// Custom domains take their version from `custom_opsets`, defaulting to 1.
pub fn opset_imports<'a>(
    opset: i64,
    used_domains: impl IntoIterator<Item = &'a str>,
    custom_opsets: &IndexMap<String, i64>,
) -> Vec<OperatorSetIdProto> {
    let mut imports = vec![make_opsetid(ONNX_DOMAIN, opset)];
    let domains: IndexSet<&str> = used_domains
        .into_iter()
        .filter(|d| !d.is_empty())
        .collect();
    for domain in domains {
        let version = custom_opsets.get(domain).copied().unwrap_or(1);
        imports.push(make_opsetid(domain, version));
    }
    imports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ir_version_table() {
        assert_eq!(ir_version_for_opset(7), 3);
        assert_eq!(ir_version_for_opset(9), 4);
        assert_eq!(ir_version_for_opset(11), 6);
        assert_eq!(ir_version_for_opset(12), 7);
        assert_eq!(ir_version_for_opset(13), 7);
        assert_eq!(ir_version_for_opset(17), 8);
        assert_eq!(ir_version_for_opset(21), 10);
    }

    #[test]
    fn test_constant_folding_range() {
        assert!(!supports_constant_folding(8));
        assert!(supports_constant_folding(9));
        assert!(supports_constant_folding(17));
    }

    #[test]
    fn test_domains() {
        assert_eq!(domain_of_kind("onnx::Add"), "");
        assert_eq!(domain_of_kind("prim::ListConstruct"), "");
        assert_eq!(domain_of_kind(ATEN_FALLBACK_KIND), ATEN_DOMAIN);
        assert_eq!(op_type_of_kind("onnx::Add"), "Add");
        assert_eq!(op_type_of_kind(ATEN_FALLBACK_KIND), "ATen");
    }

    #[test]
    fn test_opset_imports() {
        let mut custom = IndexMap::new();
        custom.insert("com.example".to_string(), 3);
        let imports = opset_imports(
            13,
            ["", ATEN_DOMAIN, "com.example", ATEN_DOMAIN],
            &custom,
        );
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].version, 13);
        assert_eq!(imports[1].domain, ATEN_DOMAIN);
        assert_eq!(imports[1].version, 1);
        assert_eq!(imports[2].version, 3);
    }

    #[test]
    fn test_export_type_modes() {
        assert!(!OperatorExportType::Onnx.allows_fallback());
        assert!(OperatorExportType::OnnxAtenFallback.allows_fallback());
        assert!(!OperatorExportType::OnnxAtenFallback.always_native());
        assert!(OperatorExportType::OnnxFallthrough.always_native());
    }
}
