use crate::ir::DType;
use crate::script::TensorError;

/// Structural decoding failures.
///
/// Cases that are merely unsupported (an unknown dtype, a non-constant node queried
/// for its literal) are reported as `Ok(None)` rather than through this type.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// An input, output or subgraph index past the end.
    #[error("{what} index {index} is out of range for {element} with {len} entries")]
    IndexOutOfRange {
        /// What was indexed (`input`, `output`, `subgraph`).
        what: &'static str,
        /// Requested index.
        index: usize,
        /// Number of entries available.
        len: usize,
        /// The element that was queried.
        element: String,
    },

    /// A node-only query on a graph or block.
    #[error("{element} is not a node: operator kind and schema are only defined for nodes")]
    NotANode {
        /// The element that was queried.
        element: String,
    },

    /// A node visited as if it were a graph or block.
    #[error("node {kind} has no node list to visit")]
    NotAGraph {
        /// Operator kind of the node.
        kind: String,
    },

    /// Attribute resolution started from a node that isn't `prim::GetAttr`.
    #[error("expected a prim::GetAttr node, got {kind}")]
    NotGetAttr {
        /// Operator kind of the node.
        kind: String,
    },

    /// A member access names an attribute the owner doesn't have.
    #[error("attribute '{name}' not found on {owner}")]
    AttributeNotFound {
        /// Missing member name.
        name: String,
        /// Module name, or the kind of the non-object value stepped through.
        owner: String,
    },

    /// A node lacks an attribute its kind requires.
    #[error("{kind} node has no '{name}' attribute")]
    MissingNodeAttribute {
        /// Operator kind of the node.
        kind: String,
        /// Name of the missing attribute.
        name: &'static str,
    },

    /// A module member read as a constant holds `None`.
    #[error("attribute '{path}' resolved to None")]
    AbsentAttribute {
        /// Dotted member path from the root module.
        path: String,
    },

    /// A list or tuple whose element type must be inferred is empty.
    #[error("Can't deduce type for empty list")]
    EmptyCollection,

    /// A list element has no scalar element type.
    #[error("Can't deduce type for list with {kind} elements")]
    UnsupportedListElement {
        /// Kind of the offending element.
        kind: &'static str,
    },

    /// The root module carries no inlined graph.
    #[error("module {module} has no inlined graph")]
    MissingGraph {
        /// Module name.
        module: String,
    },

    /// The element type has no constant encoding.
    #[error("element type {dtype:?} can't back a constant")]
    UnsupportedDType {
        /// The element type.
        dtype: DType,
    },

    /// An integer doesn't fit the constant's element type.
    #[error("value {value} doesn't fit in a {dtype:?} constant")]
    IntegerOverflow {
        /// The integer.
        value: i64,
        /// The declared element type.
        dtype: DType,
    },

    /// Tensor storage can't be viewed or copied.
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// An error raised while decoding a specific graph element.
    #[error("{element}: {source}")]
    InElement {
        /// The element being decoded.
        element: String,
        /// The underlying failure.
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// The error without the graph elements it was raised under.
    pub fn root_cause(&self) -> &DecodeError {
        match self {
            DecodeError::InElement { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Attach the element being decoded, unless the error already names it.
    pub(crate) fn within(self, element: impl FnOnce() -> String) -> DecodeError {
        match self {
            DecodeError::IndexOutOfRange { .. }
            | DecodeError::NotANode { .. }
            | DecodeError::NotAGraph { .. }
            | DecodeError::NotGetAttr { .. }
            | DecodeError::MissingGraph { .. }
            | DecodeError::InElement { .. } => self,
            other => DecodeError::InElement {
                element: element(),
                source: Box::new(other),
            },
        }
    }
}
