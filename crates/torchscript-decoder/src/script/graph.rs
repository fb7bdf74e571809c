//! Arena representation of an inlined TorchScript graph
//!
//! Nodes, values and blocks live in flat vectors and refer to each other by id.
//! The graph itself is the root block. Node order inside a block is the order the
//! scripting frontend emitted, which is topological.

use core::fmt;

use super::ivalue::IValue;
use super::types::ScriptType;

/// Operator kind of literal nodes.
pub const CONSTANT_KIND: &str = "prim::Constant";
/// Operator kind of module member accesses.
pub const GET_ATTR_KIND: &str = "prim::GetAttr";

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Index of a value in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) usize);

/// Index of a block in its graph. The graph body is a block too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

/// A value flowing between nodes.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub(crate) unique: usize,
    pub(crate) debug_name: Option<String>,
    pub(crate) ty: Option<ScriptType>,
    pub(crate) producer: Option<NodeId>,
}

impl ValueData {
    /// Unique debug id, stable for the lifetime of the graph.
    pub fn unique(&self) -> usize {
        self.unique
    }

    /// Name given in the source, if any.
    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    /// Declared type, `None` when the frontend could not describe it.
    pub fn ty(&self) -> Option<&ScriptType> {
        self.ty.as_ref()
    }

    /// Node producing this value; `None` for block parameters.
    pub fn producer(&self) -> Option<NodeId> {
        self.producer
    }

    /// Whether this is a tensor with known dtype and every extent known.
    pub fn is_complete_tensor(&self) -> bool {
        matches!(&self.ty, Some(ScriptType::Tensor(tensor)) if tensor.is_complete())
    }
}

/// One operator application.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub(crate) kind: String,
    pub(crate) schema: Option<String>,
    pub(crate) inputs: Vec<ValueId>,
    pub(crate) outputs: Vec<ValueId>,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) attributes: Vec<(String, IValue)>,
}

impl NodeData {
    /// Operator kind, such as `aten::add`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Operator signature, absent for primitive nodes.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Consumed values, in argument order.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Produced values.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Nested blocks, such as the branches of `prim::If`.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Node attribute by name.
    pub fn attr(&self, name: &str) -> Option<&IValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// String attribute, as `node.s(name)`.
    pub fn s(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(IValue::as_str)
    }
}

/// A sequence of nodes with its own parameters and results.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub(crate) inputs: Vec<ValueId>,
    pub(crate) outputs: Vec<ValueId>,
    pub(crate) nodes: Vec<NodeId>,
}

impl BlockData {
    /// Block parameters.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Values returned by the block.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

/// An inlined graph. Build one with [`GraphBuilder`](super::GraphBuilder).
#[derive(Debug, Clone)]
pub struct ScriptGraph {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) values: Vec<ValueData>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) root: BlockId,
}

impl ScriptGraph {
    /// The graph body.
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// # Panics
    ///
    /// If `id` belongs to another graph.
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    /// # Panics
    ///
    /// If `id` belongs to another graph.
    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0]
    }

    /// # Panics
    ///
    /// If `id` belongs to another graph.
    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0]
    }

    /// Literal held by a value produced by `prim::Constant`.
    ///
    /// A constant node without a `value` attribute holds `None`.
    pub fn constant_value(&self, id: ValueId) -> Option<IValue> {
        let producer = self.node(self.value(id).producer?);
        if producer.kind != CONSTANT_KIND {
            return None;
        }
        Some(producer.attr("value").cloned().unwrap_or(IValue::None))
    }

    fn value_name(&self, id: ValueId) -> String {
        let value = self.value(id);
        match &value.debug_name {
            Some(name) => format!("%{name}"),
            None => format!("%{}", value.unique),
        }
    }

    fn value_list(&self, ids: &[ValueId]) -> String {
        ids.iter()
            .map(|id| self.value_name(*id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: BlockId, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        for node_id in self.block(block).nodes() {
            let node = self.node(*node_id);
            let outputs = node
                .outputs
                .iter()
                .map(|id| {
                    let ty = self.value(*id).ty.as_ref().map(ToString::to_string);
                    format!("{} : {}", self.value_name(*id), ty.as_deref().unwrap_or("?"))
                })
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                f,
                "{indent}{outputs} = {}({})",
                node.kind,
                self.value_list(&node.inputs)
            )?;
            for (i, nested) in node.blocks.iter().enumerate() {
                let params = self.value_list(self.block(*nested).inputs());
                writeln!(f, "{indent}  block{i}({params}):")?;
                self.fmt_block(f, *nested, depth + 2)?;
            }
        }
        writeln!(
            f,
            "{indent}-> ({})",
            self.value_list(self.block(block).outputs())
        )
    }
}

impl fmt::Display for ScriptGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.value_list(self.block(self.root).inputs());
        writeln!(f, "graph({params}):")?;
        self.fmt_block(f, self.root, 1)
    }
}
