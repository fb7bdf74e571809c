use super::graph::{
    BlockData, BlockId, CONSTANT_KIND, GET_ATTR_KIND, NodeData, NodeId, ScriptGraph, ValueData,
    ValueId,
};
use super::ivalue::IValue;
use super::types::ScriptType;

/// Incrementally assembles a [`ScriptGraph`].
///
/// Nodes are appended to their block in call order, so callers emit producers
/// before consumers.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: ScriptGraph,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// A graph with an empty body.
    pub fn new() -> Self {
        Self {
            graph: ScriptGraph {
                nodes: Vec::new(),
                values: Vec::new(),
                blocks: vec![BlockData::default()],
                root: BlockId(0),
            },
        }
    }

    /// The top-level block.
    pub fn root(&self) -> BlockId {
        self.graph.root
    }

    /// Add a parameter to `block`.
    pub fn add_input(&mut self, block: BlockId, name: &str, ty: ScriptType) -> ValueId {
        let id = self.new_value(Some(ty), None);
        self.graph.values[id.0].debug_name = Some(name.to_string());
        self.graph.blocks[block.0].inputs.push(id);
        id
    }

    /// Append a node to `block`, creating one output per entry of `output_types`.
    pub fn add_node(
        &mut self,
        block: BlockId,
        kind: &str,
        inputs: &[ValueId],
        output_types: Vec<Option<ScriptType>>,
    ) -> NodeId {
        let id = NodeId(self.graph.nodes.len());
        self.graph.nodes.push(NodeData {
            kind: kind.to_string(),
            schema: None,
            inputs: inputs.to_vec(),
            outputs: Vec::new(),
            blocks: Vec::new(),
            attributes: Vec::new(),
        });
        for ty in output_types {
            let output = self.new_value(ty, Some(id));
            self.graph.nodes[id.0].outputs.push(output);
        }
        self.graph.blocks[block.0].nodes.push(id);
        id
    }

    /// Append a node with a single typed output and return that output.
    pub fn add_op(&mut self, block: BlockId, kind: &str, inputs: &[ValueId], ty: ScriptType) -> ValueId {
        let node = self.add_node(block, kind, inputs, vec![Some(ty)]);
        self.output(node, 0)
    }

    /// Append a `prim::Constant`. A `None` literal is stored without a `value` attribute.
    pub fn constant(&mut self, block: BlockId, value: IValue, ty: ScriptType) -> ValueId {
        let node = self.add_node(block, CONSTANT_KIND, &[], vec![Some(ty)]);
        if !value.is_none() {
            self.set_attr(node, "value", value);
        }
        self.output(node, 0)
    }

    /// Append a `prim::GetAttr` reading `name` from `object`.
    pub fn get_attr(&mut self, block: BlockId, object: ValueId, name: &str, ty: ScriptType) -> ValueId {
        let node = self.add_node(block, GET_ATTR_KIND, &[object], vec![Some(ty)]);
        self.set_attr(node, "name", IValue::from(name));
        self.output(node, 0)
    }

    /// Set the operator signature of `node`.
    pub fn set_schema(&mut self, node: NodeId, schema: &str) {
        self.graph.nodes[node.0].schema = Some(schema.to_string());
    }

    /// Add or replace a node attribute.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: IValue) {
        let attributes = &mut self.graph.nodes[node.0].attributes;
        match attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => attributes.push((name.to_string(), value)),
        }
    }

    /// Attach a new nested block to `node`.
    pub fn add_block(&mut self, node: NodeId) -> BlockId {
        let id = BlockId(self.graph.blocks.len());
        self.graph.blocks.push(BlockData::default());
        self.graph.nodes[node.0].blocks.push(id);
        id
    }

    /// Append `value` to the results of `block`.
    pub fn register_output(&mut self, block: BlockId, value: ValueId) {
        self.graph.blocks[block.0].outputs.push(value);
    }

    /// Output `index` of `node`.
    pub fn output(&self, node: NodeId, index: usize) -> ValueId {
        self.graph.nodes[node.0].outputs[index]
    }

    /// Finish the graph.
    pub fn build(self) -> ScriptGraph {
        self.graph
    }

    fn new_value(&mut self, ty: Option<ScriptType>, producer: Option<NodeId>) -> ValueId {
        let id = ValueId(self.graph.values.len());
        self.graph.values.push(ValueData {
            unique: id.0,
            debug_name: None,
            ty,
            producer,
        });
        id
    }
}
