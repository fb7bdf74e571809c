use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use crate::attribute::{attribute_path, resolve_get_attr};
use crate::config::DecoderConfig;
use crate::constant_builder::ConstantBuilder;
use crate::decoder_store::DecoderStore;
use crate::error::DecodeError;
use crate::ir::{Constant, DecoderType, PartialShape, element_type};
use crate::script::{
    BlockId, GET_ATTR_KIND, IValue, NodeData, NodeId, ScriptGraph, ScriptModule, ScriptType,
    ValueData, ValueId,
};
use crate::type_resolver::{transpose_order, value_shape, value_type};

/// The part of a graph a decoder is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphElement {
    /// The whole inlined graph.
    Graph,
    /// A nested block of a control-flow node.
    Block(BlockId),
    /// A single operation.
    Node(NodeId),
}

/// Read-only view of one graph element, as consumed by an IR builder.
///
/// The root decoder is built from a module with an inlined graph. Every decoder it
/// hands out (through [`visit_subgraph`](Self::visit_subgraph) or
/// [`get_subgraph_decoder`](Self::get_subgraph_decoder)) is retained by the decoder
/// that created it, so children stay valid as long as the root is alive.
pub struct GraphDecoder {
    graph: Rc<ScriptGraph>,
    module: Rc<ScriptModule>,
    element: GraphElement,
    raw_inputs: Vec<ValueId>,
    raw_outputs: Vec<ValueId>,
    constants: ConstantBuilder,
    children: RefCell<DecoderStore>,
}

impl GraphDecoder {
    /// Decoder over the module's inlined graph, with default settings.
    pub fn new(module: Rc<ScriptModule>) -> Result<Self, DecodeError> {
        Self::with_config(module, DecoderConfig::default())
    }

    /// Decoder over the module's inlined graph.
    ///
    /// Fails with [`DecodeError::MissingGraph`] when the module carries no graph.
    pub fn with_config(module: Rc<ScriptModule>, config: DecoderConfig) -> Result<Self, DecodeError> {
        let graph = module
            .inlined_graph()
            .cloned()
            .ok_or_else(|| DecodeError::MissingGraph {
                module: module.name().to_string(),
            })?;

        Ok(Self::positioned(
            graph,
            module,
            GraphElement::Graph,
            ConstantBuilder::new(config),
        ))
    }

    fn positioned(
        graph: Rc<ScriptGraph>,
        module: Rc<ScriptModule>,
        element: GraphElement,
        constants: ConstantBuilder,
    ) -> Self {
        let (raw_inputs, raw_outputs) = match element {
            GraphElement::Graph => {
                let block = graph.block(graph.root());
                (block.inputs().to_vec(), block.outputs().to_vec())
            }
            GraphElement::Block(id) => {
                let block = graph.block(id);
                (block.inputs().to_vec(), block.outputs().to_vec())
            }
            GraphElement::Node(id) => {
                let node = graph.node(id);
                (node.inputs().to_vec(), node.outputs().to_vec())
            }
        };

        Self {
            graph,
            module,
            element,
            raw_inputs,
            raw_outputs,
            constants,
            children: RefCell::new(DecoderStore::new()),
        }
    }

    /// The element this decoder is positioned on.
    pub fn element(&self) -> GraphElement {
        self.element
    }

    /// The whole inlined graph, shared by every decoder of the tree.
    pub fn graph(&self) -> &Rc<ScriptGraph> {
        &self.graph
    }

    /// The root module member accesses resolve against.
    pub fn module(&self) -> &Rc<ScriptModule> {
        &self.module
    }

    /// Settings inherited from the root decoder.
    pub fn config(&self) -> &DecoderConfig {
        self.constants.config()
    }

    /// Unique ids of the inputs, in order.
    pub fn inputs(&self) -> Vec<usize> {
        self.uniques(&self.raw_inputs)
    }

    /// Unique ids of the outputs, in order.
    pub fn outputs(&self) -> Vec<usize> {
        self.uniques(&self.raw_outputs)
    }

    /// Unique id of input `index`.
    pub fn get_input(&self, index: usize) -> Result<usize, DecodeError> {
        Ok(self.raw_input(index)?.unique())
    }

    /// Unique id of output `index`.
    pub fn get_output(&self, index: usize) -> Result<usize, DecodeError> {
        Ok(self.raw_output(index)?.unique())
    }

    /// Number of outputs.
    pub fn num_of_outputs(&self) -> usize {
        self.raw_outputs.len()
    }

    /// Static shape of input `index`, see [`value_shape`].
    pub fn get_input_shape(&self, index: usize) -> Result<PartialShape, DecodeError> {
        Ok(value_shape(self.raw_input(index)?))
    }

    /// Static shape of output `index`.
    pub fn get_output_shape(&self, index: usize) -> Result<PartialShape, DecodeError> {
        Ok(value_shape(self.raw_output(index)?))
    }

    /// Normalized type of input `index`.
    pub fn get_input_type(&self, index: usize) -> Result<DecoderType, DecodeError> {
        Ok(value_type(self.raw_input(index)?))
    }

    /// Normalized type of output `index`.
    pub fn get_output_type(&self, index: usize) -> Result<DecoderType, DecodeError> {
        Ok(value_type(self.raw_output(index)?))
    }

    /// Axes of input `index` by descending stride, see [`transpose_order`].
    pub fn get_input_transpose_order(&self, index: usize) -> Result<Vec<usize>, DecodeError> {
        Ok(transpose_order(self.raw_input(index)?))
    }

    /// Axes of output `index` by descending stride.
    pub fn get_output_transpose_order(&self, index: usize) -> Result<Vec<usize>, DecodeError> {
        Ok(transpose_order(self.raw_output(index)?))
    }

    /// Operator kind, e.g. `aten::conv2d`.
    pub fn get_op_type(&self) -> Result<&str, DecodeError> {
        Ok(self.node()?.kind())
    }

    /// Operator schema, when the frontend recorded one.
    pub fn get_schema(&self) -> Result<Option<&str>, DecodeError> {
        Ok(self.node()?.schema())
    }

    /// Number of nested blocks; 0 unless positioned on a node.
    pub fn get_subgraph_size(&self) -> usize {
        self.blocks().len()
    }

    /// Decoder over nested block `index`. The child is retained by `self`.
    pub fn get_subgraph_decoder(&self, index: usize) -> Result<Rc<GraphDecoder>, DecodeError> {
        let blocks = self.blocks();
        let block = blocks
            .get(index)
            .copied()
            .ok_or_else(|| DecodeError::IndexOutOfRange {
                what: "subgraph",
                index,
                len: blocks.len(),
                element: self.describe(),
            })?;

        Ok(self.spawn(GraphElement::Block(block)))
    }

    /// Hand a decoder for every node to `visitor`, in topological order.
    ///
    /// Each child is retained by `self` before the visitor runs. The first visitor
    /// error stops the walk.
    pub fn visit_subgraph<F, E>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(Rc<GraphDecoder>) -> Result<(), E>,
        E: From<DecodeError>,
    {
        let block = match self.element {
            GraphElement::Graph => self.graph.root(),
            GraphElement::Block(id) => id,
            GraphElement::Node(id) => {
                return Err(DecodeError::NotAGraph {
                    kind: self.graph.node(id).kind().to_string(),
                }
                .into());
            }
        };

        for node in self.graph.block(block).nodes() {
            log::debug!("Decoding node {}", self.graph.node(*node).kind());
            visitor(self.spawn(GraphElement::Node(*node)))?;
        }

        Ok(())
    }

    /// Literal produced by a `prim::Constant` node.
    ///
    /// Returns `Ok(None)` for any other element, and for constants whose value has
    /// no constant representation.
    pub fn as_constant(&self) -> Result<Option<Constant>, DecodeError> {
        let Some((output, value)) = self.constant() else {
            return Ok(None);
        };
        self.materialize(output, &value)
            .map_err(|err| err.within(|| self.describe()))
    }

    /// Literal of a string constant.
    pub fn as_string(&self) -> Option<String> {
        match self.constant()? {
            (output, IValue::String(value)) if matches!(output.ty(), Some(ScriptType::Str)) => Some(value),
            _ => None,
        }
    }

    /// Materialize the module member read by a `prim::GetAttr` node.
    ///
    /// A sub-module gives `Ok(None)`; it is decoded through its own methods, not as
    /// a constant. Failures past the node kind check name the node and its path.
    pub fn try_decode_get_attr(&self) -> Result<Option<Constant>, DecodeError> {
        let node = self.node_id()?;
        self.member(node)
            .map_err(|err| err.within(|| self.describe()))
    }

    /// Whether input `index` is absent.
    ///
    /// True when `index` is past the last input, when the input is typed
    /// `NoneType`, or when it is read from a module member holding `None`.
    pub fn input_is_none(&self, index: usize) -> Result<bool, DecodeError> {
        let Some(input) = self.raw_inputs.get(index) else {
            return Ok(true);
        };
        let value = self.graph.value(*input);
        if matches!(value.ty(), Some(ScriptType::NoneType)) {
            return Ok(true);
        }

        match value.producer() {
            Some(producer) if self.graph.node(producer).kind() == GET_ATTR_KIND => {
                resolve_get_attr(&self.graph, producer, &self.module)
                    .map(|member| member.is_none())
                    .map_err(|err| err.within(|| self.describe_node(producer)))
            }
            _ => Ok(false),
        }
    }

    /// Number of child decoders kept alive by this decoder.
    pub fn owned_decoders(&self) -> usize {
        self.children.borrow().len()
    }

    /// Dispatch a constant literal on the declared type of its output.
    fn materialize(&self, output: &ValueData, value: &IValue) -> Result<Option<Constant>, DecodeError> {
        match output.ty() {
            Some(ScriptType::Tensor(tensor)) if tensor.is_complete() => {
                let declared = tensor.dtype.map(|dtype| dtype.to_string());
                if declared.as_deref().and_then(element_type).is_none() {
                    log::debug!("Constant tensor of {declared:?} has no element type");
                    return Ok(None);
                }
                match value {
                    IValue::Tensor(script) => {
                        if tensor.dtype != Some(script.dtype()) {
                            log::warn!(
                                "Constant declared as {declared:?} holds a {} tensor",
                                script.dtype()
                            );
                        }
                        match element_type(&script.dtype().to_string()) {
                            Some(dtype) => self.constants.from_tensor(script, dtype).map(Some),
                            None => Ok(None),
                        }
                    }
                    other => self.constants.from_ivalue(other),
                }
            }
            Some(ScriptType::List(element)) => match value {
                IValue::List(items) => self.constants.from_list(items, element),
                other => self.constants.from_ivalue(other),
            },
            _ => self.constants.from_ivalue(value),
        }
    }

    fn member(&self, node: NodeId) -> Result<Option<Constant>, DecodeError> {
        match resolve_get_attr(&self.graph, node, &self.module)? {
            IValue::None => Err(DecodeError::AbsentAttribute {
                path: attribute_path(&self.graph, node)?.join("."),
            }),
            IValue::Object(_) => Ok(None),
            value => self.constants.from_ivalue(&value),
        }
    }

    /// Create a child decoder and retain it.
    fn spawn(&self, element: GraphElement) -> Rc<GraphDecoder> {
        let child = Rc::new(Self::positioned(
            self.graph.clone(),
            self.module.clone(),
            element,
            self.constants.clone(),
        ));
        self.children.borrow_mut().retain(child.clone());
        child
    }

    fn node_id(&self) -> Result<NodeId, DecodeError> {
        match self.element {
            GraphElement::Node(id) => Ok(id),
            _ => Err(DecodeError::NotANode {
                element: self.describe(),
            }),
        }
    }

    fn node(&self) -> Result<&NodeData, DecodeError> {
        Ok(self.graph.node(self.node_id()?))
    }

    fn blocks(&self) -> &[BlockId] {
        match self.element {
            GraphElement::Node(id) => self.graph.node(id).blocks(),
            _ => &[],
        }
    }

    /// The first output and its literal, when positioned on a `prim::Constant`.
    fn constant(&self) -> Option<(&ValueData, IValue)> {
        let output = *self.node().ok()?.outputs().first()?;
        let value = self.graph.constant_value(output)?;
        Some((self.graph.value(output), value))
    }

    fn raw_input(&self, index: usize) -> Result<&ValueData, DecodeError> {
        self.raw_value("input", &self.raw_inputs, index)
    }

    fn raw_output(&self, index: usize) -> Result<&ValueData, DecodeError> {
        self.raw_value("output", &self.raw_outputs, index)
    }

    fn raw_value(&self, what: &'static str, ids: &[ValueId], index: usize) -> Result<&ValueData, DecodeError> {
        let id = ids.get(index).ok_or_else(|| DecodeError::IndexOutOfRange {
            what,
            index,
            len: ids.len(),
            element: self.describe(),
        })?;
        Ok(self.graph.value(*id))
    }

    fn uniques(&self, ids: &[ValueId]) -> Vec<usize> {
        ids.iter().map(|id| self.graph.value(*id).unique()).collect()
    }

    fn describe(&self) -> String {
        match self.element {
            GraphElement::Graph => format!("graph of {}", self.module.name()),
            GraphElement::Block(id) => format!("block {} of {}", id.0, self.module.name()),
            GraphElement::Node(id) => self.describe_node(id),
        }
    }

    /// Node kind and module, plus the member path for GetAttr nodes.
    fn describe_node(&self, id: NodeId) -> String {
        let kind = self.graph.node(id).kind();
        let module = self.module.name();
        match attribute_path(&self.graph, id) {
            Ok(path) => format!("node {kind} `{}` in {module}", path.join(".")),
            Err(_) => format!("node {kind} in {module}"),
        }
    }
}

impl fmt::Debug for GraphDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDecoder")
            .field("element", &self.describe())
            .field("inputs", &self.inputs())
            .field("outputs", &self.outputs())
            .field("owned_decoders", &self.owned_decoders())
            .finish()
    }
}
