//! Resolution of nested `prim::GetAttr` chains
//!
//! A member access like `self.encoder.layer0.weight` is emitted as one GetAttr per
//! segment, each reading from the previous one. Walking the graph discovers the
//! chain leaf first, so it is collected into a buffer and replayed from the root
//! module outward.

use std::rc::Rc;

use crate::error::DecodeError;
use crate::script::{GET_ATTR_KIND, IValue, NodeId, ScriptGraph, ScriptModule};

/// Resolve the value a GetAttr node reads, starting from `module`.
pub fn resolve_get_attr(
    graph: &ScriptGraph,
    node: NodeId,
    module: &Rc<ScriptModule>,
) -> Result<IValue, DecodeError> {
    let path = attribute_path(graph, node)?;

    let mut current = IValue::Object(module.clone());
    for name in path {
        let next = match &current {
            IValue::Object(object) => object.attr(name).cloned().ok_or_else(|| {
                DecodeError::AttributeNotFound {
                    name: name.to_string(),
                    owner: object.name().to_string(),
                }
            })?,
            other => {
                return Err(DecodeError::AttributeNotFound {
                    name: name.to_string(),
                    owner: other.kind_name().to_string(),
                });
            }
        };
        current = next;
    }

    Ok(current)
}

/// Member names of a GetAttr chain, root first.
pub fn attribute_path(graph: &ScriptGraph, node: NodeId) -> Result<Vec<&str>, DecodeError> {
    let kind = graph.node(node).kind();
    if kind != GET_ATTR_KIND {
        return Err(DecodeError::NotGetAttr {
            kind: kind.to_string(),
        });
    }

    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        let data = graph.node(id);
        if data.kind() != GET_ATTR_KIND {
            break;
        }
        chain.push(data);
        current = data
            .inputs()
            .first()
            .and_then(|input| graph.value(*input).producer());
    }

    chain
        .into_iter()
        .rev()
        .map(|data| {
            data.s("name").ok_or_else(|| DecodeError::MissingNodeAttribute {
                kind: data.kind().to_string(),
                name: "name",
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{GraphBuilder, ScalarType, ScriptTensor, ScriptType, ValueId};

    fn module() -> Rc<ScriptModule> {
        let weight = ScriptTensor::from_vec(vec![0.5f32; 4], &[2, 2], ScalarType::Float).unwrap();
        let layer = ScriptModule::new("__torch__.Linear")
            .with_attribute("weight", weight)
            .with_attribute("bias", IValue::None);
        let encoder = ScriptModule::new("__torch__.Encoder")
            .with_attribute("layer0", Rc::new(layer))
            .with_attribute("depth", 2i64);
        Rc::new(ScriptModule::new("__torch__.Net").with_attribute("encoder", Rc::new(encoder)))
    }

    /// Emits `self.<path[0]>.<path[1]>...` and returns the graph plus the leaf node.
    fn chain(path: &[&str]) -> (ScriptGraph, NodeId) {
        let mut builder = GraphBuilder::new();
        let root = builder.root();
        let mut current: ValueId =
            builder.add_input(root, "self", ScriptType::Class("__torch__.Net".to_string()));
        for name in path {
            current = builder.get_attr(root, current, name, ScriptType::Any);
        }
        let graph = builder.build();
        let leaf = graph.value(current).producer().unwrap();
        (graph, leaf)
    }

    #[test]
    fn path_is_root_first() {
        let (graph, leaf) = chain(&["encoder", "layer0", "weight"]);
        assert_eq!(attribute_path(&graph, leaf).unwrap(), vec!["encoder", "layer0", "weight"]);
    }

    #[test]
    fn resolves_nested_tensor() {
        let (graph, leaf) = chain(&["encoder", "layer0", "weight"]);
        let value = resolve_get_attr(&graph, leaf, &module()).unwrap();
        let tensor = value.as_tensor().expect("tensor attribute");
        assert_eq!(tensor.sizes(), &[2, 2]);
    }

    #[test]
    fn resolves_submodule_and_scalar() {
        let (graph, leaf) = chain(&["encoder", "layer0"]);
        let value = resolve_get_attr(&graph, leaf, &module()).unwrap();
        assert_eq!(value.as_object().unwrap().name(), "__torch__.Linear");

        let (graph, leaf) = chain(&["encoder", "depth"]);
        assert!(matches!(resolve_get_attr(&graph, leaf, &module()).unwrap(), IValue::Int(2)));
    }

    #[test]
    fn none_attribute_resolves_to_none() {
        let (graph, leaf) = chain(&["encoder", "layer0", "bias"]);
        assert!(resolve_get_attr(&graph, leaf, &module()).unwrap().is_none());
    }

    #[test]
    fn missing_segment_fails() {
        let (graph, leaf) = chain(&["encoder", "layer1", "weight"]);
        let err = resolve_get_attr(&graph, leaf, &module()).unwrap_err();
        match err {
            DecodeError::AttributeNotFound { name, owner } => {
                assert_eq!(name, "layer1");
                assert_eq!(owner, "__torch__.Encoder");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn stepping_through_a_leaf_fails() {
        let (graph, leaf) = chain(&["encoder", "depth", "value"]);
        let err = resolve_get_attr(&graph, leaf, &module()).unwrap_err();
        assert!(matches!(err, DecodeError::AttributeNotFound { ref owner, .. } if owner == "int"));
    }

    #[test]
    fn rejects_other_node_kinds() {
        let mut builder = GraphBuilder::new();
        let root = builder.root();
        let one = builder.constant(root, IValue::Int(1), ScriptType::Int);
        let graph = builder.build();
        let node = graph.value(one).producer().unwrap();

        let err = attribute_path(&graph, node).unwrap_err();
        assert!(matches!(err, DecodeError::NotGetAttr { ref kind } if kind == "prim::Constant"));
    }
}
