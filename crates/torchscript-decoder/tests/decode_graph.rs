use std::rc::Rc;

use bytes::BytesMut;
use torchscript_decoder::script::{
    GraphBuilder, IValue, ScalarType, ScriptModule, ScriptTensor, ScriptType, TensorType,
    contiguous_strides,
};
use torchscript_decoder::{
    Constant, DType, DecodeError, DecoderConfig, DecoderType, GraphDecoder, MaterializePath,
    PartialShape,
};

fn tensor(dtype: ScalarType, sizes: &[usize]) -> ScriptType {
    ScriptType::Tensor(TensorType::complete(dtype, sizes))
}

fn linear() -> ScriptModule {
    let weight = ScriptTensor::from_vec(vec![0.5f32, -0.5, 1.0, -1.0, 2.0, -2.0], &[2, 3], ScalarType::Float).unwrap();
    ScriptModule::new("__torch__.Linear")
        .with_attribute("weight", weight)
        .with_attribute("bias", IValue::None)
        .with_attribute("scale", 0.5)
}

/// ```text
/// graph(%self, %x, %mask):
///   %w = prim::GetAttr[name="weight"](prim::GetAttr[name="fc"](%self))
///   %b = prim::GetAttr[name="bias"](prim::GetAttr[name="fc"](%self))
///   %y = aten::linear(%x, %w, %b)
///   %flag = prim::Constant[value=1]()
///   %out = prim::If(%flag)
///     block0(): -> aten::relu(%y)
///     block1(): -> %y
///   -> (%out)
/// ```
fn model() -> Rc<ScriptModule> {
    let mut builder = GraphBuilder::new();
    let root = builder.root();
    let this = builder.add_input(root, "self", ScriptType::Class("__torch__.Net".to_string()));
    let x = builder.add_input(root, "x", tensor(ScalarType::Float, &[4, 3]));
    builder.add_input(root, "mask", ScriptType::NoneType);

    let fc = builder.get_attr(root, this, "fc", ScriptType::Class("__torch__.Linear".to_string()));
    let weight = builder.get_attr(root, fc, "weight", tensor(ScalarType::Float, &[2, 3]));
    let fc_again = builder.get_attr(root, this, "fc", ScriptType::Class("__torch__.Linear".to_string()));
    let bias = builder.get_attr(root, fc_again, "bias", ScriptType::optional(ScriptType::Tensor(TensorType::unranked())));

    let linear_node = builder.add_node(
        root,
        "aten::linear",
        &[x, weight, bias],
        vec![Some(tensor(ScalarType::Float, &[4, 2]))],
    );
    builder.set_schema(linear_node, "aten::linear(Tensor input, Tensor weight, Tensor? bias=None) -> Tensor");
    let y = builder.output(linear_node, 0);

    let flag = builder.constant(root, IValue::Bool(true), ScriptType::Bool);
    let branch = builder.add_node(root, "prim::If", &[flag], vec![Some(tensor(ScalarType::Float, &[4, 2]))]);
    let then_block = builder.add_block(branch);
    let relu = builder.add_op(then_block, "aten::relu", &[y], tensor(ScalarType::Float, &[4, 2]));
    builder.register_output(then_block, relu);
    let else_block = builder.add_block(branch);
    builder.register_output(else_block, y);

    let out = builder.output(branch, 0);
    builder.register_output(root, out);

    let net = ScriptModule::new("__torch__.Net")
        .with_attribute("fc", Rc::new(linear()))
        .with_graph(builder.build());
    Rc::new(net)
}

/// Visit every node, descending into nested blocks, and record op kinds in order.
fn walk(decoder: &GraphDecoder, kinds: &mut Vec<String>) -> Result<(), DecodeError> {
    decoder.visit_subgraph(|node| {
        kinds.push(node.get_op_type()?.to_string());
        for index in 0..node.get_subgraph_size() {
            let block = node.get_subgraph_decoder(index)?;
            walk(&block, kinds)?;
        }
        Ok(())
    })
}

fn node(decoder: &GraphDecoder, index: usize) -> Rc<GraphDecoder> {
    let mut nodes = Vec::new();
    decoder
        .visit_subgraph(|node| {
            nodes.push(node);
            Ok::<_, DecodeError>(())
        })
        .unwrap();
    nodes.swap_remove(index)
}

#[test]
fn walks_nested_blocks_in_topological_order() {
    let decoder = GraphDecoder::new(model()).unwrap();
    let mut kinds = Vec::new();
    walk(&decoder, &mut kinds).unwrap();

    assert_eq!(
        kinds,
        vec![
            "prim::GetAttr",
            "prim::GetAttr",
            "prim::GetAttr",
            "prim::GetAttr",
            "aten::linear",
            "prim::Constant",
            "prim::If",
            "aten::relu",
        ]
    );
    assert_eq!(decoder.owned_decoders(), 7);
}

#[test]
fn control_flow_blocks_expose_their_outputs() {
    let decoder = GraphDecoder::new(model()).unwrap();
    let branch = node(&decoder, 6);

    assert_eq!(branch.get_op_type().unwrap(), "prim::If");
    assert_eq!(branch.get_subgraph_size(), 2);

    let then_block = branch.get_subgraph_decoder(0).unwrap();
    let else_block = branch.get_subgraph_decoder(1).unwrap();
    assert!(then_block.inputs().is_empty());
    let linear = node(&decoder, 4);
    assert_eq!(else_block.outputs(), vec![linear.get_output(0).unwrap()]);
    assert_eq!(
        then_block.get_output_shape(0).unwrap(),
        PartialShape::Static(vec![4, 2])
    );
    assert!(matches!(then_block.get_op_type(), Err(DecodeError::NotANode { .. })));
    assert_eq!(then_block.get_subgraph_size(), 0);
    assert_eq!(branch.owned_decoders(), 2);

    let err = branch.get_subgraph_decoder(2).unwrap_err();
    assert!(matches!(err, DecodeError::IndexOutOfRange { what: "subgraph", index: 2, len: 2, .. }));
}

#[test]
fn repeated_queries_are_stable() {
    let decoder = GraphDecoder::new(model()).unwrap();
    assert_eq!(decoder.inputs(), decoder.inputs());
    assert_eq!(decoder.outputs(), decoder.outputs());
    assert_eq!(decoder.get_input_type(1).unwrap(), decoder.get_input_type(1).unwrap());

    let linear = node(&decoder, 4);
    assert_eq!(linear.inputs(), linear.inputs());
    assert_eq!(linear.get_schema().unwrap(), linear.get_schema().unwrap());
    assert_eq!(
        linear.get_output_type(0).unwrap(),
        DecoderType::tensor_of(DecoderType::Element(DType::F32))
    );
}

#[test]
fn none_inputs_are_detected_three_ways() {
    let decoder = GraphDecoder::new(model()).unwrap();

    // Typed NoneType.
    assert!(decoder.input_is_none(2).unwrap());
    // Past the last input.
    assert!(decoder.input_is_none(3).unwrap());
    assert!(!decoder.input_is_none(1).unwrap());

    // Read from a module member holding None.
    let linear = node(&decoder, 4);
    assert!(!linear.input_is_none(0).unwrap());
    assert!(!linear.input_is_none(1).unwrap());
    assert!(linear.input_is_none(2).unwrap());
}

#[test]
fn get_attr_nodes_decode_module_members() {
    let decoder = GraphDecoder::new(model()).unwrap();

    let fc = node(&decoder, 0);
    assert!(fc.try_decode_get_attr().unwrap().is_none());

    let weight = node(&decoder, 1).try_decode_get_attr().unwrap().unwrap();
    assert_eq!(weight.dtype(), DType::F32);
    assert_eq!(weight.shape(), &[2, 3]);
    assert_eq!(weight.path(), MaterializePath::ZeroCopy);

    let err = node(&decoder, 3).try_decode_get_attr().unwrap_err();
    assert!(matches!(err.root_cause(), DecodeError::AbsentAttribute { path } if path == "fc.bias"));
    assert!(err.to_string().contains("__torch__.Net"));

    let err = node(&decoder, 4).try_decode_get_attr().unwrap_err();
    assert!(matches!(err, DecodeError::NotGetAttr { ref kind } if kind == "aten::linear"));
}

#[test]
fn constants_outlive_their_decoders() {
    let constant: Constant = {
        let decoder = GraphDecoder::new(model()).unwrap();
        let weight = node(&decoder, 1);
        weight.try_decode_get_attr().unwrap().unwrap()
    };

    assert!(constant.is_zero_copy());
    assert_eq!(constant.to_f64_vec().unwrap(), vec![0.5, -0.5, 1.0, -1.0, 2.0, -2.0]);
}

#[test]
fn children_outlive_the_visitor() {
    let decoder = GraphDecoder::new(model()).unwrap();
    let flag = node(&decoder, 5);
    assert_eq!(decoder.owned_decoders(), 7);

    // One strong reference held here, one by the root.
    assert_eq!(Rc::strong_count(&flag), 2);
    let value = flag.as_constant().unwrap().unwrap();
    assert_eq!(value.dtype(), DType::Bool);
}

#[test]
fn misaligned_constant_matches_aligned_one() {
    let values = [1.5f32, 2.5, -3.5, 4.5];
    let aligned = ScriptTensor::from_vec(values.to_vec(), &[2, 2], ScalarType::Float).unwrap();

    let mut buffer = BytesMut::zeroed(values.len() * 4 + 1);
    let skip = (buffer.as_ptr() as usize % 4 == 0) as usize;
    buffer[skip..skip + 16].copy_from_slice(bytemuck::cast_slice(&values));
    let storage = buffer.freeze().slice(skip..skip + 16);
    let misaligned =
        ScriptTensor::from_storage(storage, ScalarType::Float, &[2, 2], &contiguous_strides(&[2, 2]), 0).unwrap();

    let decode = |tensor: ScriptTensor| {
        let mut builder = GraphBuilder::new();
        let root = builder.root();
        builder.constant(root, IValue::Tensor(tensor), tensor_type_2x2());
        let module = Rc::new(ScriptModule::new("__torch__.Consts").with_graph(builder.build()));
        let decoder = GraphDecoder::with_config(module, DecoderConfig::new()).unwrap();
        node(&decoder, 0).as_constant().unwrap().unwrap()
    };

    let fast = decode(aligned);
    let slow = decode(misaligned);
    assert_eq!(fast.path(), MaterializePath::ZeroCopy);
    assert_eq!(slow.path(), MaterializePath::Copied);
    assert_eq!(fast.dtype(), slow.dtype());
    assert_eq!(fast.shape(), slow.shape());
    assert_eq!(fast.to_f64_vec().unwrap(), slow.to_f64_vec().unwrap());
}

fn tensor_type_2x2() -> ScriptType {
    tensor(ScalarType::Float, &[2, 2])
}
