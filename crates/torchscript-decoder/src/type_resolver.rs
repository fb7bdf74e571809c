//! Static type, shape and layout resolution for graph values
//!
//! Every function here is total: anything the source can't describe resolves to
//! [`DecoderType::Dynamic`], [`PartialShape::Dynamic`] or an empty order.

use crate::ir::{DecoderType, PartialShape, element_type};
use crate::script::{ScriptType, ValueData};

/// Map a source type onto a [`DecoderType`].
pub fn resolve_type(ty: Option<&ScriptType>) -> DecoderType {
    let Some(ty) = ty else {
        return DecoderType::Dynamic;
    };

    if let Some(dtype) = element_type(&ty.to_string()) {
        return DecoderType::Element(dtype);
    }

    match ty {
        ScriptType::Tensor(tensor) => {
            let element = match tensor.dtype {
                Some(dtype) => element_type(&dtype.to_string())
                    .map(DecoderType::Element)
                    .unwrap_or(DecoderType::Dynamic),
                None => DecoderType::Dynamic,
            };
            DecoderType::tensor_of(element)
        }
        ScriptType::List(element) => DecoderType::list_of(resolve_type(Some(element))),
        ScriptType::Str => DecoderType::Str,
        ScriptType::NoneType => DecoderType::PyNone,
        other => {
            log::debug!("No static type for {other}, treating as dynamic");
            DecoderType::Dynamic
        }
    }
}

/// Type of a graph value.
pub fn value_type(value: &ValueData) -> DecoderType {
    resolve_type(value.ty())
}

/// Concrete shape for complete tensors, unranked otherwise.
pub fn value_shape(value: &ValueData) -> PartialShape {
    if !value.is_complete_tensor() {
        return PartialShape::Dynamic;
    }
    value
        .ty()
        .and_then(ScriptType::as_tensor)
        .and_then(|tensor| tensor.concrete_sizes())
        .map(PartialShape::Static)
        .unwrap_or(PartialShape::Dynamic)
}

/// Axis indices ordered by descending stride.
///
/// Ties stay in axis order. Returns an empty order when the value is not a
/// tensor or any stride is unknown.
pub fn transpose_order(value: &ValueData) -> Vec<usize> {
    value
        .ty()
        .and_then(ScriptType::as_tensor)
        .and_then(|tensor| tensor.concrete_strides())
        .map(|strides| order_by_stride(&strides))
        .unwrap_or_default()
}

fn order_by_stride(strides: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..strides.len()).collect();
    // `sort_by` is stable, ties stay in axis order.
    order.sort_by(|a, b| strides[*b].cmp(&strides[*a]));
    order
}
