//! Decoder-side types: element table, normalized types, shapes and constants.

use core::fmt;

use bytes::Bytes;

// burn-tensor integration
pub use burn_tensor::{DType, TensorData};

use crate::error::DecodeError;

/// Names the decoder maps onto element types.
///
/// Covers scalar annotations (`int`), torch dtypes (`torch.int32`) and legacy
/// tensor class names (`torch.IntTensor`). Anything else has no element type.
pub const ELEMENT_TYPES: [(&str, DType); 16] = [
    ("float", DType::F32),
    ("int", DType::I32),
    ("bool", DType::Bool),
    ("torch.float16", DType::F16),
    ("torch.float32", DType::F32),
    ("torch.float64", DType::F64),
    ("torch.uint8", DType::U8),
    ("torch.int8", DType::I8),
    ("torch.int32", DType::I32),
    ("torch.int64", DType::I64),
    ("torch.bool", DType::Bool),
    ("torch.DoubleTensor", DType::F64),
    ("torch.FloatTensor", DType::F32),
    ("torch.IntTensor", DType::I32),
    ("torch.LongTensor", DType::I64),
    ("torch.BoolTensor", DType::Bool),
];

/// Look up an element type by its source name.
pub fn element_type(name: &str) -> Option<DType> {
    ELEMENT_TYPES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, dtype)| *dtype)
}

/// Normalized type of a decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderType {
    /// A primitive scalar.
    Element(DType),
    /// A tensor of the given element type.
    Tensor(Box<DecoderType>),
    /// A list of the given element type.
    List(Box<DecoderType>),
    /// A string.
    Str,
    /// The `None` value.
    PyNone,
    /// No static type information.
    Dynamic,
}

impl DecoderType {
    /// `Tensor<element>`.
    pub fn tensor_of(element: DecoderType) -> Self {
        DecoderType::Tensor(Box::new(element))
    }

    /// `List<element>`.
    pub fn list_of(element: DecoderType) -> Self {
        DecoderType::List(Box::new(element))
    }

    /// Innermost element type, if statically known.
    pub fn elem_type(&self) -> Option<DType> {
        match self {
            DecoderType::Element(dtype) => Some(*dtype),
            DecoderType::Tensor(inner) | DecoderType::List(inner) => inner.elem_type(),
            _ => None,
        }
    }
}

impl fmt::Display for DecoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderType::Element(dtype) => write!(f, "{dtype:?}"),
            DecoderType::Tensor(inner) => write!(f, "Tensor<{inner}>"),
            DecoderType::List(inner) => write!(f, "List<{inner}>"),
            DecoderType::Str => write!(f, "Str"),
            DecoderType::PyNone => write!(f, "PyNone"),
            DecoderType::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Shape of a decoded value: fully known, or unranked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialShape {
    /// Every extent is known.
    Static(Vec<usize>),
    /// Rank or some extent is unknown.
    Dynamic,
}

/// Which tier produced a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializePath {
    /// Shares the source tensor's storage.
    ZeroCopy,
    /// Owns a copy of the elements.
    Copied,
}

/// Payload of a [`Constant`].
#[derive(Debug, Clone)]
pub enum ConstantData {
    /// Row-major element bytes shared with the source storage.
    Shared(Bytes),
    /// Elements copied out of the source.
    Owned(TensorData),
}

/// An immutable literal handed to the IR builder.
#[derive(Debug, Clone)]
pub struct Constant {
    dtype: DType,
    shape: Vec<usize>,
    data: ConstantData,
    path: MaterializePath,
}

impl Constant {
    /// Constant over shared storage. `bytes` must hold the elements in row-major order.
    pub(crate) fn shared(dtype: DType, shape: Vec<usize>, bytes: Bytes) -> Self {
        Self {
            dtype,
            shape,
            data: ConstantData::Shared(bytes),
            path: MaterializePath::ZeroCopy,
        }
    }

    pub(crate) fn owned(data: TensorData) -> Self {
        Self {
            dtype: data.dtype,
            shape: data.shape.clone(),
            data: ConstantData::Owned(data),
            path: MaterializePath::Copied,
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions; empty for a scalar.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Tier that produced this constant.
    pub fn path(&self) -> MaterializePath {
        self.path
    }

    /// Whether the payload is shared with the source storage.
    pub fn is_zero_copy(&self) -> bool {
        self.path == MaterializePath::ZeroCopy
    }

    /// The payload.
    pub fn data(&self) -> &ConstantData {
        &self.data
    }

    /// Raw element bytes when the constant shares source storage.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            ConstantData::Shared(bytes) => Some(bytes),
            ConstantData::Owned(_) => None,
        }
    }

    /// Owned tensor data (copying)
    pub fn to_data(&self) -> Result<TensorData, DecodeError> {
        match &self.data {
            ConstantData::Shared(bytes) => tensor_data_from_bytes(self.dtype, bytes, self.shape.clone()),
            ConstantData::Owned(data) => Ok(data.clone()),
        }
    }

    /// Every element converted to f64, in row-major order.
    ///
    /// Useful for comparing constants regardless of how they were produced.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, DecodeError> {
        Ok(self.to_data()?.iter::<f64>().collect())
    }
}

/// Decode dense row-major element bytes into owned tensor data.
pub(crate) fn tensor_data_from_bytes(
    dtype: DType,
    bytes: &[u8],
    shape: Vec<usize>,
) -> Result<TensorData, DecodeError> {
    let data = match dtype {
        DType::F64 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, f64>(bytes), shape),
        DType::F32 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, f32>(bytes), shape),
        DType::F16 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, half::f16>(bytes), shape),
        DType::I64 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, i64>(bytes), shape),
        DType::I32 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, i32>(bytes), shape),
        DType::I8 => TensorData::new(bytemuck::pod_collect_to_vec::<u8, i8>(bytes), shape),
        DType::U8 => TensorData::new(bytes.to_vec(), shape),
        DType::Bool => TensorData::new(bytes.iter().map(|b| *b != 0).collect::<Vec<bool>>(), shape),
        other => return Err(DecodeError::UnsupportedDType { dtype: other }),
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_table_lookup() {
        assert_eq!(element_type("int"), Some(DType::I32));
        assert_eq!(element_type("torch.LongTensor"), Some(DType::I64));
        assert_eq!(element_type("torch.bfloat16"), None);
        assert_eq!(element_type("torch.HalfTensor"), None);
    }

    #[test]
    fn nested_elem_type() {
        let ty = DecoderType::list_of(DecoderType::tensor_of(DecoderType::Element(DType::F16)));
        assert_eq!(ty.elem_type(), Some(DType::F16));
        assert_eq!(ty.to_string(), "List<Tensor<F16>>");
        assert_eq!(DecoderType::tensor_of(DecoderType::Dynamic).elem_type(), None);
    }

    #[test]
    fn shared_constant_decodes_to_same_values() {
        let bytes = Bytes::copy_from_slice(bytemuck::cast_slice(&[1.5f32, -2.0, 3.25, 0.0]));
        let constant = Constant::shared(DType::F32, vec![2, 2], bytes);

        assert!(constant.is_zero_copy());
        assert_eq!(constant.numel(), 4);
        let data = constant.to_data().unwrap();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1.5, -2.0, 3.25, 0.0]);
        assert_eq!(constant.to_f64_vec().unwrap(), vec![1.5, -2.0, 3.25, 0.0]);
    }

    #[test]
    fn bool_bytes_decode_as_bool() {
        let data = tensor_data_from_bytes(DType::Bool, &[0, 1, 2], vec![3]).unwrap();
        assert_eq!(data.as_slice::<bool>().unwrap(), &[false, true, true]);
    }
}
