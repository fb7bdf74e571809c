//! TorchScript type descriptors
//!
//! These mirror the types a scripting frontend attaches to graph values. A value's
//! type can be partially known: tensors may carry no dtype, no rank, or only some
//! of their extents.

use core::fmt;

use derive_new::new;
use strum::{Display, EnumString};

/// Torch scalar (dtype) kinds.
///
/// The string form matches `str(torch.dtype)`, e.g. `torch.float32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[allow(missing_docs)]
pub enum ScalarType {
    #[strum(to_string = "torch.uint8")]
    Byte,
    #[strum(to_string = "torch.int8")]
    Char,
    #[strum(to_string = "torch.int16")]
    Short,
    #[strum(to_string = "torch.int32")]
    Int,
    #[strum(to_string = "torch.int64")]
    Long,
    #[strum(to_string = "torch.float16")]
    Half,
    #[strum(to_string = "torch.float32")]
    Float,
    #[strum(to_string = "torch.float64")]
    Double,
    #[strum(to_string = "torch.bfloat16")]
    BFloat16,
    #[strum(to_string = "torch.bool")]
    Bool,
    #[strum(to_string = "torch.complex64")]
    ComplexFloat,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            ScalarType::Byte | ScalarType::Char | ScalarType::Bool => 1,
            ScalarType::Short | ScalarType::Half | ScalarType::BFloat16 => 2,
            ScalarType::Int | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::Double | ScalarType::ComplexFloat => 8,
        }
    }

    /// Legacy tensor class name, as returned by `tensor.type()`.
    pub fn tensor_class(self) -> &'static str {
        match self {
            ScalarType::Byte => "torch.ByteTensor",
            ScalarType::Char => "torch.CharTensor",
            ScalarType::Short => "torch.ShortTensor",
            ScalarType::Int => "torch.IntTensor",
            ScalarType::Long => "torch.LongTensor",
            ScalarType::Half => "torch.HalfTensor",
            ScalarType::Float => "torch.FloatTensor",
            ScalarType::Double => "torch.DoubleTensor",
            ScalarType::BFloat16 => "torch.BFloat16Tensor",
            ScalarType::Bool => "torch.BoolTensor",
            ScalarType::ComplexFloat => "torch.ComplexFloatTensor",
        }
    }
}

/// Static knowledge about a tensor value.
///
/// Every field may be missing. `sizes` and `strides` may also be known in rank
/// but not in every extent.
#[derive(Debug, Clone, Default, PartialEq, new)]
pub struct TensorType {
    /// Element dtype.
    pub dtype: Option<ScalarType>,
    /// Extent of every axis; `None` for an unknown rank or extent.
    pub sizes: Option<Vec<Option<usize>>>,
    /// Stride of every axis, in elements.
    pub strides: Option<Vec<Option<usize>>>,
}

impl TensorType {
    /// A tensor with nothing known about it.
    pub fn unranked() -> Self {
        Self::default()
    }

    /// A fully known, contiguous tensor type.
    pub fn complete(dtype: ScalarType, sizes: &[usize]) -> Self {
        Self {
            dtype: Some(dtype),
            sizes: Some(sizes.iter().copied().map(Some).collect()),
            strides: Some(contiguous_strides(sizes).into_iter().map(Some).collect()),
        }
    }

    /// Replace the declared strides.
    pub fn with_strides(mut self, strides: &[usize]) -> Self {
        self.strides = Some(strides.iter().copied().map(Some).collect());
        self
    }

    /// Whether dtype, rank and every extent are known.
    pub fn is_complete(&self) -> bool {
        self.dtype.is_some() && self.concrete_sizes().is_some()
    }

    /// Sizes, if rank and every extent are known.
    pub fn concrete_sizes(&self) -> Option<Vec<usize>> {
        self.sizes.as_ref()?.iter().copied().collect()
    }

    /// Strides, if rank and every stride are known.
    pub fn concrete_strides(&self) -> Option<Vec<usize>> {
        self.strides.as_ref()?.iter().copied().collect()
    }
}

/// Row-major strides (in elements) for the given sizes.
pub fn contiguous_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; sizes.len()];
    for axis in (0..sizes.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * sizes[axis + 1].max(1);
    }
    strides
}

/// The type attached to a graph value.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ScriptType {
    Tensor(TensorType),
    Int,
    Float,
    Bool,
    Str,
    NoneType,
    List(Box<ScriptType>),
    Tuple(Vec<ScriptType>),
    Optional(Box<ScriptType>),
    Device,
    /// A scripted class or module, by qualified name.
    Class(String),
    Any,
}

impl ScriptType {
    /// `List[element]`.
    pub fn list_of(element: ScriptType) -> Self {
        ScriptType::List(Box::new(element))
    }

    /// `Optional[element]`.
    pub fn optional(element: ScriptType) -> Self {
        ScriptType::Optional(Box::new(element))
    }

    /// The tensor type, if this is one.
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            ScriptType::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::Tensor(_) => write!(f, "Tensor"),
            ScriptType::Int => write!(f, "int"),
            ScriptType::Float => write!(f, "float"),
            ScriptType::Bool => write!(f, "bool"),
            ScriptType::Str => write!(f, "str"),
            ScriptType::NoneType => write!(f, "NoneType"),
            ScriptType::List(element) => write!(f, "List[{element}]"),
            ScriptType::Tuple(elements) => {
                write!(f, "Tuple[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            ScriptType::Optional(element) => write!(f, "Optional[{element}]"),
            ScriptType::Device => write!(f, "Device"),
            ScriptType::Class(name) => write!(f, "{name}"),
            ScriptType::Any => write!(f, "Any"),
        }
    }
}
