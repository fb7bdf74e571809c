//! Constant materialization
//!
//! Turns literals and tensors into [`Constant`]s. Tensors first try to share their
//! storage (zero-copy); when that is not possible the elements are copied in
//! logical order. Both tiers produce the same dtype, shape and values.

use crate::config::DecoderConfig;
use crate::error::DecodeError;
use crate::ir::{Constant, DType, TensorData, element_type, tensor_data_from_bytes};
use crate::script::{Device, IValue, ScriptTensor, ScriptType, TensorError};

/// Why the zero-copy tier declined a tensor.
#[derive(thiserror::Error, Debug)]
enum ZeroCopyError {
    #[error("zero-copy constants are disabled")]
    Disabled,
    #[error("tensor is not contiguous")]
    NotContiguous,
    #[error("tensor lives on {device:?}, not on the host")]
    NotHost { device: Device },
    #[error("storage at {address:#x} is not aligned to {align} bytes")]
    Misaligned { address: usize, align: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Element type inferred from a host scalar.
///
/// Integers stay 32-bit unless they don't fit.
pub fn scalar_element_type(value: &IValue) -> Option<DType> {
    match value {
        IValue::Double(_) => Some(DType::F32),
        IValue::Bool(_) => Some(DType::Bool),
        IValue::Int(v) if i32::try_from(*v).is_ok() => Some(DType::I32),
        IValue::Int(_) => Some(DType::I64),
        _ => None,
    }
}

/// Builds constants according to a [`DecoderConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConstantBuilder {
    config: DecoderConfig,
}

impl ConstantBuilder {
    /// Create a builder with the given settings.
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Settings this builder runs with.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Materialize a runtime value.
    ///
    /// Returns `Ok(None)` for values without a constant representation (strings,
    /// `None`, objects, tensors of unknown dtype).
    pub fn from_ivalue(&self, value: &IValue) -> Result<Option<Constant>, DecodeError> {
        if let Some(dtype) = scalar_element_type(value) {
            let data = scalars_to_data(dtype, core::slice::from_ref(value), Vec::new())?;
            return Ok(Some(Constant::owned(data)));
        }

        match value {
            IValue::List(items) | IValue::Tuple(items) => self.from_sequence(items).map(Some),
            IValue::Tensor(tensor) => match element_type(tensor.type_name()) {
                Some(dtype) => self.from_tensor(tensor, dtype).map(Some),
                None => {
                    log::debug!("{} has no constant element type", tensor.type_name());
                    Ok(None)
                }
            },
            other => {
                log::debug!("{} value has no constant representation", other.kind_name());
                Ok(None)
            }
        }
    }

    /// Materialize a list constant whose declared element type is `element`.
    ///
    /// The result is a rank-1 copy. Returns `Ok(None)` when the element type isn't
    /// a known scalar, and fails with [`DecodeError::IntegerOverflow`] when an `int`
    /// value doesn't fit in 32 bits.
    pub fn from_list(
        &self,
        values: &[IValue],
        element: &ScriptType,
    ) -> Result<Option<Constant>, DecodeError> {
        let Some(dtype) = element_type(&element.to_string()) else {
            log::debug!("List[{element}] has no constant element type");
            return Ok(None);
        };
        let data = scalars_to_data(dtype, values, vec![values.len()])?;
        Ok(Some(Constant::owned(data)))
    }

    /// Materialize a tensor, sharing its storage when possible.
    pub fn from_tensor(&self, tensor: &ScriptTensor, dtype: DType) -> Result<Constant, DecodeError> {
        let tensor = self.coerce(tensor);

        match self.zero_copy(&tensor, dtype) {
            Ok(constant) => {
                log::debug!(
                    "Constant {:?}{:?} shares tensor storage",
                    dtype,
                    constant.shape()
                );
                Ok(constant)
            }
            Err(reason) => {
                log::warn!(
                    "Constant wasn't able to convert from tensor storage ({reason}), copying {} elements",
                    tensor.numel()
                );
                self.copied(&tensor, dtype)
            }
        }
    }

    /// Make the tensor contiguous, detached and host resident.
    fn coerce(&self, tensor: &ScriptTensor) -> ScriptTensor {
        if !self.config.detach_tensors {
            return tensor.clone();
        }
        if tensor.requires_grad() {
            log::debug!("Detaching tensor from autograd");
        }
        match tensor.contiguous() {
            Ok(dense) => dense.detach().to_host(),
            Err(err) => {
                log::warn!("Tensor couldn't detach: {err}");
                tensor.clone()
            }
        }
    }

    fn zero_copy(&self, tensor: &ScriptTensor, dtype: DType) -> Result<Constant, ZeroCopyError> {
        if !self.config.zero_copy {
            return Err(ZeroCopyError::Disabled);
        }
        if !tensor.is_contiguous() {
            return Err(ZeroCopyError::NotContiguous);
        }
        if tensor.device() != Device::Cpu {
            return Err(ZeroCopyError::NotHost {
                device: tensor.device(),
            });
        }

        let bytes = tensor.storage_bytes()?;
        let align = tensor.dtype().element_size();
        let address = bytes.as_ptr() as usize;
        if address % align != 0 {
            return Err(ZeroCopyError::Misaligned { address, align });
        }

        Ok(Constant::shared(dtype, tensor.sizes().to_vec(), bytes))
    }

    fn copied(&self, tensor: &ScriptTensor, dtype: DType) -> Result<Constant, DecodeError> {
        let bytes = tensor.gather_bytes()?;
        let data = tensor_data_from_bytes(dtype, &bytes, tensor.sizes().to_vec())?;
        Ok(Constant::owned(data))
    }

    /// Rank-1 constant from a list or tuple, typed by its first element.
    fn from_sequence(&self, items: &[IValue]) -> Result<Constant, DecodeError> {
        let first = items.first().ok_or(DecodeError::EmptyCollection)?;
        let mut dtype = scalar_element_type(first).ok_or(DecodeError::UnsupportedListElement {
            kind: first.kind_name(),
        })?;

        if dtype == DType::I32 && items.iter().any(|item| scalar_element_type(item) == Some(DType::I64)) {
            log::warn!("List starts with a 32-bit integer but holds wider ones, widening to {:?}", DType::I64);
            dtype = DType::I64;
        }

        if items.iter().any(|item| item.kind_name() != first.kind_name()) {
            log::debug!(
                "List mixes element kinds, coercing everything to {dtype:?} from its first element"
            );
        }

        let data = scalars_to_data(dtype, items, vec![items.len()])?;
        Ok(Constant::owned(data))
    }
}

/// Coerce host scalars to `dtype`.
fn scalars_to_data(dtype: DType, values: &[IValue], shape: Vec<usize>) -> Result<TensorData, DecodeError> {
    let data = match dtype {
        DType::F64 => TensorData::new(coerce(values, as_f64)?, shape),
        DType::F32 => TensorData::new(coerce(values, |v| as_f64(v).map(|x| x as f32))?, shape),
        DType::I64 => TensorData::new(coerce(values, as_i64)?, shape),
        DType::I32 => TensorData::new(narrow_i32(coerce(values, as_i64)?)?, shape),
        DType::Bool => TensorData::new(coerce(values, as_bool)?, shape),
        other => return Err(DecodeError::UnsupportedDType { dtype: other }),
    };
    Ok(data)
}

fn coerce<E>(values: &[IValue], cast: impl Fn(&IValue) -> Option<E>) -> Result<Vec<E>, DecodeError> {
    values
        .iter()
        .map(|value| {
            cast(value).ok_or(DecodeError::UnsupportedListElement {
                kind: value.kind_name(),
            })
        })
        .collect()
}

fn narrow_i32(values: Vec<i64>) -> Result<Vec<i32>, DecodeError> {
    values
        .into_iter()
        .map(|value| {
            i32::try_from(value).map_err(|_| DecodeError::IntegerOverflow {
                value,
                dtype: DType::I32,
            })
        })
        .collect()
}

fn as_f64(value: &IValue) -> Option<f64> {
    match value {
        IValue::Double(v) => Some(*v),
        IValue::Int(v) => Some(*v as f64),
        IValue::Bool(v) => Some(*v as u8 as f64),
        _ => None,
    }
}

fn as_i64(value: &IValue) -> Option<i64> {
    match value {
        IValue::Int(v) => Some(*v),
        IValue::Double(v) => Some(*v as i64),
        IValue::Bool(v) => Some(*v as i64),
        _ => None,
    }
}

fn as_bool(value: &IValue) -> Option<bool> {
    match value {
        IValue::Bool(v) => Some(*v),
        IValue::Int(v) => Some(*v != 0),
        IValue::Double(v) => Some(*v != 0.0),
        _ => None,
    }
}
