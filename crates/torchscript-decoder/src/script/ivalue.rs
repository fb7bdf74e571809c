//! Runtime values held by constants and module attributes.

use std::rc::Rc;

use bytes::Bytes;

use super::module::ScriptModule;
use super::types::{ScalarType, contiguous_strides};

/// Device a tensor was created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// A CUDA device, by ordinal.
    Cuda(usize),
}

/// Errors raised while viewing or copying tensor storage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// The view reaches past the end of its storage.
    #[error("tensor view needs {needed} bytes of storage but only {available} are available")]
    OutOfBounds {
        /// Bytes the view addresses.
        needed: usize,
        /// Bytes the storage holds.
        available: usize,
    },

    /// Sizes and strides disagree on the rank.
    #[error("sizes {sizes:?} and strides {strides:?} have different ranks")]
    RankMismatch {
        /// Declared sizes.
        sizes: Vec<usize>,
        /// Declared strides.
        strides: Vec<usize>,
    },

    /// A typed buffer doesn't match the dtype's element width.
    #[error("{dtype} elements are {expected} bytes wide, got a buffer of {actual}-byte elements")]
    ElementSize {
        /// Requested dtype.
        dtype: ScalarType,
        /// Width of one `dtype` element.
        expected: usize,
        /// Width of the buffer's elements.
        actual: usize,
    },
}

/// Owns a typed vector so its allocation can back a [`Bytes`] without copying.
struct PodVec<E>(Vec<E>);

impl<E: bytemuck::NoUninit> AsRef<[u8]> for PodVec<E> {
    fn as_ref(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }
}

/// A strided tensor over shared byte storage.
///
/// Strides and the storage offset are counted in elements, as in torch. Storage is
/// always addressable from the host; the device is a tag carried for coercion.
#[derive(Debug, Clone)]
pub struct ScriptTensor {
    dtype: ScalarType,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    storage_offset: usize,
    storage: Bytes,
    device: Device,
    requires_grad: bool,
}

impl ScriptTensor {
    /// Create a contiguous tensor that takes ownership of `values` without copying.
    pub fn from_vec<E>(values: Vec<E>, sizes: &[usize], dtype: ScalarType) -> Result<Self, TensorError>
    where
        E: bytemuck::NoUninit + Send + 'static,
    {
        let actual = core::mem::size_of::<E>();
        if actual != dtype.element_size() {
            return Err(TensorError::ElementSize {
                dtype,
                expected: dtype.element_size(),
                actual,
            });
        }
        Self::from_storage(
            Bytes::from_owner(PodVec(values)),
            dtype,
            sizes,
            &contiguous_strides(sizes),
            0,
        )
    }

    /// Create a view over existing storage.
    pub fn from_storage(
        storage: Bytes,
        dtype: ScalarType,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: usize,
    ) -> Result<Self, TensorError> {
        if sizes.len() != strides.len() {
            return Err(TensorError::RankMismatch {
                sizes: sizes.to_vec(),
                strides: strides.to_vec(),
            });
        }
        let tensor = Self {
            dtype,
            sizes: sizes.to_vec(),
            strides: strides.to_vec(),
            storage_offset,
            storage,
            device: Device::Cpu,
            requires_grad: false,
        };
        tensor.check_bounds()?;
        Ok(tensor)
    }

    /// Tag the tensor with a device.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Mark the tensor as tracked by autograd.
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// Element dtype.
    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    /// Extent of every axis.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Stride of every axis, in elements.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Device the tensor lives on.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether autograd tracks this tensor.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Legacy class name, e.g. `torch.FloatTensor`.
    pub fn type_name(&self) -> &'static str {
        self.dtype.tensor_class()
    }

    /// Whether elements are laid out densely in row-major order.
    pub fn is_contiguous(&self) -> bool {
        if self.numel() == 0 {
            return true;
        }
        let expected = contiguous_strides(&self.sizes);
        self.sizes
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&size, (&stride, &expected))| size == 1 || stride == expected)
    }

    /// Return a contiguous tensor, sharing storage when already contiguous.
    pub fn contiguous(&self) -> Result<Self, TensorError> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let data = self.gather_bytes()?;
        Ok(Self {
            dtype: self.dtype,
            sizes: self.sizes.clone(),
            strides: contiguous_strides(&self.sizes),
            storage_offset: 0,
            storage: Bytes::from(data),
            device: self.device,
            requires_grad: self.requires_grad,
        })
    }

    /// Drop autograd tracking. Storage is shared.
    pub fn detach(&self) -> Self {
        Self {
            requires_grad: false,
            ..self.clone()
        }
    }

    /// Move to host memory.
    pub fn to_host(&self) -> Self {
        Self {
            device: Device::Cpu,
            ..self.clone()
        }
    }

    /// The exact byte window of a contiguous tensor, shared with the storage.
    ///
    /// The caller must check [`is_contiguous`](Self::is_contiguous) first; for a
    /// strided tensor the window covers storage in memory order, not logical order.
    pub fn storage_bytes(&self) -> Result<Bytes, TensorError> {
        let element_size = self.dtype.element_size();
        let start = self.storage_offset * element_size;
        let end = start + self.numel() * element_size;
        if end > self.storage.len() {
            return Err(TensorError::OutOfBounds {
                needed: end,
                available: self.storage.len(),
            });
        }
        Ok(self.storage.slice(start..end))
    }

    /// Copy every element, in logical row-major order, into a dense buffer.
    pub fn gather_bytes(&self) -> Result<Vec<u8>, TensorError> {
        self.check_bounds()?;
        let element_size = self.dtype.element_size();
        let mut data = Vec::with_capacity(self.numel() * element_size);
        for offset in self.element_offsets() {
            let start = offset * element_size;
            data.extend_from_slice(&self.storage[start..start + element_size]);
        }
        Ok(data)
    }

    /// Storage offsets (in elements) of every element in logical order.
    fn element_offsets(&self) -> Vec<usize> {
        let numel = self.numel();
        let rank = self.sizes.len();
        let mut offsets = Vec::with_capacity(numel);
        let mut index = vec![0usize; rank];

        for _ in 0..numel {
            let offset: usize = index
                .iter()
                .zip(self.strides.iter())
                .map(|(i, stride)| i * stride)
                .sum();
            offsets.push(self.storage_offset + offset);

            for axis in (0..rank).rev() {
                index[axis] += 1;
                if index[axis] < self.sizes[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        offsets
    }

    fn check_bounds(&self) -> Result<(), TensorError> {
        if self.numel() == 0 {
            return Ok(());
        }
        let last: usize = self
            .sizes
            .iter()
            .zip(self.strides.iter())
            .map(|(size, stride)| (size - 1) * stride)
            .sum();
        let needed = (self.storage_offset + last + 1) * self.dtype.element_size();
        if needed > self.storage.len() {
            return Err(TensorError::OutOfBounds {
                needed,
                available: self.storage.len(),
            });
        }
        Ok(())
    }
}

/// A runtime value, as stored in constants and module attributes.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum IValue {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Tensor(ScriptTensor),
    List(Vec<IValue>),
    Tuple(Vec<IValue>),
    Device(Device),
    /// A scripted module or class instance.
    Object(Rc<ScriptModule>),
}

impl IValue {
    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            IValue::None => "NoneType",
            IValue::Bool(_) => "bool",
            IValue::Int(_) => "int",
            IValue::Double(_) => "float",
            IValue::String(_) => "str",
            IValue::Tensor(_) => "Tensor",
            IValue::List(_) => "list",
            IValue::Tuple(_) => "tuple",
            IValue::Device(_) => "Device",
            IValue::Object(_) => "Object",
        }
    }

    /// Whether this is `None`.
    pub fn is_none(&self) -> bool {
        matches!(self, IValue::None)
    }

    /// The module, if this is an object.
    pub fn as_object(&self) -> Option<&Rc<ScriptModule>> {
        match self {
            IValue::Object(module) => Some(module),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// The tensor, if this is one.
    pub fn as_tensor(&self) -> Option<&ScriptTensor> {
        match self {
            IValue::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }
}

impl From<bool> for IValue {
    fn from(value: bool) -> Self {
        IValue::Bool(value)
    }
}

impl From<i64> for IValue {
    fn from(value: i64) -> Self {
        IValue::Int(value)
    }
}

impl From<f64> for IValue {
    fn from(value: f64) -> Self {
        IValue::Double(value)
    }
}

impl From<&str> for IValue {
    fn from(value: &str) -> Self {
        IValue::String(value.to_string())
    }
}

impl From<ScriptTensor> for IValue {
    fn from(value: ScriptTensor) -> Self {
        IValue::Tensor(value)
    }
}

impl From<Rc<ScriptModule>> for IValue {
    fn from(value: Rc<ScriptModule>) -> Self {
        IValue::Object(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transposed() -> ScriptTensor {
        // Logical 3x2 view over a row-major 2x3 buffer.
        let base = ScriptTensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], ScalarType::Float)
            .unwrap();
        ScriptTensor::from_storage(base.storage.clone(), ScalarType::Float, &[3, 2], &[1, 3], 0).unwrap()
    }

    #[test]
    fn from_vec_shares_its_allocation() {
        let values = vec![1i32, 2, 3];
        let address = values.as_ptr() as usize;
        let tensor = ScriptTensor::from_vec(values, &[3], ScalarType::Int).unwrap();
        assert_eq!(tensor.storage_bytes().unwrap().as_ptr() as usize, address);
    }

    #[test]
    fn from_vec_rejects_wrong_element_width() {
        let err = ScriptTensor::from_vec(vec![1i64], &[1], ScalarType::Int).unwrap_err();
        assert_eq!(
            err,
            TensorError::ElementSize {
                dtype: ScalarType::Int,
                expected: 4,
                actual: 8
            }
        );
    }

    #[test]
    fn gather_follows_logical_order() {
        let tensor = transposed();
        assert!(!tensor.is_contiguous());

        let values: Vec<f32> = bytemuck::pod_collect_to_vec(&tensor.gather_bytes().unwrap());
        assert_eq!(values, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let dense = tensor.contiguous().unwrap();
        assert!(dense.is_contiguous());
        assert_eq!(dense.strides(), &[2, 1]);
    }

    #[test]
    fn view_past_storage_end_is_rejected() {
        let storage = Bytes::from(vec![0u8; 8]);
        let err = ScriptTensor::from_storage(storage, ScalarType::Float, &[3], &[1], 0).unwrap_err();
        assert_eq!(
            err,
            TensorError::OutOfBounds {
                needed: 12,
                available: 8
            }
        );
    }

    #[test]
    fn size_one_axes_ignore_stride() {
        let storage = Bytes::from(vec![0u8; 16]);
        let tensor = ScriptTensor::from_storage(storage, ScalarType::Float, &[1, 4], &[99, 1], 0).unwrap();
        assert!(tensor.is_contiguous());
    }
}
