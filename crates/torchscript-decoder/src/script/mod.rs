//! Read-only TorchScript object model
//!
//! The decoder never mutates anything in here. Frontends fill a [`ScriptModule`]
//! with attributes and an inlined [`ScriptGraph`], then hand it to
//! [`GraphDecoder`](crate::GraphDecoder).

mod builder;
mod graph;
mod ivalue;
mod module;
mod types;

pub use builder::GraphBuilder;
pub use graph::{
    BlockData, BlockId, CONSTANT_KIND, GET_ATTR_KIND, NodeData, NodeId, ScriptGraph, ValueData,
    ValueId,
};
pub use ivalue::{Device, IValue, ScriptTensor, TensorError};
pub use module::ScriptModule;
pub use types::{ScalarType, ScriptType, TensorType, contiguous_strides};
