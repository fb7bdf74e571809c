#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! `torchscript-decoder` exposes an inlined TorchScript graph through a uniform,
//! read-only query interface, so a model-IR builder can walk it node by node.
//!
//! Start from a [`ScriptModule`](script::ScriptModule) holding an inlined graph,
//! wrap it in a [`GraphDecoder`], and visit its nodes in topological order:
//!
//! ```ignore
//! let decoder = GraphDecoder::new(module)?;
//! decoder.visit_subgraph(|node| {
//!     if let Some(constant) = node.as_constant()? {
//!         // ...
//!     }
//!     Ok::<_, DecodeError>(())
//! })?;
//! ```
//!
//! Constants built from tensors share the tensor storage when the layout allows it
//! and fall back to copying otherwise.

mod attribute;
mod config;
mod constant_builder;
mod decoder;
mod decoder_store;
mod error;
mod ir;
mod type_resolver;

pub mod script;

pub use attribute::{attribute_path, resolve_get_attr};
pub use config::DecoderConfig;
pub use constant_builder::{ConstantBuilder, scalar_element_type};
pub use decoder::{GraphDecoder, GraphElement};
pub use error::DecodeError;
pub use ir::*;
pub use type_resolver::{resolve_type, transpose_order, value_shape, value_type};
