//! Core types for topology history.

pub mod identifier;
pub mod metadata;
pub mod element;
pub mod context;

pub use identifier::{Identifier, ElementKind};
pub use metadata::Metadata;
pub use element::{GraphElement, Node, Edge, Element};
pub use context::{TimeSlice, GraphContext, unix_millis, from_unix_millis, now_millis};
