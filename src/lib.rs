pub mod about;
pub mod aggregate;
pub mod constructor;
pub mod engine;
pub mod entity;
pub mod entity_map;
pub mod error;
pub mod intervals;
pub mod natural_order;
pub mod result_request;
pub mod workbench;
pub mod workspace;

pub use entity::{DEFAULT_KEY, EntityKind};
pub use entity_map::{EntityMap, MapValue, NumericMap, TextMap};
pub use error::{MapError, Result};
