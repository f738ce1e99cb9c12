// Entity Models
//
// - Entity: the monitored company (identity = canonical name)
// - Source: an external data provider with its quota and trust class

pub mod company;
pub mod source;

pub use company::{Entity, EntityRegistry, Priority};
pub use source::{default_sources, Source, SourceClass, SourceRole};
