//! FMT (Forward MODCOD Table) handling: MODCOD definitions, ACM lookups
//! and the per-carrier FMT groups.

pub mod definition;
pub mod group;

pub use definition::{FmtDefinition, FmtDefinitionTable, Modulation};
pub use group::FmtGroup;
