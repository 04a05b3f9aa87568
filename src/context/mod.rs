// Context assembly module
// Splits the token budget across prompt sections and packs ranked
// candidates into the context section under a hard bound.

pub mod budget;
pub mod packer;

pub use budget::{BudgetAllocation, allocate};
pub use packer::{ContextItem, PackedContext, pack};
