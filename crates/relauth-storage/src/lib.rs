pub mod adapter;
pub mod memory;
pub mod traits;

pub use adapter::StoreTupleReader;
pub use memory::InMemoryStore;
pub use traits::{RelationshipStore, StorageError};
