pub mod codec;
pub mod engine;
pub mod transaction;

pub use engine::StorageEngine;
pub use transaction::StorageTransaction;
