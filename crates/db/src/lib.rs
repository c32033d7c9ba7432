//! Generation state: video/clip job records, the status model, and the
//! record-store seam the pipeline reads and writes through.

pub mod memory;
pub mod models;
pub mod store;

pub use memory::MemoryStore;
pub use store::{GenerationStore, StoreError};
