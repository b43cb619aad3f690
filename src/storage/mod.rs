//! Storage layer: the memory-mapped storage window and the delta-region
//! bump allocator built on top of it.

/// The memory-mapped storage window.
pub mod window;
/// The delta-region bump allocator.
pub mod allocator;

pub use window::StorageWindow;
pub use allocator::DeltaAllocator;
