//! Where tensors live at runtime: classification, liveness and offsets.

pub mod allocator;
pub mod classify;
pub mod liveness;

pub use allocator::{allocate, Allocation, MemoryPlan};
pub use classify::{classify, Classification, ElementWidth, Placement, RomReason, SkipReason};
pub use liveness::{lifetimes, Interval, Lifetime, Moment};
