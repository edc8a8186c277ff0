//! Accounting engine: share math, position lifecycle, revenue attribution,
//! aggregate rollup, vault governance and public-allocator bookkeeping.

pub mod allocator;
pub mod position;
pub mod revenue;
pub mod rollup;
pub mod share_math;
pub mod vault;

pub use allocator::AllocatorEngine;
pub use rollup::Rollup;
pub use vault::VaultEngine;
