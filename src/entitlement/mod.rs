pub mod gate;
mod memory;
mod pg;
mod store;

pub use gate::{EntitlementState, Remaining, TierLimit, WINDOW};
pub use memory::InMemoryEntitlementStore;
pub use pg::PgEntitlementStore;
pub use store::EntitlementStore;
