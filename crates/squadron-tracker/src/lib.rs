//! # Squadron Tracker
//!
//! Merged, time-coherent view of squadron telemetry and the fan-out of
//! its changes to consumers.
//!
//! ## Components
//! - [`StateStore`]: merges update records (last-writer-wins scalars,
//!   bounded FIFO histories, clamping)
//! - [`SubscriptionHub`]: notifies subscribers when their selected slice changes
//! - [`Aggregator`]: cloneable handle that serializes batches over both

pub mod aggregator;
pub mod error;
pub mod hub;
pub mod state;
pub mod store;

pub use aggregator::{Aggregator, AggregatorStats};
pub use error::{HubError, HubResult};
pub use hub::{Selector, Slice, SliceCallback, Subscription, SubscriptionHub};
pub use state::{AggregateState, FleetSummary, LOW_FUEL_THRESHOLD};
pub use store::{
    clamp_fuel, clamp_weapons, ApplyOutcome, ApplyStatus, BatchOutcome, StateStore, StoreConfig,
};
