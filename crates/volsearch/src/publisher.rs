//! Result publication.
//!
//! - observable fields and the typed event bus (`store`)
//! - pure derivation of recents and results (`view`)
//! - the actor that owns query state and republishes on change (`actor`)

mod actor;
mod store;
mod view;

pub use actor::ContextCommand;
pub(crate) use actor::PublisherActor;
pub use store::{Bus, Published, PublishedState, ResultList, SearchEvent};
pub use view::{compute_recents, compute_results, QueryState, ViewLimits};
