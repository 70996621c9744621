//! ICE Module
//!
//! Pro Peer Connection ein Store, der Candidates puffert, in Reihenfolge
//! weitergibt und ICE Restarts mit Grace-Zeit plant.

mod adapter;
mod middleware;
mod reducer;
mod state;

pub use adapter::IceAdapter;
pub use middleware::{IceCommand, IceMiddleware};
pub use reducer::IceReducer;
pub use state::{restart_plan, IceAction, IceState, RestartPlan};

use crate::store::StoreNamespace;

/// Namespace der ICE Stores
pub struct IceNamespace;

impl StoreNamespace for IceNamespace {
    type State = IceState;
    type Action = IceAction;
    const IDENTIFIER: &'static str = "ice";
}
