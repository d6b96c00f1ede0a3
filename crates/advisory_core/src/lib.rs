//! Client-side state core for the advisory board app: the action taxonomy and
//! pure reducer, the store provider with startup hydration, and per-slice
//! persistence to local storage.

pub mod action;
pub mod config;
pub mod error;
pub mod hydration;
pub mod logging;
pub mod models;
pub mod reducer;
pub mod roster;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod store;

pub use action::{Action, LoadingSlice, UserDataFragment};
pub use config::StoreConfig;
pub use error::{ActionDecodeError, StoreError, StoreResult};
pub use hydration::{HydrationReport, RosterOrigin};
pub use reducer::reduce;
pub use runtime::{InvokeError, InvokeRequest, InvokeResponse, StoreRuntime};
pub use state::AppState;
pub use store::{Dispatcher, ListenerId, Store, StoreActions, StoreHandle};
