//! Client-side composition for SpaceDesk: configuration, session handling,
//! remote reconciliation and the [`AppContext`] that ties them to the domain
//! core and the local cache.

pub mod config;
pub mod context;
pub mod remote;
pub mod session;
pub mod sync;
pub mod telemetry;

pub use config::{BootstrapRoot, DayRecordSync, RemoteConfig, TrackerConfig};
pub use context::{AccountUpdate, AppContext, ProfileUpdate, SpaceUpdate};
pub use remote::{
    DayRecordRow, HttpRemoteStore, InMemoryRemoteStore, ProfileRow, RemoteError, RemoteMutation,
    RemoteStore, SpaceRow,
};
pub use session::{SessionDescriptor, SessionManager, SessionState};
pub use sync::{RemoteSnapshot, SyncHealth, SyncReconciler};
pub use telemetry::{init_tracing, DEFAULT_LOG_FILTER};
