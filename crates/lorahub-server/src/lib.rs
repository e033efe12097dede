pub mod api;
pub mod connection;
pub mod dispatcher;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;

pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use registry::{ConnectionRegistry, RoleUpdate, SendError};
pub use router::{RouteOutcome, Router, SensorIngest};
pub use server::{build_router, start, start_with_shutdown, AppState, ServerConfig, ServerHandle};
