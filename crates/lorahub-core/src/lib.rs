pub mod classifier;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod storage;

pub use classifier::{classify, ClassifyError};
pub use errors::{HubError, StorageError};
pub use ids::ConnectionId;
pub use protocol::{Command, InboundEvent, OutboundMessage, Role, SensorReading};
pub use storage::{GatewayRecord, HubStorage, ReadingFilter, ReadingOrder, StoredReading};
