pub mod database;
pub mod error;
pub mod gateways;
pub mod hub_storage;
pub mod schema;
pub mod sensors;

pub use database::Database;
pub use error::StoreError;
pub use gateways::GatewayRepo;
pub use hub_storage::SqliteHubStorage;
pub use sensors::SensorRepo;
