use lorahub_core::{
    GatewayRecord, HubStorage, ReadingFilter, SensorReading, StorageError, StoredReading,
};

use crate::database::Database;
use crate::gateways::GatewayRepo;
use crate::sensors::SensorRepo;

/// SQLite-backed storage collaborator for the hub.
pub struct SqliteHubStorage {
    sensors: SensorRepo,
    gateways: GatewayRepo,
}

impl SqliteHubStorage {
    pub fn new(db: Database) -> Self {
        Self {
            sensors: SensorRepo::new(db.clone()),
            gateways: GatewayRepo::new(db),
        }
    }
}

impl HubStorage for SqliteHubStorage {
    fn save_sensor_reading(&self, reading: &SensorReading) -> Result<i64, StorageError> {
        Ok(self.sensors.insert(reading)?)
    }

    fn upsert_gateway_online(&self, gateway_id: &str) -> Result<(), StorageError> {
        Ok(self.gateways.upsert_online(gateway_id)?)
    }

    fn touch_gateway_last_seen(&self, gateway_id: &str) -> Result<bool, StorageError> {
        Ok(self.gateways.touch_last_seen(gateway_id)?)
    }

    fn list_gateways(&self) -> Result<Vec<GatewayRecord>, StorageError> {
        Ok(self.gateways.list()?)
    }

    fn query_readings(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StorageError> {
        Ok(self.sensors.query(filter)?)
    }

    fn count_active_nodes(&self, since_ms: i64) -> Result<usize, StorageError> {
        Ok(self.sensors.count_active_nodes(since_ms)?)
    }
}
