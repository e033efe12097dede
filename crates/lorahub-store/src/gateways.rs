use chrono::{DateTime, Utc};
use tracing::instrument;

use lorahub_core::GatewayRecord;

use crate::database::Database;
use crate::error::StoreError;
use crate::schema::format_datetime;

pub struct GatewayRepo {
    db: Database,
}

impl GatewayRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record the gateway as online, creating it on first sight.
    /// The row id is stable across reconnects.
    pub fn upsert_online(&self, gateway_id: &str) -> Result<(), StoreError> {
        self.upsert_online_at(gateway_id, Utc::now())
    }

    #[instrument(skip(self))]
    pub fn upsert_online_at(&self, gateway_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gateways (gateway_id, last_seen, status) VALUES (?1, ?2, 'online')
                 ON CONFLICT(gateway_id) DO UPDATE SET last_seen = excluded.last_seen, status = 'online'",
                rusqlite::params![gateway_id, format_datetime(at)],
            )?;
            Ok(())
        })
    }

    /// Refresh `last_seen`. Returns `false` when the gateway is unknown.
    pub fn touch_last_seen(&self, gateway_id: &str) -> Result<bool, StoreError> {
        self.touch_last_seen_at(gateway_id, Utc::now())
    }

    #[instrument(skip(self))]
    pub fn touch_last_seen_at(&self, gateway_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE gateways SET last_seen = ?1 WHERE gateway_id = ?2",
                rusqlite::params![format_datetime(at), gateway_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// All gateways, most recently seen first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<GatewayRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, gateway_id, last_seen, status FROM gateways ORDER BY last_seen DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(GatewayRecord {
                        id: row.get(0)?,
                        gateway_id: row.get(1)?,
                        last_seen: row.get(2)?,
                        status: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
