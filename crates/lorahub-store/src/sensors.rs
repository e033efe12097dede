use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use tracing::instrument;

use lorahub_core::{ReadingFilter, ReadingOrder, SensorReading, StoredReading};

use crate::database::Database;
use crate::error::StoreError;
use crate::schema::format_datetime;

const READING_COLUMNS: &str =
    "id, node_id, voltage, message_type, timestamp, rssi, snr, gateway_id, received_at";

pub struct SensorRepo {
    db: Database,
}

impl SensorRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a reading stamped with the current time.
    pub fn insert(&self, reading: &SensorReading) -> Result<i64, StoreError> {
        self.insert_at(reading, Utc::now())
    }

    #[instrument(skip(self, reading), fields(node_id = ?reading.node_id))]
    pub fn insert_at(
        &self,
        reading: &SensorReading,
        received_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sensor_data
                    (node_id, voltage, message_type, timestamp, rssi, snr, gateway_id, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    reading.node_id,
                    reading.voltage,
                    reading.message_type,
                    reading.timestamp,
                    reading.rssi,
                    reading.snr,
                    reading.gateway_id,
                    format_datetime(received_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    #[instrument(skip(self))]
    pub fn query(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StoreError> {
        let mut sql = format!("SELECT {READING_COLUMNS} FROM sensor_data WHERE 1=1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(node_id) = filter.node_id {
            sql.push_str(&format!(" AND node_id = ?{}", params.len() + 1));
            params.push(Box::new(node_id));
        }
        if let Some(message_type) = &filter.message_type {
            sql.push_str(&format!(" AND message_type = ?{}", params.len() + 1));
            params.push(Box::new(message_type.clone()));
        }
        if let Some(since) = filter.received_since {
            sql.push_str(&format!(" AND received_at > ?{}", params.len() + 1));
            params.push(Box::new(format_datetime(since)));
        }

        sql.push_str(match filter.order {
            ReadingOrder::NewestFirst => " ORDER BY received_at DESC, id DESC",
            ReadingOrder::OldestFirst => " ORDER BY received_at ASC, id ASC",
        });
        sql.push_str(&format!(" LIMIT ?{}", params.len() + 1));
        params.push(Box::new(i64::from(filter.limit)));

        self.db.with_conn(|conn| {
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok(StoredReading {
                        id: row.get(0)?,
                        node_id: row.get(1)?,
                        voltage: row.get(2)?,
                        message_type: row.get(3)?,
                        timestamp: row.get(4)?,
                        rssi: row.get(5)?,
                        snr: row.get(6)?,
                        gateway_id: row.get(7)?,
                        received_at: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::CorruptRow {
                    table: "sensor_data",
                    column: "*",
                    detail: e.to_string(),
                })?;
            Ok(rows)
        })
    }

    /// Count distinct nodes whose reported timestamp is after `since_ms`.
    #[instrument(skip(self))]
    pub fn count_active_nodes(&self, since_ms: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT node_id) FROM sensor_data
                 WHERE timestamp > ?1 AND node_id IS NOT NULL",
                [since_ms],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}
