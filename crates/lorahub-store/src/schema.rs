/// SQL DDL for the hub database.
/// WAL mode enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER,
    voltage REAL,
    message_type TEXT,
    timestamp INTEGER,
    rssi INTEGER,
    snr REAL,
    gateway_id TEXT,
    received_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gateways (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gateway_id TEXT NOT NULL UNIQUE,
    last_seen TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'online'
);

CREATE INDEX IF NOT EXISTS idx_sensor_data_node ON sensor_data(node_id);
CREATE INDEX IF NOT EXISTS idx_sensor_data_received ON sensor_data(received_at);
CREATE INDEX IF NOT EXISTS idx_sensor_data_timestamp ON sensor_data(timestamp);
CREATE INDEX IF NOT EXISTS idx_gateways_last_seen ON gateways(last_seen);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Format used for `received_at` and `last_seen` (UTC, SQLite `datetime()` compatible).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_datetime(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format(DATETIME_FORMAT).to_string()
}
