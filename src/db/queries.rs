pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS vehicles (
    id BIGSERIAL PRIMARY KEY,
    nickname TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    device_id TEXT NULL,
    is_immobilized BOOLEAN NOT NULL DEFAULT false,
    last_latitude DOUBLE PRECISION NULL,
    last_longitude DOUBLE PRECISION NULL,
    last_position_at BIGINT NULL,
    last_position_source TEXT NULL,
    is_online BOOLEAN NOT NULL DEFAULT false,
    last_connection BIGINT NOT NULL DEFAULT 0
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS trip_history (
    id BIGSERIAL PRIMARY KEY,
    vehicle_id BIGINT NOT NULL REFERENCES vehicles (id) ON DELETE CASCADE,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    timestamp BIGINT NOT NULL,
    event_type TEXT NOT NULL
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS trip_history_vehicle_ts_idx ON trip_history (vehicle_id, timestamp DESC);
"#,
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS vehicles_device_uidx ON vehicles (device_id)
    WHERE device_id IS NOT NULL AND device_id <> '';
"#,
];

pub const INSERT_VEHICLE: &str = r#"
INSERT INTO vehicles (nickname, phone_number)
VALUES ($1, $2)
RETURNING *;
"#;

pub const SELECT_VEHICLE: &str = r#"
SELECT * FROM vehicles WHERE id = $1;
"#;

pub const SELECT_VEHICLE_BY_DEVICE: &str = r#"
SELECT * FROM vehicles WHERE device_id = $1 LIMIT 1;
"#;

pub const UPDATE_DEVICE_ID: &str = r#"
UPDATE vehicles SET device_id = $2 WHERE id = $1;
"#;

pub const UPDATE_IMMOBILIZED: &str = r#"
UPDATE vehicles SET is_immobilized = $2 WHERE id = $1;
"#;

pub const UPDATE_CONNECTION_STATUS: &str = r#"
UPDATE vehicles SET is_online = $2, last_connection = $3 WHERE id = $1;
"#;

pub const UPDATE_LAST_POSITION: &str = r#"
UPDATE vehicles
SET last_latitude = $2,
    last_longitude = $3,
    last_position_at = $4,
    last_position_source = $5
WHERE id = $1;
"#;

pub const INSERT_TRIP_POINT: &str = r#"
INSERT INTO trip_history (vehicle_id, latitude, longitude, timestamp, event_type)
VALUES ($1, $2, $3, $4, $5);
"#;

pub const TRIM_HISTORY: &str = r#"
DELETE FROM trip_history
WHERE id IN (
    SELECT id FROM trip_history
    WHERE vehicle_id = $1
    ORDER BY timestamp DESC, id DESC
    OFFSET $2
);
"#;

pub const SELECT_RECENT_HISTORY: &str = r#"
SELECT * FROM trip_history
WHERE vehicle_id = $1
ORDER BY timestamp DESC, id DESC
LIMIT $2;
"#;

pub const DELETE_HISTORY: &str = r#"
DELETE FROM trip_history WHERE vehicle_id = $1;
"#;
