use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_cache_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS series_cache (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    ttl_ms BIGINT NOT NULL,
    provenance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS curve_cache (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    ttl_ms BIGINT NOT NULL,
    provenance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS valuation_cache (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    ttl_ms BIGINT NOT NULL,
    provenance TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_expiry_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_series_cache_created_at ON series_cache(created_at);
CREATE INDEX IF NOT EXISTS idx_curve_cache_created_at ON curve_cache(created_at);
CREATE INDEX IF NOT EXISTS idx_valuation_cache_created_at ON valuation_cache(created_at);
"#,
    },
];

/// Applies every migration not yet recorded in `schema_migrations`.
/// Returns the versions applied by this call.
pub fn apply_migrations(connection: &Connection) -> Result<Vec<&'static str>, ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
            applied.push(migration.version);
        }
    }

    Ok(applied)
}
