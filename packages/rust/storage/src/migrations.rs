//! Schema migrations for the benchforge local database.
//!
//! Applied in ascending version order when the database is opened.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: datasets, dataset_items",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS datasets (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dataset_items (
    id              TEXT PRIMARY KEY,
    dataset_id      TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    position        INTEGER NOT NULL,
    input_json      TEXT NOT NULL,
    expected_output TEXT NOT NULL,
    metadata_json   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE(dataset_id, position)
);

CREATE INDEX IF NOT EXISTS idx_dataset_items_dataset ON dataset_items(dataset_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Annotation cache",
            sql: r#"
CREATE TABLE IF NOT EXISTS annotation_cache (
    id          TEXT PRIMARY KEY,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
