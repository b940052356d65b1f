//! SQL migration definitions for the ConceptGraph database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
            description: "Initial schema: ingestion_jobs, graph_nodes, graph_edges",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Document ingestion jobs
CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id           TEXT PRIMARY KEY,
    file_name    TEXT NOT NULL,
    source_path  TEXT NOT NULL,
    status       TEXT NOT NULL,
    step         TEXT NOT NULL,
    worker_token TEXT NOT NULL,
    error        TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_status ON ingestion_jobs(status);

-- Concept graph nodes, one row per id
CREATE TABLE IF NOT EXISTS graph_nodes (
    id              TEXT PRIMARY KEY,
    label           TEXT NOT NULL,
    properties_json TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);

-- Typed edges; targets may reference ids not written yet
CREATE TABLE IF NOT EXISTS graph_edges (
    from_id    TEXT NOT NULL,
    rel_type   TEXT NOT NULL,
    to_id      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, rel_type, to_id)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_to ON graph_edges(to_id, rel_type);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
