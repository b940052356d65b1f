//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding ingestion jobs and
//! the materialized concept graph (nodes and typed edges).
//!
//! **Access rules:**
//! - ingestion (CLI `ingest`, `cancel`, `graph edit`): read-write via [`Storage::open`]
//! - browsing and progress polling may use [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use conceptgraph_shared::{
    ConceptGraphError, GraphNode, GraphRelationship, IngestionJob, JobId, JobStatus, JobStep,
    NodeLabel, Result,
};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> ConceptGraphError {
    ConceptGraphError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConceptGraphError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConceptGraphError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ConceptGraphError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ConceptGraphError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ingestion job operations
    // -----------------------------------------------------------------------

    /// Insert a new ingestion job record.
    pub async fn insert_job(&self, job: &IngestionJob) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO ingestion_jobs
                   (id, file_name, source_path, status, step, worker_token, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.to_string(),
                    job.file_name.as_str(),
                    job.source_path.as_str(),
                    job.status.as_str(),
                    job.step.as_str(),
                    job.worker_token.as_str(),
                    job.error.as_deref(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<IngestionJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, file_name, source_path, status, step, worker_token, error, created_at, updated_at
                 FROM ingestion_jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<IngestionJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, file_name, source_path, status, step, worker_token, error, created_at, updated_at
                 FROM ingestion_jobs ORDER BY created_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Write `status` and `step` together, but only while the job is not
    /// terminal. Returns `false` when no row changed (unknown id, or the job
    /// already reached a terminal status).
    pub async fn transition_job(
        &self,
        id: &JobId,
        status: JobStatus,
        step: JobStep,
        error: Option<&str>,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE ingestion_jobs
                 SET status = ?1, step = ?2, error = COALESCE(?3, error), updated_at = ?4
                 WHERE id = ?5 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![status.as_str(), step.as_str(), error, now.as_str(), id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Graph operations
    // -----------------------------------------------------------------------

    /// Create the node or merge `properties` into the existing one.
    /// Keys whose value is `null` are removed.
    pub async fn upsert_graph_node(&self, node: &GraphNode) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let props = serde_json::Value::Object(node.properties.clone()).to_string();
        self.conn
            .execute(
                "INSERT INTO graph_nodes (id, label, properties_json, created_at, updated_at)
                 VALUES (?1, ?2, json_patch('{}', ?3), ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   label = excluded.label,
                   properties_json = json_patch(graph_nodes.properties_json, ?3),
                   updated_at = excluded.updated_at",
                params![node.id.as_str(), node.label.as_str(), props, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Create the edge unless the same `(from, type, to)` already exists.
    pub async fn merge_graph_relationship(&self, rel: &GraphRelationship) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO graph_edges (from_id, rel_type, to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(from_id, rel_type, to_id) DO NOTHING",
                params![rel.from.as_str(), rel.rel_type.as_str(), rel.to.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a graph node by id.
    pub async fn get_graph_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, label, properties_json FROM graph_nodes WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_node(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Number of stored nodes.
    pub async fn count_graph_nodes(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM graph_nodes", None).await
    }

    /// Number of stored edges, optionally restricted to one type.
    pub async fn count_relationships(&self, rel_type: Option<&str>) -> Result<u64> {
        match rel_type {
            Some(t) => {
                self.count("SELECT COUNT(*) FROM graph_edges WHERE rel_type = ?1", Some(t))
                    .await
            }
            None => self.count("SELECT COUNT(*) FROM graph_edges", None).await,
        }
    }

    async fn count(&self, sql: &str, arg: Option<&str>) -> Result<u64> {
        let mut rows = match arg {
            Some(a) => self.conn.query(sql, params![a]).await,
            None => self.conn.query(sql, params![]).await,
        }
        .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Outgoing edges of a node, ordered by type then target.
    pub async fn relationships_from(&self, from_id: &str) -> Result<Vec<GraphRelationship>> {
        let mut rows = self
            .conn
            .query(
                "SELECT from_id, rel_type, to_id FROM graph_edges
                 WHERE from_id = ?1 ORDER BY rel_type, to_id",
                params![from_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(GraphRelationship {
                from: row.get::<String>(0).map_err(storage_err)?,
                rel_type: row.get::<String>(1).map_err(storage_err)?,
                to: row.get::<String>(2).map_err(storage_err)?,
            });
        }
        Ok(results)
    }

    /// Concept nodes that are nobody's `HAS_CHILD` target.
    pub async fn root_concepts(&self) -> Result<Vec<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT n.id, n.label, n.properties_json FROM graph_nodes n
                 WHERE n.label = 'Concept'
                   AND NOT EXISTS (
                     SELECT 1 FROM graph_edges e
                     WHERE e.to_id = n.id AND e.rel_type = 'HAS_CHILD'
                   )
                 ORDER BY n.id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_node(&row)?);
        }
        Ok(results)
    }

    /// Nodes one hop below `id`: targets of `HAS_CHILD`, `PROCEDURAL_FOR`
    /// and `ASSESSES` edges that exist in the store.
    pub async fn children_of(&self, id: &str) -> Result<Vec<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT n.id, n.label, n.properties_json FROM graph_nodes n
                 WHERE n.id IN (
                   SELECT e.to_id FROM graph_edges e
                   WHERE e.from_id = ?1
                     AND e.rel_type IN ('HAS_CHILD', 'PROCEDURAL_FOR', 'ASSESSES')
                 )
                 ORDER BY n.id",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_node(&row)?);
        }
        Ok(results)
    }

    /// Merge `properties` into an existing node without creating one.
    /// Returns `false` when no node has this id.
    pub async fn update_node_properties(
        &self,
        id: &str,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let props = serde_json::Value::Object(properties.clone()).to_string();
        let changed = self
            .conn
            .execute(
                "UPDATE graph_nodes
                 SET properties_json = json_patch(properties_json, ?1), updated_at = ?2
                 WHERE id = ?3",
                params![props, now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConceptGraphError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to an [`IngestionJob`].
fn row_to_job(row: &libsql::Row) -> Result<IngestionJob> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let step: String = row.get(4).map_err(storage_err)?;
    let created_at: String = row.get(7).map_err(storage_err)?;
    let updated_at: String = row.get(8).map_err(storage_err)?;

    Ok(IngestionJob {
        id: id
            .parse()
            .map_err(|e| ConceptGraphError::Storage(format!("invalid job id {id}: {e}")))?,
        file_name: row.get::<String>(1).map_err(storage_err)?,
        source_path: row.get::<String>(2).map_err(storage_err)?,
        status: status.parse()?,
        step: step.parse()?,
        worker_token: row.get::<String>(5).map_err(storage_err)?,
        error: row.get::<String>(6).ok(),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Convert a database row to a [`GraphNode`].
fn row_to_node(row: &libsql::Row) -> Result<GraphNode> {
    let label: String = row.get(1).map_err(storage_err)?;
    let props: String = row.get(2).map_err(storage_err)?;
    let properties = match serde_json::from_str::<serde_json::Value>(&props).map_err(storage_err)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    Ok(GraphNode {
        id: row.get::<String>(0).map_err(storage_err)?,
        label: label.parse::<NodeLabel>()?,
        properties,
    })
}
