//! Disk-backed store: a row file persisted whole with write-then-rename,
//! a tantivy index for full-text retrieval, and an in-memory IVF-flat
//! index for vector search above the training threshold.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::fts::FtsIndex;
use super::ivf::{self, IvfFlat};
use super::{Predicate, ScoredRow, Store};
use crate::config::VECTOR_INDEX_MIN_ROWS;
use crate::error::{Error, Result};
use crate::meta::write_atomic;
use crate::models::ChunkRow;

const SCHEMA_FILE: &str = "schema.json";
const ROWS_FILE: &str = "rows.json";
const FTS_DIR: &str = "fts";
const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct StoreSchema {
    version: u32,
    dim: usize,
    columns: Vec<String>,
}

fn canonical_columns() -> Vec<String> {
    [
        "id",
        "path",
        "hash",
        "content",
        "start_line",
        "end_line",
        "chunk_index",
        "is_anchor",
        "context_prev",
        "context_next",
        "vector",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug)]
struct RowTable {
    rows: Vec<ChunkRow>,
    by_id: HashMap<String, usize>,
}

impl RowTable {
    fn new(rows: Vec<ChunkRow>) -> Self {
        let by_id = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self { rows, by_id }
    }
}

#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    dim: usize,
    table: RwLock<RowTable>,
    fts: FtsIndex,
    ivf: RwLock<Option<IvfFlat>>,
}

impl DiskStore {
    /// Open the store at `dir`, creating it with the canonical schema if
    /// absent, and migrating the schema if it predates the context
    /// columns. Migration must run under the repository writer lock.
    pub fn open_or_create(dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let schema_path = dir.join(SCHEMA_FILE);
        let rows_path = dir.join(ROWS_FILE);

        let mut needs_rewrite = false;
        match std::fs::read_to_string(&schema_path) {
            Ok(data) => {
                let schema: StoreSchema = serde_json::from_str(&data).map_err(|e| {
                    Error::SchemaMigration(format!(
                        "unreadable schema at {}: {e}; delete the store directory to rebuild",
                        schema_path.display()
                    ))
                })?;
                if schema.dim != dim {
                    return Err(Error::SchemaMigration(format!(
                        "store was created with dimension {}, expected {dim}; \
                         delete the store directory to rebuild",
                        schema.dim
                    )));
                }
                let missing: Vec<&str> = ["context_prev", "context_next"]
                    .into_iter()
                    .filter(|c| !schema.columns.iter().any(|s| s == c))
                    .collect();
                if !missing.is_empty() {
                    tracing::info!(
                        "migrating store schema: adding columns {:?}",
                        missing
                    );
                    needs_rewrite = true;
                }
            }
            Err(_) => needs_rewrite = true,
        }

        // Older rows deserialize with empty context columns via serde
        // defaults; the rewrite below makes that permanent.
        let rows: Vec<ChunkRow> = match std::fs::read_to_string(&rows_path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                Error::SchemaMigration(format!(
                    "unreadable row file at {}: {e}; delete the store directory to rebuild",
                    rows_path.display()
                ))
            })?,
            Err(_) => Vec::new(),
        };

        if needs_rewrite {
            let schema = StoreSchema {
                version: SCHEMA_VERSION,
                dim,
                columns: canonical_columns(),
            };
            write_atomic(&schema_path, serde_json::to_string_pretty(&schema)?.as_bytes())?;
            write_atomic(&rows_path, serde_json::to_vec(&rows)?.as_slice())?;
        }

        let fts = FtsIndex::open_or_create(&dir.join(FTS_DIR))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            dim,
            table: RwLock::new(RowTable::new(rows)),
            fts,
            ivf: RwLock::new(None),
        })
    }

    fn persist(&self, rows: &[ChunkRow]) -> Result<()> {
        write_atomic(&self.dir.join(ROWS_FILE), serde_json::to_vec(rows)?.as_slice())?;
        Ok(())
    }
}

impl Store for DiskStore {
    fn add(&self, rows: Vec<ChunkRow>) -> Result<()> {
        // Reject the whole batch before mutating anything.
        for row in &rows {
            if row.vector.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    got: row.vector.len(),
                    want: self.dim,
                });
            }
        }

        let triples: Vec<(String, String, String)> = rows
            .iter()
            .map(|r| (r.id.clone(), r.path.clone(), r.content.clone()))
            .collect();

        {
            let mut table = self.table.write();
            for row in rows {
                let idx = table.rows.len();
                table.by_id.insert(row.id.clone(), idx);
                table.rows.push(row);
            }
            self.persist(&table.rows)?;
        }

        self.fts.add(&triples)?;
        *self.ivf.write() = None;
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<()> {
        {
            let mut table = self.table.write();
            let rows = std::mem::take(&mut table.rows);
            let kept: Vec<ChunkRow> = rows.into_iter().filter(|r| r.path != path).collect();
            *table = RowTable::new(kept);
            self.persist(&table.rows)?;
        }
        self.fts.delete_path(path)?;
        *self.ivf.write() = None;
        Ok(())
    }

    fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<Vec<ScoredRow>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                got: query.len(),
                want: self.dim,
            });
        }

        let table = self.table.read();

        // The IVF lists index the unfiltered row set, so filtered queries
        // take the flat path.
        if filter.is_none() {
            if let Some(index) = self.ivf.read().as_ref() {
                let refs: Vec<&[f32]> = table.rows.iter().map(|r| r.vector.as_slice()).collect();
                return Ok(index
                    .search(query, k, &refs)
                    .into_iter()
                    .map(|(i, score)| ScoredRow {
                        row: table.rows[i].clone(),
                        score,
                    })
                    .collect());
            }
        }

        let mut hits: Vec<ScoredRow> = table
            .rows
            .iter()
            .filter(|r| filter.map_or(true, |p| p.matches(&r.path)))
            .map(|r| ScoredRow {
                row: r.clone(),
                score: ivf::distance(query, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn fts_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<Vec<ScoredRow>> {
        // Over-fetch so a path filter can still fill k results.
        let raw = self.fts.search(query, k.saturating_mul(2))?;
        let table = self.table.read();

        let mut hits = Vec::new();
        for (id, score) in raw {
            let Some(&idx) = table.by_id.get(&id) else {
                continue;
            };
            let row = &table.rows[idx];
            if filter.map_or(true, |p| p.matches(&row.path)) {
                hits.push(ScoredRow {
                    row: row.clone(),
                    score,
                });
            }
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    fn create_fts_index(&self) -> Result<()> {
        // add() and delete_path() commit eagerly, so the index is always
        // current; an empty commit here would still rewrite tantivy's
        // meta file and dirty the store on every no-op sync.
        Ok(())
    }

    fn create_vector_index(&self) -> Result<()> {
        let table = self.table.read();
        if table.rows.len() < VECTOR_INDEX_MIN_ROWS {
            tracing::debug!(
                "skipping vector index: {} rows < {VECTOR_INDEX_MIN_ROWS}",
                table.rows.len()
            );
            return Ok(());
        }
        if self.ivf.read().is_some() {
            return Ok(());
        }

        let refs: Vec<&[f32]> = table.rows.iter().map(|r| r.vector.as_slice()).collect();
        match IvfFlat::build(&refs) {
            Some(index) => *self.ivf.write() = Some(index),
            None => tracing::warn!("IVF training not possible; keeping flat scan"),
        }
        Ok(())
    }

    fn count_rows(&self) -> Result<usize> {
        Ok(self.table.read().rows.len())
    }

    fn paths(&self) -> Result<Vec<String>> {
        let table = self.table.read();
        let set: BTreeSet<String> = table.rows.iter().map(|r| r.path.clone()).collect();
        Ok(set.into_iter().collect())
    }

    fn close(&self) -> Result<()> {
        // All mutations persist eagerly; nothing buffered to flush.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, path: &str, content: &str, vector: Vec<f32>) -> ChunkRow {
        ChunkRow {
            id: id.to_string(),
            path: path.to_string(),
            hash: "h".to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 2,
            chunk_index: 0,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector,
        }
    }

    #[test]
    fn test_add_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        store
            .add(vec![row("1", "a.rs", "alpha", vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        let err = store
            .add(vec![row("1", "a.rs", "alpha", vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { got: 2, want: 3 }
        ));
        assert_eq!(store.count_rows().unwrap(), 0);
    }

    #[test]
    fn test_vector_search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        store
            .add(vec![
                row("1", "a.rs", "alpha", vec![1.0, 0.0, 0.0]),
                row("2", "b.rs", "beta", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let hits = store.vector_search(&[0.9, 0.1, 0.0], 10, None).unwrap();
        assert_eq!(hits[0].row.path, "a.rs");
        assert!(hits[0].score < hits[1].score);
    }

    #[test]
    fn test_fts_search_with_path_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        store
            .add(vec![
                row("1", "src/a.rs", "database pool", vec![1.0, 0.0, 0.0]),
                row("2", "tests/b.rs", "database fixture", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let filter = Predicate::PathPrefix("src/".to_string());
        let hits = store.fts_search("database", 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row.path, "src/a.rs");
    }

    #[test]
    fn test_delete_path_removes_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        store
            .add(vec![
                row("1", "a.rs", "alpha thing", vec![1.0, 0.0, 0.0]),
                row("2", "b.rs", "beta thing", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        store.delete_path("a.rs").unwrap();

        assert_eq!(store.paths().unwrap(), vec!["b.rs".to_string()]);
        assert!(store
            .fts_search("alpha", 10, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
            store
                .add(vec![row("1", "a.rs", "alpha", vec![1.0, 0.0, 0.0])])
                .unwrap();
        }
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn test_migration_fills_missing_context_columns() {
        let dir = tempfile::tempdir().unwrap();
        // Simulate a store written before the context columns existed.
        let old_schema = serde_json::json!({
            "version": 1,
            "dim": 3,
            "columns": ["id", "path", "hash", "content", "start_line",
                        "end_line", "chunk_index", "is_anchor", "vector"],
        });
        std::fs::write(dir.path().join(SCHEMA_FILE), old_schema.to_string()).unwrap();
        let old_rows = serde_json::json!([{
            "id": "1", "path": "a.rs", "hash": "h", "content": "alpha",
            "start_line": 1, "end_line": 2, "chunk_index": 0,
            "is_anchor": false, "vector": [1.0, 0.0, 0.0],
        }]);
        std::fs::write(dir.path().join(ROWS_FILE), old_rows.to_string()).unwrap();

        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        let hits = store.vector_search(&[1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].row.context_prev, "");
        assert_eq!(hits[0].row.context_next, "");

        // schema on disk now carries the canonical columns
        let schema: StoreSchema =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(SCHEMA_FILE)).unwrap())
                .unwrap();
        assert!(schema.columns.iter().any(|c| c == "context_prev"));
        assert_eq!(schema.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_dimension_change_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        {
            DiskStore::open_or_create(dir.path(), 3).unwrap();
        }
        let err = DiskStore::open_or_create(dir.path(), 4).unwrap_err();
        assert!(matches!(err, Error::SchemaMigration(_)));
    }

    #[test]
    fn test_vector_index_noop_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_or_create(dir.path(), 3).unwrap();
        store
            .add(vec![row("1", "a.rs", "alpha", vec![1.0, 0.0, 0.0])])
            .unwrap();
        store.create_vector_index().unwrap();
        // flat scan still answers
        let hits = store.vector_search(&[1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
