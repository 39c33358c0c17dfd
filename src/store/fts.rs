//! Full-text side of the store, built on tantivy.
//!
//! The tantivy index only holds `id`, `path`, and the indexed `content`;
//! search returns row ids which the store resolves against its row table.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::Result;

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug)]
pub struct FtsIndex {
    index: Index,
    f_id: Field,
    f_path: Field,
    f_content: Field,
}

impl FtsIndex {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_path = schema_builder.add_text_field("path", STRING);
        let f_content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            Index::create_in_dir(dir, schema)?
        };

        Ok(Self {
            index,
            f_id,
            f_path,
            f_content,
        })
    }

    /// Index `(id, path, content)` triples and commit.
    pub fn add(&self, rows: &[(String, String, String)]) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        for (id, path, content) in rows {
            writer.add_document(doc!(
                self.f_id => id.clone(),
                self.f_path => path.clone(),
                self.f_content => content.clone(),
            ))?;
        }
        writer.commit()?;
        Ok(())
    }

    pub fn delete_path(&self, path: &str) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_term(tantivy::Term::from_field_text(self.f_path, path));
        writer.commit()?;
        Ok(())
    }

    /// Ranked row ids for a query. Lenient parsing: code-ish queries full
    /// of `::` and punctuation must degrade, not error.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.f_content]);
        let (query, _errors) = query_parser.parse_query_lenient(query_str);

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id) = doc.get_first(self.f_id).and_then(|v| v.as_str()) {
                hits.push((id.to_string(), score));
            }
        }
        Ok(hits)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index(dir: &Path) -> FtsIndex {
        let fts = FtsIndex::open_or_create(dir).unwrap();
        fts.add(&[
            (
                "1".to_string(),
                "src/db.rs".to_string(),
                "async fn connect to the database pool".to_string(),
            ),
            (
                "2".to_string(),
                "src/http.rs".to_string(),
                "http request handler returning json".to_string(),
            ),
        ])
        .unwrap();
        fts
    }

    #[test]
    fn test_search_finds_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let fts = sample_index(dir.path());
        let hits = fts.search("database pool", 10).unwrap();
        assert_eq!(hits[0].0, "1");
    }

    #[test]
    fn test_delete_path_removes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let fts = sample_index(dir.path());
        fts.delete_path("src/db.rs").unwrap();
        let hits = fts.search("database", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_lenient_parse_of_code_queries() {
        let dir = tempfile::tempdir().unwrap();
        let fts = sample_index(dir.path());
        // would be a parse error in strict mode
        let hits = fts.search("connect() AND/OR ::pool", 10);
        assert!(hits.is_ok());
    }

    #[test]
    fn test_reopen_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            sample_index(dir.path());
        }
        let fts = FtsIndex::open_or_create(dir.path()).unwrap();
        let hits = fts.search("handler", 10).unwrap();
        assert_eq!(hits[0].0, "2");
    }
}
