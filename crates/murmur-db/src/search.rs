//! Full-text index stored in the `search_index` FTS5 table.
//!
//! Documents are namespaced by index name so several entity kinds can share
//! the table.

use crate::Database;
use anyhow::Result;

impl Database {
    /// Inserts or replaces the document `doc_id` in `index`.
    pub fn fts_add(&self, index: &str, doc_id: &str, content: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM search_index WHERE idx = ?1 AND doc_id = ?2",
                (index, doc_id),
            )?;
            tx.execute(
                "INSERT INTO search_index (idx, doc_id, content) VALUES (?1, ?2, ?3)",
                (index, doc_id, content),
            )?;
            Ok(())
        })
    }

    pub fn fts_remove(&self, index: &str, doc_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM search_index WHERE idx = ?1 AND doc_id = ?2",
                (index, doc_id),
            )?;
            Ok(())
        })
    }

    /// Returns one page of matching document ids, best match first, and the
    /// total number of matches.
    pub fn fts_query(
        &self,
        index: &str,
        query: &str,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<String>, u64)> {
        let Some(expr) = match_expression(query) else {
            return Ok((vec![], 0));
        };

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM search_index WHERE search_index MATCH ?1 AND idx = ?2",
                (&expr, index),
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT doc_id FROM search_index
                 WHERE search_index MATCH ?1 AND idx = ?2
                 ORDER BY rank
                 LIMIT ?3 OFFSET ?4",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![expr, index, limit, offset as i64], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((ids, total as u64))
        })
    }
}

/// Builds an FTS5 expression matching any of the words in `query`. Each word
/// is quoted so user input cannot inject FTS operators.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
