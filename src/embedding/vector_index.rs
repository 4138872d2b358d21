/// Persistent vector collection with exact cosine search
use crate::error::{KnowbaseError, Result};
use crate::ingest::{Chunk, SourceMetadata};
use crate::storage::Database;
use rusqlite::{params, OptionalExtension};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// A chunk stored in a collection together with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Unique within the collection; increases with insertion order
    pub entry_id: i64,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Search result with the matched entry and its similarity to the query
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: Arc<IndexEntry>,
    /// Cosine similarity, higher is more similar
    pub similarity: f32,
}

/// Named, persisted collection of embedded chunks
///
/// Entries live in SQLite and are mirrored in memory for search. Searches
/// run concurrently; `add`, `replace_all`, and `reset` are serialized and
/// only become visible once their transaction has committed.
///
/// A collection also remembers whether it has ever been built, so an
/// intentionally empty collection can be told apart from a new one.
pub struct VectorIndex {
    database: Arc<Database>,
    name: String,
    dimension: usize,
    entries: RwLock<Vec<Arc<IndexEntry>>>,
    built: AtomicBool,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Open the collection `name`, creating it when missing
    ///
    /// Every persisted entry is verified on load; any mismatch fails with
    /// `IndexCorrupted`.
    pub fn open(database: Arc<Database>, name: &str, dimension: usize, model: &str) -> Result<Self> {
        if dimension == 0 {
            return Err(KnowbaseError::validation(
                "dimension",
                "must be greater than 0",
            ));
        }

        let conn = database.get_conn()?;

        let existing: Option<(i64, String, Option<i64>)> = conn
            .query_row(
                "SELECT dimension, model, built_at FROM collections WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let built = match existing {
            Some((stored, _, _)) if stored as usize != dimension => {
                return Err(KnowbaseError::DimensionMismatch {
                    expected: stored as usize,
                    actual: dimension,
                });
            }
            Some((_, stored_model, built_at)) => {
                if stored_model != model {
                    tracing::warn!(
                        "Collection {} was built with {}, now using {}",
                        name,
                        stored_model,
                        model
                    );
                }
                built_at.is_some()
            }
            None => {
                conn.execute(
                    "INSERT INTO collections (name, dimension, model, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![name, dimension as i64, model, chrono::Utc::now().timestamp()],
                )?;
                info!("Created collection {} ({}D)", name, dimension);
                false
            }
        };

        let entries = load_entries(&conn, name, dimension)?;
        debug!("Loaded {} entries from collection {}", entries.len(), name);

        Ok(Self {
            database,
            name: name.to_string(),
            dimension,
            entries: RwLock::new(entries),
            built: AtomicBool::new(built),
            writer: Mutex::new(()),
        })
    }

    /// Append entries as one atomic batch; returns their ids
    ///
    /// No deduplication happens here.
    pub fn add(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<Vec<i64>> {
        self.check_vectors(&items)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let added = self.write_batch(items, false)?;
        let ids = added.iter().map(|e| e.entry_id).collect();

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(added);

        Ok(ids)
    }

    /// Drop every entry and insert `items` in a single transaction
    ///
    /// Also records the collection as built.
    pub fn replace_all(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<Vec<i64>> {
        self.check_vectors(&items)?;

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let added = self.write_batch(items, true)?;
        let ids = added.iter().map(|e| e.entry_id).collect();

        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = added;
        self.built.store(true, Ordering::SeqCst);

        info!("Replaced contents of collection {}", self.name);
        Ok(ids)
    }

    /// Remove all entries; the collection stays built, and empty
    pub fn reset(&self) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM entries WHERE collection = ?1",
            params![self.name],
        )?;
        record_built(&tx, &self.name)?;
        tx.commit()?;

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.built.store(true, Ordering::SeqCst);

        info!("Reset collection {}", self.name);
        Ok(())
    }

    /// Record that the collection has been built, even when it holds nothing
    pub fn mark_built(&self) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let conn = self.database.get_conn()?;
        record_built(&conn, &self.name)?;
        self.built.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether a build, reload, or reset has ever been recorded
    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::SeqCst)
    }

    /// Up to `fetch_k` nearest entries, most similar first
    ///
    /// Equal similarities keep insertion order. An empty collection yields
    /// an empty result.
    pub fn search(&self, query: &[f32], fetch_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(KnowbaseError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(KnowbaseError::validation(
                "query",
                "embedding contains non-finite values",
            ));
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut results: Vec<SearchResult> = entries
            .iter()
            .map(|entry| SearchResult {
                similarity: cosine_similarity(query, &entry.embedding),
                entry: Arc::clone(entry),
            })
            .collect();
        drop(entries);

        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.entry.entry_id.cmp(&b.entry.entry_id))
        });
        results.truncate(fetch_k);

        Ok(results)
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct sources in insertion order
    pub fn sources(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = std::collections::HashSet::new();
        entries
            .iter()
            .filter(|e| seen.insert(e.chunk.parent_source_id.as_str()))
            .map(|e| e.chunk.parent_source_id.clone())
            .collect()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every vector must have the collection's dimension and finite components
    fn check_vectors(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()> {
        for (chunk, vector) in items {
            if vector.len() != self.dimension {
                return Err(KnowbaseError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(KnowbaseError::validation(
                    "embedding",
                    format!(
                        "chunk {} of {} contains non-finite values",
                        chunk.chunk_index, chunk.parent_source_id
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Persist a batch in one transaction, optionally clearing first
    fn write_batch(
        &self,
        items: Vec<(Chunk, Vec<f32>)>,
        clear_first: bool,
    ) -> Result<Vec<Arc<IndexEntry>>> {
        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;

        if clear_first {
            tx.execute(
                "DELETE FROM entries WHERE collection = ?1",
                params![self.name],
            )?;
            record_built(&tx, &self.name)?;
        }

        let mut added = Vec::with_capacity(items.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries
                    (collection, source, chunk_index, char_offset, char_length, text, metadata, vector, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for (chunk, embedding) in items {
                let vector = encode_vector(&embedding);
                let metadata =
                    serde_json::to_string(&chunk.metadata).map_err(|e| KnowbaseError::Json {
                        source: e,
                        context: "Failed to encode chunk metadata".to_string(),
                    })?;

                stmt.execute(params![
                    self.name,
                    chunk.parent_source_id,
                    chunk.chunk_index as i64,
                    chunk.offset as i64,
                    chunk.length as i64,
                    chunk.text,
                    metadata,
                    vector,
                    checksum(&vector, &chunk.text),
                ])?;

                added.push(Arc::new(IndexEntry {
                    entry_id: tx.last_insert_rowid(),
                    chunk,
                    embedding,
                }));
            }
        }

        tx.commit()?;
        debug!("Persisted {} entries to {}", added.len(), self.name);

        Ok(added)
    }
}

/// Cosine similarity; 0.0 when either vector has zero length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    // Also folds -0.0 into 0.0 so orthogonal entries tie under total_cmp
    if mag_a == 0.0 || mag_b == 0.0 || dot == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn record_built(conn: &rusqlite::Connection, name: &str) -> Result<()> {
    conn.execute(
        "UPDATE collections SET built_at = ?2 WHERE name = ?1",
        params![name, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn checksum(vector: &[u8], text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(vector);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Row as stored, before verification
struct StoredEntry {
    id: i64,
    source: String,
    chunk_index: i64,
    offset: i64,
    length: i64,
    text: String,
    metadata: String,
    vector: Vec<u8>,
    checksum: String,
}

impl StoredEntry {
    fn verify(self, dimension: usize) -> Result<IndexEntry> {
        let corrupted =
            |what: &str| KnowbaseError::IndexCorrupted(format!("entry {}: {}", self.id, what));

        if checksum(&self.vector, &self.text) != self.checksum {
            return Err(corrupted("checksum mismatch"));
        }

        let embedding = decode_vector(&self.vector, dimension).ok_or_else(|| {
            corrupted(&format!(
                "vector holds {} bytes, expected {}",
                self.vector.len(),
                dimension * 4
            ))
        })?;

        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(corrupted("vector contains non-finite values"));
        }

        let metadata: SourceMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| corrupted(&format!("bad metadata: {}", e)))?;

        let to_usize = |value: i64, field: &str| {
            usize::try_from(value).map_err(|_| corrupted(&format!("negative {}", field)))
        };

        Ok(IndexEntry {
            entry_id: self.id,
            chunk: Chunk {
                parent_source_id: self.source.clone(),
                chunk_index: to_usize(self.chunk_index, "chunk_index")?,
                text: self.text.clone(),
                offset: to_usize(self.offset, "offset")?,
                length: to_usize(self.length, "length")?,
                metadata,
            },
            embedding,
        })
    }
}

fn load_entries(
    conn: &rusqlite::Connection,
    name: &str,
    dimension: usize,
) -> Result<Vec<Arc<IndexEntry>>> {
    let mut stmt = conn.prepare(
        "SELECT id, source, chunk_index, char_offset, char_length, text, metadata, vector, checksum
         FROM entries WHERE collection = ?1 ORDER BY id",
    )?;

    let rows = stmt.query_map(params![name], |row| {
        Ok(StoredEntry {
            id: row.get(0)?,
            source: row.get(1)?,
            chunk_index: row.get(2)?,
            offset: row.get(3)?,
            length: row.get(4)?,
            text: row.get(5)?,
            metadata: row.get(6)?,
            vector: row.get(7)?,
            checksum: row.get(8)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(Arc::new(row?.verify(dimension)?));
    }
    Ok(entries)
}
