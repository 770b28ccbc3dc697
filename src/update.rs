//! Incremental update: re-chunk changed files, re-embed what actually
//! changed, and apply minimal deltas to storage and the ANN graph.
//!
//! The caller supplies the changed-file list; the engine never scans the
//! corpus itself. Cost tracks the delta, not corpus size: unchanged
//! files are skipped on mtime, and within a changed file chunks whose
//! content hash is unchanged keep their records and only get their
//! timestamp re-stamped instead of a round trip through the provider.
//!
//! Identifiers are superseded, never reused. A changed chunk gets a new
//! record id derived from its new content; the old id is deleted from
//! the mapping and the graph and never reappears.

use crate::collection::Collection;
use crate::error::{EngineError, EngineResult};
use crate::provider::EmbeddingProvider;
use crate::staleness::{self, StalenessDetector};
use crate::storage::record::Record;
use crate::vector::types::RecordId;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome summary for one `update` call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub files_seen: usize,
    /// Files skipped because their mtime matched the indexed snapshot
    pub files_skipped: usize,
    /// Files whose records were dropped because the file is gone
    pub files_removed: usize,
    pub records_added: usize,
    pub records_removed: usize,
    /// Records kept with only their timestamps refreshed
    pub records_restamped: usize,
    /// Per-file failures that did not abort the batch
    pub errors: Vec<(PathBuf, String)>,
}

impl UpdateReport {
    /// True when the call changed nothing on disk.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.records_added == 0
            && self.records_removed == 0
            && self.records_restamped == 0
            && self.errors.is_empty()
    }
}

/// One fixed-window chunk of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk {
    index: u32,
    start_line: u32,
    end_line: u32,
    text: String,
    content_hash: String,
}

/// Splits file content into fixed windows of `lines_per_chunk` lines.
fn chunk_lines(content: &str, lines_per_chunk: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(lines_per_chunk)
        .enumerate()
        .map(|(index, window)| {
            let start_line = (index * lines_per_chunk) as u32 + 1;
            let text = window.join("\n");
            let digest = Sha256::digest(text.as_bytes());
            let content_hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            Chunk {
                index: index as u32,
                start_line,
                end_line: start_line + window.len() as u32 - 1,
                text,
                content_hash,
            }
        })
        .collect()
}

/// Language tag from a file extension, feeding the query language filter.
fn language_of(path: &Path) -> Option<String> {
    let tag = match path.extension()?.to_str()? {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "rb" => "ruby",
        "php" => "php",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "sh" | "bash" => "shell",
        _ => return None,
    };
    Some(tag.to_string())
}

/// Planned work for one changed file.
struct FileDelta {
    path: PathBuf,
    mtime: u64,
    additions: Vec<Chunk>,
    restamps: Vec<RecordId>,
    removals: Vec<RecordId>,
}

/// Applies `changed_files` to the collection.
///
/// Holds the collection write lock for the duration; concurrent queries
/// against this collection see `CollectionBusy`. The persisted mapping
/// stays the commit point: record files land first, then the mapping,
/// then deletions unlink and the graph is rewritten.
pub async fn update<P: EmbeddingProvider>(
    collection: &Collection,
    changed_files: &[PathBuf],
    provider: &P,
    lines_per_chunk: usize,
) -> EngineResult<UpdateReport> {
    let mut state = collection.try_write()?;
    let mut report = UpdateReport::default();

    if changed_files.is_empty() {
        return Ok(report);
    }

    let expected = collection.metadata().vector_dimensionality;
    let actual = provider.dimension().get();
    if actual != expected {
        return Err(EngineError::DimensionMismatch { expected, actual });
    }

    // Decide the graph strategy up front. An index that never existed is
    // built fresh after the record changes; a corrupt one aborts.
    let mut full_build = false;
    if state.ann.state() == crate::vector::ann::IndexState::Uninitialized {
        match state.ann.load() {
            Ok(()) => {}
            Err(EngineError::IndexMissing { .. }) => full_build = true,
            Err(e) => return Err(e),
        }
    }

    let corpus_root = collection.metadata().corpus_root.clone();
    let detector = StalenessDetector::new(&corpus_root);

    // Plan phase: decide per-file deltas without touching storage. A
    // path listed twice in the batch is planned once; a second delta for
    // the same file would double-apply its additions and removals.
    let mut planned: HashSet<&Path> = HashSet::new();
    let mut deltas = Vec::new();
    for path in changed_files {
        if !planned.insert(path.as_path()) {
            continue;
        }
        report.files_seen += 1;
        let existing = state.records.list_by_file(path);

        let Some(mtime) = detector.mtime_of(path) else {
            // File gone: every record of it goes too
            if !existing.is_empty() {
                report.files_removed += 1;
                deltas.push(FileDelta {
                    path: path.clone(),
                    mtime: 0,
                    additions: Vec::new(),
                    restamps: Vec::new(),
                    removals: existing,
                });
            }
            continue;
        };

        let unchanged = existing
            .first()
            .and_then(|&id| state.records.get(id))
            .is_some_and(|r| r.file_modified_at == mtime);
        if unchanged {
            report.files_skipped += 1;
            continue;
        }

        let content = match std::fs::read_to_string(corpus_root.join(path)) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "changed file unreadable, skipping");
                report.errors.push((path.clone(), e.to_string()));
                continue;
            }
        };

        let chunks = chunk_lines(&content, lines_per_chunk);
        let new_ids: HashSet<RecordId> = chunks
            .iter()
            .map(|c| RecordId::derive(path, c.index, &c.content_hash))
            .collect();

        let mut delta = FileDelta {
            path: path.clone(),
            mtime,
            additions: Vec::new(),
            restamps: Vec::new(),
            removals: existing
                .iter()
                .copied()
                .filter(|id| !new_ids.contains(id))
                .collect(),
        };
        for chunk in chunks {
            let id = RecordId::derive(path, chunk.index, &chunk.content_hash);
            if state.records.get(id).is_some() {
                // Content identical, mtime moved: refresh the stamp only
                delta.restamps.push(id);
            } else {
                delta.additions.push(chunk);
            }
        }
        deltas.push(delta);
    }

    // Embed phase: one provider batch per file with new content
    let mut prepared: Vec<(FileDelta, Vec<Record>)> = Vec::new();
    for delta in deltas {
        if delta.additions.is_empty() {
            prepared.push((delta, Vec::new()));
            continue;
        }

        let texts: Vec<&str> = delta.additions.iter().map(|c| c.text.as_str()).collect();
        let embeddings = match provider.embed(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                report.errors.push((delta.path.clone(), e.to_string()));
                continue;
            }
        };
        if embeddings.len() != delta.additions.len() {
            report.errors.push((
                delta.path.clone(),
                format!(
                    "provider returned {} embeddings for {} chunks",
                    embeddings.len(),
                    delta.additions.len()
                ),
            ));
            continue;
        }

        let codec = collection.codec();
        let language = language_of(&delta.path);
        let now = staleness::unix_now();
        let quantized: Vec<EngineResult<Record>> = delta
            .additions
            .par_iter()
            .zip(embeddings.par_iter())
            .map(|(chunk, embedding)| {
                Ok(Record {
                    id: RecordId::derive(&delta.path, chunk.index, &chunk.content_hash),
                    payload: codec.quantize(embedding)?,
                    path: delta.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    file_modified_at: delta.mtime,
                    indexed_at: now,
                    language: language.clone(),
                })
            })
            .collect();

        let mut records = Vec::new();
        for result in quantized {
            match result {
                Ok(record) => records.push(record),
                // One malformed vector fails its record, not the batch
                Err(e) => report.errors.push((delta.path.clone(), e.to_string())),
            }
        }
        prepared.push((delta, records));
    }

    if prepared.iter().all(|(d, r)| {
        r.is_empty() && d.removals.is_empty() && d.restamps.is_empty()
    }) {
        return Ok(report);
    }

    // Apply phase. Record files first, mapping commit second, unlinks and
    // the graph last.
    let mut removal_slots = Vec::new();
    let mut inserted = Vec::new();
    for (delta, records) in prepared {
        for id in delta.restamps {
            if let Some(record) = state.records.get(id) {
                let mut refreshed = record.clone();
                refreshed.file_modified_at = delta.mtime;
                refreshed.indexed_at = staleness::unix_now();
                state.records.put(refreshed)?;
                report.records_restamped += 1;
            }
        }
        for record in records {
            let id = record.id;
            state.records.put(record)?;
            state.id_map.assign(id);
            inserted.push(id);
            report.records_added += 1;
        }
        for id in delta.removals {
            // Only a mapping entry that actually existed counts; anything
            // else would overstate the report.
            if let Some(slot) = state.id_map.remove(id) {
                removal_slots.push((id, slot));
                report.records_removed += 1;
            }
        }
    }

    state
        .id_map
        .save(&collection.mapping_path())
        .map_err(|e| EngineError::Storage {
            path: collection.mapping_path(),
            source: e,
        })?;

    for (id, _) in &removal_slots {
        state.records.delete(*id)?;
    }

    if full_build {
        let entries = build_entries(collection, &state)?;
        state.ann.build(entries)?;
    } else {
        for (_, slot) in removal_slots {
            state.ann.remove(slot);
        }
        let codec = collection.codec();
        for id in inserted {
            let record =
                state
                    .records
                    .get(id)
                    .ok_or_else(|| EngineError::MappingInconsistency {
                        collection: collection.metadata().name.clone(),
                        reason: format!("record {} vanished during update", id.to_hex()),
                    })?;
            let vector = codec.dequantize(&record.payload)?;
            let slot =
                state
                    .id_map
                    .to_internal(id)
                    .ok_or_else(|| EngineError::MappingInconsistency {
                        collection: collection.metadata().name.clone(),
                        reason: format!("record {} has no slot after assign", id.to_hex()),
                    })?;
            state.ann.insert(slot, id, vector);
        }
    }
    state.ann.save()?;

    info!(
        collection = %collection.metadata().name,
        added = report.records_added,
        removed = report.records_removed,
        restamped = report.records_restamped,
        skipped = report.files_skipped,
        "update applied"
    );
    Ok(report)
}

/// Full-build entries in ascending record-id order.
fn build_entries(
    collection: &Collection,
    state: &crate::collection::CollectionState,
) -> EngineResult<Vec<(crate::vector::types::Slot, RecordId, Vec<f32>)>> {
    let codec = collection.codec();
    state
        .records
        .sorted_ids()
        .par_iter()
        .map(|&id| {
            let record = state
                .records
                .get(id)
                .ok_or_else(|| EngineError::MappingInconsistency {
                    collection: collection.metadata().name.clone(),
                    reason: format!("record {} vanished during build", id.to_hex()),
                })?;
            let slot =
                state
                    .id_map
                    .to_internal(id)
                    .ok_or_else(|| EngineError::MappingInconsistency {
                        collection: collection.metadata().name.clone(),
                        reason: format!("record {} has no slot", id.to_hex()),
                    })?;
            let vector = codec.dequantize(&record.payload)?;
            Ok((slot, id, vector))
        })
        .collect()
}
