// SPDX-License-Identifier: MIT
//! Optional single-file disk cache for the embedding index.
//!
//! Written once when the engine shuts down and loaded (model-checked) at
//! construction, so a restart does not have to re-embed the whole history.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::HistoryIndex;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    model: String,
    entries: Vec<CacheEntry>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    hash: String,
    command: String,
    embedding: Vec<f32>,
}

impl HistoryIndex {
    /// Write the current index (redacted commands + embeddings) to disk in
    /// a single write.
    pub fn save_cache(&self, path: &Path, model: &str) -> Result<()> {
        let inner = self.inner.read().expect("history lock");

        let entries: Vec<CacheEntry> = inner
            .commands
            .iter()
            .filter_map(|(hash, command)| {
                inner.graph.lookup(hash).map(|vec| CacheEntry {
                    hash: hash.clone(),
                    command: command.clone(),
                    embedding: vec.to_vec(),
                })
            })
            .collect();

        let data = serde_json::to_vec(&CacheFile {
            model: model.to_string(),
            entries,
        })?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load a previously saved index. Entries written by a different
    /// embedding model are silently discarded. A successful non-empty load
    /// signals init-done so searches work before the first refresh.
    pub fn load_cache(&self, path: &Path, model: &str) -> Result<()> {
        let data = std::fs::read(path)?;
        let cf: CacheFile = serde_json::from_slice(&data)?;

        if cf.model != model {
            return Ok(());
        }

        let loaded = !cf.entries.is_empty();
        {
            let mut inner = self.inner.write().expect("history lock");
            for entry in cf.entries {
                inner.commands.insert(entry.hash.clone(), entry.command);
                inner.graph.insert(entry.hash, entry.embedding);
            }
        }

        if loaded {
            self.signal_init();
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::HistoryIndex;

    fn empty_index() -> HistoryIndex {
        HistoryIndex::with_path(None, None, 3000, Duration::from_secs(3600))
    }

    fn seeded_index() -> HistoryIndex {
        let idx = empty_index();
        {
            let mut inner = idx.inner.write().unwrap();
            inner
                .commands
                .insert("h1".to_string(), "git status".to_string());
            inner.graph.insert("h1".to_string(), vec![1.0, 0.0]);
            inner.commands.insert("h2".to_string(), "ls -la".to_string());
            inner.graph.insert("h2".to_string(), vec![0.0, 1.0]);
        }
        idx
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        seeded_index().save_cache(&path, "model-a").unwrap();

        let restored = empty_index();
        restored.load_cache(&path, "model-a").unwrap();

        let inner = restored.inner.read().unwrap();
        assert_eq!(inner.graph.len(), 2);
        assert_eq!(inner.commands["h1"], "git status");
        assert_eq!(inner.graph.lookup("h2"), Some(&[0.0, 1.0][..]));
        drop(inner);
        assert!(restored.init_done());
    }

    #[test]
    fn load_discards_on_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        seeded_index().save_cache(&path, "model-a").unwrap();

        let restored = empty_index();
        restored.load_cache(&path, "model-b").unwrap();

        assert!(restored.inner.read().unwrap().graph.is_empty());
        assert!(!restored.init_done());
    }

    #[test]
    fn load_missing_file_errors() {
        let idx = empty_index();
        assert!(idx
            .load_cache(std::path::Path::new("/nonexistent/cache.json"), "m")
            .is_err());
    }

    #[test]
    fn empty_save_does_not_signal_init_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        empty_index().save_cache(&path, "model-a").unwrap();

        let restored = empty_index();
        restored.load_cache(&path, "model-a").unwrap();
        assert!(!restored.init_done());
    }
}
