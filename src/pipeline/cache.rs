use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Sentence → translation store for one target language, persisted as a
/// JSON object. Saving merges with whatever is on disk so concurrent runs
/// sharing the file do not drop each other's entries.
pub struct TranslationCache {
    path: PathBuf,
    entries: HashMap<String, String>,
    dirty: HashSet<String>,
    hits: usize,
    misses: usize,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f64,
}

impl TranslationCache {
    pub fn path_for(dir: &Path, target_language: &str) -> PathBuf {
        dir.join(format!("translations.{target_language}.json"))
    }

    /// Loads the cache file; a missing or unreadable file yields an empty cache.
    pub fn open(dir: &Path, target_language: &str) -> Self {
        let path = Self::path_for(dir, target_language);
        let entries = match read_entries(&path) {
            Ok(Some(entries)) => {
                info!(path = %path.display(), entries = entries.len(), "translation cache loaded");
                entries
            }
            Ok(None) => {
                debug!(path = %path.display(), "new translation cache");
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "translation cache unreadable, starting empty");
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: HashSet::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        match self.entries.get(text) {
            Some(t) => {
                self.hits += 1;
                Some(t.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, text: &str, translation: &str) {
        if text.trim().is_empty() || translation.trim().is_empty() {
            return;
        }
        if self.entries.get(text).map(String::as_str) == Some(translation) {
            return;
        }
        self.entries
            .insert(text.to_string(), translation.to_string());
        self.dirty.insert(text.to_string());
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total > 0 {
                self.hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Writes the cache if it changed. The file is re-read first and this
    /// instance's new entries are laid over it, then the result replaces the
    /// file through a temporary in the same directory.
    pub fn save(&mut self) -> anyhow::Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create cache dir: {}", dir.display()))?;

        let mut merged = read_entries(&self.path)
            .unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %format!("{e:#}"), "existing cache unreadable, overwriting");
                None
            })
            .unwrap_or_default();
        for key in &self.dirty {
            if let Some(v) = self.entries.get(key) {
                merged.insert(key.clone(), v.clone());
            }
        }

        let json = {
            let sorted: BTreeMap<&String, &String> = merged.iter().collect();
            serde_json::to_string_pretty(&sorted).context("serialize cache")?
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".translations-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .context("create temporary cache file")?;
        tmp.write_all(json.as_bytes())
            .context("write temporary cache file")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("replace cache: {}", self.path.display()))?;

        info!(path = %self.path.display(), entries = merged.len(), "translation cache saved");
        for (k, v) in merged {
            self.entries.entry(k).or_insert(v);
        }
        self.dirty.clear();
        Ok(())
    }
}

impl Drop for TranslationCache {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %format!("{e:#}"), "translation cache not saved");
        }
    }
}

fn read_entries(path: &Path) -> anyhow::Result<Option<HashMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read cache: {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Some(HashMap::new()));
    }
    let entries: HashMap<String, String> =
        serde_json::from_str(&text).with_context(|| format!("parse cache: {}", path.display()))?;
    Ok(Some(entries))
}
