//! Story data collaborator.
//!
//! The planner never owns the story document. Merged world elements, generated fields and
//! list items are handed to a [`StoryDataSink`]; the sinks here keep a plain
//! [`StoryDocument`] in memory or in a JSON file.

use crate::crucible::types::{ElementCategory, MergedElement};
use crate::error::StorageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One entry created from a merged element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryEntry {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub goal_purposes: BTreeMap<String, String>,
}

impl From<&MergedElement> for StoryEntry {
    fn from(element: &MergedElement) -> Self {
        Self {
            name: element.name.clone(),
            content: element.content.clone(),
            want: element.want.clone(),
            need: element.need.clone(),
            relationship: element.relationship.clone(),
            goal_purposes: element.goal_purposes.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryDocument {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<String>>,
    /// Entries keyed by category field id
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<StoryEntry>>,
}

impl StoryDocument {
    /// Add entries, skipping names already present in the category. Returns how many were
    /// created.
    pub fn create_entries(&mut self, category: ElementCategory, elements: &[MergedElement]) -> usize {
        let existing = self.entries.entry(category.field_id().to_string()).or_default();
        let mut created = 0;
        for element in elements {
            let key = element.name.to_lowercase();
            if existing.iter().any(|e| e.name.to_lowercase() == key) {
                debug!(category = %category, name = %element.name, "Entry exists, skipped");
                continue;
            }
            existing.push(StoryEntry::from(element));
            created += 1;
        }
        created
    }

    /// Compact text rendering used as generation context.
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        for (field_id, content) in &self.fields {
            out.push_str(&format!("### {}\n{}\n\n", field_id, content));
        }
        for (field_id, items) in &self.lists {
            out.push_str(&format!("### {}\n", field_id));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
            out.push('\n');
        }
        for (field_id, entries) in &self.entries {
            out.push_str(&format!("### {}\n", field_id));
            for entry in entries {
                out.push_str(&format!("- {}: {}\n", entry.name, entry.content));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

pub trait StoryDataSink: Send + Sync {
    /// Create one entry per merged element in `category`.
    fn create_entries(&self, category: ElementCategory, elements: &[MergedElement]) -> Result<usize, StorageError>;

    fn write_field(&self, field_id: &str, content: &str) -> Result<(), StorageError>;

    fn append_list_items(&self, field_id: &str, items: &[String]) -> Result<(), StorageError>;

    /// Text describing the current story, fed to field, list and brainstorm prompts.
    fn context(&self) -> Result<String, StorageError>;
}

#[derive(Default)]
pub struct MemoryStorySink {
    document: Mutex<StoryDocument>,
}

impl MemoryStorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> StoryDocument {
        self.document.lock().clone()
    }
}

impl StoryDataSink for MemoryStorySink {
    fn create_entries(&self, category: ElementCategory, elements: &[MergedElement]) -> Result<usize, StorageError> {
        Ok(self.document.lock().create_entries(category, elements))
    }

    fn write_field(&self, field_id: &str, content: &str) -> Result<(), StorageError> {
        self.document
            .lock()
            .fields
            .insert(field_id.to_string(), content.to_string());
        Ok(())
    }

    fn append_list_items(&self, field_id: &str, items: &[String]) -> Result<(), StorageError> {
        self.document
            .lock()
            .lists
            .entry(field_id.to_string())
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    fn context(&self) -> Result<String, StorageError> {
        Ok(self.document.lock().render_context())
    }
}

/// Story document kept in a JSON file next to the planning state.
pub struct JsonStorySink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoryDocument, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoryDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update<T>(&self, apply: impl FnOnce(&mut StoryDocument) -> T) -> Result<T, StorageError> {
        let _guard = self.lock.lock();
        let mut document = self.load()?;
        let result = apply(&mut document);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_vec_pretty(&document).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &serialized)?;
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(result)
    }
}

impl StoryDataSink for JsonStorySink {
    fn create_entries(&self, category: ElementCategory, elements: &[MergedElement]) -> Result<usize, StorageError> {
        let created = self.update(|doc| doc.create_entries(category, elements))?;
        info!(category = %category, created, path = ?self.path, "Story entries written");
        Ok(created)
    }

    fn write_field(&self, field_id: &str, content: &str) -> Result<(), StorageError> {
        self.update(|doc| {
            doc.fields.insert(field_id.to_string(), content.to_string());
        })
    }

    fn append_list_items(&self, field_id: &str, items: &[String]) -> Result<(), StorageError> {
        self.update(|doc| {
            doc.lists
                .entry(field_id.to_string())
                .or_default()
                .extend(items.iter().cloned());
        })
    }

    fn context(&self) -> Result<String, StorageError> {
        Ok(self.load()?.render_context())
    }
}
