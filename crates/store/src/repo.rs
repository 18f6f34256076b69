use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;

use atelier_core::{AtelierError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five free-form configuration fields shared by Profiles and
/// Assistants.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PromptFields {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub limits: String,
    #[serde(default)]
    pub response_format: String,
}

impl PromptFields {
    /// Field-by-field merge: a non-empty field of `self` wins, otherwise the
    /// fallback's value is taken.
    pub fn merged_with(&self, fallback: &PromptFields) -> PromptFields {
        fn pick(own: &str, other: &str) -> String {
            if own.trim().is_empty() {
                other.to_string()
            } else {
                own.to_string()
            }
        }
        PromptFields {
            role: pick(&self.role, &fallback.role),
            context: pick(&self.context, &fallback.context),
            objective: pick(&self.objective, &fallback.objective),
            limits: pick(&self.limits, &fallback.limits),
            response_format: pick(&self.response_format, &fallback.response_format),
        }
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.role,
            &self.context,
            &self.objective,
            &self.limits,
            &self.response_format,
        ]
        .iter()
        .all(|f| f.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssistantStatus {
    #[default]
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Assistant {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub prompt: PromptFields,
    #[serde(default)]
    pub target_url: String,
    #[serde(default)]
    pub url_instructions: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub scraping_solution: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub use_profile: bool,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub status: AssistantStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Assistant {
    /// Effective configuration per the profile-inheritance rule. The profile
    /// only applies when `use_profile` is set and it is the bound one.
    pub fn effective_prompt(&self, profile: Option<&Profile>) -> PromptFields {
        match (self.use_profile, profile) {
            (true, Some(p)) if self.profile_id.as_deref() == Some(p.id.as_str()) => {
                self.prompt.merged_with(&p.prompt)
            }
            _ => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub prompt: PromptFields,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_count: usize,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Record stored in a repository file.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    fn id(&self) -> &str;
    fn assign_id(&mut self, id: String);
    fn stamp_created(&mut self, now: DateTime<Utc>);
    fn stamp_updated(&mut self, now: DateTime<Utc>);
}

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn assign_id(&mut self, id: String) {
                self.id = id;
            }
            fn stamp_created(&mut self, now: DateTime<Utc>) {
                self.created_at = Some(now);
                self.updated_at = Some(now);
            }
            fn stamp_updated(&mut self, now: DateTime<Utc>) {
                self.updated_at = Some(now);
            }
        }
    };
}

impl_entity!(Assistant);
impl_entity!(Profile);
impl_entity!(KnowledgeBase);

/// Thin persistence facade over a JSON file holding an ordered array of
/// records. No cross-repository referential integrity lives here; that is
/// the caller's concern.
pub struct JsonRepository<T: Entity> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Entity> JsonRepository<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn list(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.list()?.into_iter().find(|r| r.id() == id))
    }

    /// Assigns a fresh UUID and creation stamp, then appends.
    pub fn create(&self, mut record: T) -> Result<T> {
        record.assign_id(Uuid::new_v4().to_string());
        record.stamp_created(Utc::now());
        let mut records = self.list()?;
        records.push(record.clone());
        self.write(&records)?;
        Ok(record)
    }

    /// Applies `mutate` to the stored record; untouched fields are
    /// preserved and `updated_at` is bumped.
    pub fn update(&self, id: &str, mutate: impl FnOnce(&mut T)) -> Result<T> {
        let mut records = self.list()?;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| AtelierError::Other(format!("record {id} introuvable")))?;
        mutate(record);
        record.stamp_updated(Utc::now());
        let updated = record.clone();
        self.write(&records)?;
        Ok(updated)
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.list()?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        let removed = records.len() != before;
        if removed {
            self.write(&records)?;
        }
        Ok(removed)
    }

    fn write(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

/// Deleting a Profile first materializes its current effective values into
/// every dependent Assistant, so their behavior does not change underneath
/// them. Returns the number of assistants touched.
pub fn delete_profile_materializing(
    profiles: &JsonRepository<Profile>,
    assistants: &JsonRepository<Assistant>,
    profile_id: &str,
) -> Result<usize> {
    let Some(profile) = profiles.get(profile_id)? else {
        return Ok(0);
    };
    let dependents: Vec<String> = assistants
        .list()?
        .into_iter()
        .filter(|a| a.use_profile && a.profile_id.as_deref() == Some(profile_id))
        .map(|a| a.id)
        .collect();
    for id in &dependents {
        assistants.update(id, |assistant| {
            assistant.prompt = assistant.prompt.merged_with(&profile.prompt);
            assistant.use_profile = false;
            assistant.profile_id = None;
        })?;
    }
    profiles.delete(profile_id)?;
    Ok(dependents.len())
}
