use std::collections::BTreeMap;
use std::fs;

use atelier_core::{AppRoot, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::secrets::SecretKey;

/// Settings document as components see it: API keys are plaintext here and
/// only here. The on-disk form holds ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub chat_provider: String,
    #[serde(default)]
    pub scrapegraph_provider: String,
    #[serde(default)]
    pub image_gen_provider: String,
    #[serde(default)]
    pub doc_analyst_provider: String,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    #[serde(default = "default_scraping_solution")]
    pub scraping_solution: String,
    #[serde(default)]
    pub visible_mode: bool,
    #[serde(default = "default_scraping_browser")]
    pub scraping_browser: String,
    #[serde(default)]
    pub module_profiles: BTreeMap<String, String>,
    /// Fields this version does not model yet; preserved across saves.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_scraping_solution() -> String {
    "browser".to_string()
}

fn default_scraping_browser() -> String {
    "chromium".to_string()
}

/// Partial update; `None` / absent entries leave the on-disk value alone.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub chat_provider: Option<String>,
    pub scrapegraph_provider: Option<String>,
    pub image_gen_provider: Option<String>,
    pub doc_analyst_provider: Option<String>,
    pub api_keys: BTreeMap<String, String>,
    pub endpoints: BTreeMap<String, String>,
    pub models: BTreeMap<String, String>,
    pub scraping_solution: Option<String>,
    pub visible_mode: Option<bool>,
    pub scraping_browser: Option<String>,
}

/// Everything needed to dispatch a completion to one provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderCoordinates {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

/// Single writer for `settings.json`. Callers serialize saves; the store is
/// a plain read-modify-write over one file.
pub struct SettingsStore {
    root: AppRoot,
    key: SecretKey,
}

impl SettingsStore {
    pub fn open(root: AppRoot) -> Result<Self> {
        let key = SecretKey::load_or_generate(&root.secret_key_file())?;
        Ok(Self { root, key })
    }

    /// Loads the document, migrating legacy fields in place and decrypting
    /// every API key. A key that fails to decrypt becomes an empty string;
    /// a corrupt document becomes defaults and is rewritten.
    pub fn get(&self) -> Result<Settings> {
        let path = self.root.settings_file();
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&path)?;
        let mut settings: Settings = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(?path, %err, "settings document corrupt, rewriting defaults");
                let defaults = Settings::default();
                self.write(&defaults)?;
                return Ok(defaults);
            }
        };
        let migrated = self.migrate_legacy(&mut settings);
        for value in settings.api_keys.values_mut() {
            if value.is_empty() {
                continue;
            }
            *value = match self.key.decrypt(value) {
                Ok(plain) => plain,
                Err(err) => {
                    warn!(%err, "failed to decrypt one API key, treating as unset");
                    String::new()
                }
            };
        }
        if migrated {
            self.write(&settings)?;
        }
        Ok(settings)
    }

    /// Applies `patch` over the current document and writes the result,
    /// re-encrypting every key. Fields the patch leaves out keep their
    /// on-disk value, including fields this version does not model.
    pub fn save(&self, patch: &SettingsPatch) -> Result<Settings> {
        let mut settings = self.get()?;
        if let Some(v) = &patch.chat_provider {
            settings.chat_provider = v.clone();
        }
        if let Some(v) = &patch.scrapegraph_provider {
            settings.scrapegraph_provider = v.clone();
        }
        if let Some(v) = &patch.image_gen_provider {
            settings.image_gen_provider = v.clone();
        }
        if let Some(v) = &patch.doc_analyst_provider {
            settings.doc_analyst_provider = v.clone();
        }
        for (provider, key) in &patch.api_keys {
            settings.api_keys.insert(provider.clone(), key.clone());
        }
        for (provider, endpoint) in &patch.endpoints {
            settings.endpoints.insert(provider.clone(), endpoint.clone());
        }
        for (provider, model) in &patch.models {
            settings.models.insert(provider.clone(), model.clone());
        }
        if let Some(v) = &patch.scraping_solution {
            settings.scraping_solution = v.clone();
        }
        if let Some(v) = patch.visible_mode {
            settings.visible_mode = v;
        }
        if let Some(v) = &patch.scraping_browser {
            settings.scraping_browser = v.clone();
        }
        self.write(&settings)?;
        Ok(settings)
    }

    /// Full provider coordinates for dispatch: plaintext key plus optional
    /// endpoint and model overrides.
    pub fn resolve(&self, provider: &str) -> Result<ProviderCoordinates> {
        let settings = self.get()?;
        Ok(ProviderCoordinates {
            api_key: settings.api_keys.get(provider).cloned().unwrap_or_default(),
            endpoint: settings.endpoints.get(provider).cloned(),
            model: settings.models.get(provider).cloned(),
        })
    }

    /// Binds module-level prompt defaults to a Profile; `None` clears the
    /// binding.
    pub fn set_module_profile(&self, module: &str, profile_id: Option<&str>) -> Result<()> {
        let mut settings = self.get()?;
        match profile_id {
            Some(id) => {
                settings
                    .module_profiles
                    .insert(module.to_string(), id.to_string());
            }
            None => {
                settings.module_profiles.remove(module);
            }
        }
        self.write(&settings)?;
        Ok(())
    }

    pub fn module_profile(&self, module: &str) -> Result<Option<String>> {
        Ok(self.get()?.module_profiles.get(module).cloned())
    }

    fn migrate_legacy(&self, settings: &mut Settings) -> bool {
        // older documents carried a single `current_provider`
        if let Some(Value::String(provider)) = settings.extra.remove("current_provider") {
            if settings.chat_provider.is_empty() {
                settings.chat_provider = provider;
            }
            return true;
        }
        false
    }

    /// Serializes with every API key re-encrypted. Plaintext never reaches
    /// the disk.
    fn write(&self, settings: &Settings) -> Result<()> {
        let mut on_disk = settings.clone();
        for value in on_disk.api_keys.values_mut() {
            if !value.is_empty() {
                *value = self.key.encrypt(value)?;
            }
        }
        if let Some(parent) = self.root.settings_file().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            self.root.settings_file(),
            serde_json::to_string_pretty(&on_disk)?,
        )?;
        Ok(())
    }
}
