use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Layout of the application's writable root. Every component takes an
/// `AppRoot` instead of touching ambient paths, which keeps tests hermetic.
#[derive(Debug, Clone)]
pub struct AppRoot {
    root: PathBuf,
}

impl AppRoot {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn secret_key_file(&self) -> PathBuf {
        self.root.join(".secret.key")
    }

    pub fn assistants_file(&self) -> PathBuf {
        self.root.join("assistants.json")
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    pub fn knowledge_bases_file(&self) -> PathBuf {
        self.root.join("knowledge_bases.json")
    }

    pub fn conversations_dir(&self, module: &str) -> PathBuf {
        self.root.join("conversations").join(module)
    }

    pub fn conversation_file(&self, module: &str, assistant_id: &str) -> PathBuf {
        self.conversations_dir(module)
            .join(format!("history_{assistant_id}.json"))
    }

    /// Legacy single-file history used by the document-analyst module.
    pub fn legacy_doc_conversations_file(&self) -> PathBuf {
        self.conversations_dir("doc_analyst")
            .join("doc_conversations.json")
    }

    pub fn vector_db_dir(&self) -> PathBuf {
        self.root.join("vector_databases")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("resultats")
    }

    pub fn browser_state_file(&self) -> PathBuf {
        self.root.join("browser_context.json")
    }

    pub fn browser_profile_dir(&self) -> PathBuf {
        self.root.join("browser_profile")
    }

    /// Creates the directories components expect to exist.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.vector_db_dir())?;
        fs::create_dir_all(self.results_dir())?;
        fs::create_dir_all(self.root.join("conversations"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_layout_creates_directories() {
        let dir = tempdir().unwrap();
        let root = AppRoot::new(dir.path().join("app"));
        root.ensure_layout().unwrap();
        assert!(root.vector_db_dir().is_dir());
        assert!(root.results_dir().is_dir());
        assert_eq!(
            root.conversation_file("assistants", "abc"),
            dir.path().join("app/conversations/assistants/history_abc.json")
        );
    }
}
