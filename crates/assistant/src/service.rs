use atelier_core::{AppRoot, AtelierError, Result};
use atelier_llm::{catalog, ChatOptions, Credentials, LlmClient, Provider};
use atelier_rag::{EmbeddingClient, FileIngestion, FolderIngestion, Ingestor, VectorStore};
use atelier_scrape::{BrowserKind, ScraperKind, ScraperParams};
use atelier_store::{
    Assistant, ConversationLog, JsonRepository, KnowledgeBase, Profile, Settings, SettingsStore,
};
use std::path::Path;
use tracing::{info, warn};

use crate::compose::{compose_system_prompt, resolve_fields};
use crate::pipeline::{run_turn, TurnOutcome, TurnRequest, DEFAULT_TOP_K};

const DEFAULT_EXTRACTION_PROMPT: &str =
    "Extrais les informations pertinentes pour la recherche demandée.";

/// Entry point the UI and the CLI drive. Owns the stores and wires the
/// pipeline's injected functions to the real provider, retriever and
/// scraper.
pub struct Workbench {
    root: AppRoot,
    settings: SettingsStore,
    assistants: JsonRepository<Assistant>,
    profiles: JsonRepository<Profile>,
    knowledge_bases: JsonRepository<KnowledgeBase>,
    conversations: ConversationLog,
    vectors: VectorStore,
    embedder: EmbeddingClient,
}

/// What one chat turn produced, with the conversation it landed in.
#[derive(Debug)]
pub struct ChatReply {
    pub conversation_id: String,
    pub outcome: TurnOutcome,
}

impl Workbench {
    pub fn open(root: AppRoot) -> Result<Self> {
        root.ensure_layout()?;
        Ok(Self {
            settings: SettingsStore::open(root.clone())?,
            assistants: JsonRepository::new(root.assistants_file()),
            profiles: JsonRepository::new(root.profiles_file()),
            knowledge_bases: JsonRepository::new(root.knowledge_bases_file()),
            conversations: ConversationLog::new(root.clone()),
            vectors: VectorStore::open(root.vector_db_dir())?,
            embedder: EmbeddingClient::from_env()?,
            root,
        })
    }

    pub fn root(&self) -> &AppRoot {
        &self.root
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn assistants(&self) -> &JsonRepository<Assistant> {
        &self.assistants
    }

    pub fn profiles(&self) -> &JsonRepository<Profile> {
        &self.profiles
    }

    pub fn knowledge_bases(&self) -> &JsonRepository<KnowledgeBase> {
        &self.knowledge_bases
    }

    pub fn conversations(&self) -> &ConversationLog {
        &self.conversations
    }

    /// Deleting a profile first freezes its effective values into every
    /// assistant bound to it.
    pub fn delete_profile(&self, profile_id: &str) -> Result<usize> {
        atelier_store::delete_profile_materializing(&self.profiles, &self.assistants, profile_id)
    }

    fn client_for(&self, provider_label: &str) -> Result<LlmClient> {
        let provider = Provider::parse(provider_label)?;
        let coordinates = self.settings.resolve(provider_label)?;
        LlmClient::new(
            provider,
            Credentials {
                api_key: coordinates.api_key,
                endpoint: coordinates.endpoint,
                model: coordinates.model,
            },
        )
    }

    /// The extraction LLM runs on `scrapegraph_provider` when one is
    /// configured; otherwise the assistant's chat client does double duty.
    fn scraper_client(&self, settings: &Settings, chat: &LlmClient) -> Result<LlmClient> {
        if settings.scrapegraph_provider.trim().is_empty() {
            Ok(chat.clone())
        } else {
            self.client_for(&settings.scrapegraph_provider)
        }
    }

    /// Explicit provider first, then the configured `doc_analyst_provider`,
    /// then no summary at all.
    fn summarizer_for(&self, explicit: Option<&str>) -> Result<Option<LlmClient>> {
        if let Some(label) = explicit {
            return Ok(Some(self.client_for(label)?));
        }
        let configured = self.settings.get()?.doc_analyst_provider;
        if configured.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.client_for(&configured)?))
    }

    /// One user turn against an assistant, persisted into its conversation
    /// file for the module.
    pub fn chat(
        &self,
        module: &str,
        assistant_id: &str,
        conversation_id: Option<&str>,
        user_turn: &str,
    ) -> Result<ChatReply> {
        let assistant = self
            .assistants
            .get(assistant_id)?
            .ok_or_else(|| AtelierError::Other(format!("assistant {assistant_id} introuvable")))?;

        let own_profile = match &assistant.profile_id {
            Some(id) => self.profiles.get(id)?,
            None => None,
        };
        let module_profile = match self.settings.module_profile(module)? {
            Some(id) => self.profiles.get(&id)?,
            None => None,
        };
        let fields = resolve_fields(&assistant, own_profile.as_ref(), module_profile.as_ref());
        let system_prompt =
            compose_system_prompt(&fields, &assistant.target_url, &assistant.url_instructions);

        let settings = self.settings.get()?;
        let provider_label = if assistant.provider.trim().is_empty() {
            settings.chat_provider.clone()
        } else {
            assistant.provider.clone()
        };
        let client = self.client_for(&provider_label)?;

        let conversations = self.conversations.load(module, assistant_id)?;
        let history = conversation_id
            .and_then(|id| conversations.iter().find(|c| c.id == id))
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[]);

        let extraction_prompt = if fields.objective.trim().is_empty() {
            DEFAULT_EXTRACTION_PROMPT.to_string()
        } else {
            fields.objective.clone()
        };
        let scraper_kind = ScraperKind::parse(&assistant.scraping_solution)
            .or_else(|| ScraperKind::parse(&settings.scraping_solution))
            .unwrap_or(ScraperKind::Browser);

        let request = TurnRequest {
            system_prompt,
            history,
            user_turn: user_turn.to_string(),
            retrieve_context: assistant.knowledge_base_id.is_some(),
            top_k: DEFAULT_TOP_K,
        };
        let outcome = run_turn(
            &request,
            |transcript| client.chat_blocking(transcript, &ChatOptions::default()),
            |query, top_k| {
                let Some(kb_id) = assistant.knowledge_base_id.as_deref() else {
                    return Ok(Vec::new());
                };
                let embedding = self.embedder.embed(query)?;
                let hits = self.vectors.search(kb_id, &embedding, top_k)?;
                Ok(hits.into_iter().map(|hit| hit.text).collect())
            },
            |query| {
                if assistant.target_url.trim().is_empty() {
                    return Err(AtelierError::ToolConfigMissing);
                }
                let scraper = atelier_scrape::create(
                    scraper_kind,
                    ScraperParams {
                        assistant_id: assistant.id.clone(),
                        assistant_name: assistant.name.clone(),
                        root: self.root.clone(),
                        client: self.scraper_client(&settings, &client)?,
                        url_instructions: assistant.url_instructions.clone(),
                        browser: BrowserKind::parse(&settings.scraping_browser),
                        visible: settings.visible_mode,
                        log: None,
                    },
                );
                let (text, _path) = scraper.search(&assistant.target_url, query, &extraction_prompt)?;
                Ok(text)
            },
        );

        let conversation_id =
            self.conversations
                .append(module, assistant_id, conversation_id, &outcome.messages)?;
        Ok(ChatReply {
            conversation_id,
            outcome,
        })
    }

    /// Creates the metadata row and the vector collection together. A vector
    /// side failure rolls the row back.
    pub fn create_knowledge_base(&self, name: &str, description: &str) -> Result<KnowledgeBase> {
        let record = self.knowledge_bases.create(KnowledgeBase {
            name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        })?;
        if let Err(err) = self.vectors.create_kb(&record.id, name, description) {
            self.knowledge_bases.delete(&record.id)?;
            return Err(err);
        }
        info!(kb = record.id, "base de connaissances créée");
        Ok(record)
    }

    /// Drops both the metadata row and the vector collection.
    pub fn delete_knowledge_base(&self, kb_id: &str) -> Result<()> {
        self.vectors.delete_kb(kb_id)?;
        self.knowledge_bases.delete(kb_id)?;
        Ok(())
    }

    pub fn ingest_file(
        &self,
        kb_id: &str,
        path: &Path,
        summarizer_provider: Option<&str>,
    ) -> Result<FileIngestion> {
        let summarizer = self.summarizer_for(summarizer_provider)?;
        let ingestor = Ingestor::new(self.vectors.clone(), self.embedder.clone());
        let result = ingestor.ingest_file(kb_id, path, summarizer.as_ref(), None)?;
        self.bump_kb_counts(kb_id, 1, result.chunks_created)?;
        Ok(result)
    }

    pub fn ingest_folder(
        &self,
        kb_id: &str,
        folder: &Path,
        summarizer_provider: Option<&str>,
    ) -> Result<FolderIngestion> {
        let summarizer = self.summarizer_for(summarizer_provider)?;
        let ingestor = Ingestor::new(self.vectors.clone(), self.embedder.clone());
        let aggregate = ingestor.ingest_folder(kb_id, folder, summarizer.as_ref(), None)?;
        self.bump_kb_counts(kb_id, aggregate.files_processed, aggregate.chunks_created)?;
        Ok(aggregate)
    }

    fn bump_kb_counts(&self, kb_id: &str, documents: usize, chunks: usize) -> Result<()> {
        if documents == 0 && chunks == 0 {
            return Ok(());
        }
        match self.knowledge_bases.update(kb_id, |kb| {
            kb.document_count += documents;
            kb.chunk_count += chunks;
        }) {
            Ok(_) => Ok(()),
            Err(err) => {
                // The chunks are stored either way; the counters are advisory.
                warn!(kb = kb_id, %err, "compteurs non mis à jour");
                Ok(())
            }
        }
    }

    pub fn kb_stats(&self, kb_id: &str) -> Result<atelier_rag::KbStats> {
        self.vectors.stats(kb_id)
    }

    pub fn cleanup_orphans(&self) -> Result<atelier_rag::CleanupReport> {
        self.vectors.cleanup_orphans()
    }

    /// Minimal completion against the provider, returning its diagnostic.
    pub fn test_provider(&self, provider_label: &str) -> Result<String> {
        self.client_for(provider_label)?.probe_blocking()
    }

    /// Model ids for the provider, with free-tier models annotated.
    pub fn list_models(&self, provider_label: &str) -> Result<Vec<String>> {
        let client = self.client_for(provider_label)?;
        let provider = client.provider();
        let models = client.list_models_blocking()?;
        Ok(models
            .into_iter()
            .map(|model| {
                if catalog::is_free_model(provider, &model) {
                    format!("{model} (gratuit)")
                } else {
                    model
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_store::SettingsPatch;
    use tempfile::tempdir;

    fn bench(dir: &Path) -> Workbench {
        Workbench::open(AppRoot::new(dir)).unwrap()
    }

    #[test]
    fn scraper_runs_on_its_own_provider_when_configured() {
        let dir = tempdir().unwrap();
        let bench = bench(dir.path());
        let chat = bench.client_for("local").unwrap();

        let unset = bench.settings().get().unwrap();
        let same = bench.scraper_client(&unset, &chat).unwrap();
        assert_eq!(same.provider(), Provider::Local);

        let mut patch = SettingsPatch::default();
        patch.scrapegraph_provider = Some("OpenAI".to_string());
        patch
            .api_keys
            .insert("OpenAI".to_string(), "sk-test".to_string());
        let configured = bench.settings().save(&patch).unwrap();
        let dedicated = bench.scraper_client(&configured, &chat).unwrap();
        assert_eq!(dedicated.provider(), Provider::OpenAi);
    }

    #[test]
    fn summarizer_defaults_to_the_doc_analyst_provider() {
        let dir = tempdir().unwrap();
        let bench = bench(dir.path());
        assert!(bench.summarizer_for(None).unwrap().is_none());

        let mut patch = SettingsPatch::default();
        patch.doc_analyst_provider = Some("local".to_string());
        bench.settings().save(&patch).unwrap();
        let configured = bench.summarizer_for(None).unwrap().unwrap();
        assert_eq!(configured.provider(), Provider::Local);

        // an explicit label still wins over the configured default
        let mut keys = SettingsPatch::default();
        keys.api_keys
            .insert("OpenAI".to_string(), "sk-test".to_string());
        bench.settings().save(&keys).unwrap();
        let explicit = bench.summarizer_for(Some("OpenAI")).unwrap().unwrap();
        assert_eq!(explicit.provider(), Provider::OpenAi);
    }
}
