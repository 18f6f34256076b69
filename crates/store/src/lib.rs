pub mod conversation;
pub mod repo;
pub mod results;
pub mod secrets;
pub mod settings;

pub use conversation::{Conversation, ConversationLog, Message, MessageRole};
pub use repo::{
    delete_profile_materializing, Assistant, AssistantStatus, JsonRepository, KnowledgeBase,
    Profile, PromptFields,
};
pub use results::{ResultsManager, ScrapingResult};
pub use secrets::SecretKey;
pub use settings::{ProviderCoordinates, Settings, SettingsPatch, SettingsStore};
