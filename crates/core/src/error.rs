use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy shared by every crate in the workspace. `Display` carries
/// the short user-facing message; the raw transport diagnostic, when there is
/// one, rides in the variant payload and stays available through
/// [`AtelierError::diagnostic`].
#[derive(Error, Debug)]
pub enum AtelierError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Aucune clé API configurée pour {0}")]
    CredentialMissing(String),
    #[error("Clé API invalide : {0}")]
    CredentialInvalid(String),
    #[error("Quota épuisé pour ce fournisseur : {0}")]
    QuotaExhausted(String),
    #[error("Modèle indisponible : {0}")]
    ModelUnavailable(String),
    #[error("Erreur réseau : {0}")]
    Network(String),
    #[error("Service en cours de démarrage, réessais épuisés : {0}")]
    RateLimitLocal(String),
    #[error("Aucune instruction d'extraction configurée pour cet assistant")]
    ToolConfigMissing,
    #[error("Impossible de lancer le navigateur : {0}")]
    ToolLaunchFailed(String),
    #[error("Contexte trop volumineux : retire des documents ou change de modèle ({0})")]
    ContextTooLarge(String),
    #[error("L'extraction n'a retourné aucun élément")]
    ExtractionEmpty,
    #[error("La collection existe déjà : {0}")]
    StorageConflict(String),
    #[error("Fichier verrouillé : {0}")]
    StorageLocked(String),
    #[error("provider {0} not supported")]
    UnsupportedProvider(String),
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("no_content: {0:?}")]
    NoContent(PathBuf),
    #[error("invalid document: {0}")]
    InvalidDocument(&'static str),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AtelierError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CredentialMissing,
    CredentialInvalid,
    QuotaExhausted,
    ModelUnavailable,
    Network,
    RateLimitLocal,
    ToolConfigMissing,
    ToolLaunchFailed,
    ContextTooLarge,
    ExtractionEmpty,
    StorageConflict,
    StorageLocked,
    UnsupportedProvider,
    UnsupportedInput,
    NoContent,
    Unknown,
}

impl AtelierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AtelierError::CredentialMissing(_) => ErrorKind::CredentialMissing,
            AtelierError::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            AtelierError::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            AtelierError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AtelierError::Network(_) => ErrorKind::Network,
            AtelierError::RateLimitLocal(_) => ErrorKind::RateLimitLocal,
            AtelierError::ToolConfigMissing => ErrorKind::ToolConfigMissing,
            AtelierError::ToolLaunchFailed(_) => ErrorKind::ToolLaunchFailed,
            AtelierError::ContextTooLarge(_) => ErrorKind::ContextTooLarge,
            AtelierError::ExtractionEmpty => ErrorKind::ExtractionEmpty,
            AtelierError::StorageConflict(_) => ErrorKind::StorageConflict,
            AtelierError::StorageLocked(_) => ErrorKind::StorageLocked,
            AtelierError::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            AtelierError::UnsupportedInput(_) => ErrorKind::UnsupportedInput,
            AtelierError::NoContent(_) => ErrorKind::NoContent,
            _ => ErrorKind::Unknown,
        }
    }

    /// Raw diagnostic as received from the transport layer, when one exists.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            AtelierError::CredentialInvalid(d)
            | AtelierError::QuotaExhausted(d)
            | AtelierError::ModelUnavailable(d)
            | AtelierError::Network(d)
            | AtelierError::RateLimitLocal(d)
            | AtelierError::ToolLaunchFailed(d)
            | AtelierError::ContextTooLarge(d)
            | AtelierError::StorageLocked(d)
            | AtelierError::Other(d) => Some(d.as_str()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AtelierError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_mentions_quota() {
        let err = AtelierError::QuotaExhausted("Error 429: quota".to_string());
        assert!(err.to_string().contains("Quota"));
        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
        assert_eq!(err.diagnostic(), Some("Error 429: quota"));
    }

    #[test]
    fn unsupported_provider_message_shape() {
        let err = AtelierError::UnsupportedProvider("Frobnicate AI".to_string());
        assert!(err.to_string().contains("not supported"));
    }
}
