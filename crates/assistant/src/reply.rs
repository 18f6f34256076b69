/// Wire prefix the model uses to request a scrape. Kept stable across UI
/// languages.
pub const ACTION_PREFIX: &str = "ACTION: SEARCH ";

/// A model reply, after scanning for the tool-use convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Plain(String),
    ToolCall { prose: String, query: String },
}

impl Reply {
    pub fn parse(text: &str) -> Self {
        let Some(at) = text.find(ACTION_PREFIX) else {
            return Reply::Plain(text.trim().to_string());
        };
        let prose = text[..at].trim().to_string();
        let query = text[at + ACTION_PREFIX.len()..].trim().to_string();
        if query.is_empty() {
            return Reply::Plain(text.trim().to_string());
        }
        Reply::ToolCall { prose, query }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_stays_plain() {
        assert_eq!(
            Reply::parse("Bonjour, voici la réponse."),
            Reply::Plain("Bonjour, voici la réponse.".to_string())
        );
    }

    #[test]
    fn action_with_prose_preserves_both_parts() {
        let reply = Reply::parse("Je vais vérifier sur le site.\nACTION: SEARCH vélo cargo");
        assert_eq!(
            reply,
            Reply::ToolCall {
                prose: "Je vais vérifier sur le site.".to_string(),
                query: "vélo cargo".to_string(),
            }
        );
    }

    #[test]
    fn bare_action_has_empty_prose() {
        let reply = Reply::parse("ACTION: SEARCH chaussures taille 42");
        assert_eq!(
            reply,
            Reply::ToolCall {
                prose: String::new(),
                query: "chaussures taille 42".to_string(),
            }
        );
    }

    #[test]
    fn action_without_query_is_treated_as_prose() {
        assert_eq!(
            Reply::parse("ACTION: SEARCH "),
            Reply::Plain("ACTION: SEARCH".to_string())
        );
    }
}
