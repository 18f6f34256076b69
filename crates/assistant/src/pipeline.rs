use atelier_core::Result;
use atelier_llm::ChatMessage;
use atelier_store::{Message, MessageRole};
use tracing::{info, warn};

use crate::reply::Reply;

pub const DEFAULT_TOP_K: usize = 5;

/// Character budget for search results injected back into the follow-up
/// turn.
pub const RESULT_CHAR_BUDGET: usize = 5_000;

const CONTEXT_LABEL: &str = "Contexte documentaire :";

pub struct TurnRequest<'a> {
    pub system_prompt: String,
    /// Prior messages of the conversation, already persisted.
    pub history: &'a [Message],
    pub user_turn: String,
    /// Whether the assistant is bound to a knowledge base.
    pub retrieve_context: bool,
    pub top_k: usize,
}

/// Messages produced by one turn, in the order they belong in the
/// conversation. `answer` is set only when the model produced a final reply.
#[derive(Debug)]
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub answer: Option<String>,
}

/// Executes one user turn. The model, the retriever and the scraper are
/// injected so the pipeline itself stays deterministic and testable.
pub fn run_turn<FGen, FRetrieve, FScrape>(
    request: &TurnRequest<'_>,
    generate: FGen,
    retrieve: FRetrieve,
    scrape: FScrape,
) -> TurnOutcome
where
    FGen: Fn(&[ChatMessage]) -> Result<String>,
    FRetrieve: Fn(&str, usize) -> Result<Vec<String>>,
    FScrape: Fn(&str) -> Result<String>,
{
    let mut messages = Vec::new();
    if request.history.is_empty() {
        messages.push(Message::system(request.system_prompt.clone()));
    }
    messages.push(Message::user(request.user_turn.clone()));

    let user_content = if request.retrieve_context {
        augment_with_context(&request.user_turn, &retrieve, request.top_k)
    } else {
        request.user_turn.clone()
    };

    // The current composed prompt wins over the one stored with the
    // conversation; a profile edit applies to old conversations too.
    let mut transcript = vec![ChatMessage::system(request.system_prompt.clone())];
    transcript.extend(
        request
            .history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .filter_map(chat_message),
    );
    transcript.push(ChatMessage::user(user_content));

    let first_reply = match generate(&transcript) {
        Ok(reply) => reply,
        Err(err) => {
            messages.push(Message::error(err.to_string()));
            return TurnOutcome {
                messages,
                answer: None,
            };
        }
    };

    match Reply::parse(&first_reply) {
        Reply::Plain(text) => {
            messages.push(Message::assistant(text.clone()));
            TurnOutcome {
                messages,
                answer: Some(text),
            }
        }
        Reply::ToolCall { prose, query } => {
            info!(query, "le modèle demande une recherche");
            if !prose.is_empty() {
                messages.push(Message::assistant(prose.clone()));
            }
            let results = match scrape(&query) {
                Ok(results) => results,
                Err(err) => {
                    messages.push(Message::error(err.to_string()));
                    return TurnOutcome {
                        messages,
                        answer: None,
                    };
                }
            };
            messages.push(Message::system(format!("Recherche effectuée : {query}")));

            let truncated: String = results.chars().take(RESULT_CHAR_BUDGET).collect();
            let follow_up = format!(
                "{}\n\n[SEARCH RESULTS]:\n{truncated}",
                request.user_turn
            );
            transcript.push(ChatMessage::assistant(first_reply));
            transcript.push(ChatMessage::user(follow_up));

            // One round-trip only; a second ACTION is taken at face value.
            match generate(&transcript) {
                Ok(final_reply) => {
                    let text = final_reply.trim().to_string();
                    messages.push(Message::assistant(text.clone()));
                    TurnOutcome {
                        messages,
                        answer: Some(text),
                    }
                }
                Err(err) => {
                    messages.push(Message::error(err.to_string()));
                    TurnOutcome {
                        messages,
                        answer: None,
                    }
                }
            }
        }
    }
}

fn augment_with_context<FRetrieve>(
    user_turn: &str,
    retrieve: &FRetrieve,
    top_k: usize,
) -> String
where
    FRetrieve: Fn(&str, usize) -> Result<Vec<String>>,
{
    match retrieve(user_turn, top_k) {
        Ok(snippets) if !snippets.is_empty() => {
            format!(
                "{CONTEXT_LABEL}\n{}\n\n{user_turn}",
                snippets.join("\n---\n")
            )
        }
        Ok(_) => user_turn.to_string(),
        Err(err) => {
            warn!(%err, "récupération du contexte impossible, tour envoyé sans");
            user_turn.to_string()
        }
    }
}

fn chat_message(message: &Message) -> Option<ChatMessage> {
    match message.role {
        MessageRole::System => Some(ChatMessage::system(message.content.clone())),
        MessageRole::User => Some(ChatMessage::user(message.content.clone())),
        MessageRole::Assistant => Some(ChatMessage::assistant(message.content.clone())),
        MessageRole::Error => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::AtelierError;
    use std::cell::RefCell;

    fn request(turn: &str) -> TurnRequest<'static> {
        TurnRequest {
            system_prompt: "Rôle : A helpful assistant".to_string(),
            history: &[],
            user_turn: turn.to_string(),
            retrieve_context: false,
            top_k: DEFAULT_TOP_K,
        }
    }

    fn no_retrieve(_q: &str, _k: usize) -> Result<Vec<String>> {
        panic!("retrieve ne doit pas être appelé");
    }

    fn no_scrape(_q: &str) -> Result<String> {
        panic!("scrape ne doit pas être appelé");
    }

    #[test]
    fn plain_chat_appends_three_messages() {
        let outcome = run_turn(
            &request("Hello"),
            |transcript| {
                Ok(transcript
                    .iter()
                    .rev()
                    .find(|m| m.role == atelier_llm::Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default())
            },
            no_retrieve,
            no_scrape,
        );
        assert_eq!(outcome.answer.as_deref(), Some("Hello"));
        let roles: Vec<MessageRole> = outcome.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
        );
    }

    #[test]
    fn quota_error_surfaces_without_assistant_message() {
        let outcome = run_turn(
            &request("Hello"),
            |_| Err(AtelierError::QuotaExhausted("Error 429: quota".to_string())),
            no_retrieve,
            no_scrape,
        );
        assert!(outcome.answer.is_none());
        let last = outcome.messages.last().unwrap();
        assert_eq!(last.role, MessageRole::Error);
        assert!(last.content.contains("Quota"));
        assert!(outcome
            .messages
            .iter()
            .all(|m| m.role != MessageRole::Assistant));
    }

    #[test]
    fn tool_call_runs_exactly_one_round_trip() {
        let calls = RefCell::new(0usize);
        let scrapes = RefCell::new(Vec::new());
        let outcome = run_turn(
            &request("Quels vélos sont en stock ?"),
            |transcript| {
                *calls.borrow_mut() += 1;
                match *calls.borrow() {
                    1 => Ok("Je vérifie sur le site.\nACTION: SEARCH vélo cargo".to_string()),
                    _ => {
                        let follow_up = &transcript.last().unwrap().content;
                        assert!(follow_up.starts_with("Quels vélos sont en stock ?"));
                        assert!(follow_up.contains("[SEARCH RESULTS]:"));
                        assert!(follow_up.chars().count() < RESULT_CHAR_BUDGET + 200);
                        Ok("ACTION: SEARCH encore".to_string())
                    }
                }
            },
            no_retrieve,
            |query| {
                scrapes.borrow_mut().push(query.to_string());
                Ok("résultat ".repeat(2000))
            },
        );
        assert_eq!(*calls.borrow(), 2);
        assert_eq!(scrapes.borrow().as_slice(), ["vélo cargo"]);
        // The second ACTION is not followed; it becomes the final answer.
        assert_eq!(outcome.answer.as_deref(), Some("ACTION: SEARCH encore"));
        assert!(outcome.messages.iter().any(
            |m| m.role == MessageRole::Assistant && m.content == "Je vérifie sur le site."
        ));
        assert!(outcome
            .messages
            .iter()
            .any(|m| m.role == MessageRole::System && m.content.contains("vélo cargo")));
    }

    #[test]
    fn search_results_reach_the_final_answer() {
        let calls = RefCell::new(0usize);
        let outcome = run_turn(
            &request("Des widgets ?"),
            |transcript| {
                *calls.borrow_mut() += 1;
                match *calls.borrow() {
                    1 => Ok("Let me check.\nACTION: SEARCH widgets".to_string()),
                    _ => Ok(transcript.last().unwrap().content.clone()),
                }
            },
            no_retrieve,
            |_| Ok("ITEM1".to_string()),
        );
        let answer = outcome.answer.unwrap();
        assert!(answer.contains("[SEARCH RESULTS]"));
        assert!(answer.contains("ITEM1"));
        assert!(outcome
            .messages
            .iter()
            .any(|m| m.role == MessageRole::Assistant && m.content == "Let me check."));
    }

    #[test]
    fn scraper_error_stops_the_turn() {
        let calls = RefCell::new(0usize);
        let outcome = run_turn(
            &request("Cherche des vélos"),
            |_| {
                *calls.borrow_mut() += 1;
                Ok("ACTION: SEARCH vélo".to_string())
            },
            no_retrieve,
            |_| Err(AtelierError::ToolLaunchFailed("chromium absent".to_string())),
        );
        assert_eq!(*calls.borrow(), 1);
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.messages.last().unwrap().role, MessageRole::Error);
    }

    #[test]
    fn retrieved_snippets_are_injected_verbatim() {
        let seen = RefCell::new(String::new());
        let mut req = request("Que disent les documents ?");
        req.retrieve_context = true;
        let outcome = run_turn(
            &req,
            |transcript| {
                *seen.borrow_mut() = transcript.last().unwrap().content.clone();
                Ok("Réponse.".to_string())
            },
            |_query, top_k| {
                assert_eq!(top_k, DEFAULT_TOP_K);
                Ok(vec!["Le chiffre d'affaires a doublé en 2023.".to_string()])
            },
            no_scrape,
        );
        assert_eq!(outcome.answer.as_deref(), Some("Réponse."));
        let content = seen.borrow();
        assert!(content.starts_with(CONTEXT_LABEL));
        assert!(content.contains("Le chiffre d'affaires a doublé en 2023."));
        assert!(content.ends_with("Que disent les documents ?"));
        // The stored user message keeps the original turn.
        assert!(outcome
            .messages
            .iter()
            .any(|m| m.role == MessageRole::User && m.content == "Que disent les documents ?"));
    }

    #[test]
    fn existing_history_does_not_duplicate_the_system_message() {
        let history = vec![
            Message::system("Rôle : X"),
            Message::user("avant"),
            Message::assistant("réponse"),
            Message::error("incident passé"),
        ];
        let transcript_len = RefCell::new(0usize);
        let req = TurnRequest {
            system_prompt: "Rôle : X".to_string(),
            history: &history,
            user_turn: "suite".to_string(),
            retrieve_context: false,
            top_k: DEFAULT_TOP_K,
        };
        let outcome = run_turn(
            &req,
            |transcript| {
                *transcript_len.borrow_mut() = transcript.len();
                Ok("ok".to_string())
            },
            no_retrieve,
            no_scrape,
        );
        assert_eq!(outcome.messages[0].role, MessageRole::User);
        // fresh system + 2 history (system and error dropped) + user turn
        assert_eq!(*transcript_len.borrow(), 4);
    }
}
