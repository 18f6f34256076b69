use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use atelier_assistant::Workbench;
use atelier_core::AppRoot;
use atelier_store::{Assistant, MessageRole, PromptFields, SettingsPatch};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_ROOT: &str = "atelier_data";

#[derive(Parser, Debug)]
#[command(name = "atelier", version, about = "Atelier assistant workbench CLI")]
struct Cli {
    /// Application data directory (defaults to $ATELIER_HOME, then ./atelier_data)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to an assistant and print the reply
    Chat {
        assistant_id: String,
        message: String,
        #[arg(long, default_value = "assistants")]
        module: String,
        /// Continue an existing conversation instead of opening a new one
        #[arg(long)]
        conversation: Option<String>,
    },
    Assistant {
        #[command(subcommand)]
        command: AssistantCommand,
    },
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
    /// Index a file or a folder into a knowledge base
    Ingest {
        kb_id: String,
        path: PathBuf,
        /// Provider used to summarize each document after indexing
        #[arg(long)]
        summarize: Option<String>,
    },
    Provider {
        #[command(subcommand)]
        command: ProviderCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AssistantCommand {
    List,
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        provider: String,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "")]
        objective: String,
        #[arg(long, default_value = "")]
        limits: String,
        #[arg(long = "format", default_value = "")]
        response_format: String,
        /// Site the assistant may search via its scraping tool
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long = "kb")]
        knowledge_base: Option<String>,
        /// "browser" or "llm_guided"
        #[arg(long, default_value = "")]
        scraper: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,
    /// Delete a profile; dependent assistants keep its text as their own
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum KbCommand {
    List,
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        id: String,
    },
    Stats {
        id: String,
    },
    /// Remove vector segments no longer referenced by any knowledge base
    Cleanup,
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    /// Probe a provider with a one-token completion
    Test { label: String },
    /// List the models a provider offers
    Models { label: String },
    /// Store credentials for a provider (the key is encrypted at rest)
    Configure {
        label: String,
        #[arg(long = "api-key")]
        api_key: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let root = cli
        .root
        .or_else(|| env::var_os("ATELIER_HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    let bench = Workbench::open(AppRoot::new(root))?;

    match cli.command {
        Command::Chat {
            assistant_id,
            message,
            module,
            conversation,
        } => chat(&bench, &module, &assistant_id, conversation.as_deref(), &message),
        Command::Assistant { command } => assistant(&bench, command),
        Command::Profile { command } => profile(&bench, command),
        Command::Kb { command } => kb(&bench, command),
        Command::Ingest {
            kb_id,
            path,
            summarize,
        } => ingest(&bench, &kb_id, &path, summarize.as_deref()),
        Command::Provider { command } => provider(&bench, command),
    }
}

fn chat(
    bench: &Workbench,
    module: &str,
    assistant_id: &str,
    conversation: Option<&str>,
    message: &str,
) -> Result<()> {
    let reply = bench.chat(module, assistant_id, conversation, message)?;
    match reply.outcome.answer {
        Some(answer) => {
            println!("{answer}");
            eprintln!("[atelier] conversation {}", reply.conversation_id);
            Ok(())
        }
        None => {
            let detail = reply
                .outcome
                .messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::Error)
                .map(|m| m.content.clone())
                .unwrap_or_else(|| "le tour n'a produit aucune réponse".to_string());
            bail!(detail)
        }
    }
}

fn assistant(bench: &Workbench, command: AssistantCommand) -> Result<()> {
    match command {
        AssistantCommand::List => {
            for a in bench.assistants().list()? {
                let provider = if a.provider.is_empty() {
                    "(défaut)"
                } else {
                    &a.provider
                };
                println!("{}  {}  {}", a.id, a.name, provider);
            }
            Ok(())
        }
        AssistantCommand::Create {
            name,
            provider,
            role,
            context,
            objective,
            limits,
            response_format,
            url,
            knowledge_base,
            scraper,
        } => {
            let created = bench.assistants().create(Assistant {
                name,
                provider,
                prompt: PromptFields {
                    role,
                    context,
                    objective,
                    limits,
                    response_format,
                },
                target_url: url,
                knowledge_base_id: knowledge_base,
                scraping_solution: scraper,
                ..Default::default()
            })?;
            println!("[atelier] Assistant '{}' créé (id={})", created.name, created.id);
            Ok(())
        }
        AssistantCommand::Delete { id } => {
            if bench.assistants().delete(&id)? {
                println!("[atelier] Assistant {id} supprimé");
            } else {
                bail!("assistant {id} introuvable");
            }
            Ok(())
        }
    }
}

fn profile(bench: &Workbench, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::List => {
            for p in bench.profiles().list()? {
                println!("{}  {}", p.id, p.name);
            }
            Ok(())
        }
        ProfileCommand::Delete { id } => {
            let frozen = bench.delete_profile(&id)?;
            println!("[atelier] Profil {id} supprimé ({frozen} assistant(s) détaché(s))");
            Ok(())
        }
    }
}

fn kb(bench: &Workbench, command: KbCommand) -> Result<()> {
    match command {
        KbCommand::List => {
            for kb in bench.knowledge_bases().list()? {
                println!(
                    "{}  {}  {} documents, {} extraits",
                    kb.id, kb.name, kb.document_count, kb.chunk_count
                );
            }
            Ok(())
        }
        KbCommand::Create { name, description } => {
            let created = bench.create_knowledge_base(&name, &description)?;
            println!("[atelier] Base '{}' créée (id={})", created.name, created.id);
            Ok(())
        }
        KbCommand::Delete { id } => {
            bench.delete_knowledge_base(&id)?;
            println!("[atelier] Base {id} supprimée");
            Ok(())
        }
        KbCommand::Stats { id } => {
            let stats = bench.kb_stats(&id)?;
            println!("[atelier] {} extraits indexés", stats.chunk_count);
            Ok(())
        }
        KbCommand::Cleanup => {
            let report = bench.cleanup_orphans()?;
            println!(
                "[atelier] {} segment(s) orphelin(s) supprimé(s)",
                report.deleted.len()
            );
            for (name, err) in &report.failed {
                eprintln!("[atelier] segment {name} : {err}, réessayer plus tard");
            }
            Ok(())
        }
    }
}

fn ingest(bench: &Workbench, kb_id: &str, path: &PathBuf, summarize: Option<&str>) -> Result<()> {
    if path.is_dir() {
        let outcome = bench.ingest_folder(kb_id, path, summarize)?;
        println!(
            "[atelier] {} fichier(s) indexé(s), {} extraits",
            outcome.files_processed, outcome.chunks_created
        );
        for err in &outcome.errors {
            eprintln!("[atelier] {err}");
        }
        for (file, summary) in &outcome.summaries {
            println!("--- {file} ---\n{summary}");
        }
        if !outcome.success {
            bail!("aucun fichier n'a pu être indexé");
        }
    } else {
        let outcome = bench.ingest_file(kb_id, path, summarize)?;
        println!(
            "[atelier] '{}' indexé, {} extraits",
            outcome.file_name, outcome.chunks_created
        );
        if let Some(summary) = &outcome.summary {
            println!("{summary}");
        }
    }
    Ok(())
}

fn provider(bench: &Workbench, command: ProviderCommand) -> Result<()> {
    match command {
        ProviderCommand::Test { label } => {
            let verdict = bench.test_provider(&label)?;
            println!("[atelier] {verdict}");
            Ok(())
        }
        ProviderCommand::Models { label } => {
            for model in bench.list_models(&label)? {
                println!("{model}");
            }
            Ok(())
        }
        ProviderCommand::Configure {
            label,
            api_key,
            endpoint,
            model,
        } => {
            let mut patch = SettingsPatch::default();
            if let Some(key) = api_key {
                patch.api_keys.insert(label.clone(), key);
            }
            if let Some(url) = endpoint {
                patch.endpoints.insert(label.clone(), url);
            }
            if let Some(name) = model {
                patch.models.insert(label.clone(), name);
            }
            bench.settings().save(&patch)?;
            println!("[atelier] Fournisseur '{label}' configuré");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
