//! Threadline CLI - conversations with versioned answers and memory recall
//!
//! Main entry point for the threadline command-line tool.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use thread_context::{Attachment, Feedback, MessageContent, WarningLevel};
use threadline::{
    ChatService, ConfigLoader, GenerationEvent, LazyDatabase, PromptSubmission, ThreadlineConfig,
};

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Threadline - branching chat with token-budgeted context", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Acting user
    #[arg(short, long, global = true, env = "THREADLINE_USER", default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create ~/.threadline and a default configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// List known models and their context windows
    Models,

    /// List conversations, most recently active first
    List,

    /// Show the current branch of a conversation
    History {
        conversation_id: String,
        /// Output format: text (default), json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the context that would be sent for a stored prompt
    Context {
        prompt_id: String,
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Send a prompt and stream the answer
    Chat {
        text: String,
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
        /// Edit an earlier prompt instead of adding a turn
        #[arg(short, long)]
        edit: Option<String>,
        /// Attachment as NAME,MIME,SIZE,URL (repeatable)
        #[arg(short, long = "attach", value_parser = parse_attachment)]
        attachments: Vec<Attachment>,
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Generate another version of a response
    Regenerate {
        response_id: String,
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Rate a response: positive, negative or unset
    Feedback {
        response_id: String,
        value: Feedback,
    },

    /// Rename a conversation
    Rename { conversation_id: String, title: String },

    /// Delete one conversation, or all of them with --all
    Delete {
        #[arg(required_unless_present = "all")]
        conversation_id: Option<String>,
        #[arg(long, conflicts_with = "conversation_id")]
        all: bool,
    },

    /// Delete the user's long-term memories
    Forget,
}

fn parse_attachment(value: &str) -> Result<Attachment, String> {
    let parts: Vec<&str> = value.splitn(4, ',').collect();
    let [name, mime, size, url] = parts.as_slice() else {
        return Err("expected NAME,MIME,SIZE,URL".to_string());
    };
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size '{}': {}", size, e))?;
    Ok(Attachment::new(name.trim(), size, mime.trim(), url.trim()))
}

async fn open_service(config: &ThreadlineConfig) -> anyhow::Result<ChatService> {
    let path = threadline::init::database_path(config)?;
    let db = LazyDatabase::new(path, config.database.max_connections);
    Ok(ChatService::from_config(config, db)?)
}

async fn stream_answer(mut generation: threadline::Generation) -> anyhow::Result<()> {
    let usage = &generation.context.usage;
    if usage.warning_level >= WarningLevel::High {
        eprintln!(
            "⚠ Context is {:.0}% full ({} of {} tokens); {} older messages dropped",
            usage.percentage, usage.used, usage.budget, generation.context.dropped
        );
    }

    let mut stdout = std::io::stdout();
    while let Some(event) = generation.events.next().await {
        match event? {
            GenerationEvent::Delta(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            GenerationEvent::Completed {
                response_id,
                version,
                ..
            } => {
                println!();
                println!("✓ Response {} (version {})", response_id, version);
            }
        }
    }
    Ok(())
}

fn content_preview(content: &MessageContent) -> String {
    let text = content.text_for_counting();
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        format!("{}…", line.chars().take(80).collect::<String>())
    } else {
        line.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        threadline::logging::init(&ThreadlineConfig::default().logging)?;
        println!("Initializing Threadline...");
        let config_path = threadline::init::initialize(force)?;
        println!("✓ Threadline initialized successfully");
        println!("  Configuration: {}", config_path.display());
        println!("\nSet OPENAI_API_KEY (and MEM0_API_KEY to enable memory) before chatting.");
        return Ok(());
    }

    let config = ConfigLoader::new().load().await.context("Failed to load configuration")?;
    threadline::logging::init(&config.logging)?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Models => {
            println!("{:<20} {:>10}  {}", "Model", "Window", "Description");
            println!("{}", "-".repeat(72));
            for model in config.model_registry().models() {
                let marker = if model.id == config.llm.default_model { "*" } else { " " };
                println!(
                    "{}{:<19} {:>10}  {}",
                    marker, model.id, model.context_window, model.description
                );
            }
            Ok(())
        }
        Commands::List => {
            let service = open_service(&config).await?;
            let conversations = service.list(user).await?;
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for conversation in conversations {
                println!(
                    "{}  {:<32} {:>3} turns  {}",
                    conversation.id,
                    conversation.title,
                    conversation.turn_count,
                    conversation.last_active().format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Commands::History {
            conversation_id,
            format,
        } => {
            let service = open_service(&config).await?;
            let history = service.history(user, &conversation_id).await?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&history)?);
                return Ok(());
            }

            println!("{}", history.conversation.title);
            println!("{}", "=".repeat(history.conversation.title.chars().count().max(8)));
            for turn in &history.turns {
                if let Some(prompt) = &turn.prompt {
                    let edits = if turn.earlier_edits > 0 {
                        format!(" (edited {}x)", turn.earlier_edits)
                    } else {
                        String::new()
                    };
                    println!("\n[{}] You{}: {}", turn.ordinal, edits, prompt.text);
                    for attachment in &prompt.attachments {
                        println!("    📎 {} ({})", attachment.file_name, attachment.mime_type);
                    }
                    println!("    prompt id: {}", prompt.id);
                }
                match &turn.response {
                    Some(response) => match response.current_version() {
                        Some(version) => {
                            println!(
                                "    Assistant (v{}, {}, feedback: {}): {}",
                                response.versions.len(),
                                version.model,
                                response.feedback,
                                version.text
                            );
                            println!("    response id: {}", response.id);
                        }
                        None => println!("    Assistant: (not yet answered) response id: {}", response.id),
                    },
                    None => println!("    Assistant: (not yet answered)"),
                }
            }
            Ok(())
        }
        Commands::Context { prompt_id, model } => {
            let service = open_service(&config).await?;
            let context = service.context_preview(user, &prompt_id, model.as_deref()).await?;
            if let Some(preamble) = &context.system_prompt {
                println!("{:<9} {}", "system*", preamble);
            }
            for message in &context.messages {
                println!("{:<9} {}", message.role.as_str(), content_preview(&message.content));
            }
            println!("{}", "-".repeat(72));
            println!(
                "{} messages, {} dropped, {} memory facts; {} / {} tokens ({:.0}%, {:?})",
                context.messages.len(),
                context.dropped,
                context.facts,
                context.usage.used,
                context.usage.budget,
                context.usage.percentage,
                context.usage.warning_level
            );
            Ok(())
        }
        Commands::Chat {
            text,
            conversation,
            edit,
            attachments,
            model,
        } => {
            let service = open_service(&config).await?;
            let mut submission = PromptSubmission::new(user, text);
            submission.conversation_id = conversation;
            submission.previous_prompt_id = edit;
            submission.attachments = attachments;

            let submitted = service.submit_prompt(submission).await?;
            if submitted.created {
                println!("✓ New conversation: {} ({})", submitted.conversation.title, submitted.conversation.id);
            }
            println!("  prompt id: {}", submitted.prompt.id);

            let generation = service
                .respond(user, &submitted.prompt.id, model.as_deref())
                .await?;
            stream_answer(generation).await
        }
        Commands::Regenerate { response_id, model } => {
            let service = open_service(&config).await?;
            let generation = service.regenerate(user, &response_id, model.as_deref()).await?;
            stream_answer(generation).await
        }
        Commands::Feedback { response_id, value } => {
            let service = open_service(&config).await?;
            service.set_feedback(user, &response_id, value).await?;
            println!("✓ Feedback set to {}", value);
            Ok(())
        }
        Commands::Rename {
            conversation_id,
            title,
        } => {
            let service = open_service(&config).await?;
            service.rename(user, &conversation_id, &title).await?;
            println!("✓ Conversation renamed");
            Ok(())
        }
        Commands::Delete {
            conversation_id,
            all,
        } => {
            let service = open_service(&config).await?;
            if all {
                let count = service.delete_all(user).await?;
                println!("✓ Deleted {} conversations", count);
            } else if let Some(id) = conversation_id {
                service.delete_conversation(user, &id).await?;
                println!("✓ Conversation deleted");
            }
            Ok(())
        }
        Commands::Forget => {
            let service = open_service(&config).await?;
            if service.forget(user).await? {
                println!("✓ Memories deleted");
            } else {
                println!("Memory is disabled; nothing to delete");
            }
            Ok(())
        }
    }
}
