//! repointel CLI entry point

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use repointel::{
    commands::{
        cmd_ask, cmd_docs, cmd_events, cmd_init, cmd_list, cmd_search, cmd_session_list,
        cmd_session_open, cmd_status, cmd_structure, cmd_work, print_answer, print_document,
        print_events, print_history, print_job, print_repo_completions, print_repositories,
        print_search_results, print_session, print_status, print_structure, print_work_stats,
    },
    config::Config,
    docs::DocType,
    jobs::{Capabilities, JobEngine, JobKind, StageContext},
    meta::MetaDb,
    progress::LogWriterFactory,
    search::SearchOptions,
    tutor::Tutor,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "repointel")]
#[command(version, about = "Repository intelligence: clone, structure, index, document and tutor", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for config, database and clones
    #[arg(long, global = true, env = "REPOINTEL_HOME")]
    home: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Register a repository and queue its clone
    Add {
        /// Repository URL (https, ssh or owner/name)
        url: String,

        /// Branch, tag or commit to check out
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Run the queue right away
        #[arg(long)]
        work: bool,
    },

    /// List registered repositories
    List {
        /// Output only repository IDs
        #[arg(long)]
        ids_only: bool,

        /// Output IDs with descriptions for shell completions
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Show pipeline status
    Status {
        /// Repository ID, URL or owner/name (all when omitted)
        repo: Option<String>,
    },

    /// Queue a pipeline stage (clone, structure, index, docs)
    Submit {
        repo: String,
        kind: String,
    },

    /// Re-clone a repository, discarding every derived artifact
    Reingest { repo: String },

    /// Cancel a pending or running job
    Cancel { job_id: String },

    /// Execute queued jobs
    Work {
        /// Keep polling with the worker pool until Ctrl-C
        #[arg(long)]
        follow: bool,

        /// Hide progress bars
        #[arg(long)]
        quiet: bool,
    },

    /// Show file tree, languages and entry points
    Structure {
        repo: String,

        /// Print the file tree
        #[arg(long)]
        tree: bool,
    },

    /// Semantic search over indexed code
    Search {
        repo: String,
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Minimum similarity score (0-1)
        #[arg(short, long)]
        min_score: Option<f32>,

        /// Glob or substring to filter file paths
        #[arg(long)]
        path: Option<String>,
    },

    /// Print a generated document (readme, architecture)
    Docs {
        repo: String,

        #[arg(default_value = "readme")]
        doc_type: String,
    },

    /// Ask questions about a repository
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show the event log of a repository
    Events {
        repo: String,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Open a tutor session
    Open {
        repo: String,

        /// Area of the code to focus on
        #[arg(long)]
        focus: Option<String>,
    },

    /// Ask a question in a session
    Ask { session_id: String, question: String },

    /// Show the turns of a session
    History { session_id: String },

    /// Close a session
    Close { session_id: String },

    /// List sessions of a repository
    List { repo: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn emit<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    if let Commands::Init { force } = cli.command {
        let config = cmd_init(cli.home.clone(), force).await?;
        println!("✓ repointel initialized");
        println!("  Config: {}", config.paths.config_file.display());
        println!("  Database: {}", config.paths.db_file.display());
        println!("\nNext steps:");
        println!("  1. Point [embedding] and [llm] at your model backends");
        println!("  2. repointel add https://github.com/owner/repo --work");
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "repointel", &mut std::io::stdout());
        print_completion_extras(shell);
        return Ok(());
    }

    let config = load_config(cli.config.as_deref(), cli.home.clone())?;
    let db = MetaDb::connect(&config).await?;
    let caps = Capabilities::from_config(&config)?;
    let ctx = StageContext::new(config, db, caps);
    let engine = Arc::new(JobEngine::new(ctx.clone()));
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Add { url, git_ref, work } => {
            let (repo, job) = engine.register(&url, git_ref.as_deref()).await?;
            if !json {
                println!("✓ Registered {} ({})", repo.full_name(), repo.id);
                print_job(&job);
            }
            if work {
                cmd_work(engine.clone(), false, !json).await?;
            }
            let view = cmd_status(&ctx.db, ctx.caps.embedder.model_name(), Some(&repo.id)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else if work {
                view.iter().for_each(print_status);
            }
        }

        Commands::List {
            ids_only,
            completion,
        } => {
            let repos = cmd_list(&ctx.db).await?;
            if let Some(shell) = completion {
                print_repo_completions(&repos, shell);
            } else if ids_only {
                for repo in &repos {
                    println!("{}", repo.id);
                }
            } else {
                emit(json, &repos, |r| print_repositories(r))?;
            }
        }

        Commands::Status { repo } => {
            let views = cmd_status(&ctx.db, ctx.caps.embedder.model_name(), repo.as_deref()).await?;
            emit(json, &views, |views| views.iter().for_each(print_status))?;
        }

        Commands::Submit { repo, kind } => {
            let kind: JobKind = kind.parse()?;
            let repo = ctx.db.find_repository(&repo).await?;
            let job = engine.submit(&repo.id, kind).await?;
            emit(json, &job, print_job)?;
        }

        Commands::Reingest { repo } => {
            let repo = ctx.db.find_repository(&repo).await?;
            let job = engine.reingest(&repo.id).await?;
            emit(json, &job, print_job)?;
        }

        Commands::Cancel { job_id } => {
            let job = engine.cancel(&job_id).await?;
            emit(json, &job, print_job)?;
        }

        Commands::Work { follow, quiet } => {
            let stats = cmd_work(engine.clone(), follow, !quiet && !json).await?;
            emit(json, &stats, print_work_stats)?;
        }

        Commands::Structure { repo, tree } => {
            let view = cmd_structure(&ctx, &repo).await?;
            emit(json, &view, |v| print_structure(v, tree))?;
        }

        Commands::Search {
            repo,
            query,
            limit,
            offset,
            min_score,
            path,
        } => {
            let options = SearchOptions {
                limit,
                offset,
                min_score,
                file_pattern: path,
            };
            let response = cmd_search(&ctx, &repo, &query, options).await?;
            emit(json, &response, print_search_results)?;
        }

        Commands::Docs { repo, doc_type } => {
            let doc_type: DocType = doc_type.parse()?;
            let view = cmd_docs(&ctx, &repo, doc_type).await?;
            emit(json, &view, print_document)?;
        }

        Commands::Session { action } => handle_session(&ctx, action, json).await?,

        Commands::Events { repo, limit } => {
            let events = cmd_events(&ctx.db, &repo, limit).await?;
            emit(json, &events, |e| print_events(e))?;
        }
    }

    Ok(())
}

async fn handle_session(ctx: &StageContext, action: SessionAction, json: bool) -> anyhow::Result<()> {
    match action {
        SessionAction::Open { repo, focus } => {
            let session = cmd_session_open(ctx, &repo, focus).await?;
            emit(json, &session, print_session)?;
        }
        SessionAction::Ask {
            session_id,
            question,
        } => {
            let answer = cmd_ask(ctx, &session_id, &question).await?;
            emit(json, &answer, print_answer)?;
        }
        SessionAction::History { session_id } => {
            let turns = Tutor::new(ctx).history(&session_id).await?;
            emit(json, &turns, |t| print_history(t))?;
        }
        SessionAction::Close { session_id } => {
            let session = Tutor::new(ctx).close(&session_id).await?;
            emit(json, &session, print_session)?;
        }
        SessionAction::List { repo } => {
            let sessions = cmd_session_list(ctx, &repo).await?;
            emit(json, &sessions, |sessions| sessions.iter().for_each(print_session))?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>, home: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Config::load_from(home).context("loading config"),
    }
}

fn print_completion_extras(shell: Shell) {
    match shell {
        Shell::Zsh => {
            println!();
            println!("{}", r#"# Dynamic completion of repository IDs"#);
            println!("{}", r#"_repointel_repo_ids() {"#);
            println!("{}", r#"    local -a entries"#);
            println!(
                "{}",
                r#"    entries=("${(@f)$(repointel list --completion zsh 2>/dev/null)}")"#
            );
            println!("{}", r#"    _describe -t repos 'repository ids' entries"#);
            println!("{}", r#"}"#);
            for sub in ["status", "structure", "search", "docs", "events", "reingest"] {
                println!("compdef _repointel_repo_ids 'repointel {}'", sub);
            }
        }
        Shell::Fish => {
            println!();
            println!("{}", r#"# Dynamic completion of repository IDs"#);
            println!(
                "{}",
                r#"complete -c repointel -n '__fish_seen_subcommand_from status structure search docs events reingest submit' -a '(repointel list --completion fish 2>/dev/null)'"#
            );
        }
        _ => {}
    }
}
