use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand};
use contestmate_cache::Namespace;
use contestmate_core::{clear_insights, LoadOutcome, TrendsSelection};
use contestmate_schema::{ChatMessage, ConversationSummary, RecommendationFilter, Role, UserProfile};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app;
mod repl;

use app::App;

#[derive(Parser)]
#[command(name = "contestmate", version, about = "AI competition assistant")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.contestmate",
        help = "Data directory (holds config.yaml, store.db and logs/)"
    )]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Interactive chat with the assistant")]
    Chat,
    #[command(about = "List past conversations")]
    History,
    #[command(about = "Print a past conversation")]
    Open {
        #[arg(help = "Conversation id")]
        conversation: String,
    },
    #[command(about = "Delete a past conversation")]
    Delete {
        #[arg(help = "Conversation id")]
        conversation: String,
    },
    #[command(about = "Recommended competitions")]
    Recommend {
        #[arg(long, default_value = "", help = "Category filter")]
        category: String,
        #[arg(long, default_value = "", help = "Difficulty filter")]
        difficulty: String,
        #[arg(long, help = "Bypass the cache")]
        refresh: bool,
    },
    #[command(about = "Skill analysis")]
    Skills {
        #[arg(long, help = "Bypass the cache")]
        refresh: bool,
    },
    #[command(about = "Competition trends")]
    Trends {
        #[arg(long, help = "Id of a competition you took part in")]
        participated: Option<i64>,
        #[arg(long, help = "Id of a competition you are considering")]
        available: Option<i64>,
        #[arg(long, help = "Bypass the cache")]
        refresh: bool,
    },
    #[command(subcommand, about = "Local cache maintenance")]
    Cache(CacheCommands),
    #[command(about = "Remember the signed-in user")]
    Login {
        #[arg(help = "Numeric user id")]
        user_id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        major: Option<String>,
        #[arg(long, help = "Bearer token sent to the backend")]
        token: Option<String>,
    },
    #[command(about = "Forget the signed-in user")]
    Logout,
}

#[derive(Subcommand)]
enum CacheCommands {
    #[command(about = "Remove expired entries")]
    Sweep,
    #[command(about = "Remove cached entries")]
    Clear {
        #[arg(help = "recommendations | skills | trends | history | insights (default: everything)")]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.data_dir.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.data_dir = PathBuf::from(home).join(
                cli.data_dir
                    .strip_prefix("~")
                    .unwrap_or(&cli.data_dir),
            );
        }
    }

    let log_dir = cli.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "contestmate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let app = App::open(&cli.data_dir)?;

    match command {
        Commands::Chat => repl::run_repl(&app).await?,
        Commands::History => {
            let summaries = app.controller().load_summary_list().await?;
            print_summaries(&summaries);
        }
        Commands::Open { conversation } => {
            let controller = app.controller();
            let outcome = controller.load_conversation(&conversation).await?;
            print_messages(&controller.store().messages());
            if !matches!(outcome, LoadOutcome::Loaded(_)) {
                bail!("conversation {conversation} could not be loaded");
            }
        }
        Commands::Delete { conversation } => {
            if !app.controller().delete_conversation(&conversation).await? {
                bail!("conversation {conversation} was not deleted");
            }
            println!("Deleted {conversation}.");
        }
        Commands::Recommend {
            category,
            difficulty,
            refresh,
        } => {
            let user = app.require_user()?;
            let filter = RecommendationFilter::new(category, difficulty);
            let set = app.insights().recommendations(&user, &filter, refresh).await?;
            println!("{}\n", set.summary);
            for c in &set.competitions {
                println!(
                    "[{:>3}] {} ({})",
                    c.score.unwrap_or_default(),
                    c.title,
                    c.category.as_deref().unwrap_or("-")
                );
                if let Some(suggestion) = &c.suggestions {
                    println!("      {suggestion}");
                }
            }
        }
        Commands::Skills { refresh } => {
            let user = app.require_user()?;
            let snapshot = app.insights().skill_analysis(&user, refresh).await;
            println!(
                "Overall: {:.1} (analysis #{})",
                snapshot.analysis.overall_score, snapshot.count
            );
            for (skill, score) in &snapshot.analysis.skills {
                println!("  {skill:<24} {score:>5.1}");
            }
            println!("\n{}", snapshot.analysis.advice);
        }
        Commands::Trends {
            participated,
            available,
            refresh,
        } => {
            let user = app.require_user()?;
            let selection = TrendsSelection {
                participated,
                available,
            };
            let report = app.insights().trends(&user, selection, refresh).await;
            for trend in &report.hot_categories {
                println!(
                    "  {:<24} participation {:>3}  growth {:+}%",
                    trend.name, trend.participation, trend.growth
                );
            }
            println!("\n{}", report.summary);
        }
        Commands::Cache(CacheCommands::Sweep) => {
            let removed = app.cache.sweep_expired()?;
            println!("Removed {removed} expired entries.");
        }
        Commands::Cache(CacheCommands::Clear { namespace }) => {
            let removed = match namespace.as_deref() {
                None => app.cache.invalidate_all()?,
                Some("insights") => clear_insights(&app.cache)?,
                Some(name) => match Namespace::parse(name) {
                    Some(ns) => app.cache.invalidate_namespace(ns)?,
                    None => bail!("unknown cache namespace: {name}"),
                },
            };
            println!("Removed {removed} entries.");
        }
        Commands::Login {
            user_id,
            username,
            major,
            token,
        } => {
            let mut profile = UserProfile::new(user_id);
            profile.username = username;
            profile.major = major;
            app.identity.login(&profile, token.as_deref())?;
            println!("Signed in as {user_id}.");
        }
        Commands::Logout => {
            app.identity.logout()?;
            println!("Signed out.");
        }
    }

    Ok(())
}

pub(crate) fn print_messages(messages: &[ChatMessage]) {
    for message in messages {
        let speaker = match (message.role, message.is_error) {
            (_, true) => "!!",
            (Role::User, false) => "you",
            (Role::Assistant, false) => "ai",
        };
        let at = message.timestamp.with_timezone(&Local).format("%H:%M");
        println!("[{at}] {speaker}: {}", message.content);
    }
}

pub(crate) fn print_summaries(summaries: &[ConversationSummary]) {
    if summaries.is_empty() {
        println!("No conversations yet.");
        return;
    }
    for s in summaries {
        let at = s.last_timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        println!("{}  {at}  {}", s.id, s.title);
        println!("    {}", s.last_message);
    }
}
