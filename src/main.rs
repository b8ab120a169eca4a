use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use labdesk_client::{InMemoryNavigator, LabClient, StreamHandler, StreamOutcome};
use labdesk_config::{Config, LogFormat};
use labdesk_store::SqliteTokenStore;
use labdesk_types::LabError;
use std::{
    io::{BufRead as _, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

#[derive(Parser, Debug)]
#[command(name = "labdesk", about = "labdesk: command-line client for the research workspace")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and store the session tokens.
    Login {
        username: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session.
    Logout,
    /// Show whether a session is stored and who it belongs to.
    Status,
    /// GET any API path and print the JSON response.
    Get {
        /// Path relative to the API base, e.g. `/projects/42`.
        path: String,
        /// Query parameters as `key=value`.
        #[arg(short, long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// List a collection (ideas, projects, tasks, experiments, knowledge-base, files, chats, audit-logs, llm-logs).
    List {
        resource: String,
        #[arg(short, long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Send a chat message and stream the reply to stdout.
    Chat {
        thread: String,
        message: String,
        /// Let the backend answer through its agent instead of a plain model call.
        #[arg(long)]
        agent: bool,
    },
    /// Export a report as CSV.
    Report {
        kind: String,
        /// Write to this file instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    let _guard = init_tracing(&config)?;

    let client = open_client(&config).await?;
    let result = run(&client, cli.command).await;
    if let Err(e) = &result
        && e.downcast_ref::<LabError>().is_some_and(LabError::is_session_expired)
    {
        eprintln!("session expired, run `labdesk login`");
    }
    result
}

async fn run(client: &LabClient, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => cmd_login(client, &username, password).await,
        Commands::Logout => {
            client.logout().await?;
            eprintln!("logged out");
            Ok(())
        }
        Commands::Status => cmd_status(client).await,
        Commands::Get { path, query } => {
            let query = parse_query(&query)?;
            print_json(&client.get_json(&path, &as_pairs(&query)).await?)
        }
        Commands::List { resource, query } => {
            let query = parse_query(&query)?;
            cmd_list(client, &resource, &as_pairs(&query)).await
        }
        Commands::Chat {
            thread,
            message,
            agent,
        } => cmd_chat(client, &thread, &message, agent).await,
        Commands::Report { kind, out } => cmd_report(client, &kind, out.as_deref()).await,
    }
}

async fn cmd_login(client: &LabClient, username: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            eprint!("password: ");
            std::io::stderr().flush()?;
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    client
        .login(username, &password)
        .await
        .context("login failed")?;
    eprintln!("logged in as {username}");
    Ok(())
}

async fn cmd_status(client: &LabClient) -> Result<()> {
    if !client.has_session().await {
        println!("not logged in");
        return Ok(());
    }
    let me = client.me().await?;
    let name = me
        .get("username")
        .or_else(|| me.get("email"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown user");
    println!("logged in as {name}");
    Ok(())
}

async fn cmd_list(client: &LabClient, resource: &str, query: &[(&str, &str)]) -> Result<()> {
    let value = match resource.trim_start_matches('/') {
        "files" => client.files().list(query).await?,
        "audit-logs" => client.audit_logs(query).await?,
        "llm-logs" => client.llm_logs(query).await?,
        other => client.resource(&format!("/{other}")).list(query).await?,
    };
    print_json(&value)
}

/// Writes reply chunks to stdout as they arrive.
struct StdoutReply {
    out: std::io::Stdout,
}

impl StreamHandler for StdoutReply {
    fn on_content(&mut self, chunk: &str) {
        let mut out = self.out.lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }

    fn on_done(&mut self, message_id: &str) {
        println!();
        tracing::debug!(message_id, "reply complete");
    }

    fn on_error(&mut self, message: &str) {
        println!();
        eprintln!("error: {message}");
    }
}

async fn cmd_chat(client: &LabClient, thread: &str, message: &str, agent: bool) -> Result<()> {
    let mut handler = StdoutReply {
        out: std::io::stdout(),
    };
    match client
        .chat()
        .stream_message(thread, message, agent, &mut handler)
        .await
    {
        StreamOutcome::Completed { .. } => Ok(()),
        StreamOutcome::Failed { message } => anyhow::bail!("reply failed: {message}"),
        StreamOutcome::Ended => {
            println!();
            anyhow::bail!("reply ended before completion")
        }
    }
}

async fn cmd_report(client: &LabClient, kind: &str, out: Option<&Path>) -> Result<()> {
    let csv = client.export_report(kind, &[]).await?;
    match out {
        Some(path) => {
            std::fs::write(path, csv)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{kind} report written to {}", path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

async fn open_client(config: &Config) -> Result<LabClient> {
    let path = config.store.resolved_path();
    let store = SqliteTokenStore::open(&path)
        .await
        .with_context(|| format!("failed to open session store {}", path.display()))?;
    // A terminal has no page to return to; redirects are only logged.
    let navigator = InMemoryNavigator::new("/");
    Ok(LabClient::new(config, Arc::new(store), Arc::new(navigator))?)
}

fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .context("invalid log level")?;

    let console = match config.log.format {
        LogFormat::Plain => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file, guard) = match &config.log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "labdesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

fn parse_query(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("query parameter '{kv}' is not KEY=VALUE"))
        })
        .collect()
}

fn as_pairs(query: &[(String, String)]) -> Vec<(&str, &str)> {
    query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
