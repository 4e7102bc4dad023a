mod ui;

use clap::Parser;
use docq::client::BackendClient;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(
    name = "docq",
    about = "Terminal chat client for a document question-answering backend"
)]
struct Args {
    /// Base URL of the backend
    #[arg(long, env = "DOCQ_BASE_URL", default_value = "http://127.0.0.1:8000")]
    base_url: String,

    /// Reuse an existing backend session instead of uploading a document
    #[arg(long, conflicts_with = "file")]
    session: Option<String>,

    /// Document to upload; the chat runs against the returned session
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// Ask a single question, print the streamed answer to stdout, and exit
    #[arg(long, short = 'q')]
    question: Option<String>,

    /// Directory exported summaries are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// How verbose the log output should be, can be given up to 3 times.
    /// Has no effect if RUST_LOG is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to write logs to (required for logging while the chat UI owns
    /// the terminal)
    #[arg(long)]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let interactive = args.question.is_none();
    tracing_init(&args, interactive)?;
    debug!(?args);

    let client = BackendClient::new(&args.base_url);
    client
        .health()
        .await
        .map_err(|err| format!("backend at {} is not reachable: {}", client.base_url(), err))?;

    let session_id = match (&args.session, &args.file) {
        (Some(session), _) => session.clone(),
        (None, Some(path)) => {
            info!("uploading {}", path.display());
            let processed = client.process_document(path).await?;
            info!(session_id = %processed.session_id, "{}", processed.message);
            processed.session_id
        }
        (None, None) => {
            return Err("either --session or --file is required to start a chat".into());
        }
    };

    match args.question {
        Some(question) => ask_once(&client, &session_id, &question).await,
        None => ui::run_tui(ui::UiConfig {
            client,
            session_id,
            output_dir: args.output_dir,
        }),
    }
}

async fn ask_once(client: &BackendClient, session_id: &str, question: &str) -> MainResult<()> {
    if question.trim().is_empty() {
        return Err("refusing to send an empty question".into());
    }

    let mut answer = client.ask(session_id, question, Vec::new()).await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Some(fragment) = answer.next_fragment().await {
        let fragment = fragment?;
        write!(out, "{}", fragment)?;
        out.flush()?;
    }
    writeln!(out)?;

    if !answer.sources().is_empty() {
        writeln!(out)?;
        writeln!(out, "Sources:")?;
        for source in answer.sources() {
            writeln!(out, "  {}", source)?;
        }
    }

    Ok(())
}

fn tracing_init(args: &Args, interactive: bool) -> MainResult<()> {
    fn env_filter(verbose: u8) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(
                match verbose {
                    0 => "docq=info",
                    1 => "info",
                    2 => "debug",
                    _ => "trace",
                }
                .parse()
                .unwrap(),
            )
            .from_env_lossy()
    }

    match (&args.log_path, interactive) {
        (Some(path), _) => {
            let log_file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_env_filter(env_filter(args.verbose))
                .with_writer(Mutex::new(log_file))
                .init();
        }
        (None, false) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(args.verbose))
                .with_writer(io::stderr)
                .init();
        }
        // The chat UI owns the terminal; without --log-path, stay quiet.
        (None, true) => {}
    }

    Ok(())
}
