//! mail-receive: receive mail from an IMAP account on the command line
//!
//! Thin front end over the [`mail_receive`] engine: connects the configured
//! account, runs one command and prints the result as JSON on stdout. Logs
//! go to stderr.

use clap::{Args, Parser, Subcommand};
use mail_receive::config::ReceiveConfig;
use mail_receive::flags::{Flag, SystemFlag};
use mail_receive::imap::ImapService;
use mail_receive::service::{MailboxService, SearchPredicate};
use mail_receive::session::{DEFAULT_FOLDER, MailboxSession};
use mail_receive::trace::DebugTrace;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mail-receive", version, about = "Receive mail from an IMAP account")]
struct Cli {
    /// Account segment from MAIL_RECEIVE_<ACCOUNT>_* (lowercase)
    #[arg(long, default_value = "default")]
    account: String,
    /// Log protocol commands at debug level (target mail_receive::wire)
    #[arg(long)]
    trace: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every folder of the account
    Folders,
    /// Show message counters of a folder
    Count {
        #[arg(long, default_value = DEFAULT_FOLDER)]
        folder: String,
    },
    /// Receive messages and print them
    Receive(ReceiveArgs),
}

#[derive(Debug, Args)]
struct ReceiveArgs {
    /// Source folder (default: INBOX)
    #[arg(long)]
    folder: Option<String>,
    /// Only unseen messages
    #[arg(long)]
    unseen: bool,
    /// Subject contains
    #[arg(long)]
    subject: Option<String>,
    /// From contains
    #[arg(long)]
    from: Option<String>,
    /// Mark received messages seen
    #[arg(long)]
    mark_seen: bool,
    /// Delete received messages (expunges the folder)
    #[arg(long)]
    delete: bool,
    /// Move received messages to this folder
    #[arg(long, value_name = "FOLDER")]
    move_to: Option<String>,
    /// Fetch envelopes and flags only
    #[arg(long)]
    envelope_only: bool,
    /// Clear a flag on received messages (e.g. '\Flagged' or a keyword); repeatable
    #[arg(long, value_name = "FLAG")]
    unmark: Vec<Flag>,
}

impl ReceiveArgs {
    fn predicate(&self) -> Option<SearchPredicate> {
        [
            self.unseen.then(|| SearchPredicate::flag(SystemFlag::Seen, false)),
            self.subject.as_deref().map(SearchPredicate::subject),
            self.from.as_deref().map(SearchPredicate::sender),
        ]
        .into_iter()
        .flatten()
        .reduce(SearchPredicate::and)
    }
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, connects the selected
/// account and runs the command. The session is always closed, also when the
/// command fails.
///
/// # Environment Variables
///
/// See [`ReceiveConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_RECEIVE_DEFAULT_HOST=imap.example.com \
/// MAIL_RECEIVE_DEFAULT_USER=user@example.com \
/// MAIL_RECEIVE_DEFAULT_PASS=secret \
/// cargo run -- receive --unseen --envelope-only
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ReceiveConfig::load_from_env()?;
    let account = config.get_account(&cli.account)?;
    let trace = cli.trace.then(DebugTrace::to_tracing);

    let service = ImapService::connect(&config, account, trace).await?;
    let mut session = MailboxSession::new(service, config.session.clone());

    let result = run(&mut session, cli.command).await;
    if let Err(error) = session.close().await {
        tracing::warn!(%error, "failed to close session");
    }

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn run<S: MailboxService>(
    session: &mut MailboxSession<S>,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    match command {
        Command::Folders => Ok(json!(session.list_folders().await?)),
        Command::Count { folder } => {
            let mode = session.use_folder(&folder).await?;
            Ok(json!({
                "folder": folder,
                "mode": mode,
                "total": session.message_count().await?,
                "new": session.new_message_count().await?,
                "unread": session.unread_message_count().await?,
                "deleted": session.deleted_message_count().await?,
            }))
        }
        Command::Receive(args) => {
            let mut builder = session.receive();
            if let Some(predicate) = args.predicate() {
                builder = builder.filter(predicate);
            }
            if let Some(folder) = args.folder {
                builder = builder.from_folder(folder);
            }
            if args.mark_seen {
                builder = builder.mark_seen();
            }
            if args.delete {
                builder = builder.mark_deleted();
            }
            if let Some(target) = args.move_to {
                builder = builder.move_to_folder(target);
            }
            if args.envelope_only {
                builder = builder.envelope_only();
            }
            for flag in args.unmark {
                builder = builder.unmark(flag);
            }

            let messages = builder.get().await?;
            tracing::info!(
                folder = session.current_folder().unwrap_or_default(),
                received = messages.len(),
                "receive finished"
            );
            Ok(serde_json::to_value(&messages)?)
        }
    }
}
