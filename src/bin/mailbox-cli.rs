#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for reading a mailbox over IMAPS (read-only)

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use imap_mailbox::{ImapConfig, MailEntry, Mailbox, Message, Status};
use tracing_subscriber::EnvFilter;

/// How long to wait for the worker to log out before exiting.
const LOGOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "mailbox-cli")]
#[command(about = "Read-only CLI for an IMAPS mailbox")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the newest envelopes
    List {
        /// Folder to list from
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Maximum number of emails to show
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Number of newest messages to skip
        #[arg(long, default_value = "0")]
        skip: u32,
    },

    /// Show the body of a single email by UID
    Show {
        /// Email UID
        uid: u32,

        /// Folder containing the email
        #[arg(long, default_value = "INBOX")]
        folder: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;
    let mut mailbox = open_folder(&config, args.command.folder()).await?;

    let outcome = match &args.command {
        Command::List { limit, skip, .. } => cmd_list(&mut mailbox, &args, *limit, *skip).await,
        Command::Show { uid, .. } => cmd_show(&mut mailbox, &args, *uid).await,
    };

    mailbox.close();
    let _ = tokio::time::timeout(LOGOUT_GRACE, async {
        while mailbox.next_event().await.is_some() {}
    })
    .await;

    outcome
}

impl Command {
    fn folder(&self) -> &str {
        match self {
            Self::List { folder, .. } | Self::Show { folder, .. } => folder,
        }
    }
}

/// Connect, log in and select `folder`.
async fn open_folder(config: &ImapConfig, folder: &str) -> anyhow::Result<Mailbox> {
    let mut mailbox = Mailbox::new();
    mailbox.open(config);

    let login = mailbox.login(&config.username, &config.password);
    let reply = login
        .get(&mut mailbox)
        .await
        .with_context(|| format!("Could not reach {}:{}", config.host, config.port))?;
    if reply.status() != Some(Status::Ok) {
        bail!("Login failed: {}", reply.completion_text());
    }

    let select = mailbox.select(folder);
    let reply = select.get(&mut mailbox).await?;
    ensure_ok(&reply, &format!("SELECT {folder}"))?;
    Ok(mailbox)
}

/// Fail on a NO or BAD completion. Requests completed without reaching
/// the server carry no status and pass.
fn ensure_ok(reply: &Message, what: &str) -> anyhow::Result<()> {
    match reply.status() {
        Some(Status::No | Status::Bad) => bail!("{what} failed: {}", reply.completion_text()),
        _ => Ok(()),
    }
}

async fn cmd_list(
    mailbox: &mut Mailbox,
    args: &Args,
    limit: u32,
    skip: u32,
) -> anyhow::Result<()> {
    let fetch = mailbox.fetch_envelopes(limit, skip);
    let reply = fetch.get(mailbox).await?;
    ensure_ok(&reply, "FETCH")?;

    let entries = mailbox.get_latest(usize::try_from(limit).unwrap_or(usize::MAX), 0);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_entry_table(&entries);
    }

    Ok(())
}

async fn cmd_show(mailbox: &mut Mailbox, args: &Args, uid: u32) -> anyhow::Result<()> {
    let fetch = mailbox.fetch_body(uid);
    let reply = fetch.get(mailbox).await?;
    ensure_ok(&reply, "UID FETCH")?;

    let Some(body) = mailbox.get_body(uid) else {
        bail!("No message with UID {uid}");
    };
    let body = String::from_utf8_lossy(&body);

    if args.json {
        let value = serde_json::json!({ "uid": uid, "body": body });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("UID:     {uid}");
        println!("\n--- Body ---\n");
        println!("{body}");
    }

    Ok(())
}

fn print_entry_table(entries: &[MailEntry]) {
    if entries.is_empty() {
        println!("No emails found.");
        return;
    }

    let header = format!("{:<8} {:<20} {:<30} {}", "UID", "Date", "From", "Subject");
    println!("{header}");
    println!("{}", "-".repeat(100));

    for entry in entries {
        let date = entry.date().map_or_else(
            || entry.envelope.raw_date.clone().unwrap_or_default(),
            |d| d.format("%Y-%m-%d %H:%M").to_string(),
        );
        let from = entry
            .envelope
            .from_address()
            .map(ToString::to_string)
            .unwrap_or_default();
        println!(
            "{:<8} {:<20} {:<30} {}",
            entry.uid,
            truncate(&date, 20),
            truncate(&from, 28),
            truncate(entry.envelope.subject.as_deref().unwrap_or(""), 40),
        );
    }

    println!("\n{} email(s)", entries.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
