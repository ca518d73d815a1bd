/// ChatSphere terminal client - Main entry point
use anyhow::anyhow;
use chatsphere_core::search::SearchStatus;
use chatsphere_core::{
    ChatHandle, ChatView, Config, ConnectionManager, Contact, Directory, HttpDirectory, Message,
    SessionStore, ViewSnapshot,
};
use colored::*;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("chatsphere")
        .to_string();
    let (config, rest) =
        Config::from_args(&args).map_err(|e| anyhow!("Configuration error: {}", e))?;

    let (email, password) = match rest.as_slice() {
        [cmd, email, password] if cmd == "login" => (email.clone(), password.clone()),
        _ => {
            print_usage(&bin);
            return Ok(());
        }
    };

    let directory = Arc::new(HttpDirectory::new(config.api_url.clone())?);
    let sessions = SessionStore::new();
    let session = directory
        .login(&email, &password)
        .await
        .map_err(|e| anyhow!("Login failed: {}", e))?;
    println!(
        "{} Logged in as {} ({})",
        "✓".green().bold(),
        session.name.bright_white().bold(),
        session.id.cyan()
    );
    sessions.save(session.clone());

    let manager = ConnectionManager::init_global(config.clone());
    let connection = manager
        .acquire(&session)
        .map_err(|e| anyhow!("Failed to start transport: {}", e))?;
    let handle = ChatView::spawn(connection, session.clone(), directory, &config);
    let renderer = tokio::spawn(render(handle.clone(), session.id.clone()));

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&handle, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    renderer.abort();
    manager.release();
    sessions.clear();
    println!("{} Logged out", "✓".green().bold());

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "💬 ChatSphere".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!(
        "  {} [--server <host:port>] [--api <url>] [--collapse-echoes] {} <email> <password>",
        bin.cyan(),
        "login".cyan()
    );
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                 Show recent contacts", "/contacts".cyan());
    println!("  {} <query>           Search users by name", "/search".cyan());
    println!("  {} <id> [name]         Open a conversation", "/open".cyan());
    println!("  {}                      Show conversation status", "/who".cyan());
    println!("  {}                     Log out and exit", "/quit".cyan());
    println!("  anything else sends a message to the open conversation");
}

/// Returns false when the client should exit
async fn run_command(handle: &ChatHandle, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" => return false,
        "/help" => print_help(),
        "/contacts" => {
            print_contacts("Recent contacts", &handle.snapshot().contacts);
            handle.refresh_contacts();
        }
        "/search" => {
            handle.search(arg);
        }
        "/open" => {
            let (id, name) = match arg.split_once(' ') {
                Some((id, name)) => (id, Some(name.trim())),
                None => (arg, None),
            };
            if id.is_empty() {
                eprintln!("{}", "Usage: /open <id> [name]".yellow());
                return true;
            }
            let snapshot = handle.snapshot();
            let name = name
                .map(str::to_string)
                .or_else(|| {
                    snapshot
                        .contacts
                        .iter()
                        .chain(snapshot.search.results.iter())
                        .find(|c| c.id == id)
                        .map(|c| c.name.clone())
                })
                .unwrap_or_else(|| id.to_string());
            handle.select_peer(Contact::new(id, name));
        }
        "/who" => print_status(&handle.snapshot()),
        _ if command.starts_with('/') => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
        }
        _ => {
            handle.notify_typing();
            if let Err(e) = handle.send_message(line).await {
                eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            }
        }
    }
    true
}

fn print_contacts(title: &str, contacts: &[Contact]) {
    if contacts.is_empty() {
        println!("{}", format!("{}: none", title).dimmed());
        return;
    }
    println!("{}", format!("{}:", title).bright_white().bold());
    for c in contacts {
        println!("  {} {}", c.id.cyan(), c.name);
    }
}

fn print_status(snap: &ViewSnapshot) {
    let link = if snap.connected {
        "connected".green()
    } else {
        "disconnected".red()
    };
    println!("Transport: {}", link);
    match &snap.active_peer {
        Some(peer) => {
            let presence = if snap.peer_online {
                "online".green()
            } else {
                "offline".dimmed()
            };
            println!("Talking to {} ({}) - {}", peer.name.bold(), peer.id.cyan(), presence);
        }
        None => println!("No conversation open"),
    }
    if !snap.unread.is_empty() {
        println!("Unread from: {}", snap.unread.join(", ").yellow());
    }
}

fn print_message(msg: &Message, self_id: &str, peer_name: &str) {
    let time = msg.timestamp.format("%H:%M:%S").to_string();
    if msg.sender_id == self_id {
        println!("{} {} {}", time.dimmed(), "you:".green().bold(), msg.body);
    } else {
        println!(
            "{} {} {}",
            time.dimmed(),
            format!("{}:", peer_name).cyan().bold(),
            msg.body
        );
    }
}

/// Messages added at the head since `prev`, or `None` when the list changed
/// in any other way (history arrived, peer switched).
fn fresh<'a>(prev: &[Message], next: &'a [Message]) -> Option<&'a [Message]> {
    let added = next.len().checked_sub(prev.len())?;
    if next[added..] == *prev {
        Some(&next[..added])
    } else {
        None
    }
}

/// Print what changed between consecutive snapshots
async fn render(mut handle: ChatHandle, self_id: String) {
    let mut prev = handle.snapshot();
    while let Some(next) = handle.changed().await {
        if next.connected != prev.connected {
            if next.connected {
                println!("{} Connected", "●".green());
            } else {
                println!("{} Disconnected", "○".red());
            }
        }

        let peer_name = next
            .active_peer
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();

        if next.active_peer != prev.active_peer {
            if let Some(peer) = &next.active_peer {
                println!("{} {}", "──".dimmed(), peer.name.bright_white().bold());
            }
        }

        let same_peer = next.active_peer == prev.active_peer;
        match fresh(&prev.messages, &next.messages).filter(|_| same_peer) {
            Some(added) => {
                for msg in added.iter().rev() {
                    print_message(msg, &self_id, &peer_name);
                }
            }
            None => {
                for msg in next.messages.iter().rev() {
                    print_message(msg, &self_id, &peer_name);
                }
            }
        }

        if next.peer_typing && !prev.peer_typing {
            println!("{}", format!("{} is typing...", peer_name).dimmed().italic());
        }

        for sender in next.unread.iter().filter(|s| !prev.unread.contains(s)) {
            println!("{} New message from {}", "✉".yellow(), sender.yellow());
        }

        if next.contacts != prev.contacts {
            print_contacts("Recent contacts", &next.contacts);
        }

        let status = next.search.status();
        if status != prev.search.status() || next.search.results != prev.search.results {
            match status {
                SearchStatus::Found(_) => print_contacts("Search results", &next.search.results),
                SearchStatus::NoResults => println!("{}", "No users found".dimmed()),
                SearchStatus::Failed => println!("{}", "Search failed".red()),
                SearchStatus::Idle | SearchStatus::Pending => {}
            }
        }

        prev = next;
    }
}
