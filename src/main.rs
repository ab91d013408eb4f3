mod api;
mod app;
mod config;
mod models;
mod services;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use app::{App, ImageInput};
use services::SqliteStore;
use ui::TerminalUi;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var(config::BASE_URL_ENV)
        .unwrap_or_else(|_| config::DEFAULT_BASE_URL.to_string());
    let client = ApiClient::new(&base_url)?;
    let storage = Arc::new(SqliteStore::open()?);
    let terminal = Arc::new(TerminalUi::new());

    let mut app = App::new(client, storage, terminal.clone(), terminal).await?;

    println!("banter — chatting with {base_url}");
    println!("Type a message to send it, or /help for commands.");
    app.check_connection().await;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if dispatch(&mut app, command).await {
                break;
            }
        } else {
            app.send_message(line, None).await;
        }
    }

    Ok(())
}

/// Translate one `/command` line into an [`App`] call. Returns true when
/// the user asked to quit.
async fn dispatch(app: &mut App, command: &str) -> bool {
    let (verb, rest) = match command.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };

    match verb {
        "quit" | "exit" => return true,
        "help" => print_help(),
        "reconnect" => {
            if app.check_connection().await {
                println!("connected");
            }
        }
        "models" => {
            for model in app.load_models().await {
                println!("  {}", model.id);
            }
        }
        "model" if !rest.is_empty() => app.select_model(rest),
        "new" => {
            app.new_conversation().await;
        }
        "list" => {
            for conv in app.conversations() {
                let marker = if app.state().current_conversation_id.as_deref() == Some(conv.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}  {}", conv.id, conv.title);
            }
        }
        "open" if !rest.is_empty() => {
            if !app.open_conversation(rest).await {
                println!("no conversation with id {rest}");
            }
        }
        "rename" if !rest.is_empty() => {
            if let Some(id) = app.state().current_conversation_id.clone() {
                app.rename_conversation(&id, rest).await;
            }
        }
        "delete" => {
            if let Some(id) = app.state().current_conversation_id.clone() {
                app.delete_conversation(&id).await;
            }
        }
        "stop" => app.stop_generation(),
        "attach" => attach(app, rest).await,
        "export" => {
            let dir = if rest.is_empty() { "." } else { rest };
            app.export_conversation(Path::new(dir)).await;
        }
        "import" if !rest.is_empty() => match std::fs::read_to_string(rest) {
            Ok(json) => {
                app.import_conversation(&json).await;
            }
            Err(e) => println!("could not read {rest}: {e}"),
        },
        "copy" if !rest.is_empty() => match rest.parse::<usize>() {
            Ok(index) => match app.copy_message(index) {
                Some(text) => println!("{text}"),
                None => println!("no text at index {index}"),
            },
            Err(_) => println!("usage: /copy <index>"),
        },
        "set" => set_sampling(app, rest).await,
        "autoscroll" => {
            let enabled = rest != "off";
            app.set_autoscroll(enabled);
            println!("autoscroll {}", if enabled { "on" } else { "off" });
        }
        _ => println!("unknown command: /{verb} (try /help)"),
    }
    false
}

/// `/attach <file> <message...>` — send a message with an image part.
async fn attach(app: &mut App, rest: &str) {
    let (path, text) = match rest.split_once(' ') {
        Some((path, text)) => (path, text.trim()),
        None => (rest, ""),
    };
    if path.is_empty() {
        println!("usage: /attach <file> [message]");
        return;
    }

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            println!("could not read {path}: {e}");
            return;
        }
    };

    let mime_type = match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => {
            println!("unsupported image type: {path}");
            return;
        }
    };

    app.send_message(
        text,
        Some(ImageInput {
            mime_type: mime_type.to_string(),
            data,
        }),
    )
    .await;
}

async fn set_sampling(app: &mut App, rest: &str) {
    let (key, value) = match rest.split_once(' ') {
        Some((key, value)) => (key, value.trim()),
        None => {
            let s = app.settings();
            println!(
                "temperature {}  max-tokens {}",
                s.temperature, s.max_tokens
            );
            return;
        }
    };

    let settings = app.settings().clone();
    match key {
        "temperature" => match value.parse::<f32>() {
            Ok(t) => app.set_sampling(t, settings.max_tokens).await,
            Err(_) => println!("usage: /set temperature <float>"),
        },
        "max-tokens" => match value.parse::<u32>() {
            Ok(m) => app.set_sampling(settings.temperature, m).await,
            Err(_) => println!("usage: /set max-tokens <integer>"),
        },
        _ => println!("unknown setting: {key}"),
    }
}

fn print_help() {
    println!(
        "\
  /models              list available models
  /model <id>          select a model
  /new                 start a conversation
  /list                list conversations
  /open <id>           switch conversation
  /rename <title>      rename the active conversation
  /delete              delete the active conversation
  /attach <file> [msg] send a message with an image
  /copy <index>        print a message's text
  /export [dir]        export the active conversation
  /import <file>       import a conversation
  /set [key value]     show or change temperature / max-tokens
  /autoscroll [off]    toggle follow-output
  /stop                stop the current generation
  /reconnect           re-check server connectivity
  /quit                exit"
    );
}
