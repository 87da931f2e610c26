//! Tidy - line-oriented front end for the local-first task list.
//!
//! Reads commands from stdin:
//!
//! ```text
//! add <text>     add a task
//! toggle <id>    flip completion
//! rm <id>        delete a task
//! ls             list tasks
//! quit           stop syncing and exit
//! ```

use std::sync::Arc;

use tidy_client::{
    Config, HttpShapeSource, HttpWriteApi, MutationHandle, SyncCoordinator, SyncEvent,
};
use tidy_engine::RecordId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidy_client=info,tidy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(shape = %config.shape_url, api = %config.api_url, "Starting Tidy");

    let client = reqwest::Client::new();
    let todos = SyncCoordinator::start(
        Arc::new(HttpShapeSource::from_config(client.clone(), &config)),
        Arc::new(HttpWriteApi::from_config(client, &config)),
        config.sync.clone(),
    );

    let mut events = todos.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::Ready => println!("-- synced"),
                SyncEvent::RolledBack {
                    record_id, reason, ..
                } => println!("-- change to #{record_id} reverted: {reason}"),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        match command {
            "" => {}
            "add" => match todos.insert(arg) {
                Ok(handle) => {
                    println!("added #{}", handle.record_id);
                    watch(handle);
                }
                Err(e) => println!("error: {e}"),
            },
            "toggle" | "rm" => {
                let Some(id) = parse_id(arg) else {
                    println!("usage: {command} <id>");
                    continue;
                };
                let issued = if command == "toggle" {
                    todos.toggle(id)
                } else {
                    todos.delete(id)
                };
                match issued {
                    Ok(Some(handle)) => watch(handle),
                    Ok(None) => println!("no task #{id}"),
                    Err(e) => println!("error: {e}"),
                }
            }
            "ls" => print_list(&todos),
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
    }

    todos.stop().await;
    Ok(())
}

fn parse_id(arg: &str) -> Option<RecordId> {
    arg.trim_start_matches('#').parse().ok()
}

/// Report a mutation's outcome in the background.
fn watch(handle: MutationHandle) {
    let id = handle.record_id;
    tokio::spawn(async move {
        if let Err(e) = handle.confirmed().await {
            tracing::debug!(record_id = id, error = %e, "Mutation not confirmed");
        }
    });
}

fn print_list(todos: &SyncCoordinator) {
    let snapshot = todos.query();
    if !snapshot.ready {
        println!("(syncing...)");
    }
    if snapshot.is_empty() {
        println!("no tasks");
    }
    for task in snapshot.iter() {
        let mark = if task.completed { "x" } else { " " };
        println!("[{mark}] #{} {}", task.id, task.text);
    }
    if snapshot.pending > 0 {
        println!("({} pending)", snapshot.pending);
    }
    if snapshot.remaining() > 0 {
        println!("{} left", snapshot.remaining());
    }
}
