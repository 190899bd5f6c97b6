use anyhow::{bail, Result};
use cloud_explorer::app::{self, events::UserEvent, helpers::lock_state, state::AppState, view_model};
use cloud_explorer::config::ExplorerConfig;
use cloud_explorer::core::{CloudServices, NodeRef, StaticCatalog};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  cloud-explorer search <catalog.json> <query>   Search every subscription for matching resources
  cloud-explorer tree <catalog.json> [--all]     Expand and print the whole hierarchy";

enum Command {
    Search { catalog: PathBuf, query: String },
    Tree { catalog: PathBuf, include_hidden: bool },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let command = args.next();
    let catalog = args.next().map(PathBuf::from);
    let rest: Vec<String> = args.collect();
    match (command.as_deref(), catalog) {
        (Some("search"), Some(catalog)) if !rest.is_empty() => Ok(Command::Search {
            catalog,
            query: rest.join(" "),
        }),
        (Some("tree"), Some(catalog)) => Ok(Command::Tree {
            catalog,
            include_hidden: rest.iter().any(|a| a == "--all"),
        }),
        _ => bail!("{}", USAGE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so results on stdout stay pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = parse_args(std::env::args().skip(1))?;
    let config = ExplorerConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Could not load config, using defaults: {}", e);
        ExplorerConfig::default()
    });

    match command {
        Command::Search { catalog, query } => run_search(config, catalog, query).await,
        Command::Tree {
            catalog,
            include_hidden,
        } => run_tree(config, catalog, include_hidden).await,
    }
}

fn open_state(config: ExplorerConfig, catalog: &Path) -> Result<Arc<Mutex<AppState>>> {
    let catalog = Arc::new(StaticCatalog::load(catalog)?);
    let state = AppState::new(config, CloudServices::from_provider(catalog));
    Ok(Arc::new(Mutex::new(state)))
}

async fn run_search(config: ExplorerConfig, catalog: PathBuf, query: String) -> Result<()> {
    let state = open_state(config, &catalog)?;
    let (proxy, mut events) = mpsc::unbounded_channel();

    {
        let proxy = proxy.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                app::tasks::cancel_search(&proxy, &state);
            }
        });
    }
    app::tasks::start_search(query, proxy, state);

    while let Some(event) = events.recv().await {
        match event {
            UserEvent::SearchResult(result) => {
                println!(
                    "{}\t{}\t{}",
                    result.node.label, result.resource_type, result.scope
                );
            }
            UserEvent::SearchProgress(progress) => {
                eprintln!(
                    "Searched {}/{} subscriptions",
                    progress.completed, progress.total
                );
            }
            UserEvent::SearchFinished(summary) => {
                eprintln!(
                    "{} matches in {}/{} subscriptions ({:.2?}){}",
                    summary.matches,
                    summary.scopes_completed,
                    summary.total_scopes,
                    summary.elapsed,
                    if summary.cancelled { ", cancelled" } else { "" }
                );
                break;
            }
            // Cancelling aborts the search task, so no summary follows.
            UserEvent::StateUpdate(ui_state) if !ui_state.is_searching => {
                eprintln!("{}", ui_state.status_message);
                break;
            }
            UserEvent::ShowError(message) => eprintln!("Error: {}", message),
            _ => {}
        }
    }
    Ok(())
}

async fn run_tree(config: ExplorerConfig, catalog: PathBuf, include_hidden: bool) -> Result<()> {
    let state = open_state(config, &catalog)?;
    let (root, cancel) = {
        let state_guard = lock_state(&state);
        (state_guard.root.clone(), state_guard.tree_cancel.clone())
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    expand_all(root.clone(), cancel).await;

    print!(
        "{}",
        view_model::render_tree(&view_model::snapshot(&root), include_hidden)
    );
    Ok(())
}

/// Loads `node` and then all of its descendants, siblings concurrently.
fn expand_all(node: NodeRef, cancel: CancellationToken) -> BoxFuture<'static, ()> {
    async move {
        node.load_children(&cancel).await;
        let children = node.children();
        join_all(
            children
                .into_iter()
                .filter(|child| child.supports_children())
                .map(|child| expand_all(child, cancel.clone())),
        )
        .await;
    }
    .boxed()
}
