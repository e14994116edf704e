//! Dependency-aware bead scheduler CLI.
//!
//! Beads live in `.beads/beads.json` under the current directory. The
//! `swarm`, `loop` and `auto-loop` commands drive ready beads through the
//! configured executor command and print a run report to stdout.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use beadrun::cancel::CancellationCoordinator;
use beadrun::core::graph::Graph;
use beadrun::core::lifecycle::Transition;
use beadrun::core::types::{BeadKind, BeadStatus, NewBead};
use beadrun::exit_codes;
use beadrun::io::config::{RunConfig, load_config};
use beadrun::io::executor::CommandExecutor;
use beadrun::io::file_store::FileStore;
use beadrun::io::init::{BeadsPaths, InitOptions, init_beads};
use beadrun::io::operator::StdinOperator;
use beadrun::io::store::{BeadFilter, BeadStore};
use beadrun::ledger::apply_transition;
use beadrun::looping::{LoopConfig, LoopMode, run_loop};
use beadrun::logging;
use beadrun::report::{RunEvent, RunReport};
use beadrun::scope::load_graph;
use beadrun::swarm::{SwarmConfig, run_swarm};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(name = "beadrun", version, about = "Dependency-aware bead scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.beads/` with a default config and an empty bead store.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Create a pending bead and print its id.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "non-testable")]
        kind: BeadKind,
        /// Lower runs first among ready beads.
        #[arg(long, default_value_t = 0)]
        priority: u32,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        /// Bead that must complete first (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Opaque text handed to the executor on stdin.
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Declare that `id` depends on `depends_on`.
    Dep { id: String, depends_on: String },
    /// List beads.
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        status: Option<BeadStatus>,
        /// Print JSON instead of one line per bead.
        #[arg(long)]
        json: bool,
    },
    /// Print ready bead ids in dispatch order.
    Ready {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Build the dependency graph and report cycles or missing dependencies.
    Validate {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Run ready beads concurrently with a pool of workers.
    Swarm {
        #[command(flatten)]
        filter: FilterArgs,
        /// Override `max_workers` from the config.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run ready beads one at a time, asking on stdin between beads.
    Loop {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Run ready beads one at a time without asking.
    AutoLoop {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Move a blocked bead back to pending.
    Retry { id: String },
    /// Move an abandoned in-progress bead back to pending.
    Release { id: String },
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Only beads in this group.
    #[arg(long)]
    group: Option<String>,
    /// Only children of this parent bead.
    #[arg(long)]
    parent: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> BeadFilter {
        BeadFilter {
            group: self.group.clone(),
            status: None,
            parent_id: self.parent.clone(),
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let paths = BeadsPaths::new(&root);
    match cli.command {
        Command::Init { force } => {
            init_beads(&root, &InitOptions { force })?;
            Ok(exit_codes::OK)
        }
        Command::Create {
            title,
            kind,
            priority,
            group,
            parent,
            depends_on,
            payload,
        } => {
            let store = open_store(&paths)?;
            let id = store.create(NewBead {
                title,
                kind,
                priority,
                payload,
                parent_id: parent,
                group,
                depends_on: depends_on.into_iter().collect(),
            })?;
            println!("{id}");
            Ok(exit_codes::OK)
        }
        Command::Dep { id, depends_on } => cmd_dep(&paths, &id, &depends_on),
        Command::List {
            filter,
            status,
            json,
        } => cmd_list(&paths, &filter, status, json),
        Command::Ready { filter } => {
            let store = open_store(&paths)?;
            let graph = load_graph(&store, &filter.to_filter())?;
            for bead in graph.ready() {
                println!("{}", bead.id);
            }
            Ok(exit_codes::OK)
        }
        Command::Validate { filter } => {
            let store = open_store(&paths)?;
            let graph = load_graph(&store, &filter.to_filter())?;
            println!(
                "ok: {} beads, {} ready, {} unreachable",
                graph.beads().count(),
                graph.ready().len(),
                graph.unreachable().len()
            );
            Ok(exit_codes::OK)
        }
        Command::Swarm { filter, workers } => cmd_swarm(&paths, &filter, workers),
        Command::Loop { filter, max_steps } => cmd_loop(&paths, &filter, max_steps, true),
        Command::AutoLoop { filter, max_steps } => cmd_loop(&paths, &filter, max_steps, false),
        Command::Retry { id } => cmd_transition(&paths, &id, Transition::Retry),
        Command::Release { id } => cmd_transition(&paths, &id, Transition::Release),
    }
}

fn open_store(paths: &BeadsPaths) -> Result<FileStore> {
    if !paths.beads_dir.is_dir() {
        bail!(
            "missing {} (run `beadrun init` first)",
            paths.beads_dir.display()
        );
    }
    Ok(FileStore::open(&paths.store_path))
}

fn load_run_config(paths: &BeadsPaths) -> Result<RunConfig> {
    load_config(&paths.config_path).with_context(|| format!("load {}", paths.config_path.display()))
}

fn cmd_dep(paths: &BeadsPaths, id: &str, depends_on: &str) -> Result<i32> {
    let store = open_store(paths)?;
    // Reject the edge up front if it would close a cycle.
    let mut beads = store.list(&BeadFilter::default())?;
    let bead = beads
        .iter_mut()
        .find(|bead| bead.id == id)
        .ok_or_else(|| anyhow!("bead '{id}' not found"))?;
    bead.depends_on.insert(depends_on.to_string());
    Graph::build(beads).with_context(|| format!("add dependency {id} -> {depends_on}"))?;

    store.add_dependency(id, depends_on)?;
    Ok(exit_codes::OK)
}

fn cmd_list(
    paths: &BeadsPaths,
    filter: &FilterArgs,
    status: Option<BeadStatus>,
    json: bool,
) -> Result<i32> {
    let store = open_store(paths)?;
    let filter = BeadFilter {
        status,
        ..filter.to_filter()
    };
    let beads = store.list(&filter)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&beads).context("serialize beads")?
        );
        return Ok(exit_codes::OK);
    }
    for bead in &beads {
        let deps: Vec<&str> = bead.depends_on.iter().map(String::as_str).collect();
        println!(
            "{}\t{}\t{}\tp{}\t{}\t[{}]",
            bead.id,
            bead.status,
            bead.kind,
            bead.priority,
            bead.title,
            deps.join(",")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_transition(paths: &BeadsPaths, id: &str, transition: Transition) -> Result<i32> {
    let store = open_store(paths)?;
    let reason = format!("{transition} by operator");
    let bead = apply_transition(&store, id, transition, Some(&reason))?;
    println!("{} {}", bead.id, bead.status);
    Ok(exit_codes::OK)
}

fn cmd_swarm(paths: &BeadsPaths, filter: &FilterArgs, workers: Option<usize>) -> Result<i32> {
    let mut config = load_run_config(paths)?;
    if let Some(workers) = workers {
        config.max_workers = workers;
        config.validate()?;
    }
    let store = open_store(paths)?;
    let graph = load_graph(&store, &filter.to_filter())?;
    let executor = CommandExecutor::from_config(&config, &paths.root);
    let swarm_config = SwarmConfig {
        max_workers: config.max_workers,
    };

    let flag_path = paths.cancel_flag_path.clone();
    let poll = config.cancel_poll_interval();
    let (store, executor) = (&store, &executor);
    let report = build_runtime()?.block_on(async move {
        let cancel = CancellationCoordinator::new();
        let watchers = start_cancel_sources(&cancel, flag_path, poll);
        let report = run_swarm(store, graph, executor, &swarm_config, &cancel, print_event).await;
        for watcher in watchers {
            watcher.abort();
        }
        report
    })?;
    Ok(finish(&report))
}

fn cmd_loop(
    paths: &BeadsPaths,
    filter: &FilterArgs,
    max_steps: Option<usize>,
    stepped: bool,
) -> Result<i32> {
    let config = load_run_config(paths)?;
    let store = open_store(paths)?;
    let graph = load_graph(&store, &filter.to_filter())?;
    let executor = CommandExecutor::from_config(&config, &paths.root);
    let loop_config = LoopConfig { max_steps };

    let stdin = io::stdin();
    let mut operator = StdinOperator::new(stdin.lock(), io::stderr());
    let mode = if stepped {
        LoopMode::Stepped(&mut operator)
    } else {
        LoopMode::Auto
    };

    let flag_path = paths.cancel_flag_path.clone();
    let poll = config.cancel_poll_interval();
    let (store, executor) = (&store, &executor);
    let report = build_runtime()?.block_on(async move {
        let cancel = CancellationCoordinator::new();
        let watchers = start_cancel_sources(&cancel, flag_path, poll);
        let report = run_loop(
            store,
            graph,
            executor,
            mode,
            &loop_config,
            &cancel,
            print_event,
        )
        .await;
        for watcher in watchers {
            watcher.abort();
        }
        report
    })?;
    Ok(finish(&report))
}

/// Ctrl-C escalates cancellation; the flag file requests a graceful stop.
fn start_cancel_sources(
    cancel: &CancellationCoordinator,
    flag_path: PathBuf,
    poll: Duration,
) -> [tokio::task::JoinHandle<()>; 2] {
    [
        cancel.watch_ctrl_c(),
        cancel.watch_flag_file(flag_path, poll),
    ]
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Dispatched { bead_id, title } => println!("dispatched {bead_id} ({title})"),
        RunEvent::Resolved(resolution) => println!("{resolution}"),
    }
    // Keep progress visible when stdout is piped.
    if let Err(err) = io::stdout().flush() {
        debug!(err = %err, "flush stdout failed");
    }
}

fn finish(report: &RunReport) -> i32 {
    for line in report.render_lines() {
        println!("{line}");
    }
    report.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["beadrun", "init"]).expect("parse");
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_create_with_repeated_dependencies() {
        let cli = Cli::try_parse_from([
            "beadrun",
            "create",
            "--title",
            "impl parser",
            "--kind",
            "impl",
            "--priority",
            "2",
            "--depends-on",
            "bd-1",
            "--depends-on",
            "bd-2",
        ])
        .expect("parse");
        let Command::Create {
            kind,
            priority,
            depends_on,
            ..
        } = cli.command
        else {
            panic!("expected create");
        };
        assert_eq!(kind, BeadKind::Impl);
        assert_eq!(priority, 2);
        assert_eq!(depends_on, vec!["bd-1".to_string(), "bd-2".to_string()]);
    }

    #[test]
    fn parse_swarm_filter_and_workers() {
        let cli = Cli::try_parse_from(["beadrun", "swarm", "--group", "parser", "--workers", "4"])
            .expect("parse");
        let Command::Swarm { filter, workers } = cli.command else {
            panic!("expected swarm");
        };
        assert_eq!(filter.group.as_deref(), Some("parser"));
        assert_eq!(workers, Some(4));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let parsed = Cli::try_parse_from(["beadrun", "create", "--title", "x", "--kind", "epic"]);
        assert!(parsed.is_err());
    }
}
