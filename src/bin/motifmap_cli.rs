use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use motifmap::{
    about,
    engine::{Engine, MapEngine, Operation, ProjectState, Workflow},
    entity::EntityKind,
    entity_map::{EntityMap, MapValue},
    workbench::Workbench,
};
use serde::Serialize;
use std::{fs, path::Path};

const DEFAULT_STATE_PATH: &str = ".motifmap_state.json";

#[derive(Parser)]
#[command(
    name = "motifmap_cli",
    about = "Entity maps and track aggregation over a JSON workbench state",
    disable_version_flag = true
)]
struct Cli {
    /// State file to read and update
    #[arg(long, global = true, env = "MOTIFMAP_STATE", default_value = DEFAULT_STATE_PATH)]
    state: String,

    /// Print version and build number
    #[arg(long, short = 'V')]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported operations and result requests
    Capabilities,
    /// Summarize entities, tracks and maps in the state
    StateSummary,
    /// Apply one operation (inline JSON or @file.json)
    Op { json: String },
    /// Apply a workflow (inline JSON or @file.json)
    Workflow { json: String },
    /// Resolve a result request on a map without storing it
    Resolve { map: String, request: String },
    /// Print one map with its default, entries and constructor
    ShowMap { map: String },
    /// Replace the state with the one stored at PATH
    ImportState { path: String },
    /// Write the state to PATH
    ExportState { path: String },
    /// Replace the workbench (entities, tracks, parameters) keeping maps
    ImportWorkbench { path: String },
}

#[derive(Serialize)]
struct MapSummary {
    name: String,
    kind: EntityKind,
    numeric: bool,
    explicit_entries: usize,
    constructor: Option<String>,
}

#[derive(Serialize)]
struct StateSummary {
    sequence_count: usize,
    motif_count: usize,
    module_count: usize,
    collections: Vec<String>,
    partitions: Vec<String>,
    tracks: Vec<String>,
    maps: Vec<MapSummary>,
}

#[derive(Serialize)]
struct MapListing {
    name: String,
    kind: EntityKind,
    default: String,
    values: String,
    constructor: Option<String>,
}

fn load_json_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
    } else {
        Ok(value.to_string())
    }
}

fn load_state(path: &str) -> Result<ProjectState> {
    if Path::new(path).exists() {
        Ok(ProjectState::load_from_path(path)?)
    } else {
        Ok(ProjectState::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn map_summary<V: MapValue>(map: &EntityMap<V>) -> MapSummary {
    MapSummary {
        name: map.name().to_string(),
        kind: map.kind(),
        numeric: V::NUMERIC,
        explicit_entries: map.len(),
        constructor: map.constructor_string(),
    }
}

fn map_listing<V: MapValue>(map: &EntityMap<V>) -> MapListing {
    MapListing {
        name: map.name().to_string(),
        kind: map.kind(),
        default: map.get_default().format_value(),
        values: map.value_list(),
        constructor: map.constructor_string(),
    }
}

fn summarize_state(state: &ProjectState) -> StateSummary {
    let wb = &state.workbench;
    let mut maps: Vec<MapSummary> = state
        .numeric_maps
        .values()
        .map(map_summary)
        .chain(state.text_maps.values().map(map_summary))
        .collect();
    maps.sort_by(|a, b| a.name.cmp(&b.name));
    StateSummary {
        sequence_count: wb.sequences.len(),
        motif_count: wb.motifs.len(),
        module_count: wb.modules.len(),
        collections: wb.collections.iter().map(|c| c.name.clone()).collect(),
        partitions: wb.partitions.iter().map(|p| p.name.clone()).collect(),
        tracks: wb.tracks.iter().map(|t| t.name.clone()).collect(),
        maps,
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    init_tracing();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.version {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    let command = cli
        .command
        .ok_or_else(|| anyhow!("Missing command, see --help"))?;
    let state_path = cli.state.as_str();

    match command {
        Commands::Capabilities => print_json(&MapEngine::capabilities()),
        Commands::StateSummary => print_json(&summarize_state(&load_state(state_path)?)),
        Commands::Op { json } => {
            let json = load_json_arg(&json)?;
            let op: Operation = serde_json::from_str(&json).context("Invalid operation JSON")?;
            let mut engine = MapEngine::from_state(load_state(state_path)?);
            let result = engine.apply(op)?;
            engine.state().save_to_path(state_path)?;
            print_json(&result)
        }
        Commands::Workflow { json } => {
            let json = load_json_arg(&json)?;
            let workflow: Workflow =
                serde_json::from_str(&json).context("Invalid workflow JSON")?;
            let mut engine = MapEngine::from_state(load_state(state_path)?);
            let results = engine.apply_workflow(workflow)?;
            engine.state().save_to_path(state_path)?;
            print_json(&results)
        }
        Commands::Resolve { map, request } => {
            let mut engine = MapEngine::from_state(load_state(state_path)?);
            let result = engine.apply(Operation::ResolveResult {
                map,
                request,
                output_name: None,
            })?;
            print_json(&result.value)
        }
        Commands::ShowMap { map } => {
            let state = load_state(state_path)?;
            let listing = match (state.numeric_maps.get(&map), state.text_maps.get(&map)) {
                (Some(numeric), _) => map_listing(numeric),
                (None, Some(text)) => map_listing(text),
                (None, None) => return Err(anyhow!("Map '{map}' not found in state '{state_path}'")),
            };
            print_json(&listing)
        }
        Commands::ImportState { path } => {
            let state = ProjectState::load_from_path(&path)?;
            state.save_to_path(state_path)?;
            println!("Loaded state from '{path}' into '{state_path}'");
            Ok(())
        }
        Commands::ExportState { path } => {
            let state = load_state(state_path)?;
            state.save_to_path(&path)?;
            println!("Saved state from '{state_path}' to '{path}'");
            Ok(())
        }
        Commands::ImportWorkbench { path } => {
            let mut state = load_state(state_path)?;
            state.workbench = Workbench::load_from_path(&path)?;
            state.save_to_path(state_path)?;
            println!("Loaded workbench from '{path}' into '{state_path}'");
            Ok(())
        }
    }
}
