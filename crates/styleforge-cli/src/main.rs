mod server;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use styleforge_contracts::api::{CreateProjectRequest, GenerateRequest};
use styleforge_contracts::config::ForgeConfig;
use styleforge_contracts::events::EventWriter;
use styleforge_engine::handlers::{self, ApiResponse};
use styleforge_engine::pipeline::UploadFile;
use styleforge_engine::StyleForge;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "styleforge",
    version,
    about = "Style projects: reference captioning, guided generation and fine-tuning"
)]
struct Cli {
    /// Append pipeline events to this JSONL journal.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image in a project's style.
    Generate(GenerateArgs),
    /// Caption every image of a project still awaiting one.
    Caption(ProjectArgs),
    /// Package captioned images and start a fine-tune.
    Train(ProjectArgs),
    TrainStatus(TrainStatusArgs),
    Projects(ProjectsArgs),
    Upload(UploadArgs),
    /// Serve the JSON API.
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Debug, Parser)]
struct ProjectArgs {
    #[arg(long)]
    project: String,
}

#[derive(Debug, Parser)]
struct TrainStatusArgs {
    #[arg(long)]
    project: String,
    /// Keep polling until the training leaves the `training` state.
    #[arg(long)]
    watch: bool,
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,
}

#[derive(Debug, Parser)]
struct ProjectsArgs {
    #[command(subcommand)]
    command: ProjectsCommand,
}

#[derive(Debug, Subcommand)]
enum ProjectsCommand {
    List,
    Create(CreateArgs),
    Show(ProjectArgs),
}

#[derive(Debug, Parser)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    #[arg(long)]
    project: String,
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Store the images without running the captioning batch.
    #[arg(long)]
    skip_caption: bool,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("styleforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Diagnostics go to stderr; stdout carries only the JSON response.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = ForgeConfig::from_env()?;
    let events = cli.events.map(EventWriter::open);

    match cli.command {
        Command::Serve(args) => {
            server::serve(args.bind, config, events)?;
            Ok(0)
        }
        command => {
            let forge = StyleForge::from_config(&config)?.with_events(events);
            let response = dispatch(&forge, command)?;
            print_response(&response)
        }
    }
}

fn dispatch(forge: &StyleForge, command: Command) -> Result<ApiResponse> {
    let response = match command {
        Command::Generate(args) => handlers::generate(
            forge,
            &GenerateRequest {
                prompt: args.prompt,
                project_id: args.project,
            },
        ),
        Command::Caption(args) => handlers::caption(forge, &args.project),
        Command::Train(args) => handlers::submit_training(forge, &args.project),
        Command::TrainStatus(args) if args.watch => watch_training(
            forge,
            &args.project,
            Duration::from_secs(args.interval_secs.max(1)),
        ),
        Command::TrainStatus(args) => handlers::training_status(forge, &args.project),
        Command::Projects(args) => match args.command {
            ProjectsCommand::List => handlers::list_projects(forge),
            ProjectsCommand::Create(create) => handlers::create_project(
                forge,
                &CreateProjectRequest {
                    name: create.name,
                    description: create.description,
                },
            ),
            ProjectsCommand::Show(show) => handlers::project_detail(forge, &show.project),
        },
        Command::Upload(args) => {
            let files = read_upload_files(&args.files)?;
            handlers::upload(forge, &args.project, &files, !args.skip_caption)
        }
        Command::Serve(_) => bail!("serve is not a one-shot command"),
    };
    Ok(response)
}

fn print_response(response: &ApiResponse) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(if response.is_success() { 0 } else { 1 })
}

/// Caller-side polling loop: stops on the first non-`training` answer or error.
fn watch_training(forge: &StyleForge, project_id: &str, interval: Duration) -> ApiResponse {
    loop {
        let response = handlers::training_status(forge, project_id);
        let status = response.body["status"].as_str().unwrap_or_default();
        if !response.is_success() || status != "training" {
            return response;
        }
        let last_log = response.body["logs"]
            .as_str()
            .and_then(|logs| logs.lines().last())
            .unwrap_or_default();
        info!(project_id, last_log, "training still running");
        thread::sleep(interval);
    }
}

fn read_upload_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    paths
        .iter()
        .map(|path| {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            Ok(UploadFile {
                filename: upload_name(path)?,
                bytes,
            })
        })
        .collect()
}

fn upload_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
