use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cadence_adaptor::AdaptorRegistry;
use cadence_config::{AdaptorConfig, EngineSettings, PromptTemplate, Recipe};
use cadence_engine::{ExecutionView, RecipeEngine};
use cadence_store::{Execution, ExecutionStatus, MemoryStore, SqliteStore, Store};

/// Cadence - orchestrates multi-step generation pipelines
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cadence)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine settings file (default: <data-dir>/settings.json)
  #[arg(long, global = true)]
  settings: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG is set
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a recipe and print its execution order
  Validate {
    /// Path to the recipe file (JSON)
    recipe_file: PathBuf,
  },

  /// Run a recipe; external input is read as JSON from stdin
  Run {
    /// Path to the recipe file (JSON)
    recipe_file: PathBuf,

    /// Project whose prompt and adaptor overrides apply
    #[arg(long)]
    project: String,

    /// SQLite database to record the execution in (default: in memory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON array of prompt templates to load before running
    #[arg(long)]
    templates: Option<PathBuf>,

    /// JSON array of adaptor configurations to load before running
    #[arg(long)]
    adaptors: Option<PathBuf>,
  },

  /// Print a recorded execution
  Show {
    execution_id: String,

    /// SQLite database holding the execution
    #[arg(long)]
    db: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cadence"),
  };

  let Some(command) = cli.command else {
    println!("cadence - use --help to see available commands");
    return Ok(());
  };

  if let Commands::Validate { recipe_file } = &command {
    return validate_recipe(recipe_file);
  }

  let settings = Arc::new(load_settings(cli.settings.as_deref(), &data_dir)?);
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run {
        recipe_file,
        project,
        db,
        templates,
        adaptors,
      } => {
        let sources = Sources {
          recipe_file,
          templates,
          adaptors,
        };
        run_recipe(sources, project, db, settings).await
      }
      Commands::Show { execution_id, db } => show_execution(execution_id, db, settings).await,
      Commands::Validate { .. } => Ok(()),
    }
  })
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn load_settings(explicit: Option<&Path>, data_dir: &Path) -> Result<EngineSettings> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let path = data_dir.join("settings.json");
      if !path.exists() {
        debug!(path = %path.display(), "settings_default");
        return Ok(EngineSettings::default());
      }
      path
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read settings file: {}", path.display()))?;
  EngineSettings::from_json(&content)
    .with_context(|| format!("failed to parse settings file: {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {} file: {}", what, path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse {} file: {}", what, path.display()))
}

fn validate_recipe(recipe_file: &Path) -> Result<()> {
  let recipe: Recipe = read_json(recipe_file, "recipe")?;
  print!("{}", describe_plan(&recipe)?);
  Ok(())
}

/// Execution order of a valid recipe, one node per line.
fn describe_plan(recipe: &Recipe) -> Result<String> {
  let plan = cadence_recipe::validate(recipe)
    .with_context(|| format!("recipe '{}' is invalid", recipe.id))?;

  let mut report = format!("recipe '{}' is valid ({} nodes)\n", recipe.id, plan.len());
  for (position, node_id) in plan.order().iter().enumerate() {
    let rank = plan.rank(node_id).unwrap_or(0);
    report.push_str(&format!("{:>3}  {}  (rank {})\n", position + 1, node_id, rank));
  }
  Ok(report)
}

struct Sources {
  recipe_file: PathBuf,
  templates: Option<PathBuf>,
  adaptors: Option<PathBuf>,
}

async fn open_store(db: Option<&Path>) -> Result<Arc<dyn Store>> {
  match db {
    Some(path) => {
      let store = SqliteStore::open(path)
        .await
        .with_context(|| format!("failed to open database: {}", path.display()))?;
      Ok(Arc::new(store))
    }
    None => Ok(Arc::new(MemoryStore::new())),
  }
}

/// Store the recipe and any templates or adaptor configs given on the command line.
async fn load_sources(store: &dyn Store, sources: &Sources) -> Result<Recipe> {
  let recipe: Recipe = read_json(&sources.recipe_file, "recipe")?;
  store.put_recipe(&recipe).await.context("failed to store recipe")?;
  if let Some(path) = &sources.templates {
    let templates: Vec<PromptTemplate> = read_json(path, "templates")?;
    for template in &templates {
      store.put_prompt_template(template).await?;
    }
  }
  if let Some(path) = &sources.adaptors {
    let configs: Vec<AdaptorConfig> = read_json(path, "adaptors")?;
    for config in &configs {
      store.put_adaptor_config(config).await?;
    }
  }
  Ok(recipe)
}

async fn run_recipe(
  sources: Sources,
  project_id: String,
  db: Option<PathBuf>,
  settings: Arc<EngineSettings>,
) -> Result<()> {
  let store = open_store(db.as_deref()).await?;
  let recipe = load_sources(store.as_ref(), &sources).await?;

  let external_input = read_input_from_stdin()?;
  eprintln!("Loaded recipe: {} ({} nodes)", recipe.name, recipe.nodes.len());

  let registry = Arc::new(AdaptorRegistry::with_builtin());
  let engine = RecipeEngine::new(store, registry, settings);
  let execution_id = engine
    .execute(&recipe.id, external_input, &project_id)
    .await
    .context("failed to start execution")?;
  eprintln!("Execution started: {}", execution_id);

  let wait = engine.wait(&execution_id);
  tokio::pin!(wait);
  let execution = tokio::select! {
    result = &mut wait => result?,
    _ = tokio::signal::ctrl_c() => {
      warn!(execution_id = %execution_id, "interrupted");
      engine.shutdown();
      wait.await?
    }
  };

  println!("{}", serde_json::to_string_pretty(&execution)?);
  check_outcome(&execution)
}

/// Failed and cancelled executions make the command fail.
fn check_outcome(execution: &Execution) -> Result<()> {
  match execution.status {
    ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
      let reason = execution
        .error
        .as_ref()
        .map_or("no error recorded", |e| e.message.as_str());
      bail!("execution {} ended {:?}: {}", execution.id, execution.status, reason)
    }
    _ => Ok(()),
  }
}

async fn show_execution(
  execution_id: String,
  db: PathBuf,
  settings: Arc<EngineSettings>,
) -> Result<()> {
  let view = load_view(&execution_id, &db, settings).await?;
  println!("{}", serde_json::to_string_pretty(&view)?);
  Ok(())
}

async fn load_view(
  execution_id: &str,
  db: &Path,
  settings: Arc<EngineSettings>,
) -> Result<ExecutionView> {
  let store = open_store(Some(db)).await?;
  let engine = RecipeEngine::new(store, Arc::new(AdaptorRegistry::with_builtin()), settings);
  engine
    .execution(execution_id)
    .await
    .with_context(|| format!("failed to load execution {}", execution_id))
}

fn read_input_from_stdin() -> Result<serde_json::Value> {
  let mut stdin = io::stdin();
  if stdin.is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  stdin
    .read_to_string(&mut input)
    .context("failed to read input from stdin")?;
  parse_input(&input)
}

/// Empty input means an empty object.
fn parse_input(input: &str) -> Result<serde_json::Value> {
  if input.trim().is_empty() {
    return Ok(serde_json::json!({}));
  }
  serde_json::from_str(input).context("failed to parse stdin as JSON")
}
