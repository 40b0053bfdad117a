//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::RunArgs;
use crate::bundle::Bundle;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tcav_core::config::SETTINGS_FILE;
use tcav_core::{Interpreter, JsonDict, Model, RunSettings, Tcav, load_settings};

const SETTINGS_HEADER: &str = "\
# tcav run settings. Command-line flags override these, and any key can
# also be set through the environment, e.g. TCAV_NUM_SPLITS=50.
#
# class_to_explain = \"positive\"

";

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

/// The explicit settings file, or `tcav.toml` in the workspace if it exists.
fn settings_path(explicit: Option<&Path>, workspace: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = workspace.join(SETTINGS_FILE);
            default.exists().then_some(default)
        }
    }
}

fn load(
    explicit: Option<&Path>,
    workspace: &Path,
    overrides: &JsonDict,
) -> anyhow::Result<RunSettings> {
    let path = settings_path(explicit, workspace);
    load_settings(path.as_deref(), overrides)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

/// Class labels are usually strings, but numeric and boolean classes are
/// accepted as JSON literals.
fn parse_class(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Settings given on the command line, highest priority.
fn run_overrides(args: &RunArgs) -> JsonDict {
    let mut overrides = JsonDict::new();
    if !args.concepts.is_empty() {
        overrides.insert("concept_set_ids".into(), args.concepts.clone().into());
    }
    if let Some(class) = &args.class_to_explain {
        overrides.insert("class_to_explain".into(), parse_class(class));
    }
    if let Some(layer) = &args.grad_layer {
        overrides.insert("grad_layer".into(), layer.clone().into());
    }
    if let Some(n) = args.num_splits {
        overrides.insert("num_splits".into(), n.into());
    }
    if let Some(seed) = args.random_state {
        overrides.insert("random_state".into(), seed.into());
    }
    if args.unseeded {
        overrides.insert("unseeded".into(), true.into());
    }
    if let Some(seed) = args.split_seed {
        overrides.insert("split_seed".into(), seed.into());
    }
    if args.parallel {
        overrides.insert("parallel".into(), true.into());
    }
    overrides
}

async fn handle_run(args: RunArgs, workspace: &Path) -> anyhow::Result<()> {
    let settings = load(args.config.as_deref(), workspace, &run_overrides(&args))?;
    let config = settings.tcav_config()?;

    let default_name = args
        .bundle
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    let (dataset, model) = Bundle::load(&args.bundle)?.into_parts(&default_name);

    let tcav = Tcav::new();
    if !tcav.is_compatible(&model) {
        anyhow::bail!(
            "Bundle output_spec has no gradients field linked to an embeddings field and a class field"
        );
    }

    tracing::info!(
        dataset = %dataset.name,
        examples = dataset.len(),
        concepts = config.concept_set_ids().len(),
        splits = config.num_splits(),
        parallel = settings.parallel,
        "Running TCAV"
    );

    let result = if settings.parallel {
        let model: Arc<dyn Model> = Arc::new(model);
        tcav.run_concurrent(&dataset.examples, model, None, &config)
            .await?
    } else {
        tcav.run_tcav(&dataset.examples, &model, None, &config)?
    };

    let json = serde_json::to_string_pretty(&result)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!(path = %path.display(), "Wrote result");
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(SETTINGS_FILE);
            if config_path.exists() {
                println!(
                    "Settings file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let defaults = RunSettings::default().to_toml()?;
            let toml_str = format!("{}{}", SETTINGS_HEADER, defaults);
            std::fs::write(&config_path, &toml_str)?;
            println!("Created default settings at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show { config } => {
            let settings = load(config.as_deref(), workspace, &JsonDict::new())?;
            println!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}
