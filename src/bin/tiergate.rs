//! tiergate CLI
//!
//! Evaluate access decisions and inspect permission catalogs from the shell.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tiergate::{AccessGate, AccessGateBuilder, CatalogDocument, GateConfig, PermissionSet, UserContext};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tiergate")]
#[command(about = "Feature access and credit checks for the HR platform")]
struct Args {
    /// Gate configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Permission catalog (JSON or TOML), overrides `catalog_path` from the config
    #[arg(short = 'f', long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide access to one feature
    Check {
        /// Feature key to check
        feature: String,

        /// User context as a JSON file; omit for an anonymous visitor
        #[arg(short = 'u', long)]
        user: Option<PathBuf>,
    },

    /// Validate a catalog document and report what it contains
    Validate {
        /// Catalog document to validate (defaults to --catalog)
        path: Option<PathBuf>,
    },

    /// List every active feature with the decision for a user
    List {
        /// User context as a JSON file; omit for an anonymous visitor
        #[arg(short = 'u', long)]
        user: Option<PathBuf>,
    },
}

fn read_user(path: Option<&Path>) -> anyhow::Result<Option<UserContext>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading user context {}", path.display()))?;
    let user = serde_json::from_str(&text)
        .with_context(|| format!("parsing user context {}", path.display()))?;
    Ok(Some(user))
}

fn load_config(args: &Args) -> anyhow::Result<GateConfig> {
    let mut config = match &args.config {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GateConfig::default(),
    };
    if let Some(catalog) = &args.catalog {
        config.catalog_path = Some(catalog.clone());
    }
    Ok(config)
}

fn open_gate(args: &Args) -> anyhow::Result<AccessGate> {
    let config = load_config(args)?;
    if config.catalog_path.is_none() {
        bail!("no permission catalog: pass --catalog or set catalog_path in the config");
    }
    Ok(AccessGateBuilder::new().config(config).build()?)
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;

    let document = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => CatalogDocument::from_toml(&text)?,
        _ => CatalogDocument::from_json(&text)?,
    };
    let set = PermissionSet::from_rows(document.features, 1)?;

    println!(
        "{}: catalog v{} with {} active and {} inactive features",
        path.display(),
        document.version,
        set.len(),
        set.inactive_count()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Check { feature, user } => {
            let gate = open_gate(&args)?;
            let user = read_user(user.as_deref())?;
            let result = gate.check(user.as_ref(), feature);

            info!("Checked '{}' for {:?}", feature, user.as_ref().map(|u| &u.user_id));
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(message) = result.message_fa() {
                println!("{}", message);
            }
        }
        Command::Validate { path } => {
            let path = match (path, &args.catalog) {
                (Some(path), _) | (None, Some(path)) => path.clone(),
                (None, None) => match load_config(&args)?.catalog_path {
                    Some(path) => path,
                    None => bail!("nothing to validate: pass a catalog path"),
                },
            };
            validate(&path)?;
        }
        Command::List { user } => {
            let gate = open_gate(&args)?;
            let user = read_user(user.as_deref())?;

            for (row, result) in gate.visible_features(user.as_ref()) {
                let status = match (result.has_access, result.can_edit) {
                    (true, true) => "edit",
                    (true, false) => "view",
                    (false, _) => "-",
                };
                let reason = result.reason.map_or("", |r| r.as_str());
                println!(
                    "{:<32} {:<12} {:<5} {:>4}  {}",
                    row.key(),
                    row.feature_category,
                    status,
                    row.credit_cost,
                    reason
                );
            }
        }
    }

    Ok(())
}
