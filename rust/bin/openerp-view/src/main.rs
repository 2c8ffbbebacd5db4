//! `openerp-view`: load module views, then combine, render or validate them.
//!
//! Usage:
//!   openerp-view --data-dir <modules> combine <view>
//!   openerp-view --data-dir <modules> render <view> --groups base.group_user
//!   openerp-view --data-dir <modules> validate
//!
//! A view is named by id or by xml id (`module.name`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use openerp_view::{
    load_modules, EngineConfig, MemoryViewStore, Registry, User, View, ViewService, ViewType,
};
use tracing::info;

/// OpenERP view engine.
#[derive(Parser, Debug)]
#[command(name = "openerp-view", about = "OpenERP view inheritance engine")]
struct Cli {
    /// TOML config file.
    #[arg(long = "config", short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Module directory (overrides the config).
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    /// redb database path (overrides the config).
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,

    /// Keep views in memory instead of a database.
    #[arg(long = "memory", global = true)]
    memory: bool,

    /// Treat access inconsistencies as errors when rendering.
    #[arg(long = "strict", global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the combined architecture of a view.
    Combine {
        /// View id or xml id.
        view: String,
    },

    /// Print a view as rendered for a user.
    Render {
        /// View id or xml id.
        view: String,
        /// User login, for logs only.
        #[arg(long, default_value = "admin")]
        user: String,
        /// Comma separated groups of the user.
        #[arg(long, default_value = "")]
        groups: String,
        /// Also print the fields to read, as JSON on stderr.
        #[arg(long)]
        fields: bool,
    },

    /// Validate one view, or every view.
    Validate {
        /// View id or xml id.
        view: Option<String>,
    },

    /// Print the default view of a model.
    #[command(name = "default-view")]
    DefaultView {
        model: String,
        /// View type, e.g. form or list.
        #[arg(default_value = "form")]
        view_type: String,
    },
}

fn find_view(service: &ViewService, name: &str) -> anyhow::Result<View> {
    if let Ok(id) = name.parse() {
        return Ok(service.view(id)?);
    }
    service
        .find_by_xml_id(name)?
        .ok_or_else(|| anyhow::anyhow!("no view with xml id {name}"))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }
    if cli.db.is_some() {
        config.db_path = cli.db.clone();
    }
    config.strict |= cli.strict;

    let mut service = if cli.memory {
        ViewService::new(Box::new(MemoryViewStore::new()), Registry::new()).strict(config.strict)
    } else {
        ViewService::open(&config, Registry::new())?
    };

    if let Some(data_dir) = &config.data_dir {
        let report = load_modules(data_dir, &mut service)?;
        info!(
            modules = report.modules.len(),
            created = report.created,
            updated = report.updated,
            warnings = report.warnings.len(),
            "modules loaded from {}",
            data_dir.display()
        );
    }

    match cli.command {
        Commands::Combine { view } => {
            let view = find_view(&service, &view)?;
            println!("{}", service.combined_arch(view.id)?.to_xml());
        }

        Commands::Render {
            view,
            user,
            groups,
            fields,
        } => {
            let view = find_view(&service, &view)?;
            let user = User::new(
                user,
                groups.split(',').map(str::trim).filter(|g| !g.is_empty()),
            );
            let rendered = service.get_view(view.id, &user)?;
            println!("{}", rendered.arch.to_xml());
            if fields {
                eprintln!("{}", serde_json::to_string_pretty(&rendered.fields)?);
            }
            for warning in &rendered.warnings {
                eprintln!("warning: {warning}");
            }
        }

        Commands::Validate { view } => {
            let views = match view {
                Some(name) => vec![find_view(&service, &name)?],
                None => service.views()?,
            };
            let mut failed = 0;
            for view in &views {
                match service.validate(view.id, None) {
                    Ok(warnings) => {
                        for warning in warnings {
                            eprintln!("{}: warning: {warning}", view.display_name());
                        }
                    }
                    Err(err) => {
                        failed += 1;
                        eprintln!("{}: {err}", view.display_name());
                    }
                }
            }
            println!("{} view(s) checked, {failed} invalid", views.len());
            if failed > 0 {
                anyhow::bail!("validation failed");
            }
        }

        Commands::DefaultView { model, view_type } => {
            let view_type: ViewType = view_type.parse().map_err(anyhow::Error::msg)?;
            match service.default_view(&model, view_type)? {
                Some(view) => println!("{} {}", view.id, view.display_name()),
                None => anyhow::bail!("no {view_type} view for {model}"),
            }
        }
    }

    Ok(())
}
