//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use authbridge_config::{BridgeConfig, CONFIG_TEMPLATE, LoadedConfig};
use clap::{Args, Subcommand};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration, routes and providers
    Show,

    /// Validate configuration and list warnings
    Check,

    /// Show configuration file path and search order
    Path,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./authbridge.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Check => cmd_check(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
    }
}

/// Copy of `config` safe to print.
fn redacted(config: &BridgeConfig) -> BridgeConfig {
    let mut config = config.clone();
    for provider in config.providers.values_mut() {
        if provider.client_secret.is_some() {
            provider.client_secret = Some("<redacted>".to_string());
        }
    }
    config
}

fn print_sources(loaded: &LoadedConfig) {
    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = redacted(&loaded.config);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("# authbridge Configuration\n");
    print_sources(&loaded);

    let server = config.server();
    let upstream = config.upstream();
    println!("Server:");
    println!("  bind: {}", server.bind);
    println!(
        "  upstream: {}",
        upstream.base_url.as_deref().unwrap_or("(per route)")
    );
    println!("  inbound verification: {}", config.inbound().verification);
    println!();

    if config.providers.is_empty() {
        println!("No providers configured\n");
    } else {
        println!("Providers:");
        for (name, provider) in &config.providers {
            println!("  {:<12} {} (client {})", name, provider.token_url, provider.client_id);
        }
        println!();
    }

    if config.routes.is_empty() {
        println!("No routes configured\n");
    } else {
        println!("Routes:");
        for route in &config.routes {
            let auth = match (&route.provider, route.requires_downstream_auth) {
                (Some(provider), true) => format!("mint via {}", provider),
                _ => "passthrough".to_string(),
            };
            let relocation = route
                .credential_relocation_header
                .as_deref()
                .map(|h| format!(", caller -> {}", h))
                .unwrap_or_default();
            println!("  {:<12} {:<16} {}{}", route.name(), route.pattern, auth, relocation);
        }
        println!();
    }

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_check(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    if loaded.loaded_from().is_empty() {
        bail!("No config file found. Run `authbridge config init` or pass --config <file>.");
    }

    let result = loaded.config.validate();

    if ctx.json_output {
        let report = serde_json::json!({
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
            "warnings": loaded.warnings,
            "routes": loaded.config.routes.len(),
            "providers": loaded.config.providers.len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for w in &loaded.warnings {
            println!("⚠ {}", w);
        }
    }

    result?;
    if !ctx.json_output {
        println!(
            "✓ Configuration is valid ({} routes, {} providers)",
            loaded.config.routes.len(),
            loaded.config.providers.len()
        );
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    if let Some(ref path) = ctx.config_path {
        println!("{} (--config)", path.display());
        return Ok(());
    }

    let loaded = authbridge_config::load_config(None)?;
    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("authbridge.toml")
    } else {
        match authbridge_config::user_config_path() {
            Some(path) => path,
            None => bail!("Could not determine config directory"),
        }
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    authbridge_config::write_file(&path, CONFIG_TEMPLATE)?;
    println!("Created config file: {}", path.display());
    Ok(())
}
