// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Weaver main entry point - CLI and commands.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

use weaver::config::{self, CliOptions, ConfigPolicy, MetricTarget, ResolvedConfig};
use weaver::host::Host;
use weaver::telemetry::{exposition, init_telemetry, TelemetryConfig, Verbosity, GLOBAL_REGISTRY};
use weaver::unit::{codec, ClassUnit, FieldType, MethodDescriptor};
use weaver::weave::{contract, extract_plan, Policy, RewriteOutcome, Weaver};
use weaver::{Value, VERSION};

/// Weaver - load-time metrics weaving for compiled class units.
#[derive(Parser)]
#[command(name = "weaver")]
#[command(author, version, about = "Load-time metrics weaving for class units", long_about = None)]
struct Cli {
    /// Configuration file (skips workspace discovery)
    #[arg(short, long, global = true, env = "WEAVER_CONFIG")]
    config: Option<PathBuf>,

    /// Extra class patterns to leave alone
    #[arg(long, global = true)]
    deny: Vec<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for weaver.
#[derive(Subcommand)]
enum Commands {
    /// Rewrite a unit file
    Rewrite {
        /// Input unit (.wvu or .json)
        input: PathBuf,
        /// Output path (defaults to `<stem>.woven.<ext>`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a unit and the metrics that would be woven into it
    Inspect {
        input: PathBuf,
        /// Print the unit as JSON
        #[arg(long)]
        json: bool,
    },

    /// Weave and run units in the reference host, then print the metrics
    Run {
        /// Units to load; the first one owns the entry point by default
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Static entry point, `name(desc)` or `pkg/Class.name(desc)`
        #[arg(short, long)]
        entry: String,
        /// Arguments for the entry point
        #[arg(short, long = "arg")]
        args: Vec<String>,
        /// How many times to call the entry point
        #[arg(long, default_value_t = 1)]
        times: u32,
        /// Load the units as they are
        #[arg(long)]
        no_weave: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
    /// Validate the configuration and report what it declares
    Check,
    /// Write an example weaver.yaml in the current directory
    Init,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cli_options = CliOptions {
        deny: cli.deny.clone(),
        no_color: cli.no_color,
        ..Default::default()
    };
    let config = resolve_config(cli.config.as_deref(), cli_options)?;

    if !config.ansi {
        colored::control::set_override(false);
    }
    let verbosity = Verbosity::from_flags(cli.verbose, cli.debug);
    init_telemetry(&TelemetryConfig::new(&config.logging(), verbosity)?)?;

    handle_command(cli.command, &config)
}

fn resolve_config(explicit: Option<&Path>, cli_options: CliOptions) -> anyhow::Result<ResolvedConfig> {
    if let Some(path) = explicit {
        return config::load_explicit_config(path, cli_options)
            .with_context(|| format!("loading {}", path.display()));
    }
    let cwd = std::env::current_dir()?;
    let root = config::find_workspace_root(&cwd).unwrap_or(cwd);
    Ok(config::load_config(&root, cli_options)?)
}

fn handle_command(command: Commands, config: &ResolvedConfig) -> anyhow::Result<()> {
    match command {
        Commands::Rewrite { input, output } => {
            let weaver = Weaver::new(ConfigPolicy::from_config(config)?);
            let unit = codec::read_unit_file(&input)?;
            let output = output.unwrap_or_else(|| default_output(&input));
            match rewrite_unit(&weaver, &unit)? {
                Some(woven) => {
                    codec::write_unit_file(&output, &woven)?;
                    println!("{} {} -> {}", "woven".green(), unit.name, output.display());
                }
                None => println!("{} {} (nothing to weave)", "unchanged".yellow(), unit.name),
            }
        }
        Commands::Inspect { input, json } => {
            let unit = codec::read_unit_file(&input)?;
            if json {
                println!("{}", codec::to_json(&unit)?);
            } else {
                inspect(&unit, config)?;
            }
        }
        Commands::Run {
            inputs,
            entry,
            args,
            times,
            no_weave,
        } => run(&inputs, &entry, &args, times, no_weave, config)?,
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            Some(ConfigAction::Check) => {
                let policy = ConfigPolicy::from_config(config)?;
                println!(
                    "{} {} metric declaration(s)",
                    "ok".green(),
                    policy.declared_count()
                );
            }
            Some(ConfigAction::Init) => {
                let workspace_root = std::env::current_dir()?;
                let path = config::init_config(&workspace_root)?;
                println!("Created config file: {}", path.display());
            }
        },
        Commands::Version => {
            println!("weaver {}", VERSION);
            println!("unit format v{}", codec::FORMAT_VERSION);
        }
    }
    Ok(())
}

/// Rewrite through the byte-level entry point so self-telemetry is recorded.
fn rewrite_unit<P: Policy>(
    weaver: &Weaver<P>,
    unit: &ClassUnit,
) -> anyhow::Result<Option<ClassUnit>> {
    let bytes = codec::encode(unit)?;
    match weaver.rewrite(&bytes) {
        RewriteOutcome::Rewritten(out) => Ok(Some(codec::decode(&out)?)),
        RewriteOutcome::Unchanged => Ok(None),
        RewriteOutcome::Rejected(reason) => bail!("{} rejected: {}", unit.name, reason),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unit");
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("wvu");
    input.with_file_name(format!("{}.woven.{}", stem, ext))
}

fn inspect(unit: &ClassUnit, config: &ResolvedConfig) -> anyhow::Result<()> {
    println!("{}", unit.listing());

    if unit.has_annotation(contract::WOVEN_MARKER) {
        println!("{}", "already woven".dimmed());
        return Ok(());
    }

    let policy = ConfigPolicy::from_config(config)?;
    let plan = extract_plan(unit, &policy)?;
    if plan.is_empty() {
        println!("{}", "no metrics planned".dimmed());
        return Ok(());
    }

    println!("{}", "planned metrics:".bright_cyan());
    for metric in &plan.class_metrics {
        println!(
            "  {} {} [{}]",
            metric.kind.tag(),
            metric.name.bright_white(),
            metric.label_names().join(", ")
        );
    }
    for method in &plan.methods {
        let kinds: Vec<_> = method
            .metrics
            .values()
            .map(|m| format!("{}:{}", m.kind.tag(), m.name))
            .collect();
        println!("  {} -> {}", method.signature(), kinds.join(" "));
    }
    Ok(())
}

fn run(
    inputs: &[PathBuf],
    entry: &str,
    raw_args: &[String],
    times: u32,
    no_weave: bool,
    config: &ResolvedConfig,
) -> anyhow::Result<()> {
    let weaver = Weaver::new(ConfigPolicy::from_config(config)?);
    let mut host = Host::new(GLOBAL_REGISTRY.clone());
    let mut first_class = None;

    for input in inputs {
        let unit = codec::read_unit_file(input)?;
        first_class.get_or_insert_with(|| unit.name.clone());
        let unit = if no_weave {
            unit
        } else {
            rewrite_unit(&weaver, &unit)?.unwrap_or(unit)
        };
        host.load(unit)?;
    }

    let (class, signature) = match MetricTarget::parse(entry) {
        Ok(MetricTarget::Method { class, signature }) => (class, signature),
        _ => (
            first_class.ok_or_else(|| anyhow!("no units given"))?,
            entry.to_string(),
        ),
    };
    let paren = signature
        .find('(')
        .ok_or_else(|| anyhow!("entry point must look like name(desc)"))?;
    let (name, descriptor) = signature.split_at(paren);
    let parsed = MethodDescriptor::parse(descriptor)?;
    if parsed.params.len() != raw_args.len() {
        bail!(
            "{} takes {} argument(s), {} given",
            signature,
            parsed.params.len(),
            raw_args.len()
        );
    }

    for round in 0..times {
        let args = parsed
            .params
            .iter()
            .zip(raw_args)
            .map(|(ty, raw)| convert_arg(&mut host, ty, raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!(class = %class, entry = %signature, round, "Calling entry point");
        match host.call_static(&class, name, descriptor, args) {
            Ok(Some(value)) => println!("{} {}", "returned".green(), value.display_string()),
            Ok(None) => {}
            Err(e) => eprintln!("{} {}", "error".red(), e),
        }
    }

    print!("{}", exposition::render(host.registry()));
    Ok(())
}

fn convert_arg(host: &mut Host, ty: &FieldType, raw: &str) -> anyhow::Result<Value> {
    let bad = || anyhow!("'{}' is not a valid {}", raw, ty);
    Ok(match ty {
        FieldType::Boolean => Value::Int(i32::from(raw.parse::<bool>().map_err(|_| bad())?)),
        FieldType::Byte | FieldType::Short | FieldType::Char | FieldType::Int => {
            Value::Int(raw.parse().map_err(|_| bad())?)
        }
        FieldType::Long => Value::Long(raw.parse().map_err(|_| bad())?),
        FieldType::Float => Value::Float(raw.parse().map_err(|_| bad())?),
        FieldType::Double => Value::Double(raw.parse().map_err(|_| bad())?),
        FieldType::Object(name) if name == contract::STRING_CLASS => host.new_string(raw),
        _ => bail!("arguments of type {} cannot be given on the command line", ty),
    })
}
