//! Pipeline driver.
//!
//! Usage: `paramreg [-v] <run|check|explain|diff> ...`
//!
//! Exit codes: 0 published / clean, 1 rejected / violations found,
//! 2 structural error (unknown parameter, cycle, malformed manifest, I/O).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use param_registry_core::analysis::topology;
use param_registry_core::config::Manifest;
use param_registry_core::display::format_trace;
use param_registry_core::logging::init_logging;
use param_registry_core::pipeline::{FailurePolicy, Generation, GenerationState, ResolveMode, RunOptions};
use param_registry_core::publish::{self, Artifact, Publisher};
use param_registry_core::validation::Validator;

const EXIT_REJECTED: u8 = 1;
const EXIT_STRUCTURAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "paramreg")]
#[command(about = "Resolve, validate and publish a parameter registry")]
struct Cli {
    /// Debug-level logging for the registry (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ManifestArgs {
    /// Registry manifest (YAML)
    #[arg(long, default_value = "registry.yaml")]
    manifest: PathBuf,

    /// Override a fundamental value: ID=VALUE (repeatable)
    #[arg(long = "set", value_name = "ID=VALUE")]
    set: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and validate a generation, then publish it if it passes
    Run {
        #[command(flatten)]
        manifest: ManifestArgs,

        /// Resolve only this parameter and its dependencies
        #[arg(long)]
        target: Option<String>,

        /// Abort at the first fatal violation
        #[arg(long, conflicts_with = "continue_on_warning")]
        fail_fast: bool,

        /// Collect every violation before deciding (default)
        #[arg(long)]
        continue_on_warning: bool,

        /// Canonical artifact path; exports are written next to it
        #[arg(long, default_value = "build/registry.json")]
        output: PathBuf,

        /// Evaluate independent modules concurrently
        #[arg(long)]
        parallel: bool,

        /// Generation label (defaults to the manifest's)
        #[arg(long)]
        label: Option<String>,
    },

    /// Register everything and run the dimensional analysis without computing
    Check {
        #[command(flatten)]
        manifest: ManifestArgs,
    },

    /// Print the dependency trace of a parameter
    Explain {
        /// Parameter to explain
        param: String,

        #[command(flatten)]
        manifest: ManifestArgs,
    },

    /// Compare two published artifacts
    Diff { old: PathBuf, new: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Run { manifest, target, fail_fast, continue_on_warning: _, output, parallel, label } => {
            let policy = if fail_fast { FailurePolicy::FailFast } else { FailurePolicy::ContinueOnWarning };
            let mode = if parallel { ResolveMode::Parallel } else { ResolveMode::Sequential };
            run(&manifest, target, policy, mode, label, output)
        }
        Command::Check { manifest } => check(&manifest),
        Command::Explain { param, manifest } => explain(&manifest, &param),
        Command::Diff { old, new } => diff(&old, &new),
    };
    ExitCode::from(code)
}

fn load_manifest(args: &ManifestArgs) -> Option<Manifest> {
    let mut manifest = match Manifest::load(&args.manifest) {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to load manifest '{}': {}", args.manifest.display(), e);
            return None;
        }
    };
    if let Err(e) = manifest.apply_overrides(&args.set) {
        error!("Invalid override: {}", e);
        return None;
    }
    info!(
        "Loaded manifest '{}' ({} parameters, {} modules, {} gates)",
        manifest.label,
        manifest.parameters.len(),
        manifest.modules.len(),
        manifest.gates.len()
    );
    Some(manifest)
}

fn run(
    args: &ManifestArgs,
    target: Option<String>,
    policy: FailurePolicy,
    mode: ResolveMode,
    label: Option<String>,
    output: PathBuf,
) -> u8 {
    let Some(manifest) = load_manifest(args) else { return EXIT_STRUCTURAL };
    let catalog = match manifest.catalog() {
        Ok(c) => c,
        Err(e) => {
            error!("Registration failed: {}", e);
            return EXIT_STRUCTURAL;
        }
    };

    let options = RunOptions { target, policy, mode, label: label.unwrap_or_else(|| manifest.label.clone()) };
    let generation = match param_registry_core::pipeline::run(&catalog, manifest.axioms(), &options) {
        Ok(g) => g,
        Err(e) => {
            error!("Generation aborted: {}", e);
            return EXIT_STRUCTURAL;
        }
    };
    summarize(&generation);

    match generation.state() {
        GenerationState::Published => match Publisher::new(&output).publish(&generation) {
            Ok(artifact) => {
                info!("Published {} to {}", artifact.generation_id, output.display());
                0
            }
            Err(e) => {
                error!("Publication failed: {}", e);
                EXIT_STRUCTURAL
            }
        },
        _ => {
            if let Some(reason) = generation.rejection() {
                error!("Generation {} rejected: {}", generation.generation_id(), reason);
            }
            EXIT_REJECTED
        }
    }
}

fn summarize(generation: &Generation<'_>) {
    let store = generation.store();
    info!("  Resolved: {}/{}", store.resolved_count(), store.count());
    info!("  Module invocations: {}", generation.stats().total_invocations());
    if !generation.carried().is_empty() {
        info!("  Carried forward: {}", generation.carried().len());
    }
    for v in generation.report().warnings() {
        warn!("  {}", v.message);
    }
    for v in generation.report().fatal() {
        error!("  {}", v.message);
    }
}

fn check(args: &ManifestArgs) -> u8 {
    let Some(manifest) = load_manifest(args) else { return EXIT_STRUCTURAL };
    let catalog = match manifest.catalog() {
        Ok(c) => c,
        Err(e) => {
            error!("Registration failed: {}", e);
            return EXIT_STRUCTURAL;
        }
    };
    let cycles = topology::find_cycles(&catalog);
    for cycle in &cycles {
        error!("Cycle: {}", cycle.join(" -> "));
    }
    if !cycles.is_empty() {
        return EXIT_STRUCTURAL;
    }
    if let Ok(waves) = topology::waves(&catalog) {
        info!("  Evaluation waves: {}", waves.len());
    }

    let mut validator = Validator::new(&catalog, false);
    if let Err(e) = validator.preflight() {
        error!("Preflight failed: {}", e);
        return EXIT_STRUCTURAL;
    }
    let report = validator.into_report();
    for v in report.fatal() {
        error!("  {}", v.message);
    }
    if report.has_fatal() {
        EXIT_REJECTED
    } else {
        info!("Catalog is consistent");
        0
    }
}

fn explain(args: &ManifestArgs, param: &str) -> u8 {
    let Some(manifest) = load_manifest(args) else { return EXIT_STRUCTURAL };
    let catalog = match manifest.catalog() {
        Ok(c) => c,
        Err(e) => {
            error!("Registration failed: {}", e);
            return EXIT_STRUCTURAL;
        }
    };
    let options = RunOptions::default().target(param).label(manifest.label.clone());
    match param_registry_core::pipeline::run(&catalog, manifest.axioms(), &options) {
        Ok(generation) => {
            let upstream = topology::upstream_from(&catalog, param);
            info!("'{}' depends on {} upstream parameters", param, upstream.len());
            print!("{}", format_trace(generation.store(), &catalog, param));
            0
        }
        Err(e) => {
            error!("Cannot explain '{}': {}", param, e);
            EXIT_STRUCTURAL
        }
    }
}

fn diff(old: &PathBuf, new: &PathBuf) -> u8 {
    let load = |path: &PathBuf| {
        Artifact::load(path).map_err(|e| error!("Failed to load artifact '{}': {}", path.display(), e)).ok()
    };
    let (Some(old), Some(new)) = (load(old), load(new)) else { return EXIT_STRUCTURAL };

    let report = publish::compare(&old, &new);
    print!("{}", report);
    if report.is_unexplained() {
        EXIT_REJECTED
    } else {
        0
    }
}
