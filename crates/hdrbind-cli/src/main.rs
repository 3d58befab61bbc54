//! hdrbind CLI
//!
//! Command-line interface for generating Rust bindings from C headers.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hdrbind_codegen::{Pipeline, RunOutput};
use hdrbind_core::config::NamespaceMode;
use hdrbind_core::{Architecture, Config, DiagnosticKind, Severity};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hdrbind")]
#[command(author, version, about = "Generate Rust FFI bindings from C headers", long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a bindings crate for a header
    Generate {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory of the generated crate
        #[arg(short, long, default_value = "bindings")]
        output: PathBuf,

        /// Name of the generated crate
        #[arg(long)]
        crate_name: Option<String>,

        /// Write the run report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Parse and resolve a header, report diagnostics, write nothing
    Check {
        #[command(flatten)]
        input: InputArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List supported architecture profiles
    Arches,
}

/// Options shared by every command that reads headers
#[derive(Args)]
struct InputArgs {
    /// Entry header
    #[arg(value_name = "HEADER")]
    header: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include search directory, may be repeated
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Windows Kits root to scan for include directories
    #[arg(long, value_name = "DIR")]
    sdk_root: Option<PathBuf>,

    /// Target architecture
    #[arg(short, long)]
    arch: Option<String>,

    /// Predefine a macro, `NAME` or `NAME=VALUE`
    #[arg(short = 'D', long = "define", value_name = "MACRO")]
    define: Vec<String>,

    /// Namespace policy
    #[arg(long, value_parser = ["flat", "per-header"])]
    namespace: Option<String>,

    /// Render modules on one thread
    #[arg(long)]
    sequential: bool,
}

impl InputArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        config.search_paths.extend(self.include.iter().cloned());
        if let Some(root) = &self.sdk_root {
            config.sdk_root = Some(root.clone());
        }
        if let Some(arch) = &self.arch {
            config.arch = arch.clone();
        }
        config.defines.extend(self.define.iter().cloned());
        match self.namespace.as_deref() {
            Some("flat") => config.emit.namespace = NamespaceMode::Flat,
            Some("per-header") => config.emit.namespace = NamespaceMode::PerHeader,
            Some(other) => bail!("unknown namespace policy: {}", other),
            None => {}
        }
        if self.sequential {
            config.emit.parallel = false;
        }

        // A lone header is searched next to itself
        if config.search_paths.is_empty() && config.sdk_root.is_none() {
            let dir = self
                .header
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            debug!("No search paths given, using {}", dir.display());
            config.search_paths.push(dir.to_path_buf());
        }
        Ok(config)
    }

    fn run(&self, config: Config) -> Result<RunOutput> {
        Pipeline::new(config)
            .run(&self.header)
            .with_context(|| format!("failed to generate bindings for {}", self.header.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Generate {
            input,
            output,
            crate_name,
            report,
        } => cmd_generate(&input, &output, crate_name, report.as_deref())?,
        Commands::Check { input, format } => cmd_check(&input, &format)?,
        Commands::Arches => cmd_arches(),
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_generate(
    input: &InputArgs,
    output: &Path,
    crate_name: Option<String>,
    report_path: Option<&Path>,
) -> Result<()> {
    let mut config = input.load_config()?;
    if let Some(name) = crate_name {
        config.emit.crate_name = name;
    }

    println!("Generating bindings for {}", input.header.display());
    let run = input.run(config)?;

    run.bindings
        .write_to(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "   Wrote {} modules to {}",
        run.bindings.modules.len(),
        output.display()
    );

    if let Some(path) = report_path {
        std::fs::write(path, run.report.to_json()?)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        println!("   Report written to: {}", path.display());
    }

    print_summary(&run);
    Ok(())
}

fn cmd_check(input: &InputArgs, format: &str) -> Result<()> {
    let config = input.load_config()?;
    let run = input.run(config)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&run.report.diagnostics)?),
        "text" => {
            for diagnostic in run.report.diagnostics.iter() {
                let level = match diagnostic.severity {
                    Severity::Warning => "warning",
                    Severity::Info => "info",
                };
                println!("{}: {}", level, diagnostic);
            }
            print_summary(&run);
        }
        other => bail!("unknown format: {}", other),
    }
    Ok(())
}

fn cmd_arches() {
    println!("Supported architectures:");
    for arch in Architecture::all() {
        let profile = arch.profile();
        println!(
            "  {:<12} pointer {} bits, long {} bits",
            arch.name(),
            profile.pointer_width,
            profile.long_width
        );
    }
}

fn print_summary(run: &RunOutput) {
    let report = &run.report;
    println!("\nSummary ({}, {} namespace):", report.arch, namespace_name(report.namespace));
    println!("   Headers: {}", report.headers.len());
    println!("   Symbols: {}", report.symbols);
    println!(
        "   Items: {}",
        run.bindings.modules.iter().map(|m| m.items).sum::<usize>()
    );

    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for diagnostic in report.diagnostics.iter() {
        *by_kind.entry(diagnostic.kind.to_string()).or_default() += 1;
    }
    if by_kind.is_empty() {
        println!("   No diagnostics");
        return;
    }
    println!("   Diagnostics:");
    for (kind, count) in &by_kind {
        println!("     {:<24} {}", kind, count);
    }
    let unresolved = report.count(DiagnosticKind::UnresolvedReference);
    if unresolved > 0 {
        println!("   {} unresolved references, see the report for details", unresolved);
    }
}

fn namespace_name(mode: NamespaceMode) -> &'static str {
    match mode {
        NamespaceMode::Flat => "flat",
        NamespaceMode::PerHeader => "per-header",
    }
}
