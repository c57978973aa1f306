use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use jarlock_cli::transform::planner::Classification;
use jarlock_cli::{analyze, patch, PatchOptions};
use jarlock_core::{FailureMode, LicensePolicy};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jarlock", version, about = "License gate injector for compiled plugin jars")]
struct Cli {
    /// Log every decoded class and injected method
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Inject the license gate into a plugin jar
    Patch {
        /// Input plugin jar
        input: PathBuf,
        /// Output jar path
        output: PathBuf,
        /// License server base URL
        #[arg(short, long)]
        server: String,
        /// Product id registered on the license server
        #[arg(short, long)]
        product: String,
        /// License key baked into the jar (may be filled in later)
        #[arg(short, long, default_value = "")]
        key: String,
        /// kick-and-disable, disable-only, limited-mode, allow-on-error or deny-on-error
        #[arg(short, long, default_value = "disable-only")]
        mode: FailureMode,
        /// Allow early exits from methods returning values other than void/boolean
        #[arg(long)]
        approximate_defaults: bool,
        /// Extra class to treat as a declared callback holder (repeatable)
        #[arg(long = "callback-class")]
        callback_classes: Vec<String>,
        /// How long a verdict is cached at runtime
        #[arg(long, default_value = "3600")]
        cache_secs: u64,
        #[arg(long, default_value = "5000")]
        connect_timeout_ms: u64,
        #[arg(long, default_value = "10000")]
        read_timeout_ms: u64,
    },
    /// Show the plugin descriptor and the methods that would be patched
    Analyze {
        /// Input plugin jar
        input: PathBuf,
        /// Extra class to treat as a declared callback holder (repeatable)
        #[arg(long = "callback-class")]
        callback_classes: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    init_tracing(cli.verbose);
    let result = match cli.command {
        Command::Patch {
            input, output, server, product, key, mode, approximate_defaults,
            callback_classes, cache_secs, connect_timeout_ms, read_timeout_ms,
        } => {
            let mut policy = LicensePolicy::new(server, product);
            policy.license_key = key;
            policy.mode = mode;
            policy.approximate_defaults = approximate_defaults;
            policy.cache_duration = Duration::from_secs(cache_secs);
            policy.connect_timeout = Duration::from_millis(connect_timeout_ms);
            policy.read_timeout = Duration::from_millis(read_timeout_ms);
            cmd_patch(input, output, PatchOptions { policy, callback_classes })
        }
        Command::Analyze { input, callback_classes } => cmd_analyze(input, &callback_classes),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ─── patch ───────────────────────────────────────────────────

fn cmd_patch(input: PathBuf, output: PathBuf, options: PatchOptions) -> Result<()> {
    let data = fs::read(&input).with_context(|| format!("reading '{}'", input.display()))?;

    println!("jarlock v{}", env!("CARGO_PKG_VERSION"));
    println!("────────────────────────────────────────");
    println!("Input:  {}", input.display());
    println!("Output: {}", output.display());
    println!("Mode:   {}", options.policy.mode);
    println!();

    let (jar, summary) = patch(data, &options)?;
    if output.exists() {
        println!("[*] Overwriting existing {}", output.display());
    }
    fs::write(&output, jar).with_context(|| format!("writing '{}'", output.display()))?;

    for target in &summary.patched {
        println!("[+] {target} ({})", target.reason);
    }
    for (target, reason) in &summary.skipped {
        println!("[!] skipped {target}: {reason}");
    }
    for path in &summary.stripped_signatures {
        println!("[*] removed signature {path}");
    }
    println!();
    println!(
        "Plugin {}: {} attempted, {} patched, {} skipped",
        summary.plugin,
        summary.attempted,
        summary.patched.len(),
        summary.skipped.len()
    );
    println!("Server URL: {}", options.policy.server_url);
    println!("Product ID: {}", options.policy.product_id);
    Ok(())
}

// ─── analyze ─────────────────────────────────────────────────

fn cmd_analyze(input: PathBuf, callback_classes: &[String]) -> Result<()> {
    let data = fs::read(&input).with_context(|| format!("reading '{}'", input.display()))?;
    let analysis = analyze(data, callback_classes)?;
    let d = &analysis.descriptor;

    println!("Plugin Analysis: {}", input.display());
    println!("════════════════════════════════════════");
    println!("Descriptor:  {}", d.path);
    println!("Name:        {}", d.name);
    println!("Version:     {}", d.version.as_deref().unwrap_or("-"));
    println!("Main class:  {}", d.main);
    println!("Commands:    {}", if d.commands.is_empty() { "-".to_string() } else { d.commands.join(", ") });
    println!("Classes:     {}", analysis.classes);
    println!();

    if !analysis.plan.classified.is_empty() {
        println!("Candidate classes:");
        for (name, verdict) in &analysis.plan.classified {
            let label = match verdict {
                Classification::Declared => "declared".to_string(),
                Classification::Heuristic => "heuristic".to_string(),
                Classification::Rejected(why) => format!("rejected ({why:?})"),
            };
            println!("  {name:<48}  {label}");
        }
        println!();
    }

    println!("Targets ({}):", analysis.plan.targets.len());
    for target in &analysis.plan.targets {
        println!("  {target}  [{}]", target.reason);
    }
    Ok(())
}
