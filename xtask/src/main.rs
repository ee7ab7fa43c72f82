//! Build automation tasks for the authpool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Targets under `fuzz/fuzz_targets`.
const FUZZ_TARGETS: &[&str] = &[
    "parse_krb5_conf",
    "parse_keytab",
    "parse_ccache",
    "parse_properties",
];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for authpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, deny, unused deps)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy over every target with all features
    Clippy,
    /// Run all tests
    Test {
        /// Also run with the zeroize feature disabled
        #[arg(long)]
        feature_matrix: bool,
    },
    /// Run cargo-deny checks
    Deny,
    /// Look for unused dependencies (requires cargo-machete)
    Machete,
    /// Generate documentation
    Doc,
    /// Run benchmarks
    Bench,
    /// Run the fuzzers (requires cargo-fuzz and a nightly toolchain)
    Fuzz {
        /// Single target to run; all targets when omitted
        target: Option<String>,
        /// Seconds to spend on each target
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, true)?;
            deny(&sh)?;
            machete(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { feature_matrix } => test(&sh, feature_matrix)?,
        Command::Deny => deny(&sh)?,
        Command::Machete => machete(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Bench => bench(&sh)?,
        Command::Fuzz { target, seconds } => fuzz(&sh, target.as_deref(), seconds)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;
    Path::new(manifest.trim())
        .parent()
        .map(Path::to_path_buf)
        .context("failed to get workspace root")
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-features --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, feature_matrix: bool) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --workspace --all-features").run()?;
    if feature_matrix {
        println!("Running tests without default features...");
        cmd!(sh, "cargo test --workspace --no-default-features").run()?;
    }
    println!("All tests passed.");
    Ok(())
}

fn deny(sh: &Shell) -> Result<()> {
    println!("Running cargo-deny...");
    cmd!(sh, "cargo deny check").run()?;
    Ok(())
}

fn machete(sh: &Shell) -> Result<()> {
    println!("Checking for unused dependencies...");
    cmd!(sh, "cargo machete").run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --workspace --all-features --no-deps").run()?;
    Ok(())
}

fn bench(sh: &Shell) -> Result<()> {
    println!("Running benchmarks...");
    cmd!(sh, "cargo bench -p authpool").run()?;
    Ok(())
}

fn fuzz(sh: &Shell, target: Option<&str>, seconds: u64) -> Result<()> {
    let targets: Vec<&str> = match target {
        Some(t) if FUZZ_TARGETS.contains(&t) => vec![t],
        Some(t) => bail!("unknown fuzz target '{t}', expected one of {FUZZ_TARGETS:?}"),
        None => FUZZ_TARGETS.to_vec(),
    };

    let _dir = sh.push_dir("fuzz");
    let max_time = format!("-max_total_time={seconds}");
    for target in targets {
        println!("Fuzzing {target} for {seconds}s...");
        cmd!(sh, "cargo +nightly fuzz run {target} -- {max_time}").run()?;
    }
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    Ok(())
}
