use anyhow::{
    Context,
    Result,
    anyhow,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Time Tomb helper tasks (fmt check, clippy, tests)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check formatting for the entire workspace
    Fmt,
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the workspace tests
    Test {
        /// Only test the terminal client crate
        #[arg(long)]
        client_only: bool,
    },
    /// Fmt, clippy and tests, in that order
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;

    match cli.command {
        Commands::Fmt => check_fmt(&root)?,
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { client_only } => run_tests(&root, client_only)?,
        Commands::Ci => {
            check_fmt(&root)?;
            run_clippy(&root)?;
            run_tests(&root, false)?;
        }
    }

    Ok(())
}

fn repo_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("xtask has no parent directory"))
}

fn check_fmt(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("fmt").arg("--all").arg("--").arg("--check").current_dir(root);
    run_command(cmd, "cargo fmt --check")
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")
}

fn run_tests(root: &Path, client_only: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").current_dir(root);
    let label = if client_only {
        cmd.arg("-p").arg("tui");
        "cargo test -p tui"
    } else {
        cmd.arg("--workspace");
        "cargo test --workspace"
    };
    run_command(cmd, label)
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
