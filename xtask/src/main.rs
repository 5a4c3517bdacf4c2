use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use fn_deploy_core::content_address::content_digest;
use fn_deploy_core::packager::package_directory;
use fn_deploy_core::storage_keys::artifact_object_key;

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the fn_deploy workspace",
    long_about = "A unified CLI for CI checks and deterministic local packaging\n\
                  in the fn_deploy workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Archive a directory deterministically and print its digest
    Package {
        /// Directory to archive
        #[arg(long)]
        dir: PathBuf,
        /// Archive path
        #[arg(long, default_value = "target/fn-deploy/code.zip")]
        out: PathBuf,
        /// Also print the content-addressed store key for this logical name
        #[arg(long)]
        logical_name: Option<String>,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Check,
    /// Unit and integration tests
    Test,
    /// Run check + test
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    exit(1);
}

fn package_dir(dir: &Path, out: &Path, logical_name: Option<&str>) {
    step("Package directory");
    let archive = package_directory(dir, out).unwrap_or_else(|error| fail(error));
    let digest = content_digest(&archive.path).unwrap_or_else(|error| fail(error));

    eprintln!(
        "\nPackaged {} entries ({} bytes):\n- {}",
        archive.entry_count,
        archive.size_bytes,
        archive.path.display()
    );
    println!("{digest}");
    if let Some(logical_name) = logical_name {
        println!("{}", artifact_object_key(logical_name, &digest));
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test fn_deploy_core");
    run_cargo(&["test", "-p", "fn_deploy_core"]);

    step("Test fn_deploy_lambda");
    run_cargo(&["test", "-p", "fn_deploy_lambda"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Test => ci_test(),
                CiJob::All => {
                    ci_check();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Package {
            dir,
            out,
            logical_name,
        } => {
            package_dir(&dir, &out, logical_name.as_deref());
        }
    }
}
