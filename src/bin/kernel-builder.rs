use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fs2::FileExt;

use kernel_builder::kernel::{self, prompt};
use kernel_builder::preflight;
use kernel_builder::{BuildOptions, KernelSelection, Layout, Locator, Pipeline, SystemRunner};

/// Compile, sign and install a kernel from /usr/local/src/<hostname>/linux.
#[derive(Parser, Debug)]
#[command(name = "kernel-builder", version, about)]
struct Cli {
    /// System whose kernel trees and outputs are used (defaults to this host)
    #[arg(long)]
    hostname: Option<String>,

    /// Parallel make jobs
    #[arg(short, long, default_value_t = 6)]
    jobs: usize,

    /// Build in a scratch copy under /var/tmp/linux instead of the source tree
    #[arg(short, long)]
    tmpfs: bool,

    /// Build a unified kernel image with an embedded initramfs
    #[arg(short, long)]
    uki: bool,

    /// Sign the image for secure boot
    #[arg(short, long)]
    sign: bool,

    /// Copy the image to the boot loader entry
    #[arg(short, long)]
    install: bool,

    /// Disable colored output
    #[arg(long)]
    nocolor: bool,

    /// Kernel directory to build, skipping the prompt
    #[arg(short, long, value_name = "DIR")]
    kernel: Option<String>,

    /// Layout file (default: /etc/kernel-builder.toml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    preflight::check_superuser()?;
    let layout = Layout::resolve(cli.config.as_deref())?;
    let system = match &cli.hostname {
        Some(name) => name.clone(),
        None => preflight::local_hostname()?,
    };

    let _lock = acquire_lock(&layout)?;

    let selection = match &cli.kernel {
        Some(dir_name) => KernelSelection::select(&layout, &system, dir_name)?,
        None => {
            let kernels = kernel::list_kernels(&layout, &system)?;
            let chosen = prompt::choose_kernel(
                &system,
                &kernels,
                &mut io::stdin().lock(),
                &mut io::stdout().lock(),
            )?;
            KernelSelection::select(&layout, &system, &chosen)?
        }
    };

    let options = BuildOptions {
        jobs: cli.jobs,
        unified: cli.uki,
        sign: cli.sign,
        install: cli.install,
        scratch: cli.tmpfs,
    };

    let locator = Locator::from_env();
    let mut runner = SystemRunner;
    let report = Pipeline::new(&mut runner, &layout, &locator, &system).run(&selection, &options)?;

    println!("Kernel {} published", report.version);
    println!("  path:   {}", report.published.path.display());
    println!("  sha256: {}", report.published.sha256);
    if report.published.signed {
        println!("  signed: yes");
    }
    if let Some(entry) = &report.installed {
        println!("  installed to {}", entry.display());
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "kernel_builder=info",
        1 => "kernel_builder=debug",
        _ => "kernel_builder=trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let no_color = cli.nocolor || std::env::var("NO_COLOR").is_ok_and(|v| v == "1");

    fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(!no_color)
        .with_target(false)
        .init();
}

/// Hold an exclusive lock on the host-wide source pointer and scratch mount
/// for the life of the run.
fn acquire_lock(layout: &Layout) -> Result<fs::File> {
    let lock_path = layout.lock_path();
    if let Some(dir) = lock_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

    if lock_file.try_lock_exclusive().is_err() {
        bail!(
            "another kernel-builder run holds {}; wait for it to finish",
            lock_path.display()
        );
    }
    Ok(lock_file)
}
