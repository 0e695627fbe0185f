//! tinyrb - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use tinyrb::util::config::CONFIG_FILE_NAME;
use tinyrb::util::logger::{self, LogLevel};
use tinyrb::{
    compile_file, dump_file, exec_files, run_files, RunReport, RuntimeConfig, Sandbox, TickMode,
    Vm, NAME, VERSION,
};

/// A small-footprint Ruby VM with a preemptive task scheduler
#[derive(Parser, Debug)]
#[command(name = "tinyrb")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Runtime configuration file (defaults to ./tinyrb.toml when present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run Ruby source files, one task per file
    Run {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Compile a source file into an irep blob
    Compile {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output path (defaults to FILE with a .mrb extension)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },

    /// Load irep blobs and run them, one task per blob
    Exec {
        #[arg(value_name = "IREP", required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the bytecode of a source file
    Dump {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Interactive sandbox
    Repl,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_with_level(LogLevel::from_verbosity(args.verbose));
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Run { files } => {
            let config = with_external_ticks(config);
            report(run_files(&files, config)?)?;
        }
        Commands::Compile { file, output } => {
            let output = output.unwrap_or_else(|| file.with_extension("mrb"));
            let size = compile_file(&file, &output)
                .with_context(|| format!("Failed to compile: {}", file.display()))?;
            if args.verbose > 0 {
                eprintln!("wrote {} ({} bytes)", output.display(), size);
            }
        }
        Commands::Exec { files } => {
            let config = with_external_ticks(config);
            report(exec_files(&files, config)?)?;
        }
        Commands::Dump { file } => {
            print!("{}", dump_file(&file)?);
        }
        Commands::Repl => repl(config)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => RuntimeConfig::load_or_default(Path::new(CONFIG_FILE_NAME))
            .context("Failed to load tinyrb.toml"),
    }
}

/// Files run from the command line are driven by the timer thread
fn with_external_ticks(mut config: RuntimeConfig) -> RuntimeConfig {
    config.tick_mode = TickMode::External;
    config
}

fn report(report: RunReport) -> Result<()> {
    for (task, message) in &report.errors {
        eprintln!("{} {}: {}", "error:".red().bold(), task, message);
    }
    if !report.is_success() {
        bail!("{} task(s) raised", report.errors.len());
    }
    Ok(())
}

fn repl(config: RuntimeConfig) -> Result<()> {
    let mut vm = Vm::new(config)?;
    let mut sandbox = Sandbox::new(&mut vm)?;
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;

    println!("{} {} - Ctrl+D to exit", NAME, VERSION);
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { ">> " } else { ".. " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = editor.add_history_entry(line.as_str());
        buffer.push_str(&line);
        buffer.push('\n');

        if !sandbox.compile(&mut vm, &buffer) {
            if sandbox.compile_error().is_some_and(|e| e.is_incomplete()) {
                continue;
            }
            if let Some(err) = sandbox.diagnostic() {
                println!("{} {}", "error:".red().bold(), err);
            }
            buffer.clear();
            continue;
        }
        buffer.clear();

        if !sandbox.execute(&mut vm) {
            println!("{} sandbox is busy", "error:".red().bold());
            continue;
        }
        vm.run_until_idle()?;
        match sandbox.error_message(&vm) {
            Some(message) => println!("{} {}", "error:".red().bold(), message),
            None => {
                let result = sandbox.result(&vm);
                println!("{} {}", "=>".dimmed(), vm.inspect(result));
            }
        }
    }

    sandbox.close(&mut vm)?;
    Ok(())
}
