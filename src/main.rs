use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use frogvm::bytecode;
use frogvm::{Vm, VmOptions};

#[derive(Parser)]
#[command(name = "frogvm")]
#[command(about = "A bytecode virtual machine for the frog language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compiled .frogc module
    Run {
        /// The module file to run
        file: PathBuf,
        /// Trace every instruction
        #[arg(long)]
        trace: bool,
        /// Log tier-up events
        #[arg(long)]
        jit_log: bool,
        /// Log collector events
        #[arg(long)]
        gc_log: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            trace,
            jit_log,
            gc_log,
        } => {
            let options = VmOptions {
                trace,
                jit_log,
                gc_log,
            };
            if let Err(e) = run_file(&file, options) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_file(path: &PathBuf, options: VmOptions) -> Result<(), String> {
    let module = bytecode::load_file(path).map_err(|e| format!("load error: {}", e))?;

    let mut vm = Vm::new(module, options);
    vm.run().map_err(|e| format!("runtime error: {}", e))
}
