use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use uemu::devices::ShutdownStatus;
use uemu::{Emulator, EmulatorConfig, EmulatorError};

#[derive(Parser, Debug)]
#[command(name = "uemu", version, about = "RV64 system emulator")]
struct Args {
    /// ELF file to load
    #[arg(short, long)]
    file: PathBuf,

    /// DRAM size in MB
    #[arg(short, long, default_value_t = 512, value_parser = clap::value_parser!(u64).range(64..=16384))]
    memory: u64,

    /// Dump signature to file (for riscv-arch-test)
    #[arg(short, long)]
    signature: Option<PathBuf>,

    /// Halt after this many milliseconds of wall-clock time
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not attach the host terminal to the UART
    #[arg(long)]
    headless: bool,
}

fn run(args: &Args) -> Result<ExitCode, EmulatorError> {
    let config = EmulatorConfig {
        dram_size: (args.memory as usize) * 1024 * 1024,
        interactive: !args.headless,
        timeout: args.timeout.map(Duration::from_millis),
    };

    log::info!(
        "initializing emulator: {} MB DRAM, guest {}",
        args.memory,
        args.file.display()
    );

    let mut emulator = Emulator::new(config)?;
    emulator.load_elf(&args.file)?;
    emulator.run()?;

    if let Some(sig_path) = &args.signature {
        emulator.dump_signature(&args.file, sig_path)?;
    }

    match emulator.shutdown_status() {
        Some(ShutdownStatus::Pass) => {
            println!("emulator shutdown: PASS (code {})", emulator.shutdown_code());
            Ok(ExitCode::SUCCESS)
        }
        Some(status) => {
            let code = emulator.shutdown_code();
            println!("emulator shutdown: {status:?} (code {code})");
            Ok(ExitCode::from(if code == 0 { 1 } else { code.min(255) as u8 }))
        }
        None => {
            eprintln!("emulator halted without a guest shutdown request");
            Ok(ExitCode::from(1))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
