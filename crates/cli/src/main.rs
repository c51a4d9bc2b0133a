// stm32sim - STM32F103C8T6 Microcontroller Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod console;

use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use stm32sim_core::Simulator;
use stm32sim_gdb::GdbServer;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "stm32sim",
    version,
    about = "STM32F103C8T6 microcontroller emulator"
)]
struct Cli {
    /// Raw firmware image to load into flash
    firmware: Option<PathBuf>,

    /// Run the GDB remote stub instead of the interactive console
    #[arg(long, value_name = "PORT", num_args = 0..=1, default_missing_value = "3333")]
    gdb: Option<u16>,

    /// Enable verbose execution tracing
    #[arg(short, long)]
    trace: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    // Diagnostics go to stderr so UART output owns stdout.
    tracing_subscriber::fmt()
        .with_max_level(if cli.trace {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let mut sim = Simulator::new();

    if let Some(path) = &cli.firmware {
        match sim.load(path) {
            Ok(n) => tracing::info!("loaded {} bytes from '{}'", n, path.display()),
            Err(e) => {
                error!("failed to load '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(port) = cli.gdb {
        let server = GdbServer::new(port);
        if let Err(e) = server.run(sim) {
            error!("GDB server failed: {:#}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    console::run(&mut sim);
    ExitCode::SUCCESS
}
