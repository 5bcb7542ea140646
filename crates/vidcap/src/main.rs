mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, HostArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};

/// Without a subcommand, serves the native-messaging channel on stdin/stdout.
#[derive(Parser, Debug)]
#[command(
    name = "vidcap-host",
    version,
    about = "Native-messaging host that captures streaming video with ffmpeg"
)]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "VIDCAP_LOG_LEVEL",
        default_value = "warn",
        global = true
    )]
    log_level: LogLevel,

    #[command(flatten)]
    host: HostArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = match cli.command {
        Some(command) => cmd::run(command, &cli.host),
        None => cmd::host::run(&cli.host),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(code = err.code, "{err}");
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
