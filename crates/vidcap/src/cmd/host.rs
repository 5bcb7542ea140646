use std::fs;
use std::io;

use vidcap::frame::FrameReader;
use vidcap::{Dispatcher, Shutdown};

use crate::cmd::HostArgs;
use crate::exit::{io_error, protocol_error, CliResult, SUCCESS};

/// Serve the native-messaging channel on stdin/stdout until it closes.
pub fn run(args: &HostArgs) -> CliResult<i32> {
    let config = args.to_config();
    fs::create_dir_all(&config.download_dir).map_err(|err| {
        io_error(
            &format!("cannot create {}", config.download_dir.display()),
            err,
        )
    })?;

    tracing::info!(
        caller = ?args.caller,
        download_dir = %config.download_dir.display(),
        program = %config.program.display(),
        max_jobs = config.max_jobs,
        job_timeout = ?config.job_timeout,
        "native host started"
    );

    let mut reader = FrameReader::with_config(io::stdin().lock(), config.frame.clone());
    let mut dispatcher = Dispatcher::new(config, io::stdout());

    match dispatcher.run(&mut reader) {
        Ok(Shutdown::EndOfStream) => {
            tracing::info!("native host exiting");
            Ok(SUCCESS)
        }
        Err(err) => Err(protocol_error("channel failed", err)),
    }
}
