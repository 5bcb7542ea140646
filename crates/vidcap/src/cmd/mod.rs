use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use vidcap::command::DEFAULT_PROGRAM;
use vidcap::config::{default_download_dir, parse_duration, DEFAULT_MAX_JOBS};
use vidcap::HostConfig;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod doctor;
pub mod host;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, host: &HostArgs) -> CliResult<i32> {
    match command {
        Command::Doctor(args) => doctor::run(args, host),
    }
}

/// Settings for serving the native-messaging channel.
#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Directory captures are written into. Default: the user's Downloads folder.
    #[arg(long, value_name = "DIR", env = "VIDCAP_DOWNLOAD_DIR", global = true)]
    pub download_dir: Option<PathBuf>,

    /// Capture tool executable.
    #[arg(
        long,
        value_name = "PATH",
        env = "VIDCAP_FFMPEG",
        default_value = DEFAULT_PROGRAM,
        global = true
    )]
    pub ffmpeg: PathBuf,

    /// Maximum number of captures running at once.
    #[arg(
        long,
        value_name = "N",
        env = "VIDCAP_MAX_JOBS",
        default_value_t = DEFAULT_MAX_JOBS,
        value_parser = parse_max_jobs,
        global = true
    )]
    pub max_jobs: usize,

    /// Kill captures running longer than this (e.g. 90m, 30s). Default: no limit.
    #[arg(
        long,
        value_name = "DURATION",
        env = "VIDCAP_JOB_TIMEOUT",
        value_parser = parse_duration,
        global = true
    )]
    pub job_timeout: Option<Duration>,

    /// Window handle some browsers pass on Windows.
    #[arg(long, hide = true)]
    pub parent_window: Option<String>,

    /// Caller origin or manifest path supplied by the browser.
    #[arg(value_name = "CALLER", hide = true)]
    pub caller: Vec<String>,
}

impl HostArgs {
    pub fn to_config(&self) -> HostConfig {
        let mut config = HostConfig::new(
            self.download_dir
                .clone()
                .unwrap_or_else(default_download_dir),
        );
        config.program = self.ffmpeg.clone();
        config.max_jobs = self.max_jobs;
        config.job_timeout = self.job_timeout;
        config
    }
}

fn parse_max_jobs(input: &str) -> Result<usize, String> {
    match input.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Output format.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_jobs_must_be_positive() {
        assert_eq!(parse_max_jobs("3"), Ok(3));
        assert!(parse_max_jobs("0").is_err());
        assert!(parse_max_jobs("-1").is_err());
    }
}
