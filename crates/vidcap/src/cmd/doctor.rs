use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Serialize;

use crate::cmd::{DoctorArgs, HostArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, host: &HostArgs) -> CliResult<i32> {
    let config = host.to_config();
    let checks = vec![
        build_info_check(),
        capture_tool_check(&config.program),
        download_dir_check(&config.download_dir),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(
        &output,
        args.format.unwrap_or_else(OutputFormat::default_for_stdout),
    );

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Pretty => {
            println!("vidcap-host doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<16} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn build_info_check() -> CheckResult {
    CheckResult {
        name: "build".to_string(),
        status: CheckStatus::Info,
        detail: format!(
            "vidcap-host {} ({})",
            env!("CARGO_PKG_VERSION"),
            option_env!("VIDCAP_BUILD_TARGET").unwrap_or(std::env::consts::OS)
        ),
    }
}

fn capture_tool_check(program: &Path) -> CheckResult {
    let probe = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match probe {
        Ok(output) if output.status.success() => CheckResult {
            name: "capture_tool".to_string(),
            status: CheckStatus::Pass,
            detail: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
        },
        Ok(output) => CheckResult {
            name: "capture_tool".to_string(),
            status: CheckStatus::Fail,
            detail: format!("{} -version exited with {}", program.display(), output.status),
        },
        Err(err) => CheckResult {
            name: "capture_tool".to_string(),
            status: CheckStatus::Fail,
            detail: format!("{} could not be run: {err}", program.display()),
        },
    }
}

fn download_dir_check(dir: &Path) -> CheckResult {
    let probe = dir.join(format!(".vidcap-doctor-{}", std::process::id()));
    let result = fs::create_dir_all(dir).and_then(|()| {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&probe)
            .map(drop)
    });
    let _ = fs::remove_file(&probe);

    match result {
        Ok(()) => CheckResult {
            name: "download_dir".to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} is writable", dir.display()),
        },
        Err(err) => CheckResult {
            name: "download_dir".to_string(),
            status: CheckStatus::Fail,
            detail: format!("{} is not writable: {err}", dir.display()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult {
                name: "x".to_string(),
                status: CheckStatus::Pass,
                detail: "ok".to_string(),
            }],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn writable_download_dir_passes() {
        let dir = tempfile::tempdir().unwrap();
        let check = download_dir_check(&dir.path().join("nested"));
        assert!(matches!(check.status, CheckStatus::Pass));
        assert_eq!(fs::read_dir(dir.path().join("nested")).unwrap().count(), 0);
    }

    #[test]
    fn missing_capture_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        let check = capture_tool_check(&dir.path().join("no-such-ffmpeg"));
        assert!(matches!(check.status, CheckStatus::Fail));
    }
}
