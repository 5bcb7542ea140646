//! Argument vector for the external capture tool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::job::Job;
use crate::protocol::DownloadRequest;

pub const DEFAULT_PROGRAM: &str = "ffmpeg";

/// Request headers forwarded to the capture tool, control characters removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureHeaders {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub cookie: Option<String>,
}

impl CaptureHeaders {
    pub fn from_request(request: &DownloadRequest) -> Self {
        let pick = |name: &str| request.header(name).and_then(scrub_header_value);
        Self {
            user_agent: pick("User-Agent"),
            referer: pick("Referer"),
            cookie: pick("Cookie"),
        }
    }

    /// `Referer` and `Cookie` joined into one CRLF-terminated header block.
    pub fn header_block(&self) -> Option<String> {
        let mut block = String::new();
        if let Some(referer) = &self.referer {
            block.push_str(&format!("Referer: {referer}\r\n"));
        }
        if let Some(cookie) = &self.cookie {
            block.push_str(&format!("Cookie: {cookie}\r\n"));
        }
        (!block.is_empty()).then_some(block)
    }
}

/// Drop control characters so a value cannot add header lines of its own.
///
/// Returns `None` when nothing is left.
pub fn scrub_header_value(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CaptureCommand {
    pub fn build(program: &Path, job: &Job) -> Self {
        let mut args: Vec<OsString> = vec!["-y".into()];

        if let Some(user_agent) = &job.headers.user_agent {
            args.push("-user_agent".into());
            args.push(user_agent.into());
        }
        if let Some(block) = job.headers.header_block() {
            args.push("-headers".into());
            args.push(block.into());
        }

        args.push("-i".into());
        args.push(job.url.as_str().into());
        args.push("-c".into());
        args.push("copy".into());
        // ADTS audio from MPEG-TS segments needs ASC framing in MP4; no-op otherwise.
        args.push("-bsf:a".into());
        args.push("aac_adtstoasc".into());
        args.push(job.output.as_os_str().to_os_string());

        Self {
            program: program.to_path_buf(),
            args,
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Space-joined rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
