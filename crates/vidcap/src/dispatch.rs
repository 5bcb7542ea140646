//! The control loop: decode requests, route them, launch job runners.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use vidcap_frame::FrameReader;

use crate::command::CaptureHeaders;
use crate::config::HostConfig;
use crate::job::{remove_empty_placeholder, CancelToken, Job, JobOutcome, JobRunner, JobSlots};
use crate::protocol::{DownloadRequest, ProtocolError, Request, StatusEvent};
use crate::sanitize::{reserve_unique_path, sanitize_filename, unique_path, DEFAULT_FILENAME};
use crate::sink::EventSink;

/// Why the dispatch loop stopped without a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The peer closed the channel on a frame boundary.
    EndOfStream,
}

struct InFlight {
    id: u64,
    cancel: CancelToken,
    handle: JoinHandle<JobOutcome>,
}

pub struct Dispatcher<W> {
    config: HostConfig,
    sink: EventSink<W>,
    slots: JobSlots,
    in_flight: Vec<InFlight>,
    next_id: u64,
}

impl<W: Write + Send + 'static> Dispatcher<W> {
    pub fn new(config: HostConfig, outbound: W) -> Self {
        let sink = EventSink::new(outbound, config.frame.clone());
        let slots = JobSlots::new(config.max_jobs);
        Self {
            config,
            sink,
            slots,
            in_flight: Vec::new(),
            next_id: 1,
        }
    }

    /// Run until end of stream or a protocol error.
    ///
    /// On end of stream, waits for in-flight jobs before returning. On a
    /// protocol error, reports it once, cancels in-flight jobs and returns it.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut FrameReader<R>,
    ) -> Result<Shutdown, ProtocolError> {
        loop {
            self.reap_finished();

            let next = reader
                .read_json::<serde_json::Value>()
                .map_err(ProtocolError::from)
                .and_then(|value| value.map(Request::from_value).transpose());

            match next {
                Ok(Some(request)) => self.handle(request),
                Ok(None) => {
                    tracing::info!(in_flight = self.in_flight.len(), "channel closed");
                    self.join_all();
                    return Ok(Shutdown::EndOfStream);
                }
                Err(err) => {
                    tracing::error!(error = %err, "protocol error, shutting down");
                    if let Err(write_err) = self.sink.emit_channel_error(err.to_string()) {
                        tracing::warn!(error = %write_err, "failed to report protocol error");
                    }
                    self.cancel_all();
                    self.join_all();
                    return Err(err);
                }
            }
        }
    }

    pub fn handle(&mut self, request: Request) {
        match request {
            Request::Download(fields) => match DownloadRequest::from_fields(fields) {
                Ok(download) => self.start_download(download),
                Err(err) => {
                    tracing::warn!(error = %err, "rejecting download request");
                    self.sink.emit_or_warn(&StatusEvent::Error {
                        error: err.to_string(),
                    });
                }
            },
            Request::Ping => {
                tracing::debug!("ping");
                self.sink.emit_or_warn(&StatusEvent::Pong);
            }
            Request::Unrecognized(action) => {
                tracing::debug!(?action, "ignoring unrecognized action");
            }
        }
    }

    /// Number of jobs launched and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn start_download(&mut self, request: DownloadRequest) {
        let name = request
            .filename
            .as_deref()
            .map(sanitize_filename)
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let job = Job {
            output: self.resolve_output(&name),
            headers: CaptureHeaders::from_request(&request),
            url: request.url,
        };

        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::default();
        let runner = JobRunner {
            sink: self.sink.clone(),
            program: self.config.program.clone(),
            slots: self.slots.clone(),
            timeout: self.config.job_timeout,
            cancel: cancel.clone(),
        };

        tracing::info!(job = id, url = %job.url, output = %job.output.display(), "starting job");
        let output = job.output.clone();
        let spawned = thread::Builder::new()
            .name(format!("job-{id}"))
            .spawn(move || runner.run(job));

        match spawned {
            Ok(handle) => self.in_flight.push(InFlight { id, cancel, handle }),
            Err(err) => {
                tracing::error!(job = id, error = %err, "failed to spawn job runner");
                remove_empty_placeholder(&output);
                self.sink.emit_or_warn(&StatusEvent::Error {
                    error: format!("failed to start job: {err}"),
                });
            }
        }
    }

    fn resolve_output(&self, name: &str) -> PathBuf {
        let dir = &self.config.download_dir;
        match reserve_unique_path(dir, name) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %err,
                    "could not reserve output file, using unchecked name"
                );
                unique_path(dir, name)
            }
        }
    }

    fn reap_finished(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|job| job.handle.is_finished());
        self.in_flight = running;
        for job in finished {
            Self::join(job);
        }
    }

    fn cancel_all(&self) {
        for job in &self.in_flight {
            job.cancel.cancel();
        }
    }

    fn join_all(&mut self) {
        for job in self.in_flight.drain(..) {
            Self::join(job);
        }
    }

    fn join(job: InFlight) {
        match job.handle.join() {
            Ok(outcome) => {
                tracing::debug!(job = job.id, completed = outcome.is_completed(), "job finished")
            }
            Err(_) => tracing::error!(job = job.id, "job runner panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    use bytes::BytesMut;
    use serde_json::{json, Value};
    use vidcap_frame::encode_frame;

    use super::*;
    use crate::test_support::{decode_all, fake_tool, SharedBuf};

    fn config(dir: &std::path::Path) -> HostConfig {
        let mut config = HostConfig::new(dir);
        config.program = fake_tool().to_path_buf();
        config
    }

    fn wire(messages: &[Value]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_frame(&serde_json::to_vec(message).unwrap(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn run(dir: &std::path::Path, input: Vec<u8>) -> (Result<Shutdown, ProtocolError>, Vec<Value>) {
        let out = SharedBuf::default();
        let mut dispatcher = Dispatcher::new(config(dir), out.clone());
        let mut reader = FrameReader::new(Cursor::new(input));
        let result = dispatcher.run(&mut reader);
        (result, decode_all(&out.contents()))
    }

    fn events_for<'a>(frames: &'a [Value], file: &str) -> Vec<&'a str> {
        frames
            .iter()
            .filter(|f| f["file"] == file)
            .filter_map(|f| f["status"].as_str())
            .collect()
    }

    #[test]
    fn ping_yields_one_pong() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(dir.path(), wire(&[json!({"action": "PING"})]));

        assert_eq!(result.unwrap(), Shutdown::EndOfStream);
        assert_eq!(frames, vec![json!({"status": "pong"})]);
    }

    #[test]
    fn ping_does_not_spawn_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let out = SharedBuf::default();
        let mut dispatcher = Dispatcher::new(config(dir.path()), out.clone());

        dispatcher.handle(Request::Ping);

        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(decode_all(&out.contents()), vec![json!({"status": "pong"})]);
    }

    #[test]
    fn unrecognized_actions_are_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(
            dir.path(),
            wire(&[json!({"action": "CANCEL"}), json!({"hello": 1}), json!({"action": "PING"})]),
        );

        assert!(result.is_ok());
        assert_eq!(frames, vec![json!({"status": "pong"})]);
    }

    #[test]
    fn download_reports_sanitized_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(
            dir.path(),
            wire(&[json!({
                "action": "DOWNLOAD",
                "url": "http://x/test.m3u8",
                "filename": "My Video!!.mp4"
            })]),
        );

        assert!(result.is_ok());
        let file = dir.path().join("My Video.mp4").display().to_string();
        assert_eq!(
            frames,
            vec![
                json!({"status": "starting", "file": file}),
                json!({"status": "complete", "file": file}),
            ]
        );
    }

    #[test]
    fn occupied_name_falls_back_to_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("My Video.mp4"), b"old").unwrap();

        let (_, frames) = run(
            dir.path(),
            wire(&[json!({
                "action": "DOWNLOAD",
                "url": "http://x/test.m3u8",
                "filename": "My Video!!.mp4"
            })]),
        );

        let file = dir.path().join("My Video_1.mp4").display().to_string();
        assert_eq!(frames[0], json!({"status": "starting", "file": file}));
        assert_eq!(std::fs::read(dir.path().join("My Video.mp4")).unwrap(), b"old");
    }

    #[test]
    fn missing_filename_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let (_, frames) = run(
            dir.path(),
            wire(&[json!({"action": "DOWNLOAD", "url": "http://x/a.m3u8"})]),
        );

        let file = dir.path().join("video.mp4").display().to_string();
        assert_eq!(frames[0]["file"], file.as_str());
    }

    #[test]
    fn same_filename_requests_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let request = json!({"action": "DOWNLOAD", "url": "http://x/slow", "filename": "same.mp4"});
        let (_, frames) = run(dir.path(), wire(&[request.clone(), request.clone(), request]));

        let mut starting: Vec<&str> = frames
            .iter()
            .filter(|f| f["status"] == "starting")
            .map(|f| f["file"].as_str().unwrap())
            .collect();
        starting.sort_unstable();
        starting.dedup();
        assert_eq!(starting.len(), 3);
    }

    #[test]
    fn download_without_url_reports_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(dir.path(), wire(&[json!({"action": "DOWNLOAD"})]));

        assert!(result.is_ok());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["status"], "error");
        assert!(frames[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid DOWNLOAD request"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn truncated_frame_reports_one_error_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = wire(&[json!({"action": "PING"})]);
        input.extend_from_slice(&100u32.to_ne_bytes());
        input.extend_from_slice(br#"{"action":"PI"#);

        let (result, frames) = run(dir.path(), input);

        assert!(matches!(result, Err(ProtocolError::Frame(_))));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], json!({"status": "pong"}));
        assert!(frames[1].get("status").is_none());
        assert!(frames[1]["error"].is_string());
    }

    #[test]
    fn nothing_after_protocol_error_is_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Vec::new();
        let mut bad = BytesMut::new();
        encode_frame(b"{broken", &mut bad).unwrap();
        input.extend_from_slice(&bad);
        input.extend_from_slice(&wire(&[json!({"action": "PING"})]));

        let (result, frames) = run(dir.path(), input);

        assert!(result.is_err());
        assert_eq!(frames.len(), 1);
        assert!(frames[0]["error"].is_string());
    }

    #[test]
    fn non_object_payload_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(dir.path(), wire(&[json!(["PING"])]));

        assert!(matches!(result, Err(ProtocolError::NotAnObject(_))));
        assert_eq!(frames, vec![json!({"error": "expected a JSON object, got array"})]);
    }

    #[test]
    fn protocol_error_cancels_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = wire(&[json!({"action": "DOWNLOAD", "url": "http://x/hang"})]);
        input.extend_from_slice(&[0x01, 0x02]);
        let started = Instant::now();

        let (result, frames) = run(dir.path(), input);

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        let statuses: Vec<&str> = frames
            .iter()
            .map(|f| f["status"].as_str().unwrap_or("channel-error"))
            .collect();
        assert!(statuses.contains(&"starting"));
        assert!(statuses.contains(&"channel-error"));
        assert!(frames.iter().any(|f| f["error"] == "capture cancelled"));
    }

    #[test]
    fn concurrent_jobs_pair_their_events() {
        let dir = tempfile::tempdir().unwrap();
        let (result, frames) = run(
            dir.path(),
            wire(&[
                json!({"action": "DOWNLOAD", "url": "http://x/slow", "filename": "first.mp4"}),
                json!({"action": "DOWNLOAD", "url": "http://x/fast", "filename": "second.mp4"}),
                json!({"action": "PING"}),
            ]),
        );

        assert!(result.is_ok());
        assert_eq!(frames.len(), 5);
        let first = dir.path().join("first.mp4").display().to_string();
        let second = dir.path().join("second.mp4").display().to_string();
        assert_eq!(events_for(&frames, &first), ["starting", "complete"]);
        assert_eq!(events_for(&frames, &second), ["starting", "complete"]);

        let position = |status: &str, file: &str| {
            frames
                .iter()
                .position(|f| f["status"] == status && f["file"] == file)
                .unwrap()
        };
        assert!(position("complete", &second) < position("complete", &first));
    }
}
