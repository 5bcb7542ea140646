use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use vidcap_frame::{FrameConfig, FrameWriter, Result};

use crate::protocol::{ChannelError, StatusEvent};

/// Outbound half of the channel, shared by the dispatch loop and job runners.
///
/// Every frame is encoded and written while holding the lock.
pub struct EventSink<W> {
    writer: Arc<Mutex<FrameWriter<W>>>,
}

impl<W> Clone for EventSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: Write> EventSink<W> {
    pub fn new(inner: W, config: FrameConfig) -> Self {
        Self {
            writer: Arc::new(Mutex::new(FrameWriter::with_config(inner, config))),
        }
    }

    pub fn emit(&self, event: &StatusEvent) -> Result<()> {
        self.send(event)
    }

    pub fn emit_channel_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(&ChannelError {
            error: message.into(),
        })
    }

    /// Emit and log a failed write instead of returning it.
    pub fn emit_or_warn(&self, event: &StatusEvent) {
        if let Err(err) = self.emit(event) {
            tracing::warn!(error = %err, ?event, "failed to write status frame");
        }
    }

    fn send<V: serde::Serialize>(&self, value: &V) -> Result<()> {
        // Frames are written whole, so a poisoned lock still guards a clean stream.
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send_json(value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::test_support::{decode_all, SharedBuf};

    #[test]
    fn emits_tagged_status_frames() {
        let buf = SharedBuf::default();
        let sink = EventSink::new(buf.clone(), FrameConfig::default());

        sink.emit(&StatusEvent::Pong).unwrap();
        sink.emit_channel_error("bad frame").unwrap();

        let frames = decode_all(&buf.contents());
        assert_eq!(frames[0]["status"], "pong");
        assert_eq!(frames[1]["error"], "bad frame");
        assert!(frames[1].get("status").is_none());
    }

    #[test]
    fn concurrent_emitters_never_interleave_frames() {
        let buf = SharedBuf::default();
        let sink = EventSink::new(buf.clone(), FrameConfig::default());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        sink.emit(&StatusEvent::Starting {
                            file: format!("/dl/{t}-{i}-{}", "x".repeat(300)),
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let frames = decode_all(&buf.contents());
        assert_eq!(frames.len(), 400);
        assert!(frames.iter().all(|f| f["status"] == "starting"));
    }

    #[test]
    fn write_failure_is_reported() {
        let sink = EventSink::new(Cursor::new([0u8; 2]), FrameConfig::default());
        assert!(sink.emit(&StatusEvent::Pong).is_err());
    }
}
