//! Central kernel logging with optional in-memory capture.
//!
//! [`KernelLogger`] is the `log` backend. Every record is forwarded to the
//! registered sink (normally the serial port) and, while capture is enabled,
//! appended to a fixed buffer as a `target|message` line so tests and the
//! console can read back what one subsystem logged.

use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicBool, Ordering};

extern crate alloc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::sync::spinlock::SpinLock;

const CAPTURE_BUF_SIZE: usize = 16 * 1024;

/// Output routine for formatted log lines.
pub type LogSink = fn(&fmt::Arguments<'_>);

struct LogState {
    sink: Option<LogSink>,
    capture_enabled: bool,
    capture_len: usize,
    capture_overflow: bool,
    capture_buf: [u8; CAPTURE_BUF_SIZE],
}

pub struct KernelLogger {
    state: SpinLock<LogState>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self {
            state: SpinLock::new(LogState {
                sink: None,
                capture_enabled: false,
                capture_len: 0,
                capture_overflow: false,
                capture_buf: [0; CAPTURE_BUF_SIZE],
            }),
        }
    }
}

static LOGGER: KernelLogger = KernelLogger::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

struct BufferWriter<'a> {
    state: &'a mut LogState,
    /// Target repeated in front of every line after an embedded newline.
    continuation: Option<&'a str>,
}

impl BufferWriter<'_> {
    fn push(&mut self, bytes: &[u8]) {
        let remaining = self
            .state
            .capture_buf
            .len()
            .saturating_sub(self.state.capture_len);
        let write_len = remaining.min(bytes.len());

        if write_len > 0 {
            let start = self.state.capture_len;
            let end = start + write_len;
            self.state.capture_buf[start..end].copy_from_slice(&bytes[..write_len]);
            self.state.capture_len = end;
        }

        if write_len < bytes.len() {
            self.state.capture_overflow = true;
        }
    }
}

impl fmt::Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let Some(target) = self.continuation else {
            self.push(s.as_bytes());
            return Ok(());
        };

        for (i, part) in s.split('\n').enumerate() {
            if i > 0 {
                self.push(b"\n");
                self.push(target.as_bytes());
                self.push(b"|");
            }
            self.push(part.as_bytes());
        }
        Ok(())
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut state = self.state.lock();
        if let Some(sink) = state.sink {
            sink(&format_args!(
                "[{} {}] {}\n",
                level_tag(record.level()),
                record.target(),
                record.args()
            ));
        }

        if !state.capture_enabled {
            return;
        }
        // Every line of a multi-line message is captured under the record's
        // target.
        let target = record.target();
        let mut writer = BufferWriter {
            state: &mut *state,
            continuation: None,
        };
        let _ = writer.write_str(target);
        let _ = writer.write_char('|');
        writer.continuation = Some(target);
        let _ = fmt::write(&mut writer, *record.args());
        writer.continuation = None;
        let _ = writer.write_char('\n');
    }

    fn flush(&self) {}
}

/// Installs the kernel logger and sets `sink` as its output.
///
/// The first call registers the logger with `log` at `Trace` level; later
/// calls only replace the sink.
pub fn init(sink: Option<LogSink>) {
    LOGGER.state.lock().sink = sink;

    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        // Only fails if another logger was installed first; that one keeps
        // receiving records.
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    }
}

/// Enable/disable capture buffer and reset it.
pub fn set_capture_enabled(enabled: bool) {
    let mut state = LOGGER.state.lock();
    state.capture_enabled = enabled;
    state.capture_len = 0;
    state.capture_overflow = false;
}

/// Whether captured output was cut off because the buffer filled up.
pub fn capture_overflowed() -> bool {
    LOGGER.state.lock().capture_overflow
}

/// Messages captured for `target`, oldest first.
pub fn captured_lines(target: &str) -> Vec<String> {
    let state = LOGGER.state.lock();
    let bytes = &state.capture_buf[..state.capture_len];

    // An overflowing write may have split a multi-byte character.
    let text = match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => match core::str::from_utf8(&bytes[..err.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        },
    };

    text.split('\n')
        .filter_map(|line| line.split_once('|'))
        .filter(|(line_target, _)| *line_target == target)
        .map(|(_, msg)| msg.to_string())
        .collect()
}
