//! Internal module to handle logging.
//!
//! The pipeline has the same problem Synthizer does: it wants to be able to log from the thread that is running
//! `process_frame_and_tasks`, but that thread is, from the embedder's point of view, the audio thread, and the audio
//! thread cannot allocate or do I/O.  Rust's logging facade doesn't support that in any way on its own.
//!
//! The fix is a ring buffer.  The `rt_log!` family of macros behave like the macros from the `log` crate:
//!
//! - On non-audio threads, they forward directly to `log`.
//! - On audio threads, they format into a fixed-size inline buffer and push it to a ring buffer, which a background
//!   thread drains and forwards to `log` once woken.
//!
//! Timestamps seen by the `log` backend are therefore the time the background thread got around to the message, not
//! the time it actually happened; messages delayed more than [WARN_LATENCY] get an annotation saying so.
use std::fmt::Arguments as FmtArgs;
use std::thread::{park, JoinHandle};
use std::time::{Duration, Instant};

use arrayvec::ArrayString;
use thingbuf::{recycling::Recycle, ThingBuf};

use crate::is_audio_thread::is_audio_thread;

const LOG_LENGTH_LIMIT: usize = 512;
const LOG_QUEUE_LENGTH: usize = 4096;

/// If logging falls this far behind, start warning that messages are stale.
const WARN_LATENCY: Duration = Duration::from_millis(250);

type InlineLogMessage = ArrayString<LOG_LENGTH_LIMIT>;

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub(crate) enum LogMessage {
    Static(&'static str),
    Inline(InlineLogMessage),
}

struct LogRecordRecycler;

pub(crate) struct LogRecord {
    skipped_messages: u64,
    level: log::Level,
    module: &'static str,
    message: LogMessage,
    truncated: bool,
    enqueue_time: Instant,
}

struct LogMessageFormatter<'a> {
    log_message: &'a mut InlineLogMessage,
    truncated: &'a mut bool,
}

impl<'a> std::fmt::Write for LogMessageFormatter<'a> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if *self.truncated {
            return Ok(());
        }

        let remaining = self.log_message.remaining_capacity();
        if s.as_bytes().len() <= remaining {
            self.log_message.push_str(s);
            return Ok(());
        }

        *self.truncated = true;

        // Preserve character boundaries by pushing char by char until full.
        for c in s.chars() {
            if self.log_message.try_push(c).is_err() {
                return Ok(());
            }
        }

        Ok(())
    }
}

pub(crate) fn build_log_message(
    level: log::Level,
    args: FmtArgs<'_>,
    module: &'static str,
) -> LogRecord {
    use std::fmt::Write;

    let mut truncated = false;

    let message = match args.as_str() {
        Some(m) => LogMessage::Static(m),
        None => {
            let mut buf = InlineLogMessage::new();
            let mut formatter = LogMessageFormatter {
                truncated: &mut truncated,
                log_message: &mut buf,
            };
            write!(formatter, "{}", args).expect("our formatter never fails");
            LogMessage::Inline(buf)
        }
    };

    LogRecord {
        skipped_messages: 0,
        level,
        message,
        module,
        truncated,
        enqueue_time: Instant::now(),
    }
}

impl Recycle<LogRecord> for LogRecordRecycler {
    fn new_element(&self) -> LogRecord {
        LogRecord {
            skipped_messages: 0,
            level: log::Level::Debug,
            enqueue_time: Instant::now(),
            message: LogMessage::Static("NOT SET"),
            module: module_path!(),
            truncated: false,
        }
    }

    fn recycle(&self, _element: &mut LogRecord) {}
}

struct LogCtx {
    thread: JoinHandle<()>,
    message_queue: ThingBuf<LogRecord, LogRecordRecycler>,
}

fn setup_ctx() -> LogCtx {
    let thread = std::thread::spawn(background_thread_mainloop);
    let message_queue = ThingBuf::with_recycle(LOG_QUEUE_LENGTH, LogRecordRecycler);

    LogCtx {
        thread,
        message_queue,
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CTX: LogCtx = setup_ctx();
}

pub(crate) fn dispatch_message(level: log::Level, args: FmtArgs<'_>, module: &'static str) {
    use std::cell::Cell;

    thread_local! {
        static SKIPPED_MESSAGES: Cell<u64> = const { Cell::new(0) };
    }

    if level > log::max_level() {
        return;
    }

    let mut record = build_log_message(level, args, module);
    record.skipped_messages = SKIPPED_MESSAGES.get();

    match GLOBAL_CTX.message_queue.push(record) {
        Ok(_) => {
            SKIPPED_MESSAGES.replace(0);
            GLOBAL_CTX.thread.thread().unpark();
        }
        Err(_) => {
            SKIPPED_MESSAGES.replace(SKIPPED_MESSAGES.get() + 1);
        }
    }
}

fn log_one(record: LogRecord) {
    let msg_str = match &record.message {
        LogMessage::Static(s) => s,
        LogMessage::Inline(i) => i.as_str(),
    };

    let latency = Instant::now() - record.enqueue_time;

    if record.skipped_messages != 0 {
        log::warn!(
            "The pipeline's background logging thread fell behind! {} messages have been dropped!",
            record.skipped_messages
        );
    }

    let mut latency_part_bytes: smallvec::SmallVec<[u8; 256]> = smallvec::SmallVec::new();

    if latency > WARN_LATENCY {
        use std::io::Write;
        write!(
            latency_part_bytes,
            ", delayed by {} seconds",
            latency.as_secs_f64()
        )
        .expect("writing to a smallvec shouldn't fail");
    }

    let latency_part = std::str::from_utf8(&latency_part_bytes[..])
        .expect("our formatting only ever writes valid UTF8");

    let truncated_part = if record.truncated { ", truncated" } else { "" };

    log::log!(target: record.module, record.level, "{} (from rt thread{latency_part}{truncated_part})", msg_str);
}

fn drain_queue() {
    while let Some(msg) = GLOBAL_CTX.message_queue.pop() {
        log_one(msg);
    }
}

fn background_thread_mainloop() {
    loop {
        drain_queue();
        park();
    }
}

/// Same as the `log` macro, but realtime-safe, and the target is always the current module.
#[allow(clippy::crate_in_macro_def)]
macro_rules! rt_log {
    ($level: expr, $fmt: expr $(, $args: expr)* $(,)?) => {
        let macro_level = $level;
        if crate::is_audio_thread::is_audio_thread() && macro_level <= log::max_level() {
            crate::logging::dispatch_message(macro_level, format_args!($fmt, $($args),*), module_path!());
        } else {
            log::log!($level, $fmt, $($args),*);
        }
    }
}

macro_rules! rt_warn {
    ($($args:tt)+) => {
        rt_log!(log::Level::Warn, $($args)*);
    }
}

macro_rules! rt_debug {
    ($($args: tt)+) => {
        rt_log!(log::Level::Debug, $($args)*);
    }
}

macro_rules! rt_trace {
    ($($args: tt)+) => {
        rt_log!(log::Level::Trace, $($args)*);
    }
}

pub(crate) use rt_debug;
pub(crate) use rt_log;
pub(crate) use rt_trace;
pub(crate) use rt_warn;

/// Ensure the lazy_static is set up, so that the background thread spawns before the first audio-thread log call
/// rather than racing with it.
pub(crate) fn ensure_log_ctx() {
    std::hint::black_box(GLOBAL_CTX.message_queue.capacity());
}
