//! Chrome trace output.
//!
//! A `Trace` is either disabled (every call is a no-op) or writes events to
//! a file that loads in chrome://tracing or Perfetto.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

struct Writer {
    start: Instant,
    w: BufWriter<File>,
}

impl Writer {
    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        writeln!(
            self.w,
            "{{\"pid\": 0, \"name\": {:?}, \"tid\": {}, \"ts\": {}, \"ph\": \"X\", \"dur\": {}}},",
            name,
            tid,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }
}

#[derive(Default)]
pub struct Trace {
    writer: Mutex<Option<Writer>>,
}

impl Trace {
    /// A trace that records nothing.
    pub fn disabled() -> Self {
        Trace::default()
    }

    pub fn open(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            writer: Mutex::new(Some(Writer {
                start: Instant::now(),
                w,
            })),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Writer>> {
        // A poisoned trace is still a usable trace.
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a span that happened on a given track.
    pub fn write_complete(&self, name: &str, tid: usize, start: Instant, end: Instant) {
        if let Some(w) = self.lock().as_mut() {
            if let Err(err) = w.write_complete(name, tid, start, end) {
                tracing::warn!("trace: {}", err);
            }
        }
    }

    /// Run `f`, recording how long it took.
    pub fn scope<T>(&self, name: &'static str, f: impl FnOnce() -> T) -> T {
        if !self.is_enabled() {
            return f();
        }
        let start = Instant::now();
        let result = f();
        self.write_complete(name, 0, start, Instant::now());
        result
    }

    /// Finish the trace file.  Further events are dropped.
    pub fn close(&self) -> std::io::Result<()> {
        if let Some(mut w) = self.lock().take() {
            let now = Instant::now();
            let start = w.start;
            // The "main" span covers the whole trace and has no trailing comma.
            write!(
                w.w,
                "{{\"pid\": 0, \"name\": \"main\", \"tid\": 0, \"ts\": 0, \"ph\": \"X\", \"dur\": {}}}\n]\n",
                now.duration_since(start).as_micros()
            )?;
            w.w.flush()?;
        }
        Ok(())
    }
}
