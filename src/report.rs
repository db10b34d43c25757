//! The structured record stream.
//!
//! Every record is one `[runcap] <tag>:<tabs><value>` line, tags padded with
//! tabs to a common value column. The stream goes to stderr by default or to
//! the file named with `--output-file`; it is the program's contract with
//! scripts that parse it, so nothing else (diagnostics, tracing) is ever
//! written through it.

use std::fmt::Display;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Mutex;

const PREFIX: &str = "[runcap]";
// Tags shorter than this get an extra tab per 8 missing columns.
const TAG_COLUMN: usize = 14;

/// Line-oriented record sink, shared between the main thread and the
/// monitor thread.
pub struct Report {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Report {
    /// Records go to stderr.
    pub fn stderr() -> Self {
        Self {
            sink: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// Records go to a freshly created file.
    pub fn to_file(path: &str) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Mutex::new(Box::new(file)),
        })
    }

    /// Emits one `[runcap] tag: value` record.
    pub fn record(&self, tag: &str, value: impl Display) {
        let mut line = String::with_capacity(64);
        line.push_str(PREFIX);
        line.push(' ');
        line.push_str(tag);
        line.push(':');
        let mut column = tag.len();
        while column < TAG_COLUMN {
            line.push('\t');
            column += 8;
        }
        line.push('\t');
        let _ = write!(line, "{}", value);
        line.push('\n');
        self.write_line(&line);
    }

    /// Emits a warning line outside the record grammar.
    pub fn warning(&self, message: &str) {
        self.write_line(&format!("runcap warning: {}\n", message));
    }

    /// Emits an error line and terminates the process.
    pub fn fatal(&self, message: &str) -> ! {
        self.write_line(&format!("runcap error: {}\n", message));
        std::process::exit(1);
    }

    fn write_line(&self, line: &str) {
        let mut sink = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }
}
