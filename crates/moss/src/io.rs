//! Output sinks for the `OUTPUT` opcode and error reporting.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Where program output goes. The VM never adds newlines of its own.
pub trait OutputSink {
    fn write_str(&mut self, s: &str);

    /// Diagnostics channel (unhandled exceptions, stack traces).
    fn write_err(&mut self, s: &str) {
        self.write_str(s);
    }
}

/// Writes to the process stdout/stderr.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_str(&mut self, s: &str) {
        print!("{s}");
        let _ = std::io::stdout().flush();
    }

    fn write_err(&mut self, s: &str) {
        eprint!("{s}");
    }
}

/// Collects output in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub out: String,
    pub err: String,
}

impl OutputSink for BufferSink {
    fn write_str(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn write_err(&mut self, s: &str) {
        self.err.push_str(s);
    }
}

/// Sink writing into shared buffers the caller keeps handles to; lets tests
/// read program output after the machine consumed the sink.
#[derive(Debug, Default)]
pub struct SharedSink {
    out: Rc<RefCell<String>>,
    err: Rc<RefCell<String>>,
}

impl SharedSink {
    /// The sink plus reader handles for stdout and stderr content.
    #[must_use]
    pub fn new() -> (Self, Rc<RefCell<String>>, Rc<RefCell<String>>) {
        let out = Rc::new(RefCell::new(String::new()));
        let err = Rc::new(RefCell::new(String::new()));
        (
            Self {
                out: Rc::clone(&out),
                err: Rc::clone(&err),
            },
            out,
            err,
        )
    }
}

impl OutputSink for SharedSink {
    fn write_str(&mut self, s: &str) {
        self.out.borrow_mut().push_str(s);
    }

    fn write_err(&mut self, s: &str) {
        self.err.borrow_mut().push_str(s);
    }
}
