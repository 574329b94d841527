//! One-shot exit flusher.
//!
//! The flusher hooks the host's "about to terminate" event and writes the
//! trace store to `<dir>/lazytrace.dtrace`. Exit handlers are plain
//! `FnOnce(i32)` closures run to completion by the host, and every step of
//! the write uses blocking `std::fs` calls, so nothing can be scheduled for
//! later and lost.

use crate::result::{TraceError, TraceResult};
use crate::trace::TraceContext;
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{error, info};

/// Fixed name of the trace artifact
pub const TRACE_FILE_NAME: &str = "lazytrace.dtrace";

/// Default report directory
pub const DEFAULT_REPORT_DIR: &str = "./dtrace";

/// Synchronous exit callback, given the process exit code
pub type ExitHandler = Box<dyn FnOnce(i32)>;

/// Host lifecycle capable of running handlers at termination
pub trait ExitLifecycle {
    /// Register a handler for the "about to terminate" event
    fn on_exit(&self, handler: ExitHandler);
}

/// Result of a flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Trace written to this path
    Written(PathBuf),
    /// Nothing was instrumented; no file written
    NoData,
    /// A previous flush already wrote the trace
    AlreadyWritten,
}

/// Persists a trace context exactly once at exit
#[derive(Debug)]
pub struct ExitFlusher {
    context: TraceContext,
    dir: PathBuf,
    registered: Cell<bool>,
    written: Cell<bool>,
    outcome: RefCell<Option<TraceResult<FlushOutcome>>>,
}

impl ExitFlusher {
    /// Create a flusher writing into `dir`
    #[must_use]
    pub fn new(context: TraceContext, dir: impl Into<PathBuf>) -> Rc<Self> {
        Rc::new(Self {
            context,
            dir: dir.into(),
            registered: Cell::new(false),
            written: Cell::new(false),
            outcome: RefCell::new(None),
        })
    }

    /// Report directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the trace file
    #[must_use]
    pub fn trace_path(&self) -> PathBuf {
        self.dir.join(TRACE_FILE_NAME)
    }

    /// Register with the host lifecycle. A second call is ignored and
    /// returns `false`.
    pub fn register(self: &Rc<Self>, lifecycle: &dyn ExitLifecycle) -> bool {
        if self.registered.replace(true) {
            return false;
        }
        let this = Rc::clone(self);
        lifecycle.on_exit(Box::new(move |code| {
            let result = this.flush();
            match &result {
                Ok(FlushOutcome::Written(path)) => {
                    info!(path = %path.display(), exit_code = code, "Trace written");
                }
                Ok(FlushOutcome::NoData) => {
                    info!(exit_code = code, "No matched files were loaded; no trace written");
                }
                Ok(FlushOutcome::AlreadyWritten) => {}
                Err(e) => error!(error = %e, "Failed to write trace"),
            }
            *this.outcome.borrow_mut() = Some(result);
        }));
        true
    }

    /// Create the report directory ahead of time
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Storage`] if the directory cannot be created.
    pub fn ensure_dir(&self) -> TraceResult<()> {
        fs::create_dir_all(&self.dir).map_err(|source| TraceError::Storage {
            path: self.dir.clone(),
            source,
        })
    }

    /// Write the trace now, unless it was already written
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Storage`] if the directory or file cannot be
    /// written.
    pub fn flush(&self) -> TraceResult<FlushOutcome> {
        if self.written.get() {
            return Ok(FlushOutcome::AlreadyWritten);
        }
        if !self.context.has_units() {
            return Ok(FlushOutcome::NoData);
        }

        // a test runner may have removed the directory since startup
        self.ensure_dir()?;
        let json = self.context.to_json()?;
        let path = self.trace_path();
        fs::write(&path, json).map_err(|source| TraceError::Storage {
            path: path.clone(),
            source,
        })?;
        self.written.set(true);
        Ok(FlushOutcome::Written(path))
    }

    /// Outcome of the exit-time flush, once it has run
    pub fn take_outcome(&self) -> Option<TraceResult<FlushOutcome>> {
        self.outcome.borrow_mut().take()
    }
}
