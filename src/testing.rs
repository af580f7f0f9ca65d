//! Recording fakes for the device and the spacenavd session
//!
//! Used by the unit tests and by the integration tests under `tests/`.

use crate::config::{Verbosity, VirtualDeviceSpec};
use crate::joystick::{Capability, DestinationEvent, UinputSink};
use crate::lifecycle::CancelToken;
use crate::logging::{level_filter, PlainFormat};
use crate::spacenav::{EventSource, Received, SpnavError};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

/// One call made on a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Setup(String),
    Declare(Capability),
    Commit,
    Emit(DestinationEvent),
    Destroy,
}

/// `UinputSink` that records every call
///
/// Clones share the same log, so a test can keep one clone while the
/// joystick owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Rc<RefCell<Vec<SinkCall>>>,
    emit_attempts: Rc<Cell<usize>>,
    fail_declare: Option<Capability>,
    fail_emits: Vec<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the declaration of `capability` fail
    pub fn fail_declare(mut self, capability: Capability) -> Self {
        self.fail_declare = Some(capability);
        self
    }

    /// Make the n-th emit (counting from 0) fail
    pub fn fail_emit(mut self, nth: usize) -> Self {
        self.fail_emits.push(nth);
        self
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.borrow().clone()
    }

    /// Events that were written successfully
    pub fn emitted(&self) -> Vec<DestinationEvent> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                SinkCall::Emit(ev) => Some(*ev),
                _ => None,
            })
            .collect()
    }

    pub fn destroy_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, SinkCall::Destroy))
            .count()
    }
}

impl UinputSink for RecordingSink {
    fn write_setup(&mut self, spec: &VirtualDeviceSpec) -> io::Result<()> {
        self.calls.borrow_mut().push(SinkCall::Setup(spec.name.clone()));
        Ok(())
    }

    fn declare(&mut self, capability: &Capability) -> io::Result<()> {
        if self.fail_declare == Some(*capability) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.calls.borrow_mut().push(SinkCall::Declare(*capability));
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        self.calls.borrow_mut().push(SinkCall::Commit);
        Ok(())
    }

    fn emit(&mut self, event: &DestinationEvent) -> io::Result<()> {
        let attempt = self.emit_attempts.get();
        self.emit_attempts.set(attempt + 1);
        if self.fail_emits.contains(&attempt) {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        self.calls.borrow_mut().push(SinkCall::Emit(*event));
        Ok(())
    }

    fn destroy(&mut self) -> io::Result<()> {
        self.calls.borrow_mut().push(SinkCall::Destroy);
        Ok(())
    }
}

/// One scripted answer of a [`ScriptedSource`]
#[derive(Debug)]
pub enum Step {
    Receive(Received),
    Fail(SpnavError),
    /// Deliver `signal` to the token, then report what a woken read sees
    Signal(CancelToken, i32),
}

/// `EventSource` that replays a fixed script, then reports end of stream
#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    receives: Rc<Cell<usize>>,
    closes: Rc<Cell<usize>>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            receives: Rc::default(),
            closes: Rc::default(),
        }
    }

    /// Counter incremented when the session is closed (dropped)
    pub fn close_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.closes)
    }

    pub fn receive_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.receives)
    }
}

impl EventSource for ScriptedSource {
    fn receive(&mut self) -> Result<Received, SpnavError> {
        self.receives.set(self.receives.get() + 1);
        match self.steps.pop_front() {
            Some(Step::Receive(received)) => Ok(received),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Signal(token, signal)) => {
                token.trigger(signal);
                Ok(Received::EndOfStream)
            }
            None => Ok(Received::EndOfStream),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.closes.set(self.closes.get() + 1);
    }
}

#[derive(Debug, Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return what it printed
pub fn capture_logs(verbosity: Verbosity, f: impl FnOnce()) -> String {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level_filter(verbosity))
        .with_writer(move || writer.clone())
        .event_format(PlainFormat)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buf.0.lock().unwrap_or_else(|e| e.into_inner()).clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
