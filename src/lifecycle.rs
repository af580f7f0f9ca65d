//! Startup, the forwarding loop and teardown
//!
//! The controller owns both handles for the whole run. Whatever ends the
//! run (end of stream, a signal, a failed startup step) the handles are
//! dropped exactly once, session first, joystick second.

use crate::config::{ButtonMap, VirtualDeviceSpec};
use crate::daemon::DaemonError;
use crate::joystick::{JoystickError, UinputSink, VirtualJoystick};
use crate::mapper;
use crate::spacenav::{EventSource, Received, SpnavError};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::unix::io::RawFd;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Signals that end the process
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGHUP, Signal::SIGTERM];

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Signal handlers are already installed")]
    AlreadyInstalled,
    #[error("Failed to install handler for {signal}: {source}")]
    Install {
        signal: Signal,
        #[source]
        source: nix::Error,
    },
}

#[derive(Debug)]
struct CancelState {
    /// Number of the signal received, 0 while running
    signal: AtomicI32,
    /// Socket to shut down when a signal arrives, -1 if none
    wake_fd: AtomicI32,
}

/// Shared cancellation flag
///
/// Set from the signal handler, observed by the controller between
/// startup steps and between events. Triggering it also shuts down the
/// watched socket so a blocked read returns.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

/// Token the installed signal handler reports to
static HANDLER_TOKEN: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn handle_termination(signal: libc::c_int) {
    if let Some(token) = HANDLER_TOKEN.get() {
        token.trigger(signal);
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState {
                signal: AtomicI32::new(0),
                wake_fd: AtomicI32::new(-1),
            }),
        }
    }

    /// Route SIGINT, SIGHUP and SIGTERM to this token
    ///
    /// Only one token per process can be installed.
    pub fn install_signal_handlers(&self) -> Result<(), SignalError> {
        HANDLER_TOKEN
            .set(self.clone())
            .map_err(|_| SignalError::AlreadyInstalled)?;

        let action = SigAction::new(
            SigHandler::Handler(handle_termination),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in TERMINATION_SIGNALS {
            // SAFETY: the handler only touches atomics and calls shutdown(2),
            // both async-signal-safe
            unsafe { sigaction(signal, &action) }
                .map_err(|source| SignalError::Install { signal, source })?;
        }
        Ok(())
    }

    /// Record `signal` and wake the watched socket
    ///
    /// Async-signal-safe.
    pub fn trigger(&self, signal: i32) {
        self.state.signal.store(signal, Ordering::SeqCst);
        let fd = self.state.wake_fd.load(Ordering::SeqCst);
        if fd >= 0 {
            // SAFETY: fd stays open while it is watched
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }

    /// Signal received so far, if any
    pub fn signal(&self) -> Option<i32> {
        match self.state.signal.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some()
    }

    /// Shut down `fd` on cancellation; immediately if already cancelled
    pub fn watch(&self, fd: RawFd) {
        self.state.wake_fd.store(fd, Ordering::SeqCst);
        if self.is_cancelled() {
            // SAFETY: caller keeps fd open until unwatch
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }

    /// Stop watching before the socket is closed
    pub fn unwatch(&self) {
        self.state.wake_fd.store(-1, Ordering::SeqCst);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    DeviceReady,
    Connected,
    Running,
    Terminating,
    Exited,
}

/// Why the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// spacenavd closed the session
    EndOfStream,
    /// A termination signal arrived
    Signal(i32),
    /// Reading from spacenavd failed
    SourceFailed,
    /// Startup could not complete
    Fatal,
}

impl Termination {
    /// Process exit status: 0 for an orderly end, 128+n for signal n
    pub fn exit_status(&self) -> u8 {
        match *self {
            Termination::EndOfStream => 0,
            Termination::Signal(signal) => u8::try_from(128 + signal).unwrap_or(u8::MAX),
            Termination::SourceFailed | Termination::Fatal => 1,
        }
    }
}

impl From<Termination> for ExitCode {
    fn from(reason: Termination) -> Self {
        ExitCode::from(reason.exit_status())
    }
}

/// Drives one run of the bridge
pub struct Lifecycle {
    state: LifecycleState,
    cancel: CancelToken,
}

impl Lifecycle {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            cancel,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn enter(&mut self, next: LifecycleState) {
        debug!("State {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn interrupted(&self) -> Option<Termination> {
        self.cancel.signal().map(|signal| {
            info!("Caught signal {}, shutting down", signal);
            Termination::Signal(signal)
        })
    }

    /// Run the bridge to completion
    ///
    /// `connect` opens the spacenavd session, `provision` then creates the
    /// joystick and `detach` optionally moves the process to the
    /// background. Returns once both handles have been released.
    pub fn run<D, S>(
        &mut self,
        spec: &VirtualDeviceSpec,
        provision: impl FnOnce(&VirtualDeviceSpec) -> Result<VirtualJoystick<D>, JoystickError>,
        connect: impl FnOnce() -> Result<S, SpnavError>,
        detach: impl FnOnce() -> Result<(), DaemonError>,
    ) -> Termination
    where
        D: UinputSink,
        S: EventSource,
    {
        let reason = match self.start(spec, provision, connect, detach) {
            Ok((mut joystick, mut source)) => {
                let reason = self.pump(&spec.buttons, &mut joystick, &mut source);
                self.teardown(joystick, source);
                reason
            }
            // Whatever was opened has already been dropped
            Err(reason) => reason,
        };

        self.enter(LifecycleState::Exited);
        reason
    }

    fn start<D, S>(
        &mut self,
        spec: &VirtualDeviceSpec,
        provision: impl FnOnce(&VirtualDeviceSpec) -> Result<VirtualJoystick<D>, JoystickError>,
        connect: impl FnOnce() -> Result<S, SpnavError>,
        detach: impl FnOnce() -> Result<(), DaemonError>,
    ) -> Result<(VirtualJoystick<D>, S), Termination>
    where
        D: UinputSink,
        S: EventSource,
    {
        self.check_cancelled()?;

        let source = match connect() {
            Ok(source) => source,
            Err(e) => {
                error!("{}", e);
                error!("Is spacenavd running?");
                return Err(self.fatal());
            }
        };
        if let Some(fd) = source.wake_fd() {
            self.cancel.watch(fd);
        }

        if let Err(reason) = self.check_cancelled() {
            self.cancel.unwatch();
            return Err(reason);
        }

        let joystick = match provision(spec) {
            Ok(joystick) => joystick,
            Err(e) => {
                error!("{}", e);
                if let JoystickError::Open { .. } = e {
                    error!("Do you have the correct path?");
                }
                self.cancel.unwatch();
                return Err(self.fatal());
            }
        };
        self.enter(LifecycleState::DeviceReady);
        // Both handles are held from here on
        self.enter(LifecycleState::Connected);

        let detached = match self.check_cancelled() {
            Ok(()) => detach().map_err(|e| {
                error!("{}", e);
                self.fatal()
            }),
            Err(reason) => Err(reason),
        };
        if let Err(reason) = detached {
            self.cancel.unwatch();
            drop(source);
            drop(joystick);
            return Err(reason);
        }

        self.enter(LifecycleState::Running);
        Ok((joystick, source))
    }

    fn check_cancelled(&mut self) -> Result<(), Termination> {
        match self.interrupted() {
            Some(reason) => {
                self.enter(LifecycleState::Terminating);
                Err(reason)
            }
            None => Ok(()),
        }
    }

    fn fatal(&mut self) -> Termination {
        self.enter(LifecycleState::Terminating);
        Termination::Fatal
    }

    /// Receive and forward events until the session ends or a signal arrives
    fn pump<D, S>(
        &mut self,
        buttons: &ButtonMap,
        joystick: &mut VirtualJoystick<D>,
        source: &mut S,
    ) -> Termination
    where
        D: UinputSink,
        S: EventSource,
    {
        loop {
            if let Some(reason) = self.interrupted() {
                return reason;
            }

            match source.receive() {
                Ok(Received::Event(event)) => {
                    mapper::forward(&event, buttons, joystick);
                }
                Ok(Received::Unrecognized(tag)) => {
                    warn!("Unrecognized spacenav event type {}, ignoring", tag);
                }
                Ok(Received::EndOfStream) => {
                    return self.interrupted().unwrap_or_else(|| {
                        info!("spacenavd closed the session");
                        Termination::EndOfStream
                    });
                }
                Err(e) => {
                    if let Some(reason) = self.interrupted() {
                        return reason;
                    }
                    error!("{}", e);
                    return Termination::SourceFailed;
                }
            }
        }
    }

    fn teardown<D, S>(&mut self, joystick: VirtualJoystick<D>, source: S)
    where
        D: UinputSink,
        S: EventSource,
    {
        self.enter(LifecycleState::Terminating);
        self.cancel.unwatch();
        drop(source);
        drop(joystick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedSource, Step};
    use std::io::Read;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_exit_status() {
        assert_eq!(Termination::EndOfStream.exit_status(), 0);
        assert_eq!(Termination::Signal(2).exit_status(), 130);
        assert_eq!(Termination::Signal(15).exit_status(), 143);
        assert_eq!(Termination::Fatal.exit_status(), 1);
        assert_eq!(Termination::SourceFailed.exit_status(), 1);
    }

    #[test]
    fn test_trigger_wakes_watched_socket() {
        let (_daemon, mut client) = UnixStream::pair().unwrap();
        let token = CancelToken::new();
        token.watch(client.as_raw_fd());

        let waker = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            waker.trigger(libc::SIGTERM);
        });

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        handle.join().unwrap();
        assert_eq!(token.signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn test_watch_after_trigger_shuts_down_at_once() {
        let (_daemon, mut client) = UnixStream::pair().unwrap();
        let token = CancelToken::new();
        token.trigger(libc::SIGINT);
        token.watch(client.as_raw_fd());

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_signal_before_start_opens_nothing() {
        let token = CancelToken::new();
        token.trigger(libc::SIGHUP);
        let mut lifecycle = Lifecycle::new(token);

        let mut provisioned = false;
        let reason = lifecycle.run(
            &VirtualDeviceSpec::default(),
            |spec| {
                provisioned = true;
                VirtualJoystick::provision(RecordingSink::new(), spec)
            },
            || Ok(ScriptedSource::new([])),
            || Ok(()),
        );

        assert_eq!(reason, Termination::Signal(libc::SIGHUP));
        assert!(!provisioned);
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
    }

    #[test]
    fn test_detach_failure_releases_both_handles() {
        let sink = RecordingSink::new();
        let source = ScriptedSource::new([]);
        let closes = source.close_counter();
        let mut lifecycle = Lifecycle::new(CancelToken::new());

        let reason = lifecycle.run(
            &VirtualDeviceSpec::default(),
            |spec| VirtualJoystick::provision(sink.clone(), spec),
            || Ok(source),
            || Err(DaemonError::Fork(nix::Error::EAGAIN)),
        );

        assert_eq!(reason, Termination::Fatal);
        assert_eq!(sink.destroy_count(), 1);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_read_error_ends_run() {
        let sink = RecordingSink::new();
        let source = ScriptedSource::new([Step::Fail(SpnavError::Read(
            std::io::Error::from_raw_os_error(libc::ECONNRESET),
        ))]);
        let mut lifecycle = Lifecycle::new(CancelToken::new());

        let reason = lifecycle.run(
            &VirtualDeviceSpec::default(),
            |spec| VirtualJoystick::provision(sink.clone(), spec),
            || Ok(source),
            || Ok(()),
        );

        assert_eq!(reason, Termination::SourceFailed);
        assert_eq!(reason.exit_status(), 1);
        assert_eq!(sink.destroy_count(), 1);
    }
}
