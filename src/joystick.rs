//! Virtual joystick device on top of uinput
//!
//! Creates a six axis joystick that appears as a standard input device
//! to games and applications. Capabilities are declared one ioctl at a
//! time, in a fixed order, and the device node is committed last.

use crate::config::{AxisId, AxisRange, VirtualDeviceSpec};
use evdev::{AbsoluteAxisType, EventType, InputEvent, Key, Synchronization};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from virtual joystick operations
#[derive(Debug, Error)]
pub enum JoystickError {
    #[error("Could not open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write device setup: {0}")]
    Setup(#[source] io::Error),
    #[error("Failed to declare {capability:?}: {source}")]
    Declare {
        capability: Capability,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create device: {0}")]
    Commit(#[source] io::Error),
    #[error("Failed to emit event: {0}")]
    Emit(#[source] io::Error),
}

/// One capability bit declared on the device before it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// `UI_SET_EVBIT`
    EventType(EventType),
    /// `UI_SET_ABSBIT`, with the range written in the setup record
    AbsoluteAxis(AbsoluteAxisType, AxisRange),
    /// `UI_SET_KEYBIT`
    Key(Key),
}

impl VirtualDeviceSpec {
    /// Capability declarations in the order they are issued
    ///
    /// Absolute axes first (X, Y, Z, RX, RY, RZ), then the button keys,
    /// then synchronization.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::with_capacity(3 + AxisId::ALL.len() + self.buttons.len() as usize);

        caps.push(Capability::EventType(EventType::ABSOLUTE));
        for axis in AxisId::ALL {
            caps.push(Capability::AbsoluteAxis(axis.code(), self.range(axis)));
        }

        caps.push(Capability::EventType(EventType::KEY));
        caps.extend(self.buttons.keys().map(Capability::Key));

        caps.push(Capability::EventType(EventType::SYNCHRONIZATION));
        caps
    }
}

/// Event written to the virtual device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationEvent {
    AbsoluteAxis { axis: AxisId, value: i32 },
    Key { key: Key, pressed: bool },
    /// `SYN_REPORT`, closes an event group
    Sync,
}

impl DestinationEvent {
    /// (type, code, value) as the kernel sees it
    pub fn raw(&self) -> (u16, u16, i32) {
        match *self {
            DestinationEvent::AbsoluteAxis { axis, value } => {
                (EventType::ABSOLUTE.0, axis.code().0, value)
            }
            DestinationEvent::Key { key, pressed } => {
                (EventType::KEY.0, key.code(), i32::from(pressed))
            }
            DestinationEvent::Sync => (
                EventType::SYNCHRONIZATION.0,
                Synchronization::SYN_REPORT.0,
                0,
            ),
        }
    }

    pub fn to_input_event(&self) -> InputEvent {
        let (type_, code, value) = self.raw();
        InputEvent::new(EventType(type_), code, value)
    }
}

/// Low level access to a uinput handle
///
/// The real implementation is [`UinputFile`]; tests substitute a recorder.
pub trait UinputSink {
    /// Write the device identity and axis calibration
    fn write_setup(&mut self, spec: &VirtualDeviceSpec) -> io::Result<()>;
    fn declare(&mut self, capability: &Capability) -> io::Result<()>;
    /// `UI_DEV_CREATE`
    fn commit(&mut self) -> io::Result<()>;
    fn emit(&mut self, event: &DestinationEvent) -> io::Result<()>;
    /// `UI_DEV_DESTROY`
    fn destroy(&mut self) -> io::Result<()>;

    /// Kernel name of the created device (e.g. `input42`)
    fn sysname(&mut self) -> io::Result<String> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

mod ioctl {
    use nix::{ioctl_none, ioctl_read_buf, ioctl_write_int};

    const UINPUT_IOCTL_BASE: u8 = b'U';

    ioctl_none!(ui_dev_create, UINPUT_IOCTL_BASE, 1);
    ioctl_none!(ui_dev_destroy, UINPUT_IOCTL_BASE, 2);
    ioctl_write_int!(ui_set_evbit, UINPUT_IOCTL_BASE, 100);
    ioctl_write_int!(ui_set_keybit, UINPUT_IOCTL_BASE, 101);
    ioctl_write_int!(ui_set_absbit, UINPUT_IOCTL_BASE, 103);
    ioctl_read_buf!(ui_get_sysname, UINPUT_IOCTL_BASE, 44, u8);
}

/// Build the legacy `uinput_user_dev` setup record for `spec`
fn user_dev(spec: &VirtualDeviceSpec) -> libc::uinput_user_dev {
    // SAFETY: plain integer arrays, all-zero is a valid value
    let mut dev: libc::uinput_user_dev = unsafe { std::mem::zeroed() };

    // Keep the trailing NUL
    let len = spec.name.len().min(libc::UINPUT_MAX_NAME_SIZE - 1);
    for (dst, &src) in dev.name.iter_mut().zip(&spec.name.as_bytes()[..len]) {
        *dst = src as libc::c_char;
    }

    dev.id = libc::input_id {
        bustype: spec.bus,
        vendor: spec.vendor,
        product: spec.product,
        version: spec.version,
    };

    for axis in AxisId::ALL {
        let code = axis.code().0 as usize;
        let range = spec.range(axis);
        dev.absmin[code] = range.min;
        dev.absmax[code] = range.max;
    }
    dev
}

/// View a kernel struct as the bytes written to the device
fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: only used with libc repr(C) structs made of integers, fully initialized
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) }
}

/// uinput control node opened for writing
pub struct UinputFile {
    file: File,
}

impl UinputFile {
    /// Open the uinput node write-only and non-blocking
    pub fn open(path: &Path) -> Result<Self, JoystickError> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| JoystickError::Open {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self { file })
    }
}

impl UinputSink for UinputFile {
    fn write_setup(&mut self, spec: &VirtualDeviceSpec) -> io::Result<()> {
        self.file.write_all(as_bytes(&user_dev(spec)))
    }

    fn declare(&mut self, capability: &Capability) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        // SAFETY: fd is an open uinput handle owned by self
        let result = unsafe {
            match *capability {
                Capability::EventType(ty) => ioctl::ui_set_evbit(fd, ty.0.into()),
                Capability::AbsoluteAxis(axis, _) => ioctl::ui_set_absbit(fd, axis.0.into()),
                Capability::Key(key) => ioctl::ui_set_keybit(fd, key.code().into()),
            }
        };
        result.map(drop).map_err(io::Error::from)
    }

    fn commit(&mut self) -> io::Result<()> {
        // SAFETY: fd is an open uinput handle owned by self
        unsafe { ioctl::ui_dev_create(self.file.as_raw_fd()) }
            .map(drop)
            .map_err(io::Error::from)
    }

    fn emit(&mut self, event: &DestinationEvent) -> io::Result<()> {
        // Zero timestamp: the kernel stamps the event on arrival
        let raw = event.to_input_event();
        self.file.write_all(as_bytes::<libc::input_event>(raw.as_ref()))
    }

    fn destroy(&mut self) -> io::Result<()> {
        // SAFETY: fd is an open uinput handle owned by self
        unsafe { ioctl::ui_dev_destroy(self.file.as_raw_fd()) }
            .map(drop)
            .map_err(io::Error::from)
    }

    fn sysname(&mut self) -> io::Result<String> {
        let mut buf = [0u8; 64];
        // SAFETY: buf outlives the call and its length is encoded in the request
        unsafe { ioctl::ui_get_sysname(self.file.as_raw_fd(), &mut buf) }
            .map_err(io::Error::from)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

/// Virtual joystick device
///
/// The device node exists from a successful [`VirtualJoystick::provision`]
/// until the value is dropped.
pub struct VirtualJoystick<S: UinputSink = UinputFile> {
    sink: S,
}

impl VirtualJoystick<UinputFile> {
    /// Open `path` and create the joystick described by `spec`
    pub fn create(spec: &VirtualDeviceSpec, path: &Path) -> Result<Self, JoystickError> {
        let sink = UinputFile::open(path)?;
        Self::provision(sink, spec)
    }
}

impl<S: UinputSink> VirtualJoystick<S> {
    /// Declare every capability of `spec` on `sink` and commit the device
    ///
    /// Stops at the first failing step. A half-declared handle is simply
    /// dropped; the kernel discards it with the file descriptor.
    pub fn provision(mut sink: S, spec: &VirtualDeviceSpec) -> Result<Self, JoystickError> {
        sink.write_setup(spec).map_err(JoystickError::Setup)?;

        for capability in spec.capabilities() {
            debug!("Declaring {:?}", capability);
            sink.declare(&capability)
                .map_err(|source| JoystickError::Declare { capability, source })?;
        }

        sink.commit().map_err(JoystickError::Commit)?;
        info!("Created virtual joystick: {}", spec.name);

        match sink.sysname() {
            Ok(name) => info!("Device path: /sys/devices/virtual/input/{}", name),
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
            Err(e) => warn!("Could not query device name: {}", e),
        }

        Ok(Self { sink })
    }

    /// Write one event to the device
    pub fn emit(&mut self, event: &DestinationEvent) -> Result<(), JoystickError> {
        self.sink.emit(event).map_err(JoystickError::Emit)
    }
}

impl<S: UinputSink> Drop for VirtualJoystick<S> {
    fn drop(&mut self) {
        // Errors are irrelevant here, the node goes away with the fd anyway
        match self.sink.destroy() {
            Ok(()) => debug!("Destroyed virtual joystick"),
            Err(e) => debug!("UI_DEV_DESTROY failed: {}", e),
        }
    }
}
