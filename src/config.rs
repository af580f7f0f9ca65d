//! Device description and runtime settings
//!
//! Everything here is fixed at startup: the axis table, the button map,
//! the identity the virtual joystick presents to the system, and the
//! settings parsed from the command line.

use evdev::{AbsoluteAxisType, BusType, Key};
use std::path::PathBuf;

/// Default uinput control node
pub const DEFAULT_UINPUT_PATH: &str = "/dev/uinput";

/// Default spacenavd socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/spnav.sock";

/// Number of spacenav buttons forwarded to the joystick
pub const NUM_BUTTONS: u32 = 21;

/// Key code of source button 0 (`BTN_JOYSTICK`, which is `BTN_TRIGGER`)
pub const FIRST_BUTTON: Key = Key::BTN_TRIGGER;

/// Native range of spacenav motion values
pub const AXIS_MIN: i32 = -350;
pub const AXIS_MAX: i32 = 350;

/// Joystick axis identifiers, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X,
    Y,
    Z,
    RX,
    RY,
    RZ,
}

impl AxisId {
    /// All axes, in the order they are declared and reported
    pub const ALL: [AxisId; 6] = [
        AxisId::X,
        AxisId::Y,
        AxisId::Z,
        AxisId::RX,
        AxisId::RY,
        AxisId::RZ,
    ];

    /// Kernel absolute axis code
    pub fn code(self) -> AbsoluteAxisType {
        match self {
            AxisId::X => AbsoluteAxisType::ABS_X,
            AxisId::Y => AbsoluteAxisType::ABS_Y,
            AxisId::Z => AbsoluteAxisType::ABS_Z,
            AxisId::RX => AbsoluteAxisType::ABS_RX,
            AxisId::RY => AbsoluteAxisType::ABS_RY,
            AxisId::RZ => AbsoluteAxisType::ABS_RZ,
        }
    }

    /// Position in [`AxisId::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Calibration range of one absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub const SPACENAV: AxisRange = AxisRange {
        min: AXIS_MIN,
        max: AXIS_MAX,
    };
}

/// Maps spacenav button numbers onto consecutive joystick buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonMap {
    first: Key,
    count: u32,
}

impl ButtonMap {
    pub const fn new(first: Key, count: u32) -> Self {
        Self { first, count }
    }

    /// Key code for a source button, or `None` if the index is out of range
    pub fn key_for(&self, index: u32) -> Option<Key> {
        if index < self.count {
            Some(Key::new(self.first.code() + index as u16))
        } else {
            None
        }
    }

    /// Every key the map can produce, lowest first
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        (0..self.count).filter_map(|i| self.key_for(i))
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for ButtonMap {
    fn default() -> Self {
        Self::new(FIRST_BUTTON, NUM_BUTTONS)
    }
}

/// Identity and calibration of the virtual joystick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDeviceSpec {
    pub name: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    /// Indexed by [`AxisId::index`]
    pub ranges: [AxisRange; 6],
    pub buttons: ButtonMap,
}

impl VirtualDeviceSpec {
    pub fn range(&self, axis: AxisId) -> AxisRange {
        self.ranges[axis.index()]
    }
}

impl Default for VirtualDeviceSpec {
    fn default() -> Self {
        Self {
            name: "Spacenav Joystick".to_string(),
            bus: BusType::BUS_USB.0,
            vendor: 0xDEAD,
            product: 0xBEEF,
            version: 1,
            ranges: [AxisRange::SPACENAV; 6],
            buttons: ButtonMap::default(),
        }
    }
}

/// Log verbosity selected with `--logging`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
}

impl Verbosity {
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Verbosity::Error),
            1 => Some(Verbosity::Warn),
            2 => Some(Verbosity::Info),
            3 => Some(Verbosity::Debug),
            _ => None,
        }
    }
}

/// Process-wide settings, built once in `main` and passed down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub verbosity: Verbosity,
    pub daemonize: bool,
    pub uinput_path: PathBuf,
    pub socket_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            daemonize: false,
            uinput_path: PathBuf::from(DEFAULT_UINPUT_PATH),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}
