//! Spacenav 6DoF to uinput joystick bridge
//!
//! Reads motion and button events from spacenavd and replays them on a
//! virtual six axis joystick, so any program that understands joysticks
//! can use a SpaceNavigator-style device.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod joystick;
pub mod lifecycle;
pub mod logging;
pub mod mapper;
pub mod spacenav;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{AxisId, AxisRange, ButtonMap, Settings, Verbosity, VirtualDeviceSpec};
pub use joystick::{Capability, DestinationEvent, JoystickError, UinputSink, VirtualJoystick};
pub use lifecycle::{CancelToken, Lifecycle, LifecycleState, Termination};
pub use mapper::{forward, translate, EmitReport};
pub use spacenav::{EventSource, Received, SourceEvent, SpnavError, SpnavSession};
