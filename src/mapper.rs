//! Spacenav event to joystick event translation
//!
//! Every source event becomes one event group: the axis or key reports
//! it implies, closed by a single `SYN_REPORT`.

use crate::config::{AxisId, ButtonMap};
use crate::joystick::{DestinationEvent, UinputSink, VirtualJoystick};
use crate::spacenav::SourceEvent;
use tracing::{debug, error, warn};

/// Outcome of writing one event group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub written: usize,
    pub failed: usize,
}

/// Build the event group for one source event
pub fn translate(event: &SourceEvent, buttons: &ButtonMap) -> Vec<DestinationEvent> {
    match *event {
        SourceEvent::Motion {
            x,
            y,
            z,
            rx,
            ry,
            rz,
            ..
        } => {
            let values = [x, y, z, rx, ry, rz];
            AxisId::ALL
                .iter()
                .zip(values)
                .map(|(&axis, value)| DestinationEvent::AbsoluteAxis { axis, value })
                .chain(std::iter::once(DestinationEvent::Sync))
                .collect()
        }
        SourceEvent::ButtonChange {
            button_index,
            pressed,
        } => {
            let mut group = Vec::with_capacity(2);
            match buttons.key_for(button_index) {
                Some(key) => group.push(DestinationEvent::Key { key, pressed }),
                None => warn!("Ignoring out-of-range button {}", button_index),
            }
            // Sync even when nothing precedes it
            group.push(DestinationEvent::Sync);
            group
        }
    }
}

/// Translate `event` and write the group to the joystick
///
/// A failed write is logged and the rest of the group is still written.
pub fn forward<S: UinputSink>(
    event: &SourceEvent,
    buttons: &ButtonMap,
    joystick: &mut VirtualJoystick<S>,
) -> EmitReport {
    if let SourceEvent::Motion { period, .. } = event {
        debug!("Motion event, period {}ms", period);
    }

    let mut report = EmitReport::default();
    for out in translate(event, buttons) {
        match joystick.emit(&out) {
            Ok(()) => report.written += 1,
            Err(e) => {
                error!("Could not write event {:?}: {}", out, e);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtualDeviceSpec;
    use crate::testing::RecordingSink;
    use evdev::Key;

    fn motion(x: i32, y: i32, z: i32, rx: i32, ry: i32, rz: i32) -> SourceEvent {
        SourceEvent::Motion {
            x,
            y,
            z,
            rx,
            ry,
            rz,
            period: 0,
        }
    }

    fn axis(axis: AxisId, value: i32) -> DestinationEvent {
        DestinationEvent::AbsoluteAxis { axis, value }
    }

    #[test]
    fn test_motion_group() {
        let group = translate(&motion(10, -20, 0, 5, 0, -5), &ButtonMap::default());
        assert_eq!(
            group,
            vec![
                axis(AxisId::X, 10),
                axis(AxisId::Y, -20),
                axis(AxisId::Z, 0),
                axis(AxisId::RX, 5),
                axis(AxisId::RY, 0),
                axis(AxisId::RZ, -5),
                DestinationEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_motion_values_are_not_scaled() {
        let group = translate(&motion(i32::MIN, i32::MAX, 351, -351, 0, 1), &ButtonMap::default());
        assert_eq!(group[0], axis(AxisId::X, i32::MIN));
        assert_eq!(group[1], axis(AxisId::Y, i32::MAX));
        assert_eq!(group[2], axis(AxisId::Z, 351));
        assert_eq!(group[3], axis(AxisId::RX, -351));
    }

    #[test]
    fn test_button_press() {
        let group = translate(
            &SourceEvent::ButtonChange {
                button_index: 2,
                pressed: true,
            },
            &ButtonMap::default(),
        );
        assert_eq!(
            group,
            vec![
                DestinationEvent::Key {
                    key: Key::new(Key::BTN_TRIGGER.code() + 2),
                    pressed: true
                },
                DestinationEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_button_release() {
        let group = translate(
            &SourceEvent::ButtonChange {
                button_index: 0,
                pressed: false,
            },
            &ButtonMap::default(),
        );
        assert_eq!(
            group,
            vec![
                DestinationEvent::Key {
                    key: Key::BTN_TRIGGER,
                    pressed: false
                },
                DestinationEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_out_of_range_button_only_syncs() {
        for index in [21, 30, u32::MAX] {
            let group = translate(
                &SourceEvent::ButtonChange {
                    button_index: index,
                    pressed: true,
                },
                &ButtonMap::default(),
            );
            assert_eq!(group, vec![DestinationEvent::Sync]);
        }
    }

    #[test]
    fn test_forward_continues_after_write_failure() {
        let spec = VirtualDeviceSpec::default();
        // Third write of the group (Z) fails
        let sink = RecordingSink::new().fail_emit(2);
        let mut joystick = VirtualJoystick::provision(sink.clone(), &spec).unwrap();

        let report = forward(&motion(1, 2, 3, 4, 5, 6), &spec.buttons, &mut joystick);
        assert_eq!(report, EmitReport { written: 6, failed: 1 });
        assert_eq!(
            sink.emitted(),
            vec![
                axis(AxisId::X, 1),
                axis(AxisId::Y, 2),
                axis(AxisId::RX, 4),
                axis(AxisId::RY, 5),
                axis(AxisId::RZ, 6),
                DestinationEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_forward_writes_in_order() {
        let spec = VirtualDeviceSpec::default();
        let sink = RecordingSink::new();
        let mut joystick = VirtualJoystick::provision(sink.clone(), &spec).unwrap();

        let press = SourceEvent::ButtonChange {
            button_index: 1,
            pressed: true,
        };
        forward(&press, &spec.buttons, &mut joystick);
        forward(&motion(0, 0, 0, 0, 0, 9), &spec.buttons, &mut joystick);

        let emitted = sink.emitted();
        assert_eq!(emitted.len(), 2 + 7);
        assert_eq!(emitted[1], DestinationEvent::Sync);
        assert_eq!(emitted[7], axis(AxisId::RZ, 9));
        assert_eq!(emitted[8], DestinationEvent::Sync);
    }
}
