//! Client side of the spacenavd event protocol
//!
//! spacenavd serves 6DoF events over a UNIX socket. Without a protocol
//! handshake it speaks protocol v0, a fixed-size format: every event is
//! eight native-endian `i32` words, the first being the event type.

use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Words per event packet
pub const PACKET_WORDS: usize = 8;
/// Bytes per event packet
pub const PACKET_SIZE: usize = PACKET_WORDS * std::mem::size_of::<i32>();

const EVENT_MOTION: i32 = 0;
const EVENT_PRESS: i32 = 1;
const EVENT_RELEASE: i32 = 2;

/// Errors talking to spacenavd
#[derive(Debug, Error)]
pub enum SpnavError {
    #[error("Could not connect to spacenavd at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read from spacenavd: {0}")]
    Read(#[source] io::Error),
}

/// Event reported by the 6DoF device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    Motion {
        x: i32,
        y: i32,
        z: i32,
        rx: i32,
        ry: i32,
        rz: i32,
        /// Milliseconds since the previous motion event
        period: u32,
    },
    ButtonChange {
        button_index: u32,
        pressed: bool,
    },
}

/// Result of one blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Event(SourceEvent),
    /// Packet with an event type this client does not know
    Unrecognized(i32),
    /// The daemon closed the session, or the read was cancelled
    EndOfStream,
}

/// Blocking source of device events
pub trait EventSource {
    fn receive(&mut self) -> Result<Received, SpnavError>;

    /// Descriptor that can be shut down to wake a blocked [`receive`](Self::receive)
    fn wake_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Decode one event packet
pub fn decode(packet: &[u8; PACKET_SIZE]) -> Received {
    let mut words = [0i32; PACKET_WORDS];
    for (word, chunk) in words.iter_mut().zip(packet.chunks_exact(4)) {
        *word = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    match words[0] {
        EVENT_MOTION => Received::Event(SourceEvent::Motion {
            x: words[1],
            y: words[2],
            z: words[3],
            rx: words[4],
            ry: words[5],
            rz: words[6],
            period: words[7] as u32,
        }),
        // A negative button number becomes an out-of-range index
        EVENT_PRESS | EVENT_RELEASE => Received::Event(SourceEvent::ButtonChange {
            button_index: words[1] as u32,
            pressed: words[0] == EVENT_PRESS,
        }),
        other => Received::Unrecognized(other),
    }
}

/// Connected spacenavd session
///
/// Closing happens on drop.
#[derive(Debug)]
pub struct SpnavSession {
    stream: UnixStream,
    buf: [u8; PACKET_SIZE],
    filled: usize,
}

impl SpnavSession {
    /// Connect to the spacenavd socket at `path`
    pub fn open(path: &Path) -> Result<Self, SpnavError> {
        let stream = UnixStream::connect(path).map_err(|source| SpnavError::Connect {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Connected to spacenavd at {}", path.display());
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            buf: [0; PACKET_SIZE],
            filled: 0,
        }
    }
}

impl EventSource for SpnavSession {
    /// Block until a whole packet has arrived
    ///
    /// A read interrupted by a signal resumes where it left off, so a
    /// packet is never split across two calls.
    fn receive(&mut self) -> Result<Received, SpnavError> {
        while self.filled < PACKET_SIZE {
            match self.stream.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    if self.filled > 0 {
                        debug!("Session ended inside a packet ({} bytes)", self.filled);
                    }
                    return Ok(Received::EndOfStream);
                }
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SpnavError::Read(e)),
            }
        }

        self.filled = 0;
        Ok(decode(&self.buf))
    }

    fn wake_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }
}

impl Drop for SpnavSession {
    fn drop(&mut self) {
        debug!("Closing spacenavd session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Shutdown;

    fn packet(words: [i32; PACKET_WORDS]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn test_decode_motion() {
        let bytes = packet([0, 10, -20, 0, 5, 0, -5, 16]);
        let received = decode(bytes.as_slice().try_into().unwrap());
        assert_eq!(
            received,
            Received::Event(SourceEvent::Motion {
                x: 10,
                y: -20,
                z: 0,
                rx: 5,
                ry: 0,
                rz: -5,
                period: 16,
            })
        );
    }

    #[test]
    fn test_decode_buttons() {
        let press = packet([1, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode(press.as_slice().try_into().unwrap()),
            Received::Event(SourceEvent::ButtonChange {
                button_index: 2,
                pressed: true
            })
        );

        let release = packet([2, 30, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode(release.as_slice().try_into().unwrap()),
            Received::Event(SourceEvent::ButtonChange {
                button_index: 30,
                pressed: false
            })
        );
    }

    #[test]
    fn test_decode_negative_button_is_out_of_range() {
        let bytes = packet([1, -1, 0, 0, 0, 0, 0, 0]);
        match decode(bytes.as_slice().try_into().unwrap()) {
            Received::Event(SourceEvent::ButtonChange { button_index, .. }) => {
                assert!(button_index >= 21)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let bytes = packet([7, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode(bytes.as_slice().try_into().unwrap()),
            Received::Unrecognized(7)
        );
    }

    #[test]
    fn test_session_reassembles_split_packets() {
        let (mut daemon, client) = UnixStream::pair().unwrap();
        let mut session = SpnavSession::from_stream(client);

        let bytes = packet([1, 4, 0, 0, 0, 0, 0, 0]);
        daemon.write_all(&bytes[..5]).unwrap();
        daemon.write_all(&bytes[5..]).unwrap();
        daemon.write_all(&packet([2, 4, 0, 0, 0, 0, 0, 0])).unwrap();

        assert_eq!(
            session.receive().unwrap(),
            Received::Event(SourceEvent::ButtonChange {
                button_index: 4,
                pressed: true
            })
        );
        assert_eq!(
            session.receive().unwrap(),
            Received::Event(SourceEvent::ButtonChange {
                button_index: 4,
                pressed: false
            })
        );
    }

    #[test]
    fn test_session_end_of_stream() {
        let (mut daemon, client) = UnixStream::pair().unwrap();
        let mut session = SpnavSession::from_stream(client);

        daemon.write_all(&packet([0, 1, 2, 3, 4, 5, 6, 0])[..12]).unwrap();
        drop(daemon);

        assert_eq!(session.receive().unwrap(), Received::EndOfStream);
    }

    #[test]
    fn test_shutdown_wakes_blocked_receive() {
        let (_daemon, client) = UnixStream::pair().unwrap();
        let waker = client.try_clone().unwrap();
        let mut session = SpnavSession::from_stream(client);

        let handle = std::thread::spawn(move || session.receive().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(50));
        waker.shutdown(Shutdown::Both).unwrap();

        assert_eq!(handle.join().unwrap(), Received::EndOfStream);
    }

    #[test]
    fn test_open_missing_socket() {
        let err = SpnavSession::open(Path::new("/nonexistent/spnav.sock")).unwrap_err();
        assert!(matches!(err, SpnavError::Connect { .. }));
    }
}
