//! Byte-level serial transport. Modelled as a trait so the BSL protocol
//! client and session driver can be exercised against a fake port in tests.

use crate::error::TransportError;
#[cfg(feature = "serialport")]
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Configuration used to open a port.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub port_name: String,
    pub baud: u32,
    pub timeout_ms: u64,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub rts: bool,
    pub dtr: bool,
}

impl PortConfig {
    pub fn bootstrap(port_name: impl Into<String>) -> Self {
        PortConfig {
            port_name: port_name.into(),
            baud: 9600,
            timeout_ms: 1000,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rts: false,
            dtr: false,
        }
    }
}

/// A half-duplex (or full-duplex) byte pipe to the target device.
///
/// `reply_mode` governs whether `receive` echoes each byte it reads back to
/// the device via `send` before reading the next one. This mirrors STM8 UART
/// mode 2 (1-wire reply) and is a property of the transport/device pairing,
/// not of the BSL protocol itself.
pub trait Transport {
    /// Reconfigure the baud rate of an already-open port.
    fn set_baud(&mut self, baud: u32) -> Result<(), TransportError>;

    /// Reconfigure the total read timeout, in milliseconds.
    fn set_timeout(&mut self, ms: u64) -> Result<(), TransportError>;

    /// Discard all pending RX and TX bytes.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Write `bytes` to the wire, purging RX/TX first. Returns bytes accepted.
    fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `out.len()` bytes, bounded by the configured timeout.
    /// Returns the number of bytes actually read into `out`.
    fn receive(&mut self, out: &mut [u8]) -> Result<usize, TransportError>;

    fn reply_mode(&self) -> bool;
}

/// `Transport` backed by a real OS serial port via the `serialport` crate.
#[cfg(feature = "serialport")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    reply_mode: bool,
}

#[cfg(feature = "serialport")]
impl SerialTransport {
    pub fn open(config: &PortConfig, reply_mode: bool) -> Result<Self, TransportError> {
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };

        log::debug!(
            "opening {} at {} baud, {}ms timeout",
            config.port_name,
            config.baud,
            config.timeout_ms
        );

        let mut port = serialport::new(&config.port_name, config.baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()
            .map_err(|e| TransportError::PortOpen {
                port: config.port_name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;

        port.write_request_to_send(config.rts).ok();
        port.write_data_terminal_ready(config.dtr).ok();

        Ok(SerialTransport { port, reply_mode })
    }
}

#[cfg(feature = "serialport")]
impl Transport for SerialTransport {
    fn set_baud(&mut self, baud: u32) -> Result<(), TransportError> {
        log::debug!("switching to {baud} baud");
        self.port
            .set_baud_rate(baud)
            .map_err(|e| TransportError::PortConfig {
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
    }

    fn set_timeout(&mut self, ms: u64) -> Result<(), TransportError> {
        self.port
            .set_timeout(Duration::from_millis(ms))
            .map_err(|e| TransportError::PortConfig {
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| TransportError::PortConfig {
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        // The BSL reply mode means stale echoes can sit in RX; purge both
        // directions before every write or they contaminate the next read.
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| TransportError::PortConfig {
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
        // A short write here would desynchronise every subsequent frame
        // boundary, so treat anything but the whole buffer landing as fatal.
        self.port.write_all(bytes)?;
        log::trace!("tx {} bytes: {bytes:02X?}", bytes.len());
        Ok(bytes.len())
    }

    fn receive(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        let mut count = 0;
        for slot in out.iter_mut() {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(1) => {
                    *slot = byte[0];
                    count += 1;
                    if self.reply_mode {
                        self.port.write_all(&byte)?;
                    }
                }
                _ => break,
            }
        }
        log::trace!("rx {count} bytes: {:02X?}", &out[..count]);
        Ok(count)
    }

    fn reply_mode(&self) -> bool {
        self.reply_mode
    }
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `Transport` double used by the protocol and session
    //! tests. Scripted responses are queued up front; sent bytes are
    //! recorded for assertions.
    use super::*;
    use std::collections::VecDeque;

    pub struct FakeTransport {
        pub sent: Vec<u8>,
        pub sent_frames: Vec<Vec<u8>>,
        pub inbox: VecDeque<u8>,
        pub reply_mode: bool,
        pub baud_history: Vec<u32>,
        pub send_attempts: usize,
    }

    impl FakeTransport {
        pub fn new(reply_mode: bool) -> Self {
            FakeTransport {
                sent: Vec::new(),
                sent_frames: Vec::new(),
                inbox: VecDeque::new(),
                reply_mode,
                baud_history: Vec::new(),
                send_attempts: 0,
            }
        }

        pub fn queue(&mut self, bytes: &[u8]) {
            self.inbox.extend(bytes.iter().copied());
        }
    }

    impl Transport for FakeTransport {
        fn set_baud(&mut self, baud: u32) -> Result<(), TransportError> {
            self.baud_history.push(baud);
            Ok(())
        }

        fn set_timeout(&mut self, _ms: u64) -> Result<(), TransportError> {
            Ok(())
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
            self.send_attempts += 1;
            self.sent.extend_from_slice(bytes);
            self.sent_frames.push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn receive(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
            let mut count = 0;
            for slot in out.iter_mut() {
                match self.inbox.pop_front() {
                    Some(b) => {
                        *slot = b;
                        count += 1;
                        if self.reply_mode {
                            self.sent.push(b);
                            self.sent_frames.push(vec![b]);
                        }
                    }
                    None => break,
                }
            }
            Ok(count)
        }

        fn reply_mode(&self) -> bool {
            self.reply_mode
        }
    }
}
