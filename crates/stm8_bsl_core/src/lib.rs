//! Core library for programming STM8 devices over the UART ROM bootloader
//! (BSL): S19/Intel HEX image parsing, the SYNCH/ACK/NACK wire protocol, and
//! the session driver that sequences a full flash.

pub mod error;
pub mod hex;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{HexError, ProtocolError, ProtocolStep, SessionError, TransportError};
pub use hex::{parse_ihex, parse_s19, Image};
pub use protocol::WriteOptions;
pub use session::{DeviceProfile, SessionConfig, SessionReport};
pub use transport::{Parity, PortConfig, StopBits, Transport};

#[cfg(feature = "serialport")]
pub use transport::SerialTransport;
