use thiserror::Error;

/// Failures from the serial transport layer (port open/configure/flush).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to configure serial port: {source}")]
    PortConfig {
        #[source]
        source: std::io::Error,
    },

    #[error("serial I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while decoding an S19 or Intel HEX text image.
#[derive(Error, Debug)]
pub enum HexError {
    #[error("line {line}: {detail}")]
    Syntax { line: usize, detail: String },

    #[error("line {line}: checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    Checksum {
        line: usize,
        expected: u8,
        actual: u8,
    },

    #[error("line {line}: unsupported record type {kind}")]
    UnsupportedRecordType { line: usize, kind: u8 },
}

/// The step within a BSL exchange at which a protocol failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStep {
    Command,
    Address,
    Length,
    Data,
}

impl std::fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolStep::Command => "command",
            ProtocolStep::Address => "address",
            ProtocolStep::Length => "length",
            ProtocolStep::Data => "data",
        };
        write!(f, "{s}")
    }
}

/// Failures raised by the BSL protocol client.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("BSL did not respond to sync after 15 attempts")]
    SyncTimeout,

    #[error("unexpected reply 0x{byte:02X} during {step} (neither ACK nor NACK)")]
    UnexpectedReply { step: ProtocolStep, byte: u8 },

    #[error("read failed at step {step}: {detail}")]
    Read { step: ProtocolStep, detail: String },

    #[error("write failed at step {step}: {detail}")]
    Write { step: ProtocolStep, detail: String },

    #[error("mass erase failed at step {step}: {detail}")]
    Erase { step: ProtocolStep, detail: String },

    #[error("jump failed at step {step}: {detail}")]
    Jump { step: ProtocolStep, detail: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Top-level error returned by the session driver.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Hex(#[from] HexError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(
        "verify mismatch at address 0x{address:08X}: expected 0x{expected:02X}, got 0x{actual:02X}"
    )]
    VerifyMismatch {
        address: u32,
        expected: u8,
        actual: u8,
    },
}
