//! The BSL protocol client: `SYNCH`/`READ`/`ERASE`/`WRITE`/`GO` exchanges
//! against a `Transport`, enforcing checksum and ACK/NACK rules.

use crate::error::{ProtocolError, ProtocolStep};
use crate::transport::Transport;
use std::thread::sleep;
use std::time::Duration;

pub const SYNC_BYTE: u8 = 0x7F;
pub const ACK: u8 = 0x79;
pub const NACK: u8 = 0x1F;
#[allow(dead_code)]
pub const BUSY: u8 = 0xAA;

const CMD_READ: u8 = 0x11;
const CMD_ERASE: u8 = 0x43;
const CMD_WRITE: u8 = 0x31;
const CMD_GO: u8 = 0x21;

const READ_SLICE_MAX: usize = 256;
const WRITE_SLICE_MAX: usize = 128;
const SYNC_RETRIES: u32 = 15;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Configuration for the BSL write path.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Skip a 128-byte slice entirely when every byte in it is `0x00`.
    /// Correct only when the caller has mass-erased first; default `true`
    /// for parity with the original tool.
    pub skip_zero_slices: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            skip_zero_slices: true,
        }
    }
}

fn address_frame(addr: u32) -> [u8; 5] {
    let b = addr.to_be_bytes();
    [b[0], b[1], b[2], b[3], b[0] ^ b[1] ^ b[2] ^ b[3]]
}

fn command_frame(cmd: u8) -> [u8; 2] {
    [cmd, cmd ^ 0xFF]
}

fn expect_ack(transport: &mut dyn Transport, step: ProtocolStep) -> Result<bool, ProtocolError> {
    let mut buf = [0u8; 1];
    let n = transport.receive(&mut buf)?;
    if n != 1 {
        return Err(ProtocolError::UnexpectedReply { step, byte: 0 });
    }
    match buf[0] {
        ACK => Ok(true),
        NACK => Ok(false),
        other => Err(ProtocolError::UnexpectedReply { step, byte: other }),
    }
}

/// Synchronise with the BSL. Retries up to 15 times with a 10ms gap; success
/// on either ACK (fresh sync) or NACK (already synchronised).
pub fn sync(transport: &mut dyn Transport) -> Result<(), ProtocolError> {
    transport.flush()?;

    let mut last_unexpected: Option<u8> = None;

    for attempt in 1..=SYNC_RETRIES {
        transport.send(&[SYNC_BYTE])?;
        let mut buf = [0u8; 1];
        let n = transport.receive(&mut buf)?;
        if n == 1 && (buf[0] == ACK || buf[0] == NACK) {
            log::debug!(
                "sync succeeded on attempt {attempt} ({})",
                if buf[0] == ACK { "ACK" } else { "NACK" }
            );
            return Ok(());
        }
        if n == 1 {
            log::warn!("sync attempt {attempt}: unexpected reply 0x{:02X}", buf[0]);
            last_unexpected = Some(buf[0]);
        }
        sleep(SYNC_RETRY_DELAY);
    }

    match last_unexpected {
        Some(byte) => Err(ProtocolError::UnexpectedReply {
            step: ProtocolStep::Command,
            byte,
        }),
        None => Err(ProtocolError::SyncTimeout),
    }
}

/// Read `out.len()` bytes from device memory starting at `addr`, in slices
/// of at most 256 bytes.
pub fn read(transport: &mut dyn Transport, addr: u32, out: &mut [u8]) -> Result<(), ProtocolError> {
    let mut offset = 0usize;
    while offset < out.len() {
        let slice_len = (out.len() - offset).min(READ_SLICE_MAX);
        let slice_addr = addr + offset as u32;

        transport.send(&command_frame(CMD_READ))?;
        if !expect_ack(transport, ProtocolStep::Command)? {
            return Err(ProtocolError::Read {
                step: ProtocolStep::Command,
                detail: "NACK on READ command".to_string(),
            });
        }

        transport.send(&address_frame(slice_addr))?;
        if !expect_ack(transport, ProtocolStep::Address)? {
            return Err(ProtocolError::Read {
                step: ProtocolStep::Address,
                detail: "NACK on read address".to_string(),
            });
        }

        let n_minus_one = (slice_len - 1) as u8;
        transport.send(&[n_minus_one, !n_minus_one])?;
        if !expect_ack(transport, ProtocolStep::Length)? {
            return Err(ProtocolError::Read {
                step: ProtocolStep::Length,
                detail: "NACK on read length".to_string(),
            });
        }

        let dest = &mut out[offset..offset + slice_len];
        let n = transport.receive(dest)?;
        if n != slice_len {
            return Err(ProtocolError::Read {
                step: ProtocolStep::Data,
                detail: format!("expected {slice_len} bytes, got {n}"),
            });
        }

        offset += slice_len;
    }
    Ok(())
}

/// Probe whether `addr` is addressable on the device via a 1-byte read.
/// `Ok(false)` means the address NACK'd (doesn't exist); any other protocol
/// anomaly is a hard error.
pub fn mem_check(transport: &mut dyn Transport, addr: u32) -> Result<bool, ProtocolError> {
    transport.send(&command_frame(CMD_READ))?;
    if !expect_ack(transport, ProtocolStep::Command)? {
        return Err(ProtocolError::Read {
            step: ProtocolStep::Command,
            detail: "NACK on READ command".to_string(),
        });
    }

    transport.send(&address_frame(addr))?;
    if !expect_ack(transport, ProtocolStep::Address)? {
        // This is the expected "address doesn't exist" signal, not an error.
        return Ok(false);
    }

    transport.send(&[0x00, 0xFF])?;
    if !expect_ack(transport, ProtocolStep::Length)? {
        return Err(ProtocolError::Read {
            step: ProtocolStep::Length,
            detail: "NACK on read length".to_string(),
        });
    }

    let mut byte = [0u8; 1];
    let n = transport.receive(&mut byte)?;
    if n != 1 {
        return Err(ProtocolError::Read {
            step: ProtocolStep::Data,
            detail: "expected 1 byte, got none".to_string(),
        });
    }
    Ok(true)
}

/// Mass-erase both P-flash and D-flash/EEPROM.
pub fn mass_erase(transport: &mut dyn Transport) -> Result<(), ProtocolError> {
    log::info!("mass erasing flash");
    transport.send(&command_frame(CMD_ERASE))?;
    if !expect_ack(transport, ProtocolStep::Command)? {
        return Err(ProtocolError::Erase {
            step: ProtocolStep::Command,
            detail: "NACK on ERASE command".to_string(),
        });
    }

    transport.send(&[0xFF, 0x00])?;
    if !expect_ack(transport, ProtocolStep::Data)? {
        return Err(ProtocolError::Erase {
            step: ProtocolStep::Data,
            detail: "NACK on mass-erase trigger".to_string(),
        });
    }
    Ok(())
}

/// Write `bytes` to device memory starting at `addr`, in slices of at most
/// 128 bytes. All-zero slices are skipped when `opts.skip_zero_slices`.
pub fn write(
    transport: &mut dyn Transport,
    addr: u32,
    bytes: &[u8],
    opts: WriteOptions,
) -> Result<(), ProtocolError> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let slice_len = (bytes.len() - offset).min(WRITE_SLICE_MAX);
        let slice = &bytes[offset..offset + slice_len];
        let slice_addr = addr + offset as u32;

        if opts.skip_zero_slices && slice.iter().all(|b| *b == 0) {
            offset += slice_len;
            continue;
        }

        transport.send(&command_frame(CMD_WRITE))?;
        if !expect_ack(transport, ProtocolStep::Command)? {
            return Err(ProtocolError::Write {
                step: ProtocolStep::Command,
                detail: "NACK on WRITE command".to_string(),
            });
        }

        transport.send(&address_frame(slice_addr))?;
        if !expect_ack(transport, ProtocolStep::Address)? {
            return Err(ProtocolError::Write {
                step: ProtocolStep::Address,
                detail: "NACK on write address".to_string(),
            });
        }

        let n_minus_one = (slice_len - 1) as u8;
        let mut frame = Vec::with_capacity(slice_len + 2);
        frame.push(n_minus_one);
        frame.extend_from_slice(slice);
        let chk = slice.iter().fold(n_minus_one, |acc, b| acc ^ b);
        frame.push(chk);

        transport.send(&frame)?;
        if !expect_ack(transport, ProtocolStep::Data)? {
            return Err(ProtocolError::Write {
                step: ProtocolStep::Data,
                detail: "NACK on write payload".to_string(),
            });
        }

        offset += slice_len;
    }
    Ok(())
}

/// Jump to `addr` and transfer control to the device. Traffic from the
/// device after the second ACK is undefined.
pub fn jump(transport: &mut dyn Transport, addr: u32) -> Result<(), ProtocolError> {
    transport.send(&command_frame(CMD_GO))?;
    if !expect_ack(transport, ProtocolStep::Command)? {
        return Err(ProtocolError::Jump {
            step: ProtocolStep::Command,
            detail: "NACK on GO command".to_string(),
        });
    }

    transport.send(&address_frame(addr))?;
    if !expect_ack(transport, ProtocolStep::Address)? {
        return Err(ProtocolError::Jump {
            step: ProtocolStep::Address,
            detail: "NACK on jump address".to_string(),
        });
    }
    Ok(())
}
