//! The session driver: the fixed reset/sync/upload/erase/program/verify/
//! option-byte/jump sequence that turns an opened port and a firmware image
//! into a flashed, running device.

use crate::error::SessionError;
use crate::hex::{parse_s19, Image};
use crate::protocol;
use crate::protocol::WriteOptions;
use crate::transport::Transport;
use std::thread::sleep;
use std::time::Duration;

const WAKEUP_TRIGGER: &[u8; 9] = b"##reset##";
const WAKEUP_BYTE_GAP: Duration = Duration::from_millis(10);
const BAUD_SETTLE_DELAY: Duration = Duration::from_millis(20);

const RAM_ROUTINE_S19: &str = include_str!("../resources/ram_routine.s19");

const OPTION_BYTE_UNLOCK: [u8; 2] = [0x55, 0xAA];

/// Addresses that vary across STM8 variants; defaults match the tested
/// STM8S family.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub option_byte_addr: u32,
    pub app_entry: u32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            option_byte_addr: 0x487E,
            app_entry: 0x8000,
        }
    }
}

/// Feature flags and addressing for one programming session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub session_baud: u32,
    pub erase: bool,
    pub verify: bool,
    pub run: bool,
    pub write_opts: WriteOptions,
    pub profile: DeviceProfile,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            session_baud: 230_400,
            erase: true,
            verify: false,
            run: true,
            write_opts: WriteOptions::default(),
            profile: DeviceProfile::default(),
        }
    }
}

/// What actually happened during a session, for the caller to report.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub ram_routine_bytes: u32,
    pub erased: bool,
    pub image_bytes_written: u32,
    pub verified: bool,
    pub jumped: bool,
}

/// Run the full reset-to-jump sequence against an already-constructed
/// transport that is not yet at the bootstrap baud rate.
///
/// `transport` must be freshly opened at 9600 8N1; this function performs
/// the wake-up trigger, baud switch, and the rest of the sequence described
/// in the session driver component.
pub fn run(
    transport: &mut dyn Transport,
    image: Option<&Image>,
    config: &SessionConfig,
) -> Result<SessionReport, SessionError> {
    let mut report = SessionReport::default();

    wake_up(transport)?;
    switch_to_session_baud(transport, config.session_baud)?;

    protocol::sync(transport)?;
    log::info!("synchronised with bootloader");

    let ram_routine = parse_s19(RAM_ROUTINE_S19)?;
    protocol::write(
        transport,
        ram_routine.base,
        &ram_routine.bytes,
        config.write_opts,
    )?;
    report.ram_routine_bytes = ram_routine.len();
    log::debug!(
        "uploaded ram routine: {} bytes at 0x{:04X}",
        ram_routine.len(),
        ram_routine.base
    );

    if config.erase {
        protocol::mass_erase(transport)?;
        report.erased = true;
    }

    if let Some(image) = image {
        if !image.is_empty() {
            protocol::write(transport, image.base, &image.bytes, config.write_opts)?;
            report.image_bytes_written = image.len();
            log::info!("wrote {} bytes at 0x{:04X}", image.len(), image.base);

            if config.verify {
                verify(transport, image)?;
                report.verified = true;
            }
        }
    }

    protocol::write(
        transport,
        config.profile.option_byte_addr,
        &OPTION_BYTE_UNLOCK,
        WriteOptions {
            skip_zero_slices: false,
        },
    )?;
    log::debug!(
        "enabled bootloader option byte at 0x{:04X}",
        config.profile.option_byte_addr
    );

    if config.run {
        protocol::jump(transport, config.profile.app_entry)?;
        report.jumped = true;
        log::info!("jumped to 0x{:04X}", config.profile.app_entry);
    }

    Ok(report)
}

fn wake_up(transport: &mut dyn Transport) -> Result<(), SessionError> {
    log::debug!("sending reset trigger");
    for byte in WAKEUP_TRIGGER {
        transport.send(std::slice::from_ref(byte))?;
        sleep(WAKEUP_BYTE_GAP);
    }
    Ok(())
}

fn switch_to_session_baud(transport: &mut dyn Transport, baud: u32) -> Result<(), SessionError> {
    transport.set_baud(baud)?;
    sleep(BAUD_SETTLE_DELAY);
    transport.flush()?;
    Ok(())
}

fn verify(transport: &mut dyn Transport, image: &Image) -> Result<(), SessionError> {
    let mut readback = vec![0u8; image.bytes.len()];
    protocol::read(transport, image.base, &mut readback)?;

    for (offset, (expected, actual)) in image.bytes.iter().zip(readback.iter()).enumerate() {
        if expected != actual {
            return Err(SessionError::VerifyMismatch {
                address: image.base + offset as u32,
                expected: *expected,
                actual: *actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ACK;
    use crate::transport::fake::FakeTransport;

    fn ack_n(n: usize) -> Vec<u8> {
        vec![ACK; n]
    }

    #[test]
    fn happy_path_sequence_erase_no_verify_no_image() {
        let mut t = FakeTransport::new(false);
        // sync
        t.queue(&[ACK]);
        // ram routine write: 24 bytes -> 1 slice of command/address/data acks
        t.queue(&ack_n(3));
        // mass erase
        t.queue(&ack_n(2));
        // option byte write
        t.queue(&ack_n(3));
        // jump
        t.queue(&ack_n(2));

        let config = SessionConfig::default();
        let report = run(&mut t, None, &config).unwrap();

        assert_eq!(report.ram_routine_bytes, 24);
        assert!(report.erased);
        assert_eq!(report.image_bytes_written, 0);
        assert!(!report.verified);
        assert!(report.jumped);

        assert_eq!(&t.sent[..9], WAKEUP_TRIGGER);
        assert_eq!(t.baud_history, vec![230_400]);
    }

    #[test]
    fn image_write_and_verify_mismatch_aborts() {
        let mut t = FakeTransport::new(false);
        t.queue(&[ACK]); // sync
        t.queue(&ack_n(3)); // ram routine write
        t.queue(&ack_n(2)); // mass erase
        t.queue(&ack_n(3)); // image write (4 bytes, one slice)
        // verify read: command ack, address ack, length ack, then 4 bytes
        // with a deliberate mismatch on the last byte.
        t.queue(&ack_n(3));
        t.queue(&[0xAA, 0xBB, 0xCC, 0x00]);

        let image = Image {
            base: 0x8000,
            bytes: vec![0xAA, 0xBB, 0xCC, 0xDD],
        };
        let config = SessionConfig {
            verify: true,
            ..SessionConfig::default()
        };

        let err = run(&mut t, Some(&image), &config).unwrap_err();
        match err {
            SessionError::VerifyMismatch {
                address,
                expected,
                actual,
            } => {
                assert_eq!(address, 0x8003);
                assert_eq!(expected, 0xDD);
                assert_eq!(actual, 0x00);
            }
            other => panic!("expected VerifyMismatch, got {other:?}"),
        }
    }

    #[test]
    fn no_run_skips_jump() {
        let mut t = FakeTransport::new(false);
        t.queue(&[ACK]); // sync
        t.queue(&ack_n(3)); // ram routine write
        t.queue(&ack_n(2)); // mass erase
        t.queue(&ack_n(3)); // option byte write

        let config = SessionConfig {
            run: false,
            ..SessionConfig::default()
        };
        let report = run(&mut t, None, &config).unwrap();
        assert!(!report.jumped);
    }

    #[test]
    fn wakeup_sends_literal_nine_byte_trigger() {
        let mut t = FakeTransport::new(false);
        t.queue(&[ACK]);
        t.queue(&ack_n(3));
        t.queue(&ack_n(2));
        t.queue(&ack_n(3));
        t.queue(&ack_n(2));

        run(&mut t, None, &SessionConfig::default()).unwrap();
        assert_eq!(&t.sent_frames[..9], &[
            vec![b'#'], vec![b'#'], vec![b'r'], vec![b'e'], vec![b's'],
            vec![b'e'], vec![b't'], vec![b'#'], vec![b'#'],
        ]);
    }
}
