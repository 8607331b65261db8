use super::{assemble, hex_byte, split_lines, Image, Record};
use crate::error::HexError;

const REC_DATA: u8 = 0;
const REC_EOF: u8 = 1;
const REC_SEGMENT_START: u8 = 3;
const REC_EXT_LINEAR_ADDR: u8 = 4;
const REC_START_LINEAR_ADDR: u8 = 5;

/// Parse an Intel HEX text image into a dense `Image`.
///
/// Honours type 0 (data), 1 (EOF), 3 (segment start, ignored), 4 (extended
/// linear address, tracked across subsequent data records) and 5 (start
/// linear address, ignored but checksum-validated). Any other type is a
/// `HexError::UnsupportedRecordType`.
pub fn parse_ihex(text: &str) -> Result<Image, HexError> {
    let mut records = Vec::new();
    let mut extended_upper: u32 = 0;

    for (idx, line) in split_lines(text).into_iter().enumerate() {
        let line_no = idx + 1;
        if !line.starts_with(':') {
            return Err(HexError::Syntax {
                line: line_no,
                detail: "line does not start with ':'".to_string(),
            });
        }
        let body = &line[1..];

        let length = hex_byte(body, 0, line_no)? as usize;
        let addr_hi = hex_byte(body, 2, line_no)?;
        let addr_lo = hex_byte(body, 4, line_no)?;
        let record_addr = ((addr_hi as u32) << 8) | addr_lo as u32;
        let rec_type = hex_byte(body, 6, line_no)?;

        let mut checksum: u32 = length as u32 + addr_hi as u32 + addr_lo as u32 + rec_type as u32;

        let data_start = 8usize;
        let mut data = Vec::with_capacity(length);
        for i in 0..length {
            let b = hex_byte(body, data_start + i * 2, line_no)?;
            checksum += b as u32;
            data.push(b);
        }

        let checksum_char = data_start + length * 2;
        let checksum_read = hex_byte(body, checksum_char, line_no)?;
        let checksum_calc = (0x100u32.wrapping_sub(checksum & 0xFF)) & 0xFF;
        if checksum_calc as u8 != checksum_read {
            return Err(HexError::Checksum {
                line: line_no,
                expected: checksum_calc as u8,
                actual: checksum_read,
            });
        }

        match rec_type {
            REC_DATA => {
                let effective = (extended_upper << 16) | record_addr;
                records.push(Record {
                    address: effective,
                    data,
                });
            }
            REC_EOF => continue,
            REC_SEGMENT_START => continue,
            REC_EXT_LINEAR_ADDR => {
                if data.len() < 2 {
                    return Err(HexError::Syntax {
                        line: line_no,
                        detail: "extended linear address record missing data".to_string(),
                    });
                }
                extended_upper = ((data[0] as u32) << 8) | data[1] as u32;
            }
            REC_START_LINEAR_ADDR => continue,
            other => {
                return Err(HexError::UnsupportedRecordType {
                    line: line_no,
                    kind: other,
                });
            }
        }
    }

    Ok(assemble(&records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_of(fields: &[u8]) -> u8 {
        let sum: u32 = fields.iter().map(|b| *b as u32).sum();
        ((0x100u32.wrapping_sub(sum & 0xFF)) & 0xFF) as u8
    }

    #[test]
    fn parses_extended_address_plus_data_plus_eof() {
        // :02 0000 04 0000 <chk>   (extended linear addr = 0x0000)
        // :04 0000 00 00112233 <chk>
        // :00 0000 01 <chk>
        let ext = checksum_of(&[0x02, 0x00, 0x00, 0x04, 0x00, 0x00]);
        let data = checksum_of(&[0x04, 0x00, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33]);
        let eof = checksum_of(&[0x00, 0x00, 0x00, 0x01]);
        let text = format!(
            ":020000040000{ext:02X}\n:0400000000112233{data:02X}\n:00000001{eof:02X}\n"
        );

        let img = parse_ihex(&text).unwrap();
        assert_eq!(img.base, 0);
        assert_eq!(img.bytes, vec![0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn tracks_extended_upper_bits_across_records() {
        let ext = checksum_of(&[0x02, 0x00, 0x00, 0x04, 0x00, 0x01]);
        let data = checksum_of(&[0x02, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
        let text = format!(":020000040001{ext:02X}\n:020000000AAABB{data:02X}\n");
        let img = parse_ihex(&text).unwrap();
        assert_eq!(img.base, 0x1_0000);
        assert_eq!(img.bytes, vec![0xAA, 0xBB]);
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let text = ":0400000000112233FF\n";
        let err = parse_ihex(text).unwrap_err();
        assert!(matches!(err, HexError::Checksum { line: 1, .. }));
    }

    #[test]
    fn unsupported_record_type_is_an_error() {
        let chk = checksum_of(&[0x00, 0x00, 0x00, 0x02]);
        let text = format!(":00000002{chk:02X}\n");
        let err = parse_ihex(&text).unwrap_err();
        assert!(matches!(
            err,
            HexError::UnsupportedRecordType { line: 1, kind: 0x02 }
        ));
    }
}
