use super::{assemble, hex_byte, split_lines, Image, Record};
use crate::error::HexError;

/// Parse a Motorola S-record (S19) text image into a dense `Image`.
///
/// Data records are S1/S2/S3 (16/24/32-bit address respectively); S0/S8/S9
/// are metadata and are skipped, as are any other record types the parser
/// doesn't otherwise recognise (it must not fail on them).
pub fn parse_s19(text: &str) -> Result<Image, HexError> {
    let mut records = Vec::new();

    for (idx, line) in split_lines(text).into_iter().enumerate() {
        let line_no = idx + 1;
        if !line.starts_with('S') {
            return Err(HexError::Syntax {
                line: line_no,
                detail: "line does not start with 'S'".to_string(),
            });
        }

        let type_digit = line
            .as_bytes()
            .get(1)
            .and_then(|b| (*b as char).to_digit(10))
            .ok_or_else(|| HexError::Syntax {
                line: line_no,
                detail: "missing or non-numeric record type digit".to_string(),
            })? as u8;

        // S0/S8/S9 are metadata; other non-data types are tolerated but
        // carry no address/data payload we need to extract.
        if !matches!(type_digit, 1..=3) {
            continue;
        }

        let length = hex_byte(line, 2, line_no)? as usize;
        let addr_width = type_digit as usize + 1;

        let mut addr: u32 = 0;
        let mut checksum: u32 = length as u32;
        for i in 0..addr_width {
            let b = hex_byte(line, 4 + i * 2, line_no)?;
            addr = (addr << 8) | b as u32;
            checksum += b as u32;
        }

        if length < addr_width + 1 {
            return Err(HexError::Syntax {
                line: line_no,
                detail: format!("record length {length} too short for address width {addr_width}"),
            });
        }
        let data_len = length - addr_width - 1;
        let data_start_char = 4 + addr_width * 2;

        let mut data = Vec::with_capacity(data_len);
        for i in 0..data_len {
            let b = hex_byte(line, data_start_char + i * 2, line_no)?;
            checksum += b as u32;
            data.push(b);
        }

        let checksum_char = data_start_char + data_len * 2;
        let checksum_read = hex_byte(line, checksum_char, line_no)?;
        let checksum_calc = 0xFFu32 ^ (checksum & 0xFF);
        if checksum_calc as u8 != checksum_read {
            return Err(HexError::Checksum {
                line: line_no,
                expected: checksum_calc as u8,
                actual: checksum_read,
            });
        }

        records.push(Record { address: addr, data });
    }

    Ok(assemble(&records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_record() {
        // S1 13 0000 00112233445566778899AABBCCDD <chk>
        // length = 0x13 = 19 = 2(addr) + 16(data) + 1(chk)
        let data: Vec<u8> = (0u8..16).collect();
        let mut sum: u32 = 0x13;
        sum += 0x00 + 0x00; // address bytes
        for b in &data {
            sum += *b as u32;
        }
        let chk = 0xFFu32 ^ (sum & 0xFF);
        let data_hex: String = data.iter().map(|b| format!("{b:02X}")).collect();
        let line = format!("S113{:04X}{}{:02X}", 0u16, data_hex, chk);

        let img = parse_s19(&line).unwrap();
        assert_eq!(img.base, 0);
        assert_eq!(img.bytes, data);
    }

    #[test]
    fn skips_header_and_footer_records() {
        let line = "S0030000FC\nS9030000FC\n";
        let img = parse_s19(line).unwrap();
        assert!(img.is_empty());
    }

    #[test]
    fn checksum_mismatch_reports_line_number() {
        let bad = "S1130000000102030405060708090A0B0C0DFF\n";
        let err = parse_s19(bad).unwrap_err();
        match err {
            HexError::Checksum { line, .. } => assert_eq!(line, 1),
            other => panic!("expected Checksum error, got {other:?}"),
        }
    }

    #[test]
    fn does_not_crash_on_unhandled_record_types() {
        // S5 (record count) is neither data nor metadata-skip in the listed
        // set, but must not crash the parser.
        let img = parse_s19("S5030001FB\n").unwrap();
        assert!(img.is_empty());
    }

    #[test]
    fn overlapping_s19_records_apply_in_file_order() {
        let rec = |addr: u16, data: &[u8]| -> String {
            let len = 2 + data.len() + 1;
            let mut sum = len as u32 + ((addr >> 8) as u32) + ((addr & 0xFF) as u32);
            for b in data {
                sum += *b as u32;
            }
            let chk = 0xFFu32 ^ (sum & 0xFF);
            let data_hex: String = data.iter().map(|b| format!("{b:02X}")).collect();
            format!("S1{len:02X}{addr:04X}{data_hex}{chk:02X}")
        };
        let text = format!("{}\n{}\n", rec(0x10, &[0x01, 0x02]), rec(0x10, &[0xFF]));
        let img = parse_s19(&text).unwrap();
        assert_eq!(img.base, 0x10);
        assert_eq!(img.bytes, vec![0xFF, 0x02]);
    }
}
