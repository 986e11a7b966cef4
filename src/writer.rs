//! Append-only FIT byte buffer
//!
//! [`FitWriter`] owns the bytes of a single FIT file while it is being built.
//! It reserves the 14-byte file header up front, accepts record bytes in
//! sequence, and on [`FitWriter::finish`] patches the header's data size,
//! computes both CRCs, and hands back the completed buffer.
//!
//! `finish` consumes the writer, so a finalized buffer can't be appended to or
//! finalized a second time.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

/// The version of the Garmin SDK from which we obtain our profile information.
///
/// Represented in base 10 as two digits for the major version, followed by
/// three for the minor.
pub const PROFILE_VERSION: u16 = 21158;

/// Size of the file header, including its own CRC.
pub const HEADER_SIZE: usize = 14;

/// Size of the CRC trailing the data records.
pub const CRC_SIZE: usize = 2;

#[repr(u8)]
#[derive(Clone, Copy, Debug)]
enum ProtocolVersion {
    V10 = 0x10,
}

/// Implements the Garmin FIT CRC algorithm.
///
/// A direct transcription of Garmin's reference implementation at
/// <https://developer.garmin.com/fit/protocol/>
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc {
    sum: u16,
}

static CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800, 0xB401,
    0x5000, 0x9C01, 0x8801, 0x4400,
];

impl Crc {
    pub fn new() -> Self {
        // Garmin's docs don't say so explicitly, but the starting value is zero.
        Self { sum: 0 }
    }

    pub fn add_byte(&mut self, byte: u8) {
        // Checksum lower four bits
        let mut tmp = CRC_TABLE[(self.sum & 0x0F) as usize];
        self.sum = (self.sum >> 4) & 0x0FFF;
        self.sum = self.sum ^ tmp ^ CRC_TABLE[(byte & 0x0F) as usize];

        // Checksum upper four bits
        tmp = CRC_TABLE[(self.sum & 0x0F) as usize];
        self.sum = (self.sum >> 4) & 0x0FFF;
        self.sum = self.sum ^ tmp ^ CRC_TABLE[(byte >> 4) as usize];
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.add_byte(*byte);
        }
    }

    pub fn sum(&self) -> u16 {
        self.sum
    }
}

/// Computes the FIT CRC-16 of a byte slice.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc::new();
    crc.add_bytes(bytes);
    crc.sum()
}

/// Packs a string into a fixed-width FIT string field.
///
/// The result is always exactly `field_size` bytes: the UTF-8 encoding of `s`,
/// truncated at a character boundary to at most `field_size - 1` bytes, then a
/// NUL terminator and zero padding. A `field_size` of zero yields an empty
/// vector.
pub fn fixed_string(s: &str, field_size: usize) -> Vec<u8> {
    let mut field = vec![0u8; field_size];
    if field_size == 0 {
        return field;
    }
    let st = truncate_to_char_boundary(s, field_size - 1);
    field[..st.len()].copy_from_slice(st.as_bytes());
    field
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A single-use buffer for one FIT file.
pub struct FitWriter {
    buf: Vec<u8>,
}

#[allow(clippy::new_without_default)]
impl FitWriter {
    /// Creates a writer whose buffer starts with a placeholder file header.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(HEADER_SIZE as u8);
        buf.push(ProtocolVersion::V10 as u8);
        buf.extend_from_slice(&[0u8; 2]);
        LittleEndian::write_u16(&mut buf[2..4], PROFILE_VERSION);
        // Data size, patched by finish()
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(b".FIT");
        // Header CRC, patched by finish()
        buf.extend_from_slice(&[0u8; 2]);
        debug_assert_eq!(buf.len(), HEADER_SIZE);
        Self { buf }
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    /// Writes `value` as a fixed-width string field of exactly `field_size`
    /// bytes. See [`fixed_string`].
    pub fn write_fixed_string(&mut self, value: &str, field_size: usize) {
        self.buf.extend_from_slice(&fixed_string(value, field_size));
    }

    /// Number of bytes written so far, including the file header.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Number of record bytes written after the file header.
    pub fn data_size(&self) -> usize {
        self.buf.len() - HEADER_SIZE
    }

    /// Finalize the file and return its bytes.
    ///
    /// Patches the header's data size, computes the header CRC over bytes
    /// 0–11, then appends the file CRC computed over everything before it.
    ///
    /// # Panics
    ///
    /// If the data records exceed the 4 GiB addressable by the header's data
    /// size field.
    pub fn finish(mut self) -> Vec<u8> {
        let data_size = match u32::try_from(self.data_size()) {
            Ok(n) => n,
            Err(_) => panic!(
                "FIT data size {} does not fit in the file header",
                self.data_size()
            ),
        };
        LittleEndian::write_u32(&mut self.buf[4..8], data_size);
        let header_crc = crc16(&self.buf[..12]);
        LittleEndian::write_u16(&mut self.buf[12..HEADER_SIZE], header_crc);

        let file_crc = crc16(&self.buf);
        let mut b = [0u8; CRC_SIZE];
        LittleEndian::write_u16(&mut b, file_crc);
        self.buf.extend_from_slice(&b);
        debug!(
            "Finished FIT file: {} data bytes, header CRC {:#06x}, file CRC {:#06x}",
            data_size, header_crc, file_crc
        );
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};
    use quickcheck_macros::quickcheck;

    use super::{CRC_SIZE, Crc, FitWriter, HEADER_SIZE, PROFILE_VERSION, crc16, fixed_string};

    #[test]
    fn test_header_crc() {
        let mut crc = Crc::new();
        // A header from a FIT file exported from Garmin Connect, minus its CRC bytes.
        crc.add_bytes(&[
            0x0e, 0x10, 0xb2, 0x52, 0x88, 0x42, 0x00, 0x00, 0x2e, 0x46, 0x49, 0x54,
        ]);
        // The CRC value from the last two bytes of the header, interpreted as little
        // endian.
        assert_eq!(crc.sum(), 0xf94b);
    }

    #[test]
    fn test_crc_appended_checks_to_zero() {
        // Running the CRC over data followed by its own little-endian CRC
        // yields zero, which is how FIT readers validate files.
        let data = b"interval workout";
        let mut bytes = data.to_vec();
        let sum = crc16(data);
        bytes.extend_from_slice(&sum.to_le_bytes());
        assert_eq!(crc16(&bytes), 0);
    }

    #[test]
    fn test_empty_file_layout() {
        let bytes = FitWriter::new().finish();
        assert_eq!(bytes.len(), HEADER_SIZE + CRC_SIZE);
        assert_eq!(bytes[0], 14);
        assert_eq!(bytes[1], 0x10);
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), PROFILE_VERSION);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 0);
        assert_eq!(&bytes[8..12], b".FIT");
        assert_eq!(LittleEndian::read_u16(&bytes[12..14]), crc16(&bytes[..12]));
        assert_eq!(LittleEndian::read_u16(&bytes[14..16]), crc16(&bytes[..14]));
    }

    #[test]
    fn test_little_endian_writes() {
        let mut w = FitWriter::new();
        w.write_u16_le(0x1234);
        w.write_u32_le(0xdeadbeef);
        w.write_byte(0x7f);
        w.write_bytes(&[1, 2]);
        assert_eq!(w.position(), HEADER_SIZE + 9);
        assert_eq!(w.data_size(), 9);

        let bytes = w.finish();
        assert_eq!(
            &bytes[HEADER_SIZE..HEADER_SIZE + 9],
            &[0x34, 0x12, 0xef, 0xbe, 0xad, 0xde, 0x7f, 1, 2]
        );
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 9);
    }

    #[test]
    fn test_fixed_string_padding() {
        let field = fixed_string("Tempo Run", 64);
        assert_eq!(field.len(), 64);
        assert_eq!(&field[..9], b"Tempo Run");
        assert!(field[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_fixed_string_truncation() {
        let field = fixed_string("Progression", 8);
        assert_eq!(field, b"Progres\0");

        // "ô" is two bytes in UTF-8 and must not be split.
        let field = fixed_string("Côte", 3);
        assert_eq!(field, b"C\0\0");

        assert_eq!(fixed_string("", 4), vec![0u8; 4]);
        assert_eq!(fixed_string("abc", 0), Vec::<u8>::new());
    }

    #[quickcheck]
    fn qc_fixed_string_width(s: String, width: u8) -> bool {
        let width = width as usize;
        let field = fixed_string(&s, width);
        field.len() == width && (width == 0 || field[width - 1] == 0)
    }

    #[quickcheck]
    fn qc_finished_buffer_invariants(payload: Vec<u8>) -> bool {
        let mut w = FitWriter::new();
        w.write_bytes(&payload);
        let bytes = w.finish();
        let n = bytes.len();
        LittleEndian::read_u32(&bytes[4..8]) as usize == n - HEADER_SIZE - CRC_SIZE
            && LittleEndian::read_u16(&bytes[12..14]) == crc16(&bytes[..12])
            && LittleEndian::read_u16(&bytes[n - 2..]) == crc16(&bytes[..n - 2])
    }
}
