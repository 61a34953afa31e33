//! MPEG-4 AAC over RTP, AAC-hbr mode (RFC 3640 §3.3.6).
//!
//! Every RTP payload carries one access unit prefixed by an AU-headers
//! section: a 16-bit AU-headers-length (in bits) followed by one 16-bit AU
//! header holding the 13-bit AU size and a 3-bit AU index of zero.

/// MPEG-4 sampling frequency table (ISO/IEC 14496-3 §1.6.3.4).
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AAC_LC_OBJECT_TYPE: u16 = 2;
const ADTS_HEADER_LEN: usize = 7;
const ADTS_CRC_LEN: usize = 2;

/// Index of `sample_rate` in the MPEG-4 sampling frequency table.
pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == sample_rate)
        .map(|i| i as u8)
}

/// AudioSpecificConfig for AAC-LC as the hex string used in the SDP
/// `config=` fmtp parameter.
///
/// ```
/// use ipcam::media::aac::audio_specific_config;
///
/// assert_eq!(audio_specific_config(44100, 2).as_deref(), Some("1210"));
/// assert_eq!(audio_specific_config(16000, 1).as_deref(), Some("1408"));
/// ```
pub fn audio_specific_config(sample_rate: u32, channels: u8) -> Option<String> {
    let index = u16::from(sampling_frequency_index(sample_rate)?);
    let config = (AAC_LC_OBJECT_TYPE << 11) | (index << 7) | (u16::from(channels & 0x0F) << 3);
    Some(format!("{config:04x}"))
}

/// Strip an ADTS header if the encoder emitted one; raw AUs pass through.
pub fn strip_adts(frame: &[u8]) -> &[u8] {
    let is_adts = frame.len() >= ADTS_HEADER_LEN && frame[0] == 0xFF && frame[1] & 0xF0 == 0xF0;
    if !is_adts {
        return frame;
    }
    let protection_absent = frame[1] & 0x01 == 1;
    let header_len = if protection_absent {
        ADTS_HEADER_LEN
    } else {
        ADTS_HEADER_LEN + ADTS_CRC_LEN
    };
    frame.get(header_len..).unwrap_or_default()
}

/// Prefix one raw access unit with its AU-headers section.
pub fn au_payload(access_unit: &[u8]) -> Vec<u8> {
    let au_size = (access_unit.len() as u16) & 0x1FFF;
    let mut payload = Vec::with_capacity(4 + access_unit.len());
    payload.extend_from_slice(&16u16.to_be_bytes());
    payload.extend_from_slice(&(au_size << 3).to_be_bytes());
    payload.extend_from_slice(access_unit);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_index_lookup() {
        assert_eq!(sampling_frequency_index(48000), Some(3));
        assert_eq!(sampling_frequency_index(8000), Some(11));
        assert_eq!(sampling_frequency_index(12345), None);
        assert!(audio_specific_config(12345, 1).is_none());
    }

    #[test]
    fn strips_adts_without_crc() {
        let mut frame = vec![0xFFu8, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC];
        frame.extend_from_slice(&[0x21, 0x10, 0x04]);
        assert_eq!(strip_adts(&frame), &[0x21u8, 0x10, 0x04][..]);
    }

    #[test]
    fn strips_adts_with_crc() {
        let mut frame = vec![0xFFu8, 0xF0, 0x50, 0x80, 0x02, 0x1F, 0xFC, 0xAB, 0xCD];
        frame.push(0x21);
        assert_eq!(strip_adts(&frame), &[0x21u8][..]);
    }

    #[test]
    fn raw_access_unit_passes_through() {
        let raw = [0x21u8, 0x10, 0x04, 0x60];
        assert_eq!(strip_adts(&raw), &raw);
    }

    #[test]
    fn au_header_encodes_size() {
        let au = vec![0xAAu8; 300];
        let payload = au_payload(&au);
        assert_eq!(&payload[..2], &[0x00u8, 0x10][..]);
        let header = u16::from_be_bytes([payload[2], payload[3]]);
        assert_eq!(header >> 3, 300);
        assert_eq!(header & 0x07, 0);
        assert_eq!(&payload[4..], au.as_slice());
    }
}
