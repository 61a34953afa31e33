//! H.264 bitstream helpers (RFC 6184).
//!
//! ## Annex B NAL extraction
//!
//! Encoders emit Annex B bitstreams where NAL units are delimited by start
//! codes, either 4-byte `00 00 00 01` or 3-byte `00 00 01`.
//! [`extract_nal_units`] handles both and tracks each start code's length
//! for correct boundary calculation.
//!
//! ## Packetization
//!
//! - **Single NAL Unit** (§5.6): a NAL that fits within the payload budget
//!   is sent as-is.
//! - **FU-A Fragmentation** (§5.8): larger NALs are split. Each fragment
//!   carries a 2-byte FU prefix before the NAL payload:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   Fragment data: [...]               (up to max_payload - 2 bytes)
//!   ```
//!
//! ## Parameter sets
//!
//! [`ParameterSets`] keeps the first SPS and PPS seen on the encoder output
//! so DESCRIBE can advertise `sprop-parameter-sets` (§8.1).

use std::sync::OnceLock;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::RtpPayload;

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// Extract NAL units from an H.264 Annex B bitstream.
///
/// Returns the NAL data between start codes, excluding the start codes
/// themselves. Bytes before the first start code are ignored.
///
/// ```
/// use ipcam::media::h264::extract_nal_units;
///
/// let stream = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xCE];
/// let nals = extract_nal_units(&stream);
/// assert_eq!(nals, vec![&[0x67u8, 0x42][..], &[0x68u8, 0xCE][..]]);
/// ```
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nal_units = Vec::with_capacity(start_entries.len());
    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };
        if start < end {
            nal_units.push(&data[start..end]);
        }
    }
    nal_units
}

/// NAL unit type (lower 5 bits of the NAL header).
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Split one NAL unit into RTP payloads.
///
/// A NAL of at most `max_payload` bytes becomes a single payload with the
/// marker set. Anything larger is FU-A fragmented; only the final fragment
/// carries the End bit and the marker.
pub fn packetize(nal: &[u8], max_payload: usize) -> Vec<RtpPayload> {
    let Some(&nal_header) = nal.first() else {
        return Vec::new();
    };

    if nal.len() <= max_payload {
        return vec![RtpPayload {
            data: nal.to_vec(),
            marker: true,
        }];
    }

    let fu_indicator = (nal_header & 0xE0) | NAL_TYPE_FU_A;
    let nal_kind = nal_header & 0x1F;
    let body = &nal[1..];
    let chunk_size = max_payload.saturating_sub(2).max(1);
    let count = body.len().div_ceil(chunk_size);

    let fragments: Vec<RtpPayload> = body
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            let first = i == 0;
            let last = i + 1 == count;
            let mut fu_header = nal_kind;
            if first {
                fu_header |= FU_START;
            }
            if last {
                fu_header |= FU_END;
            }
            let mut data = Vec::with_capacity(2 + chunk.len());
            data.push(fu_indicator);
            data.push(fu_header);
            data.extend_from_slice(chunk);
            RtpPayload { data, marker: last }
        })
        .collect();

    tracing::trace!(
        nal_type = nal_kind,
        nal_size = nal.len(),
        fragments = fragments.len(),
        "FU-A fragmented NAL unit"
    );
    fragments
}

/// Packetize a whole access unit. The marker bit ends up only on the last
/// packet of the frame (RFC 6184 §5.1).
pub fn packetize_access_unit(frame: &[u8], max_payload: usize) -> Vec<RtpPayload> {
    let mut payloads: Vec<RtpPayload> = extract_nal_units(frame)
        .into_iter()
        .flat_map(|nal| packetize(nal, max_payload))
        .collect();

    let last = payloads.len().saturating_sub(1);
    for (i, payload) in payloads.iter_mut().enumerate() {
        payload.marker = i == last;
    }
    payloads
}

#[derive(Debug)]
struct ParameterSet {
    raw: Vec<u8>,
    base64: String,
}

impl ParameterSet {
    fn new(nal: &[u8]) -> Self {
        Self {
            raw: nal.to_vec(),
            base64: BASE64_STANDARD.encode(nal),
        }
    }
}

/// Set-once SPS/PPS cache, owned by the server for its whole lifetime.
///
/// The first SPS and the first PPS found on the encoder output are kept;
/// later ones never overwrite them. Once both are present,
/// [`extract_sps_pps`](Self::extract_sps_pps) is a no-op.
#[derive(Debug, Default)]
pub struct ParameterSets {
    sps: OnceLock<ParameterSet>,
    pps: OnceLock<ParameterSet>,
}

impl ParameterSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan an Annex B bitstream and cache any SPS/PPS not seen yet.
    /// Returns `true` once both are cached.
    pub fn extract_sps_pps(&self, bitstream: &[u8]) -> bool {
        if self.is_complete() {
            return true;
        }
        for nal in extract_nal_units(bitstream) {
            let slot = match nal_type(nal) {
                Some(NAL_TYPE_SPS) => &self.sps,
                Some(NAL_TYPE_PPS) => &self.pps,
                _ => continue,
            };
            if slot.get().is_none() && slot.set(ParameterSet::new(nal)).is_ok() {
                tracing::debug!(
                    nal_type = nal[0] & 0x1F,
                    bytes = nal.len(),
                    "H.264 parameter set cached"
                );
            }
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.sps.get().is_some() && self.pps.get().is_some()
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.get().map(|p| p.raw.as_slice())
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.get().map(|p| p.raw.as_slice())
    }

    /// `<SPS-b64>,<PPS-b64>` for the SDP fmtp line, once both are known.
    pub fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.get()?;
        let pps = self.pps.get()?;
        Some(format!("{},{}", sps.base64, pps.base64))
    }

    /// profile_idc, constraint flags and level_idc from SPS bytes 1..4
    /// (RFC 6184 §8.1).
    pub fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps()?;
        let bytes = sps.get(1..4)?;
        Some(format!("{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 6] = [0x67, 0x4D, 0x40, 0x1F, 0xDA, 0x01];
    const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];

    fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        assert_eq!(extract_nal_units(&data), vec![&[0x67u8, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[1], &[0x68u8, 0xCE][..]);
        assert_eq!(nals[2], &[0x65u8, 0x88][..]);
    }

    #[test]
    fn extract_without_start_code() {
        assert!(extract_nal_units(&[]).is_empty());
        assert!(extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    // --- Packetization ---

    #[test]
    fn small_nal_single_packet_with_marker() {
        let nal = [0x65u8, 0xAA, 0xBB, 0xCC];
        let payloads = packetize(&nal, 1400);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data, nal);
        assert!(payloads[0].marker);
    }

    #[test]
    fn nal_exactly_at_budget_is_not_fragmented() {
        let nal = vec![0x41u8; 1400];
        assert_eq!(packetize(&nal, 1400).len(), 1);
        assert_eq!(packetize(&[0x41u8; 1401], 1400).len(), 2);
    }

    #[test]
    fn empty_nal_no_packets() {
        assert!(packetize(&[], 1400).is_empty());
    }

    #[test]
    fn fu_a_fragments_reassemble_to_original() {
        let mut nal = vec![0x65u8];
        nal.extend((0..4000u32).map(|i| (i % 251) as u8));
        let payloads = packetize(&nal, 1400);
        assert_eq!(payloads.len(), 3);

        let starts = payloads.iter().filter(|p| p.data[1] & FU_START != 0).count();
        let ends = payloads.iter().filter(|p| p.data[1] & FU_END != 0).count();
        assert_eq!((starts, ends), (1, 1));
        assert_ne!(payloads[0].data[1] & FU_START, 0);
        assert_ne!(payloads[2].data[1] & FU_END, 0);

        for p in &payloads {
            assert!(p.data.len() <= 1400);
            assert_eq!(p.data[0] & 0x1F, NAL_TYPE_FU_A);
            assert_eq!(p.data[0] & 0xE0, 0x65 & 0xE0);
            assert_eq!(p.data[1] & 0x1F, 5);
            assert_eq!(p.data[1] & 0x20, 0, "reserved bit stays clear");
        }
        let markers: Vec<bool> = payloads.iter().map(|p| p.marker).collect();
        assert_eq!(markers, vec![false, false, true]);

        let mut rebuilt = vec![(payloads[0].data[0] & 0xE0) | (payloads[0].data[1] & 0x1F)];
        for p in &payloads {
            rebuilt.extend_from_slice(&p.data[2..]);
        }
        assert_eq!(rebuilt, nal);
    }

    #[test]
    fn two_fragments_have_distinct_start_and_end() {
        let nal = vec![0x41u8; 1500];
        let payloads = packetize(&nal, 1400);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].data[1] & (FU_START | FU_END), FU_START);
        assert_eq!(payloads[1].data[1] & (FU_START | FU_END), FU_END);
    }

    #[test]
    fn access_unit_marker_only_on_last_packet() {
        let idr = vec![0x65u8; 3000];
        let frame = annex_b(&[&SPS[..], &PPS[..], idr.as_slice()]);
        let payloads = packetize_access_unit(&frame, 1400);
        assert_eq!(payloads.len(), 1 + 1 + 3);
        let markers: Vec<bool> = payloads.iter().map(|p| p.marker).collect();
        assert_eq!(markers, vec![false, false, false, false, true]);
    }

    // --- Parameter set cache ---

    #[test]
    fn caches_sps_pps_from_keyframe() {
        let cache = ParameterSets::new();
        assert!(!cache.extract_sps_pps(&annex_b(&[&[0x41u8, 0x9A][..]])));
        assert!(cache.sprop_parameter_sets().is_none());

        assert!(cache.extract_sps_pps(&annex_b(&[&SPS[..], &PPS[..], &[0x65u8, 0x88][..]])));
        assert_eq!(cache.profile_level_id().as_deref(), Some("4d401f"));

        let sprop = cache.sprop_parameter_sets().unwrap();
        let (sps_b64, pps_b64) = sprop.split_once(',').unwrap();
        assert_eq!(BASE64_STANDARD.decode(sps_b64).unwrap(), SPS);
        assert_eq!(BASE64_STANDARD.decode(pps_b64).unwrap(), PPS);
    }

    #[test]
    fn first_sps_is_never_overwritten() {
        let cache = ParameterSets::new();
        cache.extract_sps_pps(&annex_b(&[&SPS[..]]));
        let other_sps = [0x67u8, 0x42, 0x00, 0x1E];
        cache.extract_sps_pps(&annex_b(&[&other_sps[..], &PPS[..]]));
        assert_eq!(cache.sps(), Some(&SPS[..]));
        assert_eq!(cache.pps(), Some(&PPS[..]));
    }

    #[test]
    fn short_sps_has_no_profile() {
        let cache = ParameterSets::new();
        cache.extract_sps_pps(&annex_b(&[&[0x67u8, 0x42][..]]));
        assert!(cache.profile_level_id().is_none());
    }
}
