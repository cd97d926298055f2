//! StreamVByte: groups of four u32s behind one control byte, two bits
//! per value giving the 1..4-byte little-endian length. The control
//! byte doubles as an index into a shuffle table so a single `pshufb`
//! scatters a whole group into 32-bit lanes.

use crate::Error;

#[cfg(target_arch = "x86_64")]
use once_cell::sync::Lazy;

/// Max encoded bytes for one group: control + 4 * 4 data bytes.
pub const MAX_GROUP_BYTES: usize = 17;

/// Bytes needed for one value, clamped to 1..=4.
#[inline]
pub fn encoded_size(value: u32) -> usize {
    if value < 1 << 8 {
        1
    } else if value < 1 << 16 {
        2
    } else if value < 1 << 24 {
        3
    } else {
        4
    }
}

#[inline]
fn length(control: u8, index: usize) -> usize {
    ((control as usize >> (index * 2)) & 0x3) + 1
}

/// Shuffle masks and summed data lengths, both indexed by control byte.
/// Built at compile time; `build_shuffle_mask` below is the reference
/// generator kept for the equivalence test.
const SHUFFLE_MASKS: [[u8; 16]; 256] = build_shuffle_masks();
const DATA_LENGTHS: [u8; 256] = build_data_lengths();

const fn build_shuffle_mask(control: u8) -> [u8; 16] {
    let mut mask = [0xffu8; 16];
    let mut offset = 0usize;
    let mut lane = 0usize;
    while lane < 4 {
        let len = ((control as usize >> (lane * 2)) & 0x3) + 1;
        let mut byte = 0usize;
        while byte < 4 {
            if byte < len {
                mask[lane * 4 + byte] = (offset + byte) as u8;
            }
            byte += 1;
        }
        offset += len;
        lane += 1;
    }
    mask
}

const fn build_shuffle_masks() -> [[u8; 16]; 256] {
    let mut table = [[0u8; 16]; 256];
    let mut control = 0usize;
    while control < 256 {
        table[control] = build_shuffle_mask(control as u8);
        control += 1;
    }
    table
}

const fn build_data_lengths() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut control = 0usize;
    while control < 256 {
        table[control] = (((control >> 0) & 3) + ((control >> 2) & 3) + ((control >> 4) & 3)
            + ((control >> 6) & 3)
            + 4) as u8;
        control += 1;
    }
    table
}

/// Data bytes following the control byte for a full group of 4.
#[inline]
pub fn group_data_len(control: u8) -> usize {
    DATA_LENGTHS[control as usize] as usize
}

/// Encode up to four values; the control byte pads unused slots with
/// length 1 but no data bytes are emitted for them. Returns bytes written.
pub fn encode(values: &[u32], out: &mut [u8]) -> Result<usize, Error> {
    if values.is_empty() || values.len() > 4 {
        return Err(Error::InvalidArgument(format!(
            "stream-vbyte group of {} values",
            values.len()
        )));
    }
    if out.len() < MAX_GROUP_BYTES {
        return Err(Error::InvalidArgument(
            "stream-vbyte output buffer under 17 bytes".to_string(),
        ));
    }
    let mut control = 0u8;
    let mut pos = 1usize;
    for (i, v) in values.iter().enumerate() {
        let len = encoded_size(*v);
        control |= ((len - 1) as u8) << (i * 2);
        let bytes = v.to_le_bytes();
        out[pos..pos + len].copy_from_slice(&bytes[..len]);
        pos += len;
    }
    out[0] = control;
    Ok(pos)
}

#[cfg(target_arch = "x86_64")]
static HAS_SSSE3: Lazy<bool> = Lazy::new(|| is_x86_feature_detected!("ssse3"));

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn decode4_ssse3(input: &[u8], out: &mut [u32]) -> usize {
    use std::arch::x86_64::*;
    let control = input[0];
    let mask = SHUFFLE_MASKS[control as usize];
    let data = _mm_loadu_si128(input.as_ptr().add(1) as *const __m128i);
    let shuf = _mm_loadu_si128(mask.as_ptr() as *const __m128i);
    let lanes = _mm_shuffle_epi8(data, shuf);
    _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, lanes);
    1 + group_data_len(control)
}

fn decode4_scalar(input: &[u8], out: &mut [u32]) -> Result<usize, Error> {
    let control = input[0];
    let mut pos = 1usize;
    for lane in 0..4 {
        let len = length(control, lane);
        if pos + len > input.len() {
            return Err(Error::Corruption(
                "stream-vbyte data overruns input".to_string(),
            ));
        }
        let mut v = 0u32;
        for (shift, byte) in input[pos..pos + len].iter().enumerate() {
            v |= (*byte as u32) << (shift * 8);
        }
        out[lane] = v;
        pos += len;
    }
    Ok(pos)
}

/// Decode one full group of four. Returns bytes consumed.
///
/// The SIMD path loads a 16-byte window past the control byte, so the
/// caller must hand in at least [`MAX_GROUP_BYTES`] when possible;
/// shorter inputs decode through the scalar path.
pub fn decode4(input: &[u8], out: &mut [u32]) -> Result<usize, Error> {
    if input.is_empty() || out.len() < 4 {
        return Err(Error::Corruption("stream-vbyte group truncated".to_string()));
    }
    #[cfg(target_arch = "x86_64")]
    {
        if input.len() >= MAX_GROUP_BYTES && *HAS_SSSE3 {
            let consumed = unsafe { decode4_ssse3(input, out) };
            if consumed > input.len() {
                return Err(Error::Corruption(
                    "stream-vbyte data overruns input".to_string(),
                ));
            }
            return Ok(consumed);
        }
    }
    decode4_scalar(input, out)
}

/// Decode two adjacent groups (eight values) in one call; hosts with a
/// 16-byte shuffle run the two groups back to back.
pub fn decode8(input: &[u8], out: &mut [u32]) -> Result<usize, Error> {
    if out.len() < 8 {
        return Err(Error::Corruption("stream-vbyte decode8 needs 8 lanes".to_string()));
    }
    let first = decode4(input, &mut out[..4])?;
    let second = decode4(&input[first..], &mut out[4..8])?;
    Ok(first + second)
}

/// Decode `count` values where `count % 4 == 0`.
pub fn decode_bulk(input: &[u8], count: usize, out: &mut [u32]) -> Result<usize, Error> {
    if count % 4 != 0 {
        return Err(Error::InvalidArgument(format!(
            "bulk decode of {} values (need a multiple of 4)",
            count
        )));
    }
    if out.len() < count {
        return Err(Error::InvalidArgument(
            "bulk decode output too small".to_string(),
        ));
    }
    let mut consumed = 0usize;
    for group in 0..count / 4 {
        consumed += decode4(&input[consumed..], &mut out[group * 4..group * 4 + 4])?;
    }
    Ok(consumed)
}

/// Decode `count` values; a trailing 1..3 partial group is decoded
/// scalar from its padded control byte.
pub fn decode(input: &[u8], count: usize, out: &mut [u32]) -> Result<usize, Error> {
    if out.len() < count {
        return Err(Error::InvalidArgument("decode output too small".to_string()));
    }
    let full = count / 4 * 4;
    let mut consumed = decode_bulk(input, full, out)?;
    let tail = count - full;
    if tail > 0 {
        let input = &input[consumed..];
        if input.is_empty() {
            return Err(Error::Corruption("stream-vbyte tail truncated".to_string()));
        }
        let control = input[0];
        let mut pos = 1usize;
        for lane in 0..tail {
            let len = length(control, lane);
            if pos + len > input.len() {
                return Err(Error::Corruption(
                    "stream-vbyte tail overruns input".to_string(),
                ));
            }
            let mut v = 0u32;
            for (shift, byte) in input[pos..pos + len].iter().enumerate() {
                v |= (*byte as u32) << (shift * 8);
            }
            out[full + lane] = v;
            pos += len;
        }
        consumed += pos;
    }
    Ok(consumed)
}

/// Runtime mask generator: correctness-equivalent to the const table,
/// kept only as the oracle for the equivalence test.
#[cfg(test)]
fn build_shuffle_mask_runtime(control: u8) -> [u8; 16] {
    let mut mask = [0xffu8; 16];
    let mut offset = 0usize;
    for lane in 0..4 {
        let len = length(control, lane);
        for byte in 0..len {
            mask[lane * 4 + byte] = (offset + byte) as u8;
        }
        offset += len;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[u32]) {
        let mut buf = [0u8; MAX_GROUP_BYTES];
        let written = encode(values, &mut buf).unwrap();
        let mut out = [0u32; 4];
        let consumed = decode(&buf[..written], values.len(), &mut out).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(&out[..values.len()], values);
    }

    #[test]
    fn encoded_sizes() {
        assert_eq!(1, encoded_size(0));
        assert_eq!(1, encoded_size(255));
        assert_eq!(2, encoded_size(256));
        assert_eq!(2, encoded_size(65535));
        assert_eq!(3, encoded_size(65536));
        assert_eq!(4, encoded_size(u32::max_value()));
    }

    #[test]
    fn group_round_trips() {
        round_trip(&[0, 0, 0, 0]);
        round_trip(&[1, 300, 70_000, 20_000_000]);
        round_trip(&[u32::max_value(); 4]);
        round_trip(&[5]);
        round_trip(&[5, 6]);
        round_trip(&[256, 65536, 7]);
    }

    #[test]
    fn mixed_widths_exercise_every_control_lane() {
        let widths = [0u32, 200, 60_000, 1 << 20, u32::max_value()];
        for a in widths.iter() {
            for b in widths.iter() {
                for c in widths.iter() {
                    for d in widths.iter() {
                        round_trip(&[*a, *b, *c, *d]);
                    }
                }
            }
        }
    }

    #[test]
    fn bulk_round_trip() {
        let values: Vec<u32> = (0..1024u32).map(|i| i.wrapping_mul(2654435761)).collect();
        let mut encoded = Vec::new();
        let mut group = [0u8; MAX_GROUP_BYTES];
        for chunk in values.chunks(4) {
            let n = encode(chunk, &mut group).unwrap();
            encoded.extend_from_slice(&group[..n]);
        }
        let mut out = vec![0u32; values.len()];
        let consumed = decode_bulk(&encoded, values.len(), &mut out).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(out, values);

        assert!(decode_bulk(&encoded, 6, &mut out).is_err());
    }

    #[test]
    fn decode_handles_tail() {
        let values: Vec<u32> = (0..7u32).map(|i| i * 1000).collect();
        let mut encoded = Vec::new();
        let mut group = [0u8; MAX_GROUP_BYTES];
        for chunk in values.chunks(4) {
            let n = encode(chunk, &mut group).unwrap();
            encoded.extend_from_slice(&group[..n]);
        }
        let mut out = vec![0u32; 7];
        let consumed = decode(&encoded, 7, &mut out).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(out, values);
    }

    #[test]
    fn decode8_matches_two_groups() {
        let values: Vec<u32> = vec![9, 900, 90_000, 9_000_000, 1, 2, 3, 4_000_000_000];
        let mut encoded = Vec::new();
        let mut group = [0u8; MAX_GROUP_BYTES];
        for chunk in values.chunks(4) {
            let n = encode(chunk, &mut group).unwrap();
            encoded.extend_from_slice(&group[..n]);
        }
        let mut out = [0u32; 8];
        let consumed = decode8(&encoded, &mut out).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(&out[..], &values[..]);
    }

    #[test]
    fn truncated_group_is_corruption() {
        let mut buf = [0u8; MAX_GROUP_BYTES];
        let written = encode(&[u32::max_value(); 4], &mut buf).unwrap();
        let mut out = [0u32; 4];
        assert!(matches!(
            decode4(&buf[..written - 1], &mut out),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn const_table_matches_runtime_generator() {
        for control in 0..=255u8 {
            assert_eq!(
                SHUFFLE_MASKS[control as usize],
                build_shuffle_mask_runtime(control),
                "mask mismatch for control {:#04x}",
                control
            );
            let expected: usize = (0..4).map(|i| length(control, i)).sum();
            assert_eq!(group_data_len(control), expected);
        }
    }

    #[test]
    fn matches_reference_encoder_for_full_groups() {
        // byte compatibility with the stream-vbyte crate for whole groups
        let values: Vec<u32> = (0..64u32).map(|i| i.wrapping_mul(2654435761) >> (i % 13)).collect();
        let mut reference = vec![0u8; values.len() * 5];
        let used = stream_vbyte::encode::<stream_vbyte::Scalar>(&values, &mut reference);
        reference.truncate(used);

        let mut ours = Vec::new();
        let mut group = [0u8; MAX_GROUP_BYTES];
        for chunk in values.chunks(4) {
            let n = encode(chunk, &mut group).unwrap();
            ours.extend_from_slice(&group[..n]);
        }
        assert_eq!(ours, reference);
    }
}
