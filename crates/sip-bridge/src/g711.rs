//! G.711 µ-law companding (PCMU).
//!
//! The RTP leg carries 16-bit PCM through the SIP stack; the WebSocket leg
//! carries base64 µ-law. These are the ITU-T G.711 reference conversions:
//! bias 0x84, clip 32635, 8-segment exponent table.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Segment base values for µ-law expansion.
const EXP_LUT: [i16; 8] = [0, 132, 396, 924, 1980, 4092, 8316, 16764];

/// Compress one 16-bit PCM sample to µ-law.
pub fn encode_sample(pcm: i16) -> u8 {
    let sign: u8 = if pcm < 0 { 0x80 } else { 0x00 };
    let mut mag = (pcm as i32).abs();
    if mag > CLIP {
        mag = CLIP;
    }
    mag += BIAS;

    let mut exponent = 7usize;
    let mut mask = 0x4000i32;
    while exponent > 0 && (mag & mask) == 0 {
        mask >>= 1;
        exponent -= 1;
    }
    let mantissa = ((mag >> (exponent + 3)) & 0x0F) as u8;

    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Expand one µ-law byte to 16-bit PCM.
pub fn decode_sample(ulaw: u8) -> i16 {
    let inverted = !ulaw;
    let sign = inverted & 0x80;
    let exponent = ((inverted >> 4) & 0x07) as usize;
    let mantissa = (inverted & 0x0F) as i16;
    let magnitude = EXP_LUT[exponent] + (mantissa << (exponent + 3));
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Compress a PCM16 frame.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

/// Expand a µ-law frame.
pub fn decode(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| decode_sample(b)).collect()
}

/// Expand a µ-law frame straight to little-endian PCM16 bytes, the layout
/// the audio port buffers.
pub fn decode_to_pcm_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for &b in data {
        out.extend_from_slice(&decode_sample(b).to_le_bytes());
    }
    out
}

/// Compress little-endian PCM16 bytes; a trailing odd byte is dropped.
pub fn encode_pcm_bytes(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| encode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn length_invariants_hold() {
        let pcm = vec![0i16; 160];
        let encoded = encode(&pcm);
        assert_eq!(encoded.len(), 160);
        assert_eq!(decode(&encoded).len(), 160);

        let pcm_bytes = vec![0u8; 320];
        assert_eq!(encode_pcm_bytes(&pcm_bytes).len(), 160);
        assert_eq!(decode_to_pcm_bytes(&encoded).len(), 320);
    }

    #[test]
    fn silence_stays_in_the_dead_zone() {
        // Encoded zero is the all-ones byte and decodes back to exactly 0.
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(decode_sample(0xFF), 0);
        let frame = vec![0i16; 160];
        assert!(decode(&encode(&frame)).iter().all(|&s| s == 0));
    }

    #[test]
    fn known_reference_points() {
        // Full-scale positive clips to the top segment.
        assert_eq!(encode_sample(32767), 0x80);
        assert_eq!(encode_sample(-32768), 0x00);
        // Top-segment decode magnitude.
        assert_eq!(decode_sample(0x80), 32124);
        assert_eq!(decode_sample(0x00), -32124);
    }

    #[test]
    fn codec_is_sign_symmetric() {
        for pcm in [1i16, 100, 1000, 10000, 32000] {
            let pos = decode_sample(encode_sample(pcm));
            let neg = decode_sample(encode_sample(-pcm));
            assert_eq!(pos, -neg, "asymmetric at {pcm}");
        }
    }

    #[test]
    fn encoding_is_stable_over_decoded_values() {
        // decode . encode is the identity on every µ-law code except the
        // negative-zero byte, which canonicalizes to positive zero.
        for code in 0u8..=255 {
            let reencoded = encode_sample(decode_sample(code));
            if code == 0x7F {
                assert_eq!(reencoded, 0xFF);
            } else {
                assert_eq!(reencoded, code, "code {code:#04x} not stable");
            }
        }
    }

    proptest! {
        #[test]
        fn roundtrip_error_is_within_segment_quantization(pcm in i16::MIN..=i16::MAX) {
            let decoded = decode_sample(encode_sample(pcm)) as i32;
            let original = (pcm as i32).clamp(-CLIP, CLIP);
            // Quantization step in the top segment is 1024; every lower
            // segment is finer.
            prop_assert!((decoded - original).abs() <= 1024,
                "{pcm} -> {decoded}");
        }

        #[test]
        fn frame_roundtrip_preserves_length(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let encoded = encode(&samples);
            prop_assert_eq!(encoded.len(), samples.len());
            prop_assert_eq!(decode(&encoded).len(), samples.len());
        }
    }
}
