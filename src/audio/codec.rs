// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! ITU-T G.711 mu-law codec, linear resampling, and WAV containers.
//!
//! The phone line speaks 8kHz 8-bit mu-law (PCMU); the speech providers
//! speak 16-bit linear PCM at their own rates. Everything that crosses that
//! boundary goes through this module: mu-law <-> PCM16 conversion, linear
//! resampling between provider rates, and the 44-byte WAV container the
//! batch transcription endpoint expects.

/// Telephone-line sample rate in Hz.
pub const MULAW_SAMPLE_RATE: u32 = 8000;
/// Bias added before mu-law compression (ITU-T G.711).
const MULAW_BIAS: i32 = 0x84; // 132
/// Maximum linear magnitude before clipping.
const MULAW_CLIP: i32 = 32635;
/// The mu-law byte a silent (zero) sample encodes to. Frame classification
/// measures how far a frame's bytes stray from this value.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Encode a single 16-bit linear PCM sample to mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: i32 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 {
        -(sample as i32)
    } else {
        sample as i32
    };

    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    // Locate the segment (exponent) of the companding curve.
    let mut exponent: i32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    let mulaw_byte = sign | (exponent << 4) | mantissa;
    !(mulaw_byte as u8)
}

/// Decode a single mu-law byte to a 16-bit linear PCM sample.
pub fn mulaw_to_linear(mulaw_byte: u8) -> i16 {
    let complement = !mulaw_byte as i32;
    let sign = complement & 0x80;
    let exponent = (complement >> 4) & 0x07;
    let mantissa = complement & 0x0F;

    let mut magnitude = ((mantissa << 1) | 0x21) << (exponent + 2);
    magnitude -= MULAW_BIAS;

    if sign == 0x80 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Decode a buffer of mu-law bytes to little-endian PCM16 bytes.
pub fn mulaw_to_pcm(mulaw_data: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw_data.len().saturating_mul(2));
    for &byte in mulaw_data {
        let sample = mulaw_to_linear(byte);
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}

/// Encode little-endian PCM16 bytes to mu-law bytes.
///
/// An odd trailing byte is ignored.
pub fn pcm_to_mulaw(pcm_data: &[u8]) -> Vec<u8> {
    if pcm_data.len() % 2 != 0 {
        tracing::warn!(
            len = pcm_data.len(),
            "pcm_to_mulaw: odd-length input, trailing byte ignored"
        );
    }
    let mut mulaw = Vec::with_capacity(pcm_data.len() / 2);
    for chunk in pcm_data.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        mulaw.push(linear_to_mulaw(sample));
    }
    mulaw
}

/// Resample little-endian PCM16 bytes between rates by linear interpolation.
///
/// Telephone audio tops out at 4kHz of real bandwidth, so interpolation is
/// plenty for the 8k <-> provider-rate hops. Returns the input unchanged
/// when the rates match or the buffer is too short to interpolate.
pub fn resample_linear(pcm_data: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate || pcm_data.len() < 2 {
        return pcm_data.to_vec();
    }

    let input_samples: Vec<i16> = pcm_data
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    let input_len = input_samples.len();
    if input_len == 0 {
        return Vec::new();
    }
    if input_len == 1 {
        return pcm_data.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = ((input_len as f64) / ratio).ceil() as usize;

    let mut output = Vec::with_capacity(output_len.saturating_mul(2));
    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = src_pos - src_idx as f64;

        let sample = if src_idx + 1 < input_len {
            let s0 = input_samples[src_idx] as f64;
            let s1 = input_samples[src_idx + 1] as f64;
            (s0 + frac * (s1 - s0)) as i16
        } else {
            input_samples[input_len - 1]
        };

        output.extend_from_slice(&sample.to_le_bytes());
    }

    output
}

/// Standard WAV header size (44 bytes).
pub const WAV_HEADER_SIZE: usize = 44;

/// Wrap raw PCM16 bytes in a WAV container for the batch STT endpoint.
pub fn encode_pcm_to_wav(pcm: &[u8], sample_rate: u32, num_channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * u32::from(num_channels) * u32::from(bits_per_sample) / 8;
    let block_align = num_channels * bits_per_sample / 8;
    let data_size = pcm.len().min(u32::MAX as usize) as u32;
    let file_size = 36u32.saturating_add(data_size);

    let mut wav = Vec::with_capacity(WAV_HEADER_SIZE + pcm.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // sub-chunk size, 16 for PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // audio format, 1 = PCM
    wav.extend_from_slice(&num_channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

/// Strip a standard 44-byte WAV header if present.
///
/// Some synthesis endpoints return WAV even when asked for raw PCM; the
/// playback path only wants the sample data. Non-WAV input is returned
/// unchanged.
pub fn strip_wav_header(data: &[u8]) -> &[u8] {
    if data.len() >= WAV_HEADER_SIZE && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        &data[WAV_HEADER_SIZE..]
    } else {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_roundtrip_tolerance() {
        // Mu-law is lossy; typical speech magnitudes should survive within a
        // few percent.
        for sample in [-32000i16, -1200, -80, 0, 80, 1200, 32000] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            let error = (sample as i32 - decoded as i32).unsigned_abs();
            assert!(
                error < 1000 || (error as f64 / sample.unsigned_abs() as f64) < 0.05,
                "sample={sample}, decoded={decoded}, error={error}"
            );
        }
    }

    #[test]
    fn test_silence_encodes_to_reference_byte() {
        // The classifier depends on zero mapping to MULAW_SILENCE.
        assert_eq!(linear_to_mulaw(0), MULAW_SILENCE);
        let decoded = mulaw_to_linear(MULAW_SILENCE);
        assert!(decoded.unsigned_abs() < 50, "silence decoded to {decoded}");
    }

    #[test]
    fn test_pcm_mulaw_buffer_lengths() {
        let pcm = vec![0u8, 0, 0xFF, 0x7F]; // [0, 32767]
        let mulaw = pcm_to_mulaw(&pcm);
        assert_eq!(mulaw.len(), 2);
        assert_eq!(mulaw_to_pcm(&mulaw).len(), 4);
    }

    #[test]
    fn test_resample_same_rate_passthrough() {
        let data = vec![0u8, 1, 2, 3];
        assert_eq!(resample_linear(&data, 8000, 8000), data);
    }

    #[test]
    fn test_resample_phone_to_provider_rate() {
        // 2 samples at 8kHz -> 6 samples at 24kHz.
        let data: Vec<u8> = [100i16, 200].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(resample_linear(&data, 8000, 24000).len() / 2, 6);
    }

    #[test]
    fn test_resample_provider_to_phone_rate() {
        let data: Vec<u8> = [100i16, 200, 300, 400, 500, 600]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(resample_linear(&data, 24000, 8000).len() / 2, 2);
    }

    #[test]
    fn test_wav_header_layout() {
        let pcm = vec![1u8, 2, 3, 4];
        let wav = encode_pcm_to_wav(&pcm, 8000, 1);
        assert_eq!(wav.len(), WAV_HEADER_SIZE + 4);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[WAV_HEADER_SIZE..], &pcm[..]);
        // Encode then strip lands back on the sample data.
        assert_eq!(strip_wav_header(&wav), &pcm[..]);
    }

    #[test]
    fn test_strip_wav_header_passthrough_for_raw() {
        let data = vec![0u8; 100];
        assert_eq!(strip_wav_header(&data).len(), 100);
    }
}
