//! Ogg/Opus inspection for outgoing voice notes.
//!
//! Only the page headers and the `OpusHead` identification block are read;
//! the audio itself is never decoded.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{ArchiveError, Result};

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const OPUS_HEAD: &[u8; 8] = b"OpusHead";
/// Fixed part of a page header, before the segment table
const PAGE_HEADER_LEN: usize = 27;
/// Magic, version, channels, pre-skip, sample rate, gain, mapping family
const OPUS_HEAD_LEN: usize = 19;
const DEFAULT_SAMPLE_RATE: u32 = 48_000;
/// Bytes per second assumed when no page carries a granule position
const FALLBACK_BYTES_PER_SEC: usize = 2_000;
/// Shortest duration reported for a voice note
pub const MIN_DURATION_SECS: u32 = 1;
/// Longest duration reported for a voice note
pub const MAX_DURATION_SECS: u32 = 300;
/// Number of waveform samples
pub const WAVEFORM_LEN: usize = 64;

/// Duration and display envelope of a voice note
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceNoteInfo {
    /// Whole seconds, clamped to the reported range
    pub duration_secs: u32,
    /// Synthetic amplitude envelope, each byte in 0..=100
    pub waveform: Vec<u8>,
}

/// Values read from the `OpusHead` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpusHead {
    pre_skip: u16,
    sample_rate: u32,
}

fn read_u16_le(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64_le(bytes: &[u8], at: usize) -> Option<u64> {
    bytes.get(at..at + 8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_opus_head(page: &[u8]) -> Option<OpusHead> {
    let pos = find(page, OPUS_HEAD)?;
    let head = page.get(pos..pos + OPUS_HEAD_LEN)?;
    Some(OpusHead {
        pre_skip: read_u16_le(head, 10)?,
        sample_rate: read_u32_le(head, 12)?,
    })
}

/// Compute duration and a placeholder waveform for an Ogg/Opus buffer.
pub fn analyze_ogg_opus(data: &[u8]) -> Result<VoiceNoteInfo> {
    if !data.starts_with(CAPTURE_PATTERN) {
        return Err(ArchiveError::Format("not an Ogg file".to_string()));
    }

    let mut last_granule = 0u64;
    let mut head: Option<OpusHead> = None;
    let mut offset = 0;

    while offset + PAGE_HEADER_LEN <= data.len() {
        if &data[offset..offset + 4] != CAPTURE_PATTERN {
            offset += 1;
            continue;
        }
        let page_header = &data[offset..offset + PAGE_HEADER_LEN];
        let granule = read_u64_le(page_header, 6).unwrap_or(0);
        let sequence = read_u32_le(page_header, 18).unwrap_or(0);
        let segments = usize::from(page_header[26]);

        let Some(table) = data.get(offset + PAGE_HEADER_LEN..offset + PAGE_HEADER_LEN + segments) else {
            break;
        };
        let page_len = PAGE_HEADER_LEN + segments + table.iter().map(|&s| usize::from(s)).sum::<usize>();
        let page = &data[offset..(offset + page_len).min(data.len())];

        if head.is_none() && sequence <= 1 {
            head = parse_opus_head(page);
        }
        if granule != 0 {
            last_granule = granule;
        }
        offset += page_len;
    }

    let duration = if last_granule > 0 {
        let head = head.unwrap_or(OpusHead {
            pre_skip: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
        });
        let rate = if head.sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            head.sample_rate
        };
        let samples = last_granule.saturating_sub(u64::from(head.pre_skip));
        u32::try_from(samples.div_ceil(u64::from(rate))).unwrap_or(u32::MAX)
    } else {
        u32::try_from(data.len() / FALLBACK_BYTES_PER_SEC).unwrap_or(u32::MAX)
    };
    let duration_secs = duration.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);

    Ok(VoiceNoteInfo {
        duration_secs,
        waveform: placeholder_waveform(duration_secs),
    })
}

/// Deterministic, cosmetic amplitude envelope seeded from the duration.
#[must_use]
pub fn placeholder_waveform(duration_secs: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(u64::from(duration_secs));
    let base = 35.0;
    let freq = f64::from(duration_secs.min(120)) / 30.0;

    (0..WAVEFORM_LEN)
        .map(|i| {
            let pos = i as f64 / WAVEFORM_LEN as f64;
            let mut value = base * (pos * PI * freq * 8.0).sin() + (base / 2.0) * (pos * PI * freq * 16.0).sin();
            value += (rng.gen::<f64>() - 0.5) * 15.0;
            value = value * (0.7 + 0.3 * (pos * PI).sin()) + 50.0;
            value.clamp(0.0, 100.0) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(granule: u64, sequence: u32, payload: &[u8]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(CAPTURE_PATTERN);
        page.push(0);
        page.push(0);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&1u32.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.push(1);
        page.push(u8::try_from(payload.len()).unwrap());
        page.extend_from_slice(payload);
        page
    }

    fn opus_head(pre_skip: u16, rate: u32) -> Vec<u8> {
        let mut head = OPUS_HEAD.to_vec();
        head.push(1);
        head.push(1);
        head.extend_from_slice(&pre_skip.to_le_bytes());
        head.extend_from_slice(&rate.to_le_bytes());
        head.extend_from_slice(&0u16.to_le_bytes());
        head.push(0);
        head
    }

    #[test]
    fn test_rejects_non_ogg() {
        assert!(matches!(analyze_ogg_opus(b"RIFF...."), Err(ArchiveError::Format(_))));
        assert!(analyze_ogg_opus(b"").is_err());
    }

    #[test]
    fn test_duration_from_granule() {
        let mut data = page(0, 0, &opus_head(312, 48_000));
        data.extend(page(0, 1, b"OpusTags"));
        data.extend(page(48_000 * 7 + 312 + 1, 2, &[0; 40]));
        let info = analyze_ogg_opus(&data).unwrap();
        assert_eq!(info.duration_secs, 8);
        assert_eq!(info.waveform.len(), WAVEFORM_LEN);
    }

    #[test]
    fn test_zero_sample_rate_uses_default() {
        let mut data = page(0, 0, &opus_head(0, 0));
        data.extend(page(48_000 * 3, 2, &[0; 8]));
        assert_eq!(analyze_ogg_opus(&data).unwrap().duration_secs, 3);
    }

    #[test]
    fn test_fallback_without_granule() {
        let mut data = page(0, 0, &opus_head(0, 48_000));
        data.resize(9_000, 0);
        assert_eq!(analyze_ogg_opus(&data).unwrap().duration_secs, 4);
    }

    #[test]
    fn test_duration_is_clamped() {
        let data = page(0, 0, &opus_head(0, 48_000));
        assert_eq!(analyze_ogg_opus(&data).unwrap().duration_secs, MIN_DURATION_SECS);

        let mut data = page(0, 0, &opus_head(0, 48_000));
        data.extend(page(48_000 * 1_000, 2, &[0; 8]));
        assert_eq!(analyze_ogg_opus(&data).unwrap().duration_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn test_waveform_is_deterministic_and_bounded() {
        let first = placeholder_waveform(12);
        assert_eq!(first, placeholder_waveform(12));
        assert!(first.iter().all(|&b| b <= 100));
    }
}
