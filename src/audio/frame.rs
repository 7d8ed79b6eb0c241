//! The audio frame descriptor: the passive record writers and readers
//! exchange with [`crate::aubuf::AuBuf`].
//!
//! This struct is deliberately thin — it is the "external collaborator"
//! boundary type, not part of the buffer's own hard logic. Codecs,
//! network transport and PCM conversion all live upstream of it and are
//! out of scope here.

use super::format::AudioFormat;

/// Timebase for all `timestamp_us` fields: microseconds.
pub const AUDIO_TIMEBASE: u64 = 1_000_000;

/// A frame handed to [`crate::aubuf::AuBuf::write`].
///
/// `sample_ptr` is read-only from the buffer's point of view: the PCM
/// bytes are copied out of it into the buffer's own storage.
#[derive(Debug, Clone, Copy)]
pub struct AuFrameDescriptor<'a> {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u8,
    pub sample_ptr: &'a [u8],
    pub sample_count: usize,
    pub timestamp_us: u64,
}

/// The output descriptor handed to [`crate::aubuf::AuBuf::read`].
///
/// Fields are in/out: the caller sets `format`, `sample_count` (how many
/// samples it wants) and owns `sample_ptr` (the destination buffer,
/// which must already hold `sample_count` samples worth of bytes).
/// `sample_rate`, `channels` and `timestamp_us` are informational on
/// input (used by the jitter estimator to compute packet time) and are
/// overwritten with the metadata of the last frame drained into the
/// output ("last-frame-wins", per the drain-read note).
pub struct AuFrameOut<'a> {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u8,
    pub sample_ptr: &'a mut [u8],
    pub sample_count: usize,
    pub timestamp_us: u64,
}

impl<'a> AuFrameOut<'a> {
    pub fn new(format: AudioFormat, sample_rate: u32, channels: u8, sample_ptr: &'a mut [u8]) -> Self {
        let sample_count = byte_len_to_sample_count(sample_ptr.len(), format);
        Self {
            format,
            sample_rate,
            channels,
            sample_ptr,
            sample_count,
            timestamp_us: 0,
        }
    }
}

fn byte_len_to_sample_count(byte_len: usize, format: AudioFormat) -> usize {
    let sz = super::format::sample_size(format);
    if sz > 0 { byte_len / sz } else { byte_len }
}

/// Number of bytes `sample_count` samples occupy in `format`.
///
/// Resolves the Open Question in the design notes explicitly: an
/// [`AudioFormat::Unknown`] format has no known per-sample size, so
/// `sample_count` is interpreted directly as a byte count (the
/// byte-granular fallback), rather than aborting.
pub fn frame_byte_size(format: AudioFormat, sample_count: usize) -> usize {
    let sz = super::format::sample_size(format);
    if sz > 0 { sample_count * sz } else { sample_count }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_byte_size_known_format() {
        assert_eq!(frame_byte_size(AudioFormat::S16Le, 960), 1920);
    }

    #[test]
    fn frame_byte_size_unknown_format_falls_back_to_byte_count() {
        assert_eq!(frame_byte_size(AudioFormat::Unknown, 960), 960);
    }

    #[test]
    fn out_descriptor_computes_sample_count_from_buffer_len() {
        let mut buf = vec![0u8; 1920];
        let out = AuFrameOut::new(AudioFormat::S16Le, 48000, 2, &mut buf);
        assert_eq!(out.sample_count, 960);
    }
}
