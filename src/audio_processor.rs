use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadBytes};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Instantiate;

use crate::error::ClassifyError;
use crate::resampler::{Resample, SincResampler};

/// Mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// What the client told us about an upload: content type and file name
/// extension, either of which may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaHint {
    pub mime_type: Option<String>,
    pub extension: Option<String>,
}

impl MediaHint {
    pub fn from_upload(content_type: Option<&str>, file_name: Option<&str>) -> Self {
        let mime_type = content_type
            .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty() && m != "application/octet-stream");
        let extension = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        Self {
            mime_type,
            extension,
        }
    }

    /// Whether the client declared a headerless MPEG audio or ADTS stream.
    pub fn names_frame_sync_format(&self) -> bool {
        let mime = self.mime_type.as_deref().is_some_and(|m| {
            matches!(
                m,
                "audio/mpeg"
                    | "audio/mp3"
                    | "audio/mpeg3"
                    | "audio/x-mpeg"
                    | "audio/mp2"
                    | "audio/aac"
                    | "audio/aacp"
                    | "audio/x-aac"
            )
        });
        let extension = self
            .extension
            .as_deref()
            .is_some_and(|e| matches!(e, "mp3" | "mp2" | "mp1" | "mpa" | "aac" | "adts"));
        mime || extension
    }
}

/// Turns an encoded upload into a mono waveform at its native rate.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: &MediaHint) -> Result<Waveform, ClassifyError>;
}

/// Decoder backed by symphonia's default probe and codec registry.
///
/// The container marker must sit at the start of the upload (after any ID3
/// tags); symphonia's own probe would otherwise scan arbitrary bytes for a
/// frame sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: &MediaHint) -> Result<Waveform, ClassifyError> {
        catch_decoder_panic(|| decode_with_symphonia(bytes, hint))
    }
}

/// Some demuxers do unchecked arithmetic on truncated headers; a panic there
/// is a malformed upload.
fn catch_decoder_panic<F>(decode: F) -> Result<Waveform, ClassifyError>
where
    F: FnOnce() -> Result<Waveform, ClassifyError>,
{
    panic::catch_unwind(AssertUnwindSafe(decode)).unwrap_or_else(|_| {
        Err(ClassifyError::Decode(
            "decoder panicked on malformed input".into(),
        ))
    })
}

/// MPEG audio and ADTS frames start with an 11-bit sync word and carry no
/// container header.
fn is_frame_sync(bytes: &[u8], at: usize) -> bool {
    matches!(bytes.get(at..at + 2), Some(&[0xff, b]) if b & 0xe0 == 0xe0)
}

/// Byte offset between the scan start and the marker the reader expects.
/// MP4 files lead with a 4-byte atom size before `ftyp`.
fn marker_at_start(bytes: &[u8], start: usize, marker: usize) -> bool {
    marker == start
        || (marker == start + 4 && bytes.get(start + 4..start + 8) == Some(&b"ftyp"[..]))
}

fn open_format(bytes: &[u8], hint: &MediaHint) -> Result<Box<dyn FormatReader>, ClassifyError> {
    debug!("opening upload of {} bytes, client hint {:?}", bytes.len(), hint);
    let cursor = Cursor::new(bytes.to_vec());
    let mut mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    let probe = symphonia::default::get_probe();
    let mut tagged = false;

    loop {
        let start = mss.pos() as usize;
        let found = probe
            .next(&mut mss)
            .map_err(|e| ClassifyError::Decode(format!("probe failed: {e}")))?;

        let marker = mss.pos() as usize;
        if !marker_at_start(bytes, start, marker) {
            return Err(ClassifyError::Decode(format!(
                "no recognised audio header at byte {start}"
            )));
        }

        match found {
            Instantiate::Format(_)
                if is_frame_sync(bytes, marker) && !tagged && !hint.names_frame_sync_format() =>
            {
                return Err(ClassifyError::Decode(
                    "bare MPEG/ADTS frames need an audio/mpeg or audio/aac upload".into(),
                ));
            }
            Instantiate::Format(open) => {
                return open(mss, &FormatOptions::default())
                    .map_err(|e| ClassifyError::Decode(format!("open container: {e}")));
            }
            Instantiate::Metadata(meta) => {
                let mut reader = meta(&MetadataOptions::default());
                reader
                    .read_all(&mut mss)
                    .map_err(|e| ClassifyError::Decode(format!("read tags: {e}")))?;
                tagged = true;
            }
        }
    }
}

fn decode_with_symphonia(bytes: &[u8], hint: &MediaHint) -> Result<Waveform, ClassifyError> {
    let mut format = open_format(bytes, hint)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ClassifyError::Decode("no audio track found".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ClassifyError::Decode(format!("codec init failed: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut decoded_packets = 0usize;
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(ClassifyError::Decode(format!("packet read: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(buf) => buf,
            Err(SymphoniaError::DecodeError(e)) => {
                skipped += 1;
                debug!("skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(ClassifyError::Decode(format!("decode: {e}"))),
        };
        decoded_packets += 1;

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        mono.extend(downmix_to_mono(sample_buf.samples(), channels));
    }

    check_packet_health(decoded_packets, skipped)?;

    if mono.is_empty() {
        return Err(ClassifyError::Decode("no audio samples decoded".into()));
    }

    let sample_rate = sample_rate
        .ok_or_else(|| ClassifyError::Decode("stream does not report a sample rate".into()))?;

    debug!(
        "decoded {} mono samples at {} Hz ({} packets, {} skipped)",
        mono.len(),
        sample_rate,
        decoded_packets,
        skipped
    );

    Ok(Waveform::new(mono, sample_rate))
}

/// A stream is rejected when nothing decoded cleanly or most packets were
/// corrupt.
fn check_packet_health(decoded: usize, skipped: usize) -> Result<(), ClassifyError> {
    if decoded == 0 {
        return Err(ClassifyError::Decode(format!(
            "no packet decoded cleanly ({skipped} skipped)"
        )));
    }
    if skipped > decoded {
        return Err(ClassifyError::Decode(format!(
            "{skipped} of {} packets were corrupt",
            decoded + skipped
        )));
    }
    Ok(())
}

/// Averages interleaved frames into one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decode plus conditional resample to the model's rate.
pub struct AudioProcessor {
    decoder: Box<dyn AudioDecoder>,
    resampler: Box<dyn Resample>,
    target_sample_rate: u32,
}

impl AudioProcessor {
    pub fn new(target_sample_rate: u32) -> Self {
        Self::with_backends(
            target_sample_rate,
            Box::new(SymphoniaDecoder),
            Box::new(SincResampler),
        )
    }

    pub fn with_backends(
        target_sample_rate: u32,
        decoder: Box<dyn AudioDecoder>,
        resampler: Box<dyn Resample>,
    ) -> Self {
        Self {
            decoder,
            resampler,
            target_sample_rate,
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn prepare(&self, bytes: &[u8], hint: &MediaHint) -> Result<Waveform, ClassifyError> {
        let waveform = self.decoder.decode(bytes, hint)?;

        if waveform.sample_rate == self.target_sample_rate {
            return Ok(waveform);
        }

        debug!(
            "resampling {} samples from {} Hz to {} Hz",
            waveform.len(),
            waveform.sample_rate,
            self.target_sample_rate
        );
        self.resampler.resample(waveform, self.target_sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: &[Vec<i16>]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for &s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn downmix_averages_each_frame() {
        let interleaved = [1.0, 0.0, -1.0, 0.5, 0.25, 0.75];
        let mono = downmix_to_mono(&interleaved, 3);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.0).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_mono_is_passthrough() {
        let samples = [0.1, -0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples.to_vec());
    }

    #[test]
    fn decode_mono_wav_keeps_native_rate() {
        let frames: Vec<Vec<i16>> = (0..1600).map(|_| vec![0]).collect();
        let wav = wav_bytes(16_000, 1, &frames);

        let waveform = SymphoniaDecoder.decode(&wav, &MediaHint::default()).unwrap();
        assert_eq!(waveform.sample_rate, 16_000);
        assert_eq!(waveform.len(), 1600);
        assert!(waveform.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn decode_stereo_wav_averages_channels() {
        let frames: Vec<Vec<i16>> = (0..400).map(|_| vec![16384, -8192]).collect();
        let wav = wav_bytes(44_100, 2, &frames);

        let waveform = SymphoniaDecoder.decode(&wav, &MediaHint::default()).unwrap();
        assert_eq!(waveform.sample_rate, 44_100);
        assert_eq!(waveform.len(), 400);
        for &s in &waveform.samples {
            assert!((s - 0.125).abs() < 1e-3, "sample {s}");
        }
    }

    #[test]
    fn decode_garbage_is_a_decode_error() {
        let err = SymphoniaDecoder
            .decode(b"definitely not audio", &MediaHint::default())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn decode_empty_is_a_decode_error() {
        let err = SymphoniaDecoder
            .decode(&[], &MediaHint::default())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn random_buffers_never_decode() {
        let hint = MediaHint::from_upload(Some("audio/wav"), Some("clip.wav"));
        for seed in 0..256u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut junk = vec![0u8; 4096];
            rng.fill(&mut junk[..]);

            match SymphoniaDecoder.decode(&junk, &hint) {
                Err(ClassifyError::Decode(_)) => {}
                other => panic!("seed {seed}: expected a decode error, got {other:?}"),
            }
        }
    }

    #[test]
    fn header_after_leading_junk_is_rejected() {
        let frames: Vec<Vec<i16>> = (0..1600).map(|_| vec![0]).collect();
        let mut payload = b"junk before the header".to_vec();
        payload.extend(wav_bytes(16_000, 1, &frames));

        let err = SymphoniaDecoder
            .decode(&payload, &MediaHint::default())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn decoder_panic_becomes_a_decode_error() {
        let err = catch_decoder_panic(|| panic!("attempt to subtract with overflow")).unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn bare_adts_frames_need_an_aac_hint() {
        let mut payload = vec![0xff, 0xf1, 0x50, 0x80, 0x00, 0x1f, 0xfc];
        payload.extend(std::iter::repeat(0xa5).take(2048));

        let hint = MediaHint::from_upload(Some("audio/wav"), Some("clip.wav"));
        let err = SymphoniaDecoder.decode(&payload, &hint).unwrap_err();
        assert!(err.to_string().contains("audio/mpeg or audio/aac"), "{err}");
    }

    #[test]
    fn frame_sync_formats_are_recognised_from_the_hint() {
        assert!(MediaHint::from_upload(Some("audio/mpeg"), None).names_frame_sync_format());
        assert!(MediaHint::from_upload(None, Some("song.MP3")).names_frame_sync_format());
        assert!(MediaHint::from_upload(Some("audio/aac"), Some("x.bin")).names_frame_sync_format());
        assert!(!MediaHint::from_upload(Some("audio/wav"), Some("a.wav")).names_frame_sync_format());
        assert!(!MediaHint::default().names_frame_sync_format());
    }

    #[test]
    fn mostly_corrupt_streams_are_rejected() {
        assert!(check_packet_health(0, 0).is_err());
        assert!(check_packet_health(0, 3).is_err());
        assert!(check_packet_health(2, 3).is_err());
        assert!(check_packet_health(3, 3).is_ok());
        assert!(check_packet_health(40, 1).is_ok());
    }

    #[test]
    fn hint_takes_mime_without_parameters_and_lowercase_extension() {
        let hint = MediaHint::from_upload(Some("Audio/WAV; codecs=1"), Some("Take 3.WAV"));
        assert_eq!(hint.mime_type.as_deref(), Some("audio/wav"));
        assert_eq!(hint.extension.as_deref(), Some("wav"));

        let bare = MediaHint::from_upload(Some("application/octet-stream"), Some("blob"));
        assert_eq!(bare, MediaHint::default());
    }

    struct FixedDecoder(Waveform);

    impl AudioDecoder for FixedDecoder {
        fn decode(&self, _bytes: &[u8], _hint: &MediaHint) -> Result<Waveform, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    struct CountingResampler(Arc<AtomicUsize>);

    impl Resample for CountingResampler {
        fn resample(
            &self,
            waveform: Waveform,
            target_rate: u32,
        ) -> Result<Waveform, ClassifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Waveform::new(waveform.samples, target_rate))
        }
    }

    #[test]
    fn prepare_skips_resampling_at_target_rate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let input = Waveform::new(vec![0.1, 0.2, 0.3], 16_000);
        let processor = AudioProcessor::with_backends(
            16_000,
            Box::new(FixedDecoder(input.clone())),
            Box::new(CountingResampler(calls.clone())),
        );

        let out = processor.prepare(b"ignored", &MediaHint::default()).unwrap();
        assert_eq!(out, input);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prepare_resamples_other_rates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = AudioProcessor::with_backends(
            16_000,
            Box::new(FixedDecoder(Waveform::new(vec![0.0; 10], 8_000))),
            Box::new(CountingResampler(calls.clone())),
        );

        let out = processor.prepare(b"ignored", &MediaHint::default()).unwrap();
        assert_eq!(out.sample_rate, 16_000);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stereo_44k_wav_ends_up_mono_16k() {
        let frames: Vec<Vec<i16>> = (0..22_050).map(|_| vec![1000, -1000]).collect();
        let wav = wav_bytes(44_100, 2, &frames);

        let waveform = AudioProcessor::new(16_000)
            .prepare(&wav, &MediaHint::default())
            .unwrap();
        assert_eq!(waveform.sample_rate, 16_000);
        assert_eq!(waveform.len(), 8_000);
        assert!(waveform.samples.iter().all(|s| s.abs() < 1e-3));
    }
}
