//! WAV file microphone, for running a session from a recording.

use crate::audio::recorder::{AudioSource, CaptureEvent, CaptureSender, SinkSlot};
use crate::error::{GreenlightError, Result};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Callback period used when replaying a file.
const CHUNK_MS: u32 = 100;

/// Audio source that replays WAV data in real time.
///
/// Once the file runs out it keeps delivering silence, like a microphone in a
/// quiet room, so speech-end detection still fires.
pub struct WavAudioSource {
    samples: Vec<i16>,
    source_rate: u32,
    slot: SinkSlot,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| GreenlightError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_channels = spec.channels.max(1) as usize;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GreenlightError::AudioCapture {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let samples = if source_channels == 1 {
            raw_samples
        } else {
            downmix(&raw_samples, source_channels)
        };

        Ok(Self {
            samples,
            source_rate: spec.sample_rate,
            slot: SinkSlot::new(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| GreenlightError::MicrophoneAccess {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Length of the recording in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.source_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.source_rate as f64
    }

    /// Mono samples at the file's own rate.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self, sample_rate: u32, sink: CaptureSender) -> Result<()> {
        if self.worker.is_some() {
            self.slot.connect(sink);
            return Ok(());
        }

        let samples = resample(&self.samples, self.source_rate, sample_rate);
        let chunk_size = (sample_rate * CHUNK_MS / 1000).max(1) as usize;
        self.slot.connect(sink);
        self.running.store(true, Ordering::SeqCst);

        let slot = self.slot.clone();
        let running = Arc::clone(&self.running);
        let worker = std::thread::Builder::new()
            .name("wav-replay".to_string())
            .spawn(move || {
                let silence = vec![0i16; chunk_size];
                let mut chunks = samples.chunks(chunk_size);
                while running.load(Ordering::SeqCst) {
                    let chunk = chunks.next().map(<[i16]>::to_vec).unwrap_or_else(|| silence.clone());
                    slot.push(CaptureEvent::Samples(chunk));
                    std::thread::sleep(Duration::from_millis(CHUNK_MS as u64));
                }
            })
            .map_err(|e| GreenlightError::AudioCapture {
                message: format!("Failed to spawn replay thread: {}", e),
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.slot.disconnect();
    }

    fn stop(&mut self) -> Result<()> {
        self.slot.disconnect();
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| GreenlightError::AudioCapture {
                message: "WAV replay thread panicked".to_string(),
            })?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        "wav file".to_string()
    }
}

impl Drop for WavAudioSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn from_reader_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert_eq!(source.samples(), &input_samples[..]);
        assert_eq!(source.source_rate, 16000);
    }

    #[test]
    fn from_reader_stereo_downmixes_to_mono() {
        let stereo_samples = vec![100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        assert_eq!(source.samples(), &[150i16, 350, 550]);
    }

    #[test]
    fn duration_uses_file_rate() {
        let wav_data = make_wav_data(48000, 1, &vec![0i16; 24000]);
        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert!((source.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let result = WavAudioSource::from_reader(Box::new(Cursor::new(vec![0u8, 1, 2, 3])));

        match result {
            Err(GreenlightError::AudioCapture { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn missing_file_is_microphone_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = WavAudioSource::open(&dir.path().join("nope.wav"));
        assert!(matches!(
            result,
            Err(GreenlightError::MicrophoneAccess { .. })
        ));
    }

    #[test]
    fn replay_delivers_file_then_silence_until_stopped() {
        let wav_data = make_wav_data(16000, 1, &vec![500i16; 1600]);
        let mut source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        source.start(16000, tx).unwrap();
        let first = rx.blocking_recv().unwrap();
        let second = rx.blocking_recv().unwrap();
        source.stop().unwrap();

        assert_eq!(first, CaptureEvent::Samples(vec![500i16; 1600]));
        assert_eq!(second, CaptureEvent::Samples(vec![0i16; 1600]));
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_verification() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);

        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_24k_to_48k_doubles_length() {
        let resampled = resample(&vec![0i16; 2400], 24000, 48000);
        assert_eq!(resampled.len(), 4800);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());

        let single = resample(&[100i16], 16000, 8000);
        assert_eq!(single, vec![100]);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[10, 20, 30, 40], 2), vec![15, 35]);
        assert_eq!(downmix(&[1, 2, 3], 1), vec![1, 2, 3]);
    }
}
