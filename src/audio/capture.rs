//! Real microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::{AudioSource, CaptureEvent, CaptureSender, SinkSlot};
use crate::error::{GreenlightError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never a headset or built-in mic.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List input and output devices, marking preferred ones with "\[recommended\]".
///
/// # Errors
/// Returns `GreenlightError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let (inputs, outputs) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let inputs = host.input_devices().map(|d| d.collect::<Vec<_>>());
        let outputs = host.output_devices().map(|d| d.collect::<Vec<_>>());
        (inputs, outputs)
    });
    let inputs = inputs.map_err(|e| GreenlightError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    let outputs = outputs.map_err(|e| GreenlightError::AudioPlayback {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;

    let describe = |devices: Vec<cpal::Device>| {
        devices
            .iter()
            .filter_map(|device| device.name().ok())
            .filter(|name| !should_filter_device(name))
            .map(|name| {
                if is_preferred_device(&name) {
                    format!("{} [recommended]", name)
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
    };

    Ok((describe(inputs), describe(outputs)))
}

/// Find an input device by exact name, or the best default.
///
/// The default prefers PipeWire, then PulseAudio, then the system default.
fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| GreenlightError::MicrophoneAccess {
                message: format!("Failed to enumerate devices: {}", e),
            })?
            .collect::<Vec<_>>();

        if let Some(name) = device_name {
            return devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| GreenlightError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        host.default_input_device()
            .ok_or_else(|| GreenlightError::MicrophoneAccess {
                message: "no input device available".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched by the owning `CpalAudioSource`, which
/// is moved between threads but never shared.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Real microphone using CPAL.
///
/// Opening the device starts the stream immediately, mirroring a granted
/// microphone track; samples are only forwarded once the capture graph is
/// wired with `start`. Tries i16 at the target rate first, then f32, then the
/// device's native config with software mixing and resampling.
pub struct CpalAudioSource {
    name: String,
    stream: Option<SendableStream>,
    slot: SinkSlot,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open and start the input device.
    ///
    /// Blocks for up to 200ms while checking that callbacks actually arrive.
    ///
    /// # Errors
    /// - `AudioDeviceNotFound` if a named device does not exist
    /// - `MicrophoneAccess` if the device cannot be opened
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let slot = SinkSlot::new();
        let callback_count = Arc::new(AtomicU64::new(0));

        let stream = build_stream(&device, sample_rate, &slot, &callback_count)?;
        stream.play().map_err(|e| GreenlightError::MicrophoneAccess {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let stream = if callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            let native = build_stream_native(&device, sample_rate, &slot, &callback_count)?;
            native.play().map_err(|e| GreenlightError::MicrophoneAccess {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        tracing::info!(device = %name, sample_rate, "microphone acquired");

        Ok(Self {
            name,
            stream: Some(SendableStream(stream)),
            slot,
            callback_count,
            sample_rate,
        })
    }

    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }
}

fn stream_error_handler(slot: SinkSlot) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::error!(error = %err, "audio input stream error");
        slot.push(CaptureEvent::Ended {
            reason: err.to_string(),
        });
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Build the stream at the target rate, mono, i16 then f32.
fn build_stream(
    device: &cpal::Device,
    sample_rate: u32,
    slot: &SinkSlot,
    counter: &Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let preferred_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: sample_rate as cpal::SampleRate,
        buffer_size: cpal::BufferSize::Default,
    };

    let sink = slot.clone();
    let count = Arc::clone(counter);
    if let Ok(stream) = device.build_input_stream(
        &preferred_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            count.fetch_add(1, Ordering::Relaxed);
            sink.push(CaptureEvent::Samples(data.to_vec()));
        },
        stream_error_handler(slot.clone()),
        None,
    ) {
        return Ok(stream);
    }

    let sink = slot.clone();
    let count = Arc::clone(counter);
    if let Ok(stream) = device.build_input_stream(
        &preferred_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            count.fetch_add(1, Ordering::Relaxed);
            sink.push(CaptureEvent::Samples(
                data.iter().map(|&s| f32_to_i16(s)).collect(),
            ));
        },
        stream_error_handler(slot.clone()),
        None,
    ) {
        return Ok(stream);
    }

    build_stream_native(device, sample_rate, slot, counter)
}

/// Build a stream at the device's native config, mixing to mono and
/// resampling to the target rate in software.
fn build_stream_native(
    device: &cpal::Device,
    target_rate: u32,
    slot: &SinkSlot,
    counter: &Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    use cpal::SampleFormat;

    let default_config =
        device
            .default_input_config()
            .map_err(|e| GreenlightError::MicrophoneAccess {
                message: format!("Failed to query default input config: {}", e),
            })?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels() as usize;
    let stream_config: cpal::StreamConfig = default_config.clone().into();

    tracing::info!(
        channels = native_channels,
        rate = native_rate,
        format = ?default_config.sample_format(),
        "using native input format, converting in software"
    );

    let sink = slot.clone();
    let count = Arc::clone(counter);

    match default_config.sample_format() {
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    count.fetch_add(1, Ordering::Relaxed);
                    sink.push(CaptureEvent::Samples(convert_to_mono(
                        data,
                        native_channels,
                        native_rate,
                        target_rate,
                    )));
                },
                stream_error_handler(slot.clone()),
                None,
            )
            .map_err(|e| GreenlightError::MicrophoneAccess {
                message: format!("Failed to build native i16 stream: {}", e),
            }),
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    count.fetch_add(1, Ordering::Relaxed);
                    let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    sink.push(CaptureEvent::Samples(convert_to_mono(
                        &i16_data,
                        native_channels,
                        native_rate,
                        target_rate,
                    )));
                },
                stream_error_handler(slot.clone()),
                None,
            )
            .map_err(|e| GreenlightError::MicrophoneAccess {
                message: format!("Failed to build native f32 stream: {}", e),
            }),
        fmt => Err(GreenlightError::MicrophoneAccess {
            message: format!(
                "Unsupported native sample format: {:?}. Try another device with --device.",
                fmt
            ),
        }),
    }
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn convert_to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono = crate::audio::wav::downmix(samples, channels);
    crate::audio::wav::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self, sample_rate: u32, sink: CaptureSender) -> Result<()> {
        if sample_rate != self.sample_rate {
            return Err(GreenlightError::AudioCapture {
                message: format!(
                    "microphone opened at {}Hz but the capture context runs at {}Hz",
                    self.sample_rate, sample_rate
                ),
            });
        }
        if self.stream.is_none() {
            return Err(GreenlightError::AudioCapture {
                message: "microphone already released".to_string(),
            });
        }
        self.slot.connect(sink);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.slot.disconnect();
    }

    fn stop(&mut self) -> Result<()> {
        self.slot.disconnect();
        if let Some(sendable_stream) = self.stream.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| GreenlightError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
            tracing::debug!(device = %self.name, "microphone released");
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_convert_to_mono_48k_stereo() {
        let stereo = vec![100i16; 4800 * 2];
        let converted = convert_to_mono(&stereo, 2, 48000, 16000);
        assert_eq!(converted.len(), 1600);
        assert!(converted.iter().all(|&s| s == 100));
    }

    #[test]
    fn test_open_with_invalid_device_name() {
        match CpalAudioSource::open(Some("NonExistentDevice12345"), 16000) {
            Err(GreenlightError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            // Hosts without any audio backend fail earlier.
            Err(GreenlightError::MicrophoneAccess { .. }) => {}
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected AudioDeviceNotFound, got a device"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_start_stop_default_device() {
        let mut source = CpalAudioSource::open(None, 16000).expect("Failed to open microphone");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        source.start(16000, tx).expect("Failed to wire microphone");
        std::thread::sleep(std::time::Duration::from_millis(300));
        source.disconnect();
        assert!(rx.try_recv().is_ok(), "Expected at least one callback");
        assert!(source.stop().is_ok());
    }
}
