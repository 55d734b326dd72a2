//! Scheduled playback on a CPAL output device.
//!
//! A single output stream mixes every scheduled buffer. The stream counts the
//! frames it has rendered, which is the device clock `schedule` works against.

use crate::audio::device::DeviceContext;
use crate::audio::playback::{CompletionSender, PlaybackDevice, SourceId};
use crate::audio::wav::resample;
use crate::error::{GreenlightError, Result};
use crate::pipeline::types::PcmBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

enum MixerCommand {
    Play {
        id: SourceId,
        samples: Vec<f32>,
        start_frame: u64,
    },
    Stop(SourceId),
}

struct Voice {
    id: SourceId,
    samples: Vec<f32>,
    start_frame: u64,
    position: usize,
}

/// Runs inside the output callback.
struct Mixer {
    commands: Receiver<MixerCommand>,
    voices: Vec<Voice>,
    frames_rendered: Arc<AtomicU64>,
    completions: CompletionSender,
    channels: usize,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32]) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Play {
                    id,
                    samples,
                    start_frame,
                } => self.voices.push(Voice {
                    id,
                    samples,
                    start_frame,
                    position: 0,
                }),
                MixerCommand::Stop(id) => self.voices.retain(|v| v.id != id),
            }
        }

        let base = self.frames_rendered.load(Ordering::Acquire);
        let mut frames = 0u64;
        for (offset, frame) in data.chunks_mut(self.channels).enumerate() {
            let clock = base + offset as u64;
            let mut mixed = 0.0f32;
            for voice in self.voices.iter_mut() {
                if clock >= voice.start_frame && voice.position < voice.samples.len() {
                    mixed += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            for out in frame.iter_mut() {
                *out = mixed;
            }
            frames += 1;
        }
        self.frames_rendered.fetch_add(frames, Ordering::Release);

        let completions = &self.completions;
        self.voices.retain(|voice| {
            if voice.position >= voice.samples.len() {
                let _ = completions.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: only the owning `CpalPlaybackDevice` touches the stream.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Output context backed by a CPAL stream.
pub struct CpalPlaybackDevice {
    sample_rate: u32,
    device_rate: u32,
    stream: Option<SendableStream>,
    commands: Sender<MixerCommand>,
    frames_rendered: Arc<AtomicU64>,
    next_id: SourceId,
}

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    crate::audio::capture::with_suppressed_stderr(|| {
        let host = cpal::default_host();
        if let Some(name) = device_name {
            return host
                .output_devices()
                .map_err(|e| GreenlightError::AudioPlayback {
                    message: format!("Failed to enumerate output devices: {}", e),
                })?
                .find(|dev| dev.name().is_ok_and(|n| n == name))
                .ok_or_else(|| GreenlightError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
        }
        host.default_output_device()
            .ok_or_else(|| GreenlightError::AudioPlayback {
                message: "no output device available".to_string(),
            })
    })
}

/// Mono at the requested rate, then stereo, then the device default.
fn choose_output_config(device: &cpal::Device, sample_rate: u32) -> Result<cpal::StreamConfig> {
    let rate = sample_rate as cpal::SampleRate;
    let supports = |channels: u16| {
        device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
        })
    };

    if let Some(config) = supports(1).or_else(|| supports(2)) {
        return Ok(config.with_sample_rate(rate).config());
    }

    let default = device
        .default_output_config()
        .map_err(|e| GreenlightError::AudioPlayback {
            message: format!("Failed to query default output config: {}", e),
        })?;
    if default.sample_format() != cpal::SampleFormat::F32 {
        return Err(GreenlightError::AudioPlayback {
            message: format!(
                "Unsupported output sample format: {:?}",
                default.sample_format()
            ),
        });
    }
    Ok(default.config())
}

impl CpalPlaybackDevice {
    /// Open the output device and start rendering silence.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> Result<Self> {
        let device = find_output_device(device_name)?;
        let config = choose_output_config(&device, sample_rate)?;
        let device_rate = config.sample_rate;
        let channels = config.channels as usize;

        let (commands, receiver) = crossbeam_channel::unbounded();
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let mut mixer = Mixer {
            commands: receiver,
            voices: Vec::new(),
            frames_rendered: Arc::clone(&frames_rendered),
            completions,
            channels: channels.max(1),
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data),
                |err| tracing::error!(error = %err, "audio output stream error"),
                None,
            )
            .map_err(|e| GreenlightError::AudioPlayback {
                message: format!("Failed to build output stream: {}", e),
            })?;
        stream.play().map_err(|e| GreenlightError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            device_rate,
            channels,
            "audio playback initialized"
        );

        Ok(Self {
            sample_rate,
            device_rate,
            stream: Some(SendableStream(stream)),
            commands,
            frames_rendered,
            next_id: 1,
        })
    }
}

impl DeviceContext for CpalPlaybackDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| GreenlightError::AudioPlayback {
                message: format!("Failed to stop output stream: {}", e),
            })?;
            tracing::debug!("playback context closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        if self.stream.is_none() {
            return Err(GreenlightError::AudioPlayback {
                message: "device is closed".to_string(),
            });
        }
        let samples: Vec<f32> = resample(&buffer.samples, buffer.sample_rate, self.device_rate)
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect();
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;

        let id = self.next_id;
        self.next_id += 1;
        self.commands
            .send(MixerCommand::Play {
                id,
                samples,
                start_frame,
            })
            .map_err(|_| GreenlightError::AudioPlayback {
                message: "output stream has stopped".to_string(),
            })?;
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        let _ = self.commands.send(MixerCommand::Stop(id));
    }
}
