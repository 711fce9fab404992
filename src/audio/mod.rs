/// Audio boundary - voice triggering and per-path effect chains
///
/// The sequencer only talks to [`AudioBackend`] and [`EffectChain`].
/// [`AudioOutput`] is the cpal implementation: an in-memory sample bank and a
/// voice mixer running inside the output stream callback.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::{ChainError, VoiceError};
use crate::grid::PathId;
use crate::{Error, Result};

/// One sample start handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceRequest<'a> {
    /// Path whose effect chain the voice plays through.
    pub path: PathId,
    pub sample: &'a str,
    /// Transport time in seconds.
    pub start_time: f64,
    /// Offset into the sample, in seconds.
    pub offset: f64,
    pub duration: f64,
}

/// Persistent per-path chain: delay, distortion, pitch shift, volume, pan.
pub trait EffectChain {
    fn set_delay_time(&mut self, seconds: f64);
    fn set_feedback(&mut self, amount: f64);
    fn set_delay_wet(&mut self, wet: f64);
    fn set_distortion(&mut self, amount: f64);
    fn set_distortion_wet(&mut self, wet: f64);
    fn set_pitch(&mut self, semitones: f64);
    fn set_pitch_wet(&mut self, wet: f64);
    fn set_gain(&mut self, gain: f64);
    /// `-1..=1`.
    fn set_pan(&mut self, pan: f64);
    /// Releases the chain's audio resources.
    fn dispose(&mut self) -> std::result::Result<(), ChainError>;
}

pub trait AudioBackend {
    type Chain: EffectChain;

    /// Fire-and-forget sample start.
    fn start_voice(&mut self, voice: &VoiceRequest<'_>) -> std::result::Result<(), VoiceError>;

    /// Silences every playing and pending voice.
    fn stop_all(&mut self);

    fn create_chain(&mut self, path: PathId) -> Self::Chain;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainParams {
    pub delay_time: f64,
    pub feedback: f64,
    pub delay_wet: f64,
    pub distortion: f64,
    pub distortion_wet: f64,
    pub pitch: f64,
    pub pitch_wet: f64,
    pub gain: f64,
    pub pan: f64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            delay_time: 0.05,
            feedback: 0.0,
            delay_wet: 0.0,
            distortion: 0.0,
            distortion_wet: 0.0,
            pitch: 0.0,
            pitch_wet: 0.0,
            gain: 1.0,
            pan: 0.0,
        }
    }
}

impl ChainParams {
    /// Playback-rate factor for the pitch stage.
    fn rate(&self) -> f64 {
        if self.pitch_wet > 0.0 {
            2f64.powf(self.pitch / 12.0)
        } else {
            1.0
        }
    }

    /// Equal-power left/right gains.
    fn pan_gains(&self) -> (f32, f32) {
        let angle = (self.pan.clamp(-1.0, 1.0) + 1.0) * std::f64::consts::FRAC_PI_4;
        ((angle.cos() * self.gain) as f32, (angle.sin() * self.gain) as f32)
    }
}

struct Sample {
    data: Arc<Vec<f32>>,
    sample_rate: f32,
}

struct Voice {
    path: PathId,
    data: Arc<Vec<f32>>,
    start_time: f64,
    end_time: f64,
    position: f64,
    step: f64,
}

#[derive(Default)]
struct Mixer {
    samples: HashMap<String, Sample>,
    voices: Vec<Voice>,
    chains: HashMap<PathId, ChainParams>,
}

impl Mixer {
    /// Mixes all voices into an interleaved buffer starting at transport
    /// time `now`.
    fn render(&mut self, data: &mut [f32], channels: usize, sample_rate: f32, now: f64) {
        for sample in data.iter_mut() {
            *sample = 0.0;
        }
        let frame_len = 1.0 / sample_rate as f64;
        let chains = &self.chains;
        self.voices.retain_mut(|voice| {
            let params = chains.get(&voice.path).copied().unwrap_or_default();
            let (left, right) = params.pan_gains();
            let rate = voice.step * params.rate();
            for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                let t = now + i as f64 * frame_len;
                if t < voice.start_time {
                    continue;
                }
                let index = voice.position as usize;
                if t >= voice.end_time || index >= voice.data.len() {
                    return false;
                }
                let s = voice.data[index];
                frame[0] += s * left;
                if frame.len() > 1 {
                    frame[1] += s * right;
                }
                voice.position += rate;
            }
            true
        });
    }
}

/// Per-path chain parameters living inside the shared mixer.
pub struct MixChain {
    path: PathId,
    mixer: Arc<Mutex<Mixer>>,
    disposed: bool,
}

impl MixChain {
    fn update(&mut self, f: impl FnOnce(&mut ChainParams)) {
        if self.disposed {
            return;
        }
        if let Ok(mut mixer) = self.mixer.lock() {
            f(mixer.chains.entry(self.path).or_default());
        }
    }

    pub fn params(&self) -> Option<ChainParams> {
        self.mixer.lock().ok()?.chains.get(&self.path).copied()
    }
}

impl EffectChain for MixChain {
    fn set_delay_time(&mut self, seconds: f64) {
        self.update(|p| p.delay_time = seconds);
    }

    fn set_feedback(&mut self, amount: f64) {
        self.update(|p| p.feedback = amount);
    }

    fn set_delay_wet(&mut self, wet: f64) {
        self.update(|p| p.delay_wet = wet);
    }

    fn set_distortion(&mut self, amount: f64) {
        self.update(|p| p.distortion = amount);
    }

    fn set_distortion_wet(&mut self, wet: f64) {
        self.update(|p| p.distortion_wet = wet);
    }

    fn set_pitch(&mut self, semitones: f64) {
        self.update(|p| p.pitch = semitones);
    }

    fn set_pitch_wet(&mut self, wet: f64) {
        self.update(|p| p.pitch_wet = wet);
    }

    fn set_gain(&mut self, gain: f64) {
        self.update(|p| p.gain = gain);
    }

    fn set_pan(&mut self, pan: f64) {
        self.update(|p| p.pan = pan);
    }

    fn dispose(&mut self) -> std::result::Result<(), ChainError> {
        if self.disposed {
            return Err(ChainError::AlreadyDisposed(self.path));
        }
        self.disposed = true;
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| ChainError::Backend("mixer lock poisoned".into()))?;
        mixer.chains.remove(&self.path);
        mixer.voices.retain(|v| v.path != self.path);
        Ok(())
    }
}

/// Audio output using cpal
pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: f32,
}

impl AudioOutput {
    /// Opens the default output device. `origin` is the transport's zero,
    /// normally [`ThreadClock::origin`](crate::ThreadClock::origin).
    pub fn new(origin: Instant) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (stream, sample_rate) = Self::setup_audio_stream(Arc::clone(&mixer), origin)?;

        Ok(Self {
            _stream: Some(stream),
            mixer,
            sample_rate,
        })
    }

    fn setup_audio_stream(mixer: Arc<Mutex<Mixer>>, origin: Instant) -> Result<(cpal::Stream, f32)> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::DeviceNotAvailable)?;
        let config = device.default_output_config()?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        info!(sample_rate, channels, "audio output");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let now = origin.elapsed().as_secs_f64();
                    match mixer.lock() {
                        Ok(mut mixer) => mixer.render(data, channels, sample_rate, now),
                        Err(_) => data.iter_mut().for_each(|s| *s = 0.0),
                    }
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )?,
            other => {
                warn!(?other, "unsupported sample format");
                return Err(Error::DeviceNotAvailable);
            }
        };

        stream.play()?;
        Ok((stream, sample_rate))
    }

    pub fn is_live(&self) -> bool {
        self._stream.is_some()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Adds a mono sample recorded at `sample_rate`.
    pub fn register_sample(&mut self, name: impl Into<String>, data: Vec<f32>, sample_rate: f32) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.samples.insert(
                name.into(),
                Sample {
                    data: Arc::new(data),
                    sample_rate,
                },
            );
        }
    }

    pub fn has_sample(&self, name: &str) -> bool {
        self.mixer
            .lock()
            .map(|m| m.samples.contains_key(name))
            .unwrap_or(false)
    }

    /// Loads a WAV file, downmixed to mono.
    pub fn load_wav(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };
        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        let name = name.into();
        info!(sample = %name, path = %path.as_ref().display(), "loaded sample");
        self.register_sample(name, mono, spec.sample_rate as f32);
        Ok(())
    }

    pub fn active_voices(&self) -> usize {
        self.mixer.lock().map(|m| m.voices.len()).unwrap_or(0)
    }
}

impl Default for AudioOutput {
    /// Silent output: voices are accepted and mixed nowhere.
    fn default() -> Self {
        Self {
            _stream: None,
            mixer: Arc::new(Mutex::new(Mixer::default())),
            sample_rate: 44_100.0,
        }
    }
}

impl AudioBackend for AudioOutput {
    type Chain = MixChain;

    fn start_voice(&mut self, voice: &VoiceRequest<'_>) -> std::result::Result<(), VoiceError> {
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| VoiceError::Backend("mixer lock poisoned".into()))?;
        let sample = mixer
            .samples
            .get(voice.sample)
            .ok_or_else(|| VoiceError::SampleNotLoaded(voice.sample.to_string()))?;
        let data = Arc::clone(&sample.data);
        let step = sample.sample_rate as f64 / self.sample_rate as f64;
        let position = voice.offset.max(0.0) * sample.sample_rate as f64;
        mixer.voices.push(Voice {
            path: voice.path,
            data,
            start_time: voice.start_time,
            end_time: voice.start_time + voice.duration,
            position,
            step,
        });
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.clear();
        }
    }

    fn create_chain(&mut self, path: PathId) -> MixChain {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.chains.insert(path, ChainParams::default());
        }
        MixChain {
            path,
            mixer: Arc::clone(&self.mixer),
            disposed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sample: &str, start_time: f64) -> VoiceRequest<'_> {
        VoiceRequest {
            path: PathId(1),
            sample,
            start_time,
            offset: 0.0,
            duration: 1.0,
        }
    }

    #[test]
    fn test_unknown_sample_is_rejected() {
        let mut out = AudioOutput::default();
        assert_eq!(
            out.start_voice(&request("kick", 0.0)),
            Err(VoiceError::SampleNotLoaded("kick".into()))
        );
        out.register_sample("kick", vec![1.0; 16], 44_100.0);
        assert!(out.start_voice(&request("kick", 0.0)).is_ok());
        assert_eq!(out.active_voices(), 1);
        out.stop_all();
        assert_eq!(out.active_voices(), 0);
    }

    #[test]
    fn test_render_waits_for_start_and_pans() {
        let mut out = AudioOutput::default();
        out.register_sample("tone", vec![0.5; 64], 44_100.0);
        let mut chain = out.create_chain(PathId(1));
        chain.set_pan(1.0);
        let start = 3.5 / 44_100.0;
        out.start_voice(&request("tone", start)).unwrap();

        let mut buf = vec![0.0f32; 16];
        out.mixer.lock().unwrap().render(&mut buf, 2, 44_100.0, 0.0);
        // frames 0..4 are silent, then right channel only
        assert!(buf[..8].iter().all(|s| *s == 0.0));
        assert!(buf[8].abs() < 1e-6);
        assert!((buf[9] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dispose_drops_chain_and_voices() {
        let mut out = AudioOutput::default();
        out.register_sample("tone", vec![0.5; 64], 44_100.0);
        let mut chain = out.create_chain(PathId(1));
        chain.set_gain(0.25);
        assert_eq!(chain.params().unwrap().gain, 0.25);
        out.start_voice(&request("tone", 0.0)).unwrap();

        assert!(chain.dispose().is_ok());
        assert_eq!(out.active_voices(), 0);
        assert!(chain.params().is_none());
        assert_eq!(chain.dispose(), Err(ChainError::AlreadyDisposed(PathId(1))));
    }
}
