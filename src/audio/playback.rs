//! Audio playback to speakers
//!
//! Encoded MP3 is written into an [`AudioSink`] as it arrives from the
//! network. A dedicated thread decodes it and feeds the default output device,
//! so playback starts before the download finishes.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Output device that plays encoded audio
pub trait AudioOutput: Send + Sync {
    /// Begin one playback
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot be opened
    fn open(&self) -> Result<Box<dyn AudioSink>>;
}

/// Receives the encoded audio of one playback
///
/// Dropping the sink stops playback.
#[async_trait]
pub trait AudioSink: Send {
    /// Queue a chunk of encoded audio
    ///
    /// # Errors
    ///
    /// Returns error if playback has already failed
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Signal end of input and wait until everything queued has played
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }
}

impl AudioOutput for AudioPlayback {
    fn open(&self) -> Result<Box<dyn AudioSink>> {
        let (chunks_tx, chunks_rx) = std_mpsc::channel::<Vec<u8>>();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let config = self.config.clone();
        let thread_cancel = Arc::clone(&cancel);
        std::thread::Builder::new()
            .name("voxchat-playback".to_string())
            .spawn(move || {
                let reader = ChunkReader::new(chunks_rx);
                let result = play_stream(&config, reader, &thread_cancel);
                let _ = done_tx.send(result);
            })?;

        Ok(Box::new(SpeakerSink {
            chunks: Some(chunks_tx),
            cancel,
            done: Some(done_rx),
            completed: false,
        }))
    }
}

struct SpeakerSink {
    chunks: Option<std_mpsc::Sender<Vec<u8>>>,
    cancel: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<Result<()>>>,
    completed: bool,
}

#[async_trait]
impl AudioSink for SpeakerSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let sender = self
            .chunks
            .as_ref()
            .ok_or_else(|| Error::Audio("playback already finished".to_string()))?;
        sender
            .send(chunk.to_vec())
            .map_err(|_| Error::Audio("playback thread stopped".to_string()))
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing the channel is end of input for the decoder
        self.chunks.take();

        let done = self
            .done
            .take()
            .ok_or_else(|| Error::Audio("playback already finished".to_string()))?;
        let result = done
            .await
            .map_err(|_| Error::Audio("playback thread exited unexpectedly".to_string()))?;
        self.completed = true;
        result
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        if !self.completed {
            self.cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// Blocking [`Read`] over chunks arriving on a channel
struct ChunkReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    const fn new(rx: std_mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decode MP3 from `reader` and play it until input ends or `cancel` is set
fn play_stream(config: &StreamConfig, reader: ChunkReader, cancel: &AtomicBool) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = config.channels as usize;
    let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
    let queue_clone = Arc::clone(&queue);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue_clone.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let mut decoder = minimp3::Decoder::new(reader);
    let mut decoded = 0usize;

    while !cancel.load(Ordering::Relaxed) {
        match decoder.next_frame() {
            Ok(frame) => {
                let samples = frame_to_mono(&frame);
                decoded += samples.len();
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(samples);
            }
            Err(minimp3::Error::SkippedData) => {}
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    // Let the device drain what was queued
    while !cancel.load(Ordering::Relaxed)
        && !queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    {
        std::thread::sleep(Duration::from_millis(50));
    }

    if !cancel.load(Ordering::Relaxed) {
        // Small delay to ensure audio finishes
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = decoded, "playback complete");

    Ok(())
}

/// Convert one decoded frame to mono f32 samples
fn frame_to_mono(frame: &minimp3::Frame) -> Vec<f32> {
    if frame.channels == 2 {
        // Stereo: average channels
        frame
            .data
            .chunks(2)
            .map(|chunk| {
                let left = f32::from(chunk[0]) / 32768.0;
                let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                f32::midpoint(left, right)
            })
            .collect()
    } else {
        frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}
