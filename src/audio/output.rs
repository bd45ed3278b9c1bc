// src/audio/output.rs
//! cpal-based output backend. A compressed file is decoded to raw PCM by an
//! external ffmpeg process; decoded chunks flow through a bounded shared
//! buffer into the device callback, so decode speed is capped by playback
//! speed. The whole stream lives on a blocking thread because cpal streams
//! must not cross await points.

use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};
use tracing::{debug, info, warn};

use crate::audio::AudioBackend;

/// Output backend selecting the device by substring of its name (Bluetooth
/// speakers tend to report verbose names). A missing device is a silent,
/// successful skip.
pub struct CpalBackend {
    device_name: String,
}

impl CpalBackend {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }

    /// Names of all available output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let names = host
            .output_devices()
            .context("failed to enumerate output devices")?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(names)
    }
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn play(&self, path: &Path) -> Result<()> {
        let device_name = self.device_name.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || stream_file(&device_name, &path))
            .await
            .context("playback thread panicked")?
    }
}

fn find_device(name: &str) -> Result<Option<Device>> {
    let host = cpal::default_host();
    let mut devices = host
        .output_devices()
        .context("failed to enumerate output devices")?;
    Ok(devices.find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false)))
}

/// Decoded-sample buffer shared between the ffmpeg reader and the device
/// callback. One condvar serves both directions: the reader waits for room,
/// and for full drain at end of stream. A stream error marks the buffer
/// dead so blocked waiters bail instead of waiting on a callback that will
/// never fire again.
struct SampleBuf {
    queue: Mutex<VecDeque<i16>>,
    cond: Condvar,
    dead: AtomicBool,
}

impl SampleBuf {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            dead: AtomicBool::new(false),
        }
    }

    /// Called from the stream error callback. Takes the lock so a waiter
    /// cannot miss the wakeup between its dead-check and its wait.
    fn mark_dead(&self) {
        let _q = self.queue.lock().expect("sample buffer poisoned");
        self.dead.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Push samples, blocking while the buffer holds `cap` or more.
    fn push_blocking(&self, samples: &[i16], cap: usize) -> Result<()> {
        let mut i = 0;
        while i < samples.len() {
            let mut q = self.queue.lock().expect("sample buffer poisoned");
            loop {
                if self.is_dead() {
                    bail!("output stream reported an error");
                }
                if q.len() < cap {
                    break;
                }
                q = self.cond.wait(q).expect("sample buffer poisoned");
            }
            let take = (cap - q.len()).min(samples.len() - i);
            q.extend(&samples[i..i + take]);
            i += take;
        }
        Ok(())
    }

    /// Block until the callback has consumed everything.
    fn wait_drained(&self) -> Result<()> {
        let mut q = self.queue.lock().expect("sample buffer poisoned");
        while !q.is_empty() {
            if self.is_dead() {
                bail!("output stream reported an error");
            }
            let (guard, _) = self
                .cond
                .wait_timeout(q, Duration::from_millis(200))
                .expect("sample buffer poisoned");
            q = guard;
        }
        Ok(())
    }

    /// Pop up to `data.len()` samples into the callback slice, zero-filling
    /// on underrun, and wake the reader.
    fn fill<T, F: Fn(i16) -> T>(&self, data: &mut [T], convert: F, silence: T)
    where
        T: Copy,
    {
        {
            let mut q = self.queue.lock().expect("sample buffer poisoned");
            for slot in data.iter_mut() {
                *slot = match q.pop_front() {
                    Some(s) => convert(s),
                    None => silence,
                };
            }
        }
        self.cond.notify_all();
    }
}

fn spawn_decoder(path: &Path, channels: u16, sample_rate: u32) -> Result<Child> {
    Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-f",
            "s16le",
            "-ac",
            &channels.to_string(),
            "-ar",
            &sample_rate.to_string(),
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn ffmpeg decoder")
}

/// Blocking body: decode `path` and stream it to the named device. Returns
/// only after the device has drained the last sample.
fn stream_file(device_name: &str, path: &Path) -> Result<()> {
    let Some(device) = find_device(device_name)? else {
        info!(device = %device_name, "output device not found, skipping playback");
        return Ok(());
    };

    let supported = device
        .default_output_config()
        .context("failed to read device output config")?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();

    let mut child = spawn_decoder(path, channels, sample_rate)?;
    let result = stream_decoded(
        &device,
        &stream_config,
        sample_format,
        sample_rate,
        channels,
        &mut child,
        path,
    );
    if result.is_err() {
        // Decoder may still be running if the stream failed first.
        let _ = child.kill();
        let _ = child.wait();
        return result;
    }

    let status = child.wait().context("waiting for ffmpeg failed")?;
    if !status.success() {
        bail!("ffmpeg exited with {status}");
    }
    debug!(file = %path.display(), "playback finished");
    Ok(())
}

fn stream_decoded(
    device: &Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
    child: &mut Child,
    path: &Path,
) -> Result<()> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdout missing"))?;

    let buf = Arc::new(SampleBuf::new());
    // About one second of audio between decoder and device.
    let cap = sample_rate as usize * channels as usize;

    let consumer = Arc::clone(&buf);
    let on_error = Arc::clone(&buf);
    let err_cb = move |e| {
        warn!(error = ?e, "audio stream error");
        on_error.mark_dead();
    };
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _| {
                consumer.fill(data, |s| s as f32 / 32768.0, 0.0);
            },
            err_cb,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _| {
                consumer.fill(data, |s| s, 0);
            },
            err_cb,
            None,
        )?,
        other => bail!("unsupported device sample format {other:?}"),
    };
    stream.play().context("failed to start audio stream")?;

    // Read decoded PCM; an odd trailing byte carries into the next chunk.
    let mut raw = [0u8; 8192];
    let mut carry: Option<u8> = None;
    loop {
        let n = stdout
            .read(&mut raw)
            .with_context(|| format!("reading decoded audio for {}", path.display()))?;
        if n == 0 {
            break;
        }

        let mut bytes: Vec<u8> = Vec::with_capacity(n + 1);
        if let Some(b) = carry.take() {
            bytes.push(b);
        }
        bytes.extend_from_slice(&raw[..n]);
        if bytes.len() % 2 == 1 {
            carry = bytes.pop();
        }

        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        buf.push_blocking(&samples, cap)?;
    }

    // Completion means drained through the device, not merely decoded.
    buf.wait_drained()?;
    std::thread::sleep(Duration::from_millis(250));
    drop(stream);
    Ok(())
}

/// Convenience for config handling: removes paths that do not exist so a
/// missing chime/silence clip degrades to "no clip" rather than an error on
/// every playback.
pub fn existing_clip(path: Option<PathBuf>) -> Option<PathBuf> {
    match path {
        Some(p) if p.exists() => Some(p),
        Some(p) => {
            warn!(clip = %p.display(), "audio clip not found, continuing without it");
            None
        }
        None => None,
    }
}
