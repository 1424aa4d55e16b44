//! Local audio output as a voice gateway.
//!
//! The speaker plays into the default output device, which stands in for a
//! single voice channel that everybody is in. Every stream source is read by
//! an `ffmpeg` child process that emits raw 16-bit PCM on its standard
//! output. The PCM is cut into short buffers and appended to a `rodio` sink.
//! At most [`SpeakerConnection::MAX_BUFFERED`] buffers are queued at a time,
//! so reading stalls while the device catches up.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use rodio::{buffer::SamplesBuffer, source::EmptyCallback, OutputStream, OutputStreamHandle, Sink};
use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    process::{Child, Command},
    sync::{watch, Semaphore},
    task::JoinHandle,
};

use crate::{
    chat::{ChannelId, GuildId, UserId},
    config::Config,
    error::{Error, Result},
    voice::{PlaybackState, TransportOptions, VoiceConnection, VoiceGateway},
};

pub struct Speaker {
    ffmpeg: PathBuf,
    handle: OutputStreamHandle,
    /// Dropping this closes the output device.
    _device: mpsc::Sender<()>,
}

impl Speaker {
    /// The one voice channel of the output device.
    pub const CHANNEL: ChannelId = ChannelId(0);

    /// Opens the default output device.
    ///
    /// The output stream cannot move between threads, so it lives on a
    /// thread of its own until the speaker is dropped.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without an output device, `Unavailable` if it
    /// cannot be opened.
    pub fn open(config: &Config) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (close_tx, close_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".to_owned())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the speaker is dropped.
                    let _ = close_rx.recv();
                    drop(stream);
                    debug!("closed audio output");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| Error::internal("audio output thread exited"))??;
        info!("opened default audio output");

        Ok(Self {
            ffmpeg: config.ffmpeg.clone(),
            handle,
            _device: close_tx,
        })
    }
}

#[async_trait]
impl VoiceGateway for Speaker {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>> {
        if channel != Self::CHANNEL {
            return Err(Error::not_found(format!("no voice channel {channel}")));
        }

        debug!("guild {guild}: connected to audio output");
        Ok(Arc::new(SpeakerConnection::new(
            self.handle.clone(),
            self.ffmpeg.clone(),
        )))
    }

    fn voice_channel(&self, _guild: GuildId, _user: UserId) -> Option<ChannelId> {
        Some(Self::CHANNEL)
    }

    async fn set_self_mute(&self, guild: GuildId, mute: bool) -> Result<()> {
        trace!("guild {guild}: mute {mute}");
        Ok(())
    }
}

/// The stream currently playing.
struct Stream {
    sink: Arc<Sink>,
    feeder: JoinHandle<()>,
}

struct Shared {
    state: watch::Sender<PlaybackState>,
    /// Bumped by every play and stop, so that a replaced stream cannot
    /// report its end.
    streams: AtomicU64,
}

impl Shared {
    /// Marks stream `id` as ended, unless it was replaced.
    fn finish(&self, id: u64) {
        if self.streams.load(Ordering::Acquire) == id {
            self.state.send_replace(PlaybackState::Idle);
        }
    }
}

pub struct SpeakerConnection {
    handle: OutputStreamHandle,
    ffmpeg: PathBuf,
    shared: Arc<Shared>,
    stream: Mutex<Option<Stream>>,
}

impl SpeakerConnection {
    /// 48 kHz stereo.
    const SAMPLE_RATE: u32 = 48_000;
    const CHANNELS: u16 = 2;

    /// 100 ms of 16-bit PCM.
    const BUFFER_BYTES: usize = Self::SAMPLE_RATE as usize / 10 * Self::CHANNELS as usize * 2;

    /// Buffers queued on the sink at most, about one second of audio.
    pub const MAX_BUFFERED: usize = 10;

    fn new(handle: OutputStreamHandle, ffmpeg: PathBuf) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            handle,
            ffmpeg,
            shared: Arc::new(Shared {
                state,
                streams: AtomicU64::new(0),
            }),
            stream: Mutex::new(None),
        }
    }

    fn stream(&self) -> MutexGuard<'_, Option<Stream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_pipe(&self, source: &str, options: &TransportOptions) -> Result<Child> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(pipe_args(source, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        Ok(command.spawn()?)
    }
}

/// Command line of the audio pipe.
fn pipe_args(source: &str, options: &TransportOptions) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .map(str::to_owned)
        .to_vec();
    args.extend(options.before.iter().cloned());
    args.extend(["-i".to_owned(), source.to_owned()]);
    args.extend(options.after.iter().cloned());
    args.extend(["-f", "s16le", "-ar"].map(str::to_owned));
    args.push(SpeakerConnection::SAMPLE_RATE.to_string());
    args.push("-ac".to_owned());
    args.push(SpeakerConnection::CHANNELS.to_string());
    args.push("pipe:1".to_owned());
    args
}

/// Decodes little-endian 16-bit PCM. A trailing odd byte is dropped.
fn samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Moves PCM from `pipe` onto `sink`, holding one permit per queued buffer.
async fn feed<R>(pipe: R, sink: &Sink, permits: &Arc<Semaphore>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(SpeakerConnection::BUFFER_BYTES, pipe);
    let mut total = 0;
    loop {
        let mut pcm = Vec::with_capacity(SpeakerConnection::BUFFER_BYTES);
        let read = (&mut reader)
            .take(SpeakerConnection::BUFFER_BYTES as u64)
            .read_to_end(&mut pcm)
            .await?;
        if read == 0 {
            return Ok(total);
        }
        total += read;

        permits
            .acquire()
            .await
            .map_err(|e| Error::cancelled(e.to_string()))?
            .forget();

        sink.append(SamplesBuffer::new(
            SpeakerConnection::CHANNELS,
            SpeakerConnection::SAMPLE_RATE,
            samples(&pcm),
        ));
        let permits = Arc::clone(permits);
        sink.append(EmptyCallback::<i16>::new(Box::new(move || {
            permits.add_permits(1);
        })));
    }
}

#[async_trait]
impl VoiceConnection for SpeakerConnection {
    fn channel(&self) -> ChannelId {
        Speaker::CHANNEL
    }

    async fn play(&self, source: &str, options: &TransportOptions) -> Result<()> {
        self.stop();

        let mut child = self.spawn_pipe(source, options)?;
        let pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("audio pipe has no output"))?;
        let sink = Arc::new(Sink::try_new(&self.handle)?);

        let id = self.shared.streams.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.state.send_replace(PlaybackState::Playing);

        let shared = Arc::clone(&self.shared);
        let feeder_sink = Arc::clone(&sink);
        let feeder = tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(SpeakerConnection::MAX_BUFFERED));
            match feed(pipe, &feeder_sink, &permits).await {
                Ok(bytes) => trace!("audio pipe delivered {bytes} bytes"),
                Err(e) => warn!("audio pipe failed: {e}"),
            }

            match child.wait().await {
                Ok(status) if !status.success() => warn!("audio pipe exited with {status}"),
                Ok(_) => {}
                Err(e) => warn!("could not wait for audio pipe: {e}"),
            }

            feeder_sink.append(EmptyCallback::<i16>::new(Box::new(move || {
                shared.finish(id);
            })));
        });

        *self.stream() = Some(Stream { sink, feeder });
        Ok(())
    }

    fn stop(&self) {
        self.shared.streams.fetch_add(1, Ordering::AcqRel);
        if let Some(stream) = self.stream().take() {
            stream.feeder.abort();
            stream.sink.stop();
        }
        self.shared.state.send_replace(PlaybackState::Idle);
    }

    fn pause(&self) {
        if let Some(stream) = self.stream().as_ref() {
            stream.sink.pause();
            self.shared.state.send_if_modified(|state| {
                let playing = *state == PlaybackState::Playing;
                if playing {
                    *state = PlaybackState::Paused;
                }
                playing
            });
        }
    }

    fn resume(&self) {
        if let Some(stream) = self.stream().as_ref() {
            stream.sink.play();
            self.shared.state.send_if_modified(|state| {
                let paused = *state == PlaybackState::Paused;
                if paused {
                    *state = PlaybackState::Playing;
                }
                paused
            });
        }
    }

    fn state(&self) -> PlaybackState {
        *self.shared.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    async fn disconnect(&self, _force: bool) -> Result<()> {
        self.stop();
        debug!("disconnected from audio output");
        Ok(())
    }
}
