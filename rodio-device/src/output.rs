use std::fs::File;
use std::io::{Read, Seek};
use std::num::NonZeroUsize;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Error;
use rodio::decoder::DecoderError;
use rodio::{OutputStream, Sink, Source};
use stream_download::http::{HttpStream, reqwest::Client};
use stream_download::source::SourceStream;
use stream_download::storage::bounded::BoundedStorageProvider;
use stream_download::storage::memory::MemoryStorageProvider;
use stream_download::{Settings, StreamDownload};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::{AudioDevice, DeviceEvent, LoadId, MediaError, MediaErrorKind, ReadyState};

/// How often the position watcher reports the playback position.
const POSITION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound of the in-memory buffer for streamed sources.
const STREAM_BUFFER_BYTES: NonZeroUsize = NonZeroUsize::new(512 * 1024).unwrap();

/// A drained sink this close to the known end counts as played to the end.
const END_SLACK_SECONDS: f64 = 2.0;

type StreamReader = StreamDownload<BoundedStorageProvider<MemoryStorageProvider>>;

/// The source currently owned by the sink. Loader threads only touch the
/// sink while holding this lock and while their load id is still current.
struct LoadSlot {
    load_id: LoadId,
    ready_state: ReadyState,
    /// Target of a seek the watcher has not sampled yet.
    seeked_to: Option<f64>,
}

impl LoadSlot {
    /// Moves to `ready_state` if `load_id` still owns the slot.
    fn advance(&mut self, load_id: LoadId, ready_state: ReadyState) -> bool {
        if self.load_id != load_id {
            return false;
        }
        self.ready_state = ready_state;
        true
    }
}

fn lock(slot: &Mutex<LoadSlot>) -> MutexGuard<'_, LoadSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`AudioDevice`] playing local files and HTTP streams through a rodio
/// [`Sink`].
pub struct RodioDevice {
    sink: Arc<Sink>,
    _stream: OutputStream,
    runtime: Handle,
    slot: Arc<Mutex<LoadSlot>>,
    source_url: String,
    events: Option<Sender<DeviceEvent>>,
}

impl RodioDevice {
    /// Opens the default output. `runtime` drives HTTP streaming.
    pub fn new(runtime: Handle) -> Result<Self, Error> {
        let stream = rodio::OutputStreamBuilder::open_default_stream()?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();

        Ok(Self {
            sink: Arc::new(sink),
            _stream: stream,
            runtime,
            slot: Arc::new(Mutex::new(LoadSlot {
                load_id: LoadId::NONE,
                ready_state: ReadyState::HaveNothing,
                seeked_to: None,
            })),
            source_url: String::new(),
            events: None,
        })
    }

    fn current_load(&self) -> LoadId {
        lock(&self.slot).load_id
    }

    fn emit(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl AudioDevice for RodioDevice {
    fn subscribe(&mut self, events: Sender<DeviceEvent>) {
        if self.events.is_some() {
            debug!("Replacing audio device event subscriber");
        }
        self.events = Some(events);
    }

    fn load(&mut self, load_id: LoadId, url: &str) {
        {
            let mut slot = lock(&self.slot);
            self.sink.clear();
            slot.load_id = load_id;
            slot.ready_state = ReadyState::HaveNothing;
            slot.seeked_to = None;
        }
        self.source_url = url.to_string();

        let Some(events) = self.events.clone() else {
            warn!("Loading {url} without an event subscriber");
            return;
        };
        let loader = Loader {
            load_id,
            url: url.to_string(),
            sink: Arc::clone(&self.sink),
            slot: Arc::clone(&self.slot),
            runtime: self.runtime.clone(),
            events,
        };
        let spawned = thread::Builder::new()
            .name(format!("audio-load-{}", load_id.0))
            .spawn(move || loader.run());
        if let Err(error) = spawned {
            error!("Could not spawn audio loader thread: {error}");
            self.emit(DeviceEvent::Error {
                load_id,
                error: MediaError::new(MediaErrorKind::Aborted, url, error.to_string()),
            });
        }
    }

    fn unload(&mut self) {
        let mut slot = lock(&self.slot);
        self.sink.clear();
        slot.load_id = LoadId::NONE;
        slot.ready_state = ReadyState::HaveNothing;
        slot.seeked_to = None;
        self.source_url.clear();
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let load_id = self.current_load();
        if self.sink.empty() {
            return Err(MediaError::new(
                MediaErrorKind::Aborted,
                &self.source_url,
                "no audio source loaded",
            ));
        }
        self.sink.play();
        self.emit(DeviceEvent::Playing { load_id });
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
        let load_id = self.current_load();
        if load_id != LoadId::NONE {
            self.emit(DeviceEvent::Paused { load_id });
        }
    }

    fn seek(&mut self, position: f64) {
        if !position.is_finite() {
            return;
        }
        let target = Duration::from_secs_f64(position.max(0.0));
        match self.sink.try_seek(target) {
            Ok(()) => lock(&self.slot).seeked_to = Some(target.as_secs_f64()),
            Err(error) => warn!(
                "Could not seek {} to {target:?}: {error}",
                &self.source_url
            ),
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.slot).ready_state
    }
}

enum LoadOutcome {
    Appended(Option<Duration>),
    Superseded,
}

/// Opens one source on a background thread and then watches its position
/// until it ends or another load replaces it.
struct Loader {
    load_id: LoadId,
    url: String,
    sink: Arc<Sink>,
    slot: Arc<Mutex<LoadSlot>>,
    runtime: Handle,
    events: Sender<DeviceEvent>,
}

impl Loader {
    fn run(self) {
        let load_id = self.load_id;
        debug!("Open source: {}", &self.url);
        let duration = match self.open() {
            Ok(LoadOutcome::Appended(duration)) => duration,
            Ok(LoadOutcome::Superseded) => {
                debug!("Load {} superseded before it finished", load_id.0);
                return;
            }
            Err(error) => {
                let _ = self.events.send(DeviceEvent::Error { load_id, error });
                return;
            }
        };
        debug!("Duration: {:?}", duration);

        let duration = duration.map(|d| d.as_secs_f64());
        let _ = self.events.send(DeviceEvent::LoadedMetadata { load_id, duration });
        let _ = self.events.send(DeviceEvent::CanPlay { load_id });

        self.watch(duration);
    }

    fn open(&self) -> Result<LoadOutcome, MediaError> {
        if is_remote(&self.url) {
            let (reader, byte_len) = self
                .runtime
                .block_on(open_http_stream(&self.url))
                .map_err(|error| {
                    MediaError::new(MediaErrorKind::Network, &self.url, format!("{error:#}"))
                })?;
            // seeking outside the buffered window re-requests the byte range
            let source =
                seekable_decoder(reader, byte_len).map_err(|error| self.decode_error(error))?;
            self.probed();
            Ok(self.append(source))
        } else {
            let path = self.url.strip_prefix("file://").unwrap_or(&self.url);
            let file = File::open(path).map_err(|error| {
                MediaError::new(MediaErrorKind::SourceNotSupported, &self.url, error.to_string())
            })?;
            let byte_len = file
                .metadata()
                .map_err(|error| {
                    MediaError::new(MediaErrorKind::Aborted, &self.url, error.to_string())
                })?
                .len();
            let source = seekable_decoder(file, Some(byte_len))
                .map_err(|error| self.decode_error(error))?;
            self.probed();
            Ok(self.append(source))
        }
    }

    fn probed(&self) {
        lock(&self.slot).advance(self.load_id, ReadyState::HaveMetadata);
    }

    fn append<S>(&self, source: S) -> LoadOutcome
    where
        S: Source + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if !slot.advance(self.load_id, ReadyState::HaveEnoughData) {
            return LoadOutcome::Superseded;
        }
        let duration = source.total_duration();
        self.sink.append(source);
        LoadOutcome::Appended(duration)
    }

    fn watch(&self, duration: Option<f64>) {
        let mut last_position = 0.0;
        loop {
            thread::sleep(POSITION_POLL_INTERVAL);
            let mut slot = lock(&self.slot);
            if slot.load_id != self.load_id {
                break;
            }
            if let Some(target) = slot.seeked_to.take() {
                last_position = target;
            }
            if self.sink.empty() {
                slot.ready_state = ReadyState::HaveNothing;
                drop(slot);
                let event = drained_event(self.load_id, &self.url, last_position, duration);
                match &event {
                    DeviceEvent::Error { error, .. } => warn!("Source stopped early: {error}"),
                    _ => debug!("Play finished: {}", &self.url),
                }
                let _ = self.events.send(event);
                break;
            }
            drop(slot);
            last_position = self.sink.get_pos().as_secs_f64();
            if self.sink.is_paused() {
                continue;
            }
            let sent = self.events.send(DeviceEvent::TimeUpdate {
                load_id: self.load_id,
                position: last_position,
            });
            if sent.is_err() {
                break;
            }
        }
    }

    fn decode_error(&self, error: DecoderError) -> MediaError {
        let kind = decoder_error_kind(&error, is_remote(&self.url));
        MediaError::new(kind, &self.url, error.to_string())
    }
}

/// The decoder gives no read errors back once playing: a broken stream
/// just stops. Draining well before the known end is therefore reported
/// as a failure, not as the end of the track.
fn drained_event(
    load_id: LoadId,
    url: &str,
    last_position: f64,
    duration: Option<f64>,
) -> DeviceEvent {
    let Some(duration) = duration.filter(|duration| duration.is_finite() && *duration > 0.0)
    else {
        return DeviceEvent::Ended { load_id };
    };
    // length estimates of VBR streams are a bit off
    let slack = END_SLACK_SECONDS.max(duration * 0.02);
    if last_position + slack >= duration {
        return DeviceEvent::Ended { load_id };
    }
    let kind = if is_remote(url) {
        MediaErrorKind::Network
    } else {
        MediaErrorKind::Decode
    };
    DeviceEvent::Error {
        load_id,
        error: MediaError::new(
            kind,
            url,
            format!("source ended at {last_position:.1}s of {duration:.1}s"),
        ),
    }
}

/// Both local files and HTTP streams support random access. Without the
/// byte length some formats cannot tell their duration.
fn seekable_decoder<R>(data: R, byte_len: Option<u64>) -> Result<rodio::Decoder<R>, DecoderError>
where
    R: Read + Seek + Send + Sync + 'static,
{
    let mut builder = rodio::Decoder::builder()
        .with_data(data)
        .with_seekable(true);
    if let Some(byte_len) = byte_len {
        builder = builder.with_byte_len(byte_len);
    }
    builder.build()
}

fn decoder_error_kind(error: &DecoderError, remote: bool) -> MediaErrorKind {
    match error {
        DecoderError::UnrecognizedFormat => MediaErrorKind::SourceNotSupported,
        DecoderError::IoError(_) if remote => MediaErrorKind::Network,
        _ => MediaErrorKind::Decode,
    }
}

fn is_remote(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    url.starts_with("http://") || url.starts_with("https://")
}

async fn open_http_stream(url: &str) -> Result<(StreamReader, Option<u64>), Error> {
    let client = Client::builder().build()?;
    let stream = HttpStream::new(client, url.parse()?).await?;
    let byte_len = stream.content_length();
    debug!(
        "content type={:?}, length={:?}",
        stream.content_type(),
        byte_len
    );

    let reader = StreamDownload::from_stream(
        stream,
        // at most STREAM_BUFFER_BYTES of the stream stay in memory
        BoundedStorageProvider::new(MemoryStorageProvider, STREAM_BUFFER_BYTES),
        Settings::default(),
    )
    .await?;
    Ok((reader, byte_len))
}
