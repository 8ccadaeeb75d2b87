// Pipeline orchestration
// Drives one upload through separation, transcription, extraction and placement

use futures_util::{FutureExt, Stream};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::artifacts::{sanitized_extension, ArtifactTracker};
use super::error::PipelineError;
use super::progress::{scale_separator_progress, PipelineProgress, PipelineStage, ProgressBuilder};
use crate::config::AppConfig;
use crate::fretboard::{FretboardMapper, TabEvent, Tuning};
use crate::separation::{HttpSeparationClient, SeparationClient, SeparationUpdate};
use crate::transcription::{BasicPitchTranscriber, GridQuantizer, Quantizer, Transcriber};

/// Events buffered between the run task and the caller
const PROGRESS_BUFFER: usize = 32;

/// Separation updates buffered between the worker and the run task
const UPDATE_BUFFER: usize = 16;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Name of the downloaded guitar stem inside a run directory
const STEM_FILE_NAME: &str = "guitar.wav";

/// Runs tab-generation pipelines
///
/// Holds only immutable collaborators, so one orchestrator is shared by all
/// requests. Hand position and temporary artifacts live inside each run.
pub struct PipelineOrchestrator {
    separator: Arc<dyn SeparationClient>,
    transcriber: Arc<dyn Transcriber>,
    quantizer: Arc<dyn Quantizer>,
    mapper: FretboardMapper,
    runs_dir: PathBuf,
    heartbeat_interval: Duration,
}

impl PipelineOrchestrator {
    pub fn new(
        separator: Arc<dyn SeparationClient>,
        transcriber: Arc<dyn Transcriber>,
        quantizer: Arc<dyn Quantizer>,
        mapper: FretboardMapper,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        PipelineOrchestrator {
            separator,
            transcriber,
            quantizer,
            mapper,
            runs_dir: runs_dir.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Production wiring: HTTP separation service, basic-pitch, grid quantizer
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let separator = HttpSeparationClient::new(config.separator_url.clone())?;
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(separator),
            Arc::new(
                BasicPitchTranscriber::new(config.transcriber_bin.clone())
                    .with_thresholds(config.transcriber_thresholds),
            ),
            Arc::new(GridQuantizer::default()),
            FretboardMapper::new(Tuning::standard(), config.max_fret),
            config.runs_dir(),
        );
        Ok(orchestrator.with_heartbeat_interval(config.heartbeat_interval))
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Start a run and return its progress events
    ///
    /// The work happens on its own task. The stream is finite and its last
    /// item carries either `result` or `error`. Dropping the stream cancels
    /// the run; cleanup still happens but nothing further is emitted.
    pub fn run(
        self: &Arc<Self>,
        audio: Vec<u8>,
        filename: impl Into<String>,
    ) -> impl Stream<Item = PipelineProgress> + Send + 'static {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let orchestrator = Arc::clone(self);
        let filename = filename.into();

        tokio::spawn(async move {
            orchestrator.drive(filename, audio, ProgressSink::new(tx)).await;
        });

        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    async fn drive(&self, filename: String, audio: Vec<u8>, mut sink: ProgressSink) {
        let run_id = Uuid::new_v4();
        let mut artifacts = ArtifactTracker::new();
        log::info!("Run {} started for '{}' ({} bytes)", run_id, filename, audio.len());

        let outcome = AssertUnwindSafe(self.execute(run_id, &filename, audio, &mut artifacts, &mut sink))
            .catch_unwind()
            .await;

        // Artifacts go before the terminal event is released
        let removed = artifacts.cleanup().await;
        log::debug!("Run {} removed {} artifacts", run_id, removed);

        let terminal = match outcome {
            Ok(Ok(tab)) => {
                log::info!("Run {} complete: {} tab events", run_id, tab.len());
                ProgressBuilder::stage(PipelineStage::Complete)
                    .complete(format!("Tab generated with {} events", tab.len()), tab)
            }
            Ok(Err(PipelineError::Cancelled)) => {
                log::info!("Run {} cancelled by caller during {}", run_id, sink.stage());
                return;
            }
            Ok(Err(e)) => {
                log::error!("Run {} failed during {}: {}", run_id, sink.stage(), e);
                ProgressBuilder::stage(sink.stage()).failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Run {} panicked during {}: {}", run_id, sink.stage(), message);
                ProgressBuilder::stage(sink.stage()).failed(format!("Internal error: {}", message))
            }
        };

        if sink.send(terminal).await.is_err() {
            log::debug!("Run {} finished after caller left", run_id);
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        filename: &str,
        audio: Vec<u8>,
        artifacts: &mut ArtifactTracker,
        sink: &mut ProgressSink,
    ) -> Result<Vec<TabEvent>, PipelineError> {
        validate_upload(Some(filename), &audio)?;

        // Received
        sink.enter(PipelineStage::Received, "Audio file received").await?;
        let run_dir = artifacts.create_dir(&self.runs_dir, &run_id)?;
        let extension = sanitized_extension(filename).unwrap_or_else(|| "bin".to_string());
        let input = artifacts
            .write_file(run_dir.join(format!("input.{}", extension)), &audio)
            .await?;
        drop(audio);

        // Separating
        sink.enter(PipelineStage::Separating, "Separating guitar track...")
            .await?;
        let file_id = self.separate(&input, sink).await?;
        log::info!("Run {} separated as {}", run_id, file_id);

        // Downloading
        sink.enter(PipelineStage::Downloading, "Downloading guitar track...")
            .await?;
        let stem = run_dir.join(STEM_FILE_NAME);
        artifacts.register(stem.clone());
        sink.until_closed(async {
            self.separator
                .download(&file_id, &stem)
                .await
                .map_err(PipelineError::from)
        })
        .await?;
        probe_stem(&stem)?;

        // Transcribing
        sink.enter(PipelineStage::Transcribing, "Transcribing guitar notes...")
            .await?;
        let midi = sink
            .until_closed(async {
                self.transcriber
                    .transcribe(&stem, &run_dir)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        artifacts.register(midi.clone());

        // Extracting
        sink.enter(PipelineStage::Extracting, "Extracting note events...")
            .await?;
        let quantizer = Arc::clone(&self.quantizer);
        let notes = run_blocking(move || quantizer.extract(&midi).map_err(PipelineError::from)).await?;
        log::debug!("Run {} extracted {} note events", run_id, notes.len());

        // Placing
        sink.enter(PipelineStage::Placing, "Mapping notes to the fretboard...")
            .await?;
        let mapper = self.mapper.clone();
        run_blocking(move || Ok(mapper.place(&notes))).await
    }

    /// Wait for the separation service while relaying its progress
    ///
    /// The call runs on a worker task. This task relays the service's own
    /// progress, emits a heartbeat on every tick, and aborts the worker if
    /// the caller leaves.
    async fn separate(&self, input: &Path, sink: &mut ProgressSink) -> Result<String, PipelineError> {
        let (update_tx, mut update_rx) = mpsc::channel::<SeparationUpdate>(UPDATE_BUFFER);
        let separator = Arc::clone(&self.separator);
        let audio = input.to_path_buf();
        let mut worker = AbortOnDrop(tokio::spawn(async move {
            separator.separate(&audio, update_tx).await
        }));

        let started = Instant::now();
        let mut heartbeat =
            tokio::time::interval_at(started + self.heartbeat_interval, self.heartbeat_interval);
        let mut percent = PipelineStage::Separating.entry_percent();

        loop {
            tokio::select! {
                joined = &mut worker.0 => {
                    while let Ok(update) = update_rx.try_recv() {
                        percent = scale_separator_progress(update.percent);
                        sink.report(percent, update.message).await?;
                    }
                    return match joined {
                        Ok(result) => result.map_err(PipelineError::from),
                        Err(e) => Err(PipelineError::Processing(format!(
                            "Separation worker failed: {}",
                            e
                        ))),
                    };
                }
                Some(update) = update_rx.recv() => {
                    percent = scale_separator_progress(update.percent);
                    sink.report(percent, update.message).await?;
                }
                _ = heartbeat.tick() => {
                    let elapsed = started.elapsed().as_secs();
                    log::debug!("Still separating after {}s", elapsed);
                    sink.report(percent, format!("Separating guitar track... ({}s elapsed)", elapsed))
                        .await?;
                }
                _ = sink.closed() => return Err(PipelineError::Cancelled),
            }
        }
    }
}

/// Reject uploads that cannot start a run
///
/// Nothing is written to disk before this passes.
pub fn validate_upload(filename: Option<&str>, audio: &[u8]) -> Result<(), PipelineError> {
    let filename = filename.ok_or_else(PipelineError::no_file)?;
    if filename.trim().is_empty() {
        return Err(PipelineError::no_selected_file());
    }
    if audio.is_empty() {
        return Err(PipelineError::empty_file());
    }
    Ok(())
}

/// Check that the downloaded stem is a readable WAV file
fn probe_stem(path: &Path) -> Result<(), PipelineError> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        PipelineError::NoOutput(format!("Separated track is not a readable WAV file: {}", e))
    })?;
    let spec = reader.spec();
    log::debug!(
        "Guitar stem: {} Hz, {} channels, {} samples",
        spec.sample_rate,
        spec.channels,
        reader.duration()
    );
    Ok(())
}

/// Run CPU-bound stage work off the async workers
async fn run_blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PipelineError::Processing(format!("Stage worker failed: {}", e)))?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sending half of a run's event stream
///
/// Remembers the current stage and never lets the percent go backwards.
struct ProgressSink {
    tx: mpsc::Sender<PipelineProgress>,
    stage: PipelineStage,
    last_percent: u8,
}

impl ProgressSink {
    fn new(tx: mpsc::Sender<PipelineProgress>) -> Self {
        ProgressSink {
            tx,
            stage: PipelineStage::Received,
            last_percent: 0,
        }
    }

    fn stage(&self) -> PipelineStage {
        self.stage
    }

    async fn enter(&mut self, stage: PipelineStage, message: &str) -> Result<(), PipelineError> {
        self.stage = stage;
        self.send(ProgressBuilder::stage(stage).start(message)).await
    }

    async fn report(&mut self, percent: u8, message: impl Into<String>) -> Result<(), PipelineError> {
        self.send(ProgressBuilder::stage(self.stage).progress(percent, message))
            .await
    }

    async fn send(&mut self, mut event: PipelineProgress) -> Result<(), PipelineError> {
        event.progress_percent = event.progress_percent.max(self.last_percent);
        self.last_percent = event.progress_percent;
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::Cancelled)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    /// Await `work` unless the caller leaves first
    async fn until_closed<T, F>(&self, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        tokio::select! {
            result = work => result,
            _ = self.tx.closed() => Err(PipelineError::Cancelled),
        }
    }
}
