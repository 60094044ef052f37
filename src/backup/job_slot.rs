//! Single-slot job submission.
//!
//! A run executes on its own worker thread and reports back only through a status channel,
//! so a foreground interface never blocks on it. While a run is active further submissions
//! are rejected with [`Error::Busy`].

use crate::backup::function_path;
use crate::backup::job::BackupJob;
use crate::backup::pipeline::{Pipeline, RunResult, Stage};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::sink::{ChannelSink, LogLine, LogSink, TeeSink};
use derive_more::From;
use function_name::named;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Clone, Debug, From, PartialEq, Eq)]
pub enum StatusEvent {
    Stage(Stage),
    Line(LogLine),
    Finished(RunResult),
}

/// Released when the worker ends, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobSlot {
    busy: Arc<AtomicBool>,
}

pub struct JobHandle {
    events: Receiver<StatusEvent>,
    worker: JoinHandle<RunResult>,
}

impl JobHandle {
    /// Stage changes and log lines in the order the worker produced them, ending with
    /// `Finished`.
    pub fn events(&self) -> &Receiver<StatusEvent> {
        &self.events
    }

    pub fn wait(self) -> Result<RunResult> {
        self.worker.join().map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Error::worker_panic(reason)
        })
    }
}

impl JobSlot {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts `job` on a worker thread unless another job is still running.
    ///
    /// Lines go to `sink` and to the returned handle's status channel.
    #[named]
    pub fn try_submit(
        &self,
        job: BackupJob,
        pipeline: Pipeline,
        sink: Arc<dyn LogSink>,
    ) -> Result<JobHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Rejected backup submission, a job is already running");
            return Err(Error::busy().add_fn_name(function_path!()));
        }
        let guard = BusyGuard(self.busy.clone());

        let (tx, rx) = channel::<StatusEvent>();
        let worker = std::thread::Builder::new()
            .name("backup-worker".to_string())
            .spawn(move || run_worker(job, pipeline, sink, tx, guard))
            .map_err(Error::from)
            .add_msg("Failed to spawn backup worker")
            .add_fn_name(function_path!())?;

        Ok(JobHandle { events: rx, worker })
    }
}

fn run_worker(
    job: BackupJob,
    pipeline: Pipeline,
    sink: Arc<dyn LogSink>,
    tx: Sender<StatusEvent>,
    guard: BusyGuard,
) -> RunResult {
    let channel_sink: Arc<dyn LogSink> = Arc::new(ChannelSink::new(tx.clone()));
    let tee = TeeSink::new(vec![sink, channel_sink]);
    let stage_tx = tx.clone();
    let result = pipeline.run_observed(&job, &tee, &mut |stage| {
        let _ = stage_tx.send(stage.into());
    });
    // Free the slot before announcing the result so the receiver can resubmit right away.
    drop(guard);
    let _ = tx.send(StatusEvent::Finished(result.clone()));
    result
}
