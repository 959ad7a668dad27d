//! Staged pipelines.
//!
//! Each stage runs on its own thread: it receives one item from its input
//! queue, transforms it, and forwards the result to the next stage. Throughput
//! is bounded by the slowest stage.
//!
//! Inter-stage buffers are unbounded by default. With
//! [`PipelineConfig::capacity`] set, every link (including the output queue)
//! holds at most that many items and [`Pipeline::feed`] blocks when the first
//! link is full, so a caller feeding a bounded pipeline must also consume its
//! outputs.
//!
//! [`Pipeline::drain`] shuts the pipeline down gracefully: all items already
//! fed are processed. [`Pipeline::abort`] discards items still queued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{span, Level};

use crate::error::{Error, Result, TaskFault};
use crate::pool::{lock, AbortFlag};

/// Pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of items buffered between two stages, or `None` for unbounded buffers.
    pub capacity: Option<usize>,
}

impl PipelineConfig {
    /// Unbounded inter-stage buffers.
    pub fn unbounded() -> Self {
        Self { capacity: None }
    }

    /// Inter-stage buffers holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }

    fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        match self.capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        }
    }
}

/// A transformation applied by one pipeline stage.
///
/// Implemented for every `FnMut(I) -> O`, so stages may carry state between items.
pub trait Stage<I, O>: Send + 'static {
    /// Transforms one item.
    fn process(&mut self, input: I) -> O;
}

impl<I, O, F: FnMut(I) -> O + Send + 'static> Stage<I, O> for F {
    fn process(&mut self, input: I) -> O {
        self(input)
    }
}

struct StageHandle {
    name: String,
    handle: JoinHandle<()>,
}

struct Shared {
    abort: AbortFlag,
    faults: Mutex<Vec<TaskFault>>,
}

/// Assembles a [`Pipeline`] one stage at a time.
///
/// `I` is the pipeline's input type and `O` the output type of the last stage added so far.
pub struct PipelineBuilder<I, O> {
    config: PipelineConfig,
    input: Sender<I>,
    tail: Receiver<O>,
    stages: Vec<StageHandle>,
    shared: Arc<Shared>,
}

impl<I: Send + 'static, O: Send + 'static> PipelineBuilder<I, O> {
    /// Appends a stage and starts its thread.
    pub fn stage<P: Send + 'static>(
        mut self,
        name: impl Into<String>,
        stage: impl Stage<O, P>,
    ) -> Result<PipelineBuilder<I, P>> {
        let name = name.into();
        let (s, r) = self.config.channel();
        let shared = self.shared.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || run_stage(thread_name, self.tail, s, stage, shared))?;
        self.stages.push(StageHandle { name, handle });

        Ok(PipelineBuilder {
            config: self.config,
            input: self.input,
            tail: r,
            stages: self.stages,
            shared: self.shared,
        })
    }

    /// Finishes the pipeline.
    pub fn build(self) -> Pipeline<I, O> {
        tracing::debug!(stages = self.stages.len(), "pipeline built");
        Pipeline {
            input: Some(self.input),
            output: self.tail,
            stages: self.stages,
            shared: self.shared,
        }
    }
}

fn run_stage<I, O>(
    name: String,
    input: Receiver<I>,
    output: Sender<O>,
    mut stage: impl Stage<I, O>,
    shared: Arc<Shared>,
) {
    let span = span!(Level::DEBUG, "stage", name = %name);
    let _guard = span.enter();

    let mut processed = 0usize;
    while let Ok(item) = input.recv() {
        if shared.abort.is_set() {
            tracing::debug!("abort requested, discarding queued items");
            break;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| stage.process(item))) {
            Ok(out) => {
                if output.send(out).is_err() {
                    break;
                }
                processed += 1;
            }
            Err(payload) => {
                let fault = TaskFault::from_panic(name.as_str(), payload);
                tracing::error!("{}", fault);
                lock(&shared.faults).push(fault);
            }
        }
    }
    tracing::debug!(processed, "stage exiting");
}

/// A running chain of stages from `I` to `O`.
pub struct Pipeline<I, O> {
    input: Option<Sender<I>>,
    output: Receiver<O>,
    stages: Vec<StageHandle>,
    shared: Arc<Shared>,
}

impl<I: Send + 'static> Pipeline<I, I> {
    /// Starts building a pipeline whose input type is `I`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use parallel::pipeline::{Pipeline, PipelineConfig};
    /// let pipeline = Pipeline::builder(PipelineConfig::unbounded())
    ///     .stage("double", |x: u32| x * 2).unwrap()
    ///     .stage("format", |x: u32| format!("<{x}>")).unwrap()
    ///     .build();
    /// for i in 0..3 {
    ///     pipeline.feed(i).unwrap();
    /// }
    /// assert_eq!(pipeline.drain().unwrap(), vec!["<0>", "<2>", "<4>"]);
    /// ```
    pub fn builder(config: PipelineConfig) -> PipelineBuilder<I, I> {
        let (input, tail) = config.channel();
        PipelineBuilder {
            config,
            input,
            tail,
            stages: Vec::new(),
            shared: Arc::new(Shared {
                abort: AbortFlag::new(),
                faults: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<I, O> Pipeline<I, O> {
    /// Sends an item into the first stage.
    ///
    /// Blocks if the pipeline is bounded and its first buffer is full.
    pub fn feed(&self, item: I) -> Result<()> {
        if self.shared.abort.is_set() {
            return Err(Error::Aborted);
        }
        self.input
            .as_ref()
            .ok_or(Error::Disconnected)?
            .send(item)
            .map_err(|_| Error::Disconnected)
    }

    /// Blocks until the next output is available.
    ///
    /// Returns `None` once every stage has exited.
    pub fn recv(&self) -> Option<O> {
        self.output.recv().ok()
    }

    /// Returns the next output if one is ready.
    pub fn try_recv(&self) -> Option<O> {
        self.output.try_recv().ok()
    }

    /// The number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Closes the input, processes every in-flight item, and returns the remaining outputs.
    ///
    /// Outputs are returned in the order they left the last stage. Items whose
    /// transform panicked are dropped and reported as [`Error::TaskFaults`].
    pub fn drain(mut self) -> Result<Vec<O>> {
        self.input.take();
        let outputs: Vec<O> = self.output.iter().collect();
        self.join_stages();

        let faults = std::mem::take(&mut *lock(&self.shared.faults));
        if !faults.is_empty() {
            return Err(Error::TaskFaults(faults));
        }
        Ok(outputs)
    }

    /// Stops every stage at its next receive and discards queued items.
    pub fn abort(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.abort.request();
        self.input.take();
        // Unblocks a last stage waiting on a full output buffer.
        while self.output.recv().is_ok() {}
        self.join_stages();
    }

    fn join_stages(&mut self) {
        for StageHandle { name, handle } in self.stages.drain(..) {
            if handle.join().is_err() {
                tracing::error!("pipeline stage `{}` exited with a panic", name);
            }
        }
    }
}

impl<I, O> Drop for Pipeline<I, O> {
    fn drop(&mut self) {
        if !self.stages.is_empty() {
            self.stop();
        }
    }
}
