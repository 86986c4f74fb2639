//! Scripted Backend Test Utilities
//!
//! Provides a [`GenerationBackend`] that plays back scripted chunk sequences
//! instead of calling a real LLM, and records every call it receives so tests
//! can check ordering and cancellation.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::test_utils::{Script, ScriptedBackend};
//!
//! let backend = ScriptedBackend::new()
//!     .with_script("first", Script::hang())
//!     .with_script("second", Script::chunks(["a", "b"]));
//!
//! // ... drive a connection ...
//!
//! assert_eq!(backend.start_count(), 2);
//! assert_eq!(backend.cancel_reason(0), Some(CancelReason::Superseded));
//! assert_eq!(backend.max_live_generations(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::BackendError;
use super::generation::{
    CancelReason, CancelSignal, Generation, GenerationEvent, GenerationId, GenerationSink,
    DEFAULT_EVENT_CAPACITY,
};
use super::traits::{GenerationBackend, GenerationRequest};

/// One step of a scripted response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Emit a fragment
    Chunk(String),
    /// End the stream with an error
    Fail(BackendError),
    /// Produce nothing more until cancelled
    Hang,
}

/// A scripted response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    /// Steps, played in order; the stream completes after the last one
    pub steps: Vec<ScriptStep>,
    /// Delay before each step
    pub step_delay: Duration,
}

impl Script {
    /// Emit the given fragments, then complete
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: chunks
                .into_iter()
                .map(|c| ScriptStep::Chunk(c.into()))
                .collect(),
            step_delay: Duration::ZERO,
        }
    }

    /// Never produce anything; only cancellation ends the stream
    #[must_use]
    pub fn hang() -> Self {
        Self {
            steps: vec![ScriptStep::Hang],
            step_delay: Duration::ZERO,
        }
    }

    /// Fail immediately
    #[must_use]
    pub fn fail(error: BackendError) -> Self {
        Self {
            steps: vec![ScriptStep::Fail(error)],
            step_delay: Duration::ZERO,
        }
    }

    /// Echo the prompt back one word at a time
    #[must_use]
    pub fn echo(prompt: &str) -> Self {
        Self::chunks(prompt.split_inclusive(' '))
    }

    /// Append a step
    #[must_use]
    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the delay before each step
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

/// A generation started by the scripted backend
#[derive(Debug)]
struct StartedGeneration {
    id: GenerationId,
    prompt: String,
    conversation_id: Option<String>,
    signal: CancelSignal,
    finished: Arc<AtomicBool>,
}

impl StartedGeneration {
    fn is_live(&self) -> bool {
        !self.signal.is_cancelled() && !self.finished.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct CallLog {
    started: Vec<StartedGeneration>,
    max_live: usize,
}

/// Backend that plays back scripts and records calls
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    generate_results: Arc<Mutex<HashMap<String, Result<String, BackendError>>>>,
    log: Arc<Mutex<CallLog>>,
    healthy: Arc<AtomicBool>,
}

impl ScriptedBackend {
    /// Create a backend that echoes every prompt
    #[must_use]
    pub fn new() -> Self {
        let backend = Self::default();
        backend.healthy.store(true, Ordering::SeqCst);
        backend
    }

    /// Script the streaming response for a prompt
    #[must_use]
    pub fn with_script(self, prompt: impl Into<String>, script: Script) -> Self {
        self.scripts.lock().insert(prompt.into(), script);
        self
    }

    /// Script the non-streaming result for a prompt
    #[must_use]
    pub fn with_generate_result(
        self,
        prompt: impl Into<String>,
        result: Result<String, BackendError>,
    ) -> Self {
        self.generate_results.lock().insert(prompt.into(), result);
        self
    }

    /// Set what `health_check` reports
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of streaming generations started
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.log.lock().started.len()
    }

    /// Prompts of started generations, in start order
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.log
            .lock()
            .started
            .iter()
            .map(|g| g.prompt.clone())
            .collect()
    }

    /// Conversation IDs of started generations, in start order
    #[must_use]
    pub fn conversation_ids(&self) -> Vec<Option<String>> {
        self.log
            .lock()
            .started
            .iter()
            .map(|g| g.conversation_id.clone())
            .collect()
    }

    /// ID of the n-th started generation
    #[must_use]
    pub fn generation_id(&self, index: usize) -> Option<GenerationId> {
        self.log.lock().started.get(index).map(|g| g.id)
    }

    /// Cancel reason of the n-th started generation, if it was cancelled
    #[must_use]
    pub fn cancel_reason(&self, index: usize) -> Option<CancelReason> {
        self.log
            .lock()
            .started
            .get(index)
            .and_then(|g| g.signal.reason())
    }

    /// Whether the n-th started generation was cancelled
    #[must_use]
    pub fn is_cancelled(&self, index: usize) -> bool {
        self.log
            .lock()
            .started
            .get(index)
            .is_some_and(|g| g.signal.is_cancelled())
    }

    /// Number of generations neither cancelled nor finished
    #[must_use]
    pub fn live_generations(&self) -> usize {
        self.log.lock().started.iter().filter(|g| g.is_live()).count()
    }

    /// Highest number of live generations observed at any start
    #[must_use]
    pub fn max_live_generations(&self) -> usize {
        self.log.lock().max_live
    }

    /// Wait until the n-th started generation is cancelled
    ///
    /// Returns immediately if no such generation has started.
    pub async fn cancelled(&self, index: usize) {
        let token = self
            .log
            .lock()
            .started
            .get(index)
            .map(|g| g.signal.token().clone());
        if let Some(token) = token {
            token.cancelled().await;
        }
    }

    fn script_for(&self, prompt: &str) -> Script {
        self.scripts
            .lock()
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| Script::echo(prompt))
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn start(&self, request: GenerationRequest) -> Generation {
        let (generation, sink) = Generation::channel(DEFAULT_EVENT_CAPACITY);
        let finished = Arc::new(AtomicBool::new(false));
        let script = self.script_for(&request.prompt);

        {
            let mut log = self.log.lock();
            let live = log.started.iter().filter(|g| g.is_live()).count() + 1;
            log.max_live = log.max_live.max(live);
            log.started.push(StartedGeneration {
                id: sink.id(),
                prompt: request.prompt,
                conversation_id: request.conversation_id,
                signal: sink.signal().clone(),
                finished: Arc::clone(&finished),
            });
        }

        tokio::spawn(play_script(script, sink, finished));
        generation
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let scripted = self.generate_results.lock().get(&request.prompt).cloned();
        scripted.unwrap_or_else(|| Ok(request.prompt.clone()))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

async fn play_script(script: Script, sink: GenerationSink, finished: Arc<AtomicBool>) {
    for step in script.steps {
        if !script.step_delay.is_zero() {
            tokio::select! {
                biased;
                () = sink.cancelled() => return,
                () = tokio::time::sleep(script.step_delay) => {}
            }
        }

        match step {
            ScriptStep::Chunk(text) => {
                if !sink.send(GenerationEvent::Chunk(text)).await {
                    return;
                }
            }
            ScriptStep::Fail(error) => {
                finished.store(true, Ordering::SeqCst);
                sink.send(GenerationEvent::Failed(error)).await;
                return;
            }
            ScriptStep::Hang => {
                sink.cancelled().await;
                return;
            }
        }
    }

    finished.store(true, Ordering::SeqCst);
    sink.send(GenerationEvent::Completed).await;
}
