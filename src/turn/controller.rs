use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{FutureExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{credential_source, CredentialSource};
use crate::config::{AnimationMode, AppConfig, TurnConfig};
use crate::error::{TurnError, TurnFailure};
use crate::protocol::Stage;
use crate::stream::{decoded_record_stream, DecodedRecord};
use crate::transport::{HttpTransport, TurnRequest};

use super::message::AssembledMessage;
use super::state::{LiveSnapshot, TurnPhase, TurnState, TurnTerminal};

/// Receives the results of turns.
///
/// `message_finalized` and `turn_failed` are each called at most once per
/// turn, and never for a cancelled or superseded turn.
pub trait TurnSink: Send + Sync {
    fn message_finalized(&self, message: &AssembledMessage);
    fn turn_failed(&self, failure: &TurnFailure);
    fn title_updated(&self, _title: &str) {}
}

/// Sink that drops every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TurnSink for NoopSink {
    fn message_finalized(&self, _message: &AssembledMessage) {}
    fn turn_failed(&self, _failure: &TurnFailure) {}
}

/// What [`TurnController::send`] resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(AssembledMessage),
    Failed(TurnFailure),
    Cancelled,
    /// A newer `send` replaced this turn.
    Superseded,
}

/// Shared animation preference. Clones observe the same value.
#[derive(Debug, Clone)]
pub struct DisplayPreferences {
    sender: Arc<watch::Sender<AnimationMode>>,
}

impl DisplayPreferences {
    #[must_use]
    pub fn new(initial: AnimationMode) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    #[must_use]
    pub fn animation(&self) -> AnimationMode {
        *self.sender.borrow()
    }

    pub fn set_animation(&self, mode: AnimationMode) {
        self.sender.send_if_modified(|current| {
            if *current == mode {
                return false;
            }
            *current = mode;
            true
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AnimationMode> {
        self.sender.subscribe()
    }
}

struct ActiveTurn {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct ControlState {
    generation: u64,
    active: Option<ActiveTurn>,
    live: LiveSnapshot,
    last_message: Option<AssembledMessage>,
    session_id: String,
}

impl ControlState {
    /// Whether `generation` is still the running, uncancelled turn. Live
    /// state is only written while this holds.
    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation && !active.token.is_cancelled())
    }

    /// Drop per-turn live state, keeping the session title.
    fn rest(&mut self, phase: TurnPhase, turn_id: Option<u64>) {
        let title = self.live.title.take();
        self.live = LiveSnapshot {
            turn_id,
            phase,
            title,
            ..LiveSnapshot::default()
        };
    }

    fn stale_outcome(&self, generation: u64) -> TurnOutcome {
        if self.generation == generation {
            TurnOutcome::Cancelled
        } else {
            TurnOutcome::Superseded
        }
    }
}

const MAX_RECORDS_PER_PUBLISH: usize = 64;

enum Step {
    Concluded(TurnTerminal),
    /// Stream ended with the turn already closed.
    Ended,
}

enum Guarded<T> {
    Ready(T),
    Cancelled,
    TimedOut,
}

async fn guarded<F: Future>(
    token: &CancellationToken,
    deadline: tokio::time::Instant,
    fut: F,
) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => Guarded::Cancelled,
        () = tokio::time::sleep_until(deadline) => Guarded::TimedOut,
        out = fut => Guarded::Ready(out),
    }
}

fn replace_if_changed(current: &mut Option<Stage>, next: Option<Stage>) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}

/// Runs agent turns against the configured endpoint, one at a time.
pub struct TurnController {
    transport: HttpTransport,
    credentials: Arc<dyn CredentialSource>,
    sink: Arc<dyn TurnSink>,
    turn: TurnConfig,
    display: DisplayPreferences,
    stage_tx: watch::Sender<Option<Stage>>,
    state: RwLock<ControlState>,
}

impl TurnController {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        transport: HttpTransport,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn TurnSink>,
    ) -> Self {
        let (stage_tx, _) = watch::channel(None);
        Self {
            transport,
            credentials,
            sink,
            turn: config.turn.clone(),
            display: DisplayPreferences::new(config.display.animation),
            stage_tx,
            state: RwLock::new(ControlState {
                session_id: uuid::Uuid::new_v4().to_string(),
                ..ControlState::default()
            }),
        }
    }

    /// Build a controller with the transport and credential source the
    /// config describes.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP transport cannot be built.
    pub fn from_config(config: &AppConfig, sink: Arc<dyn TurnSink>) -> Result<Self, TurnError> {
        let transport = HttpTransport::new(&config.endpoint)?;
        let credentials = credential_source(&config.endpoint);
        Ok(Self::new(config, transport, credentials, sink))
    }

    #[must_use]
    pub fn display(&self) -> &DisplayPreferences {
        &self.display
    }

    #[must_use]
    pub fn live(&self) -> LiveSnapshot {
        self.state.read().live.clone()
    }

    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.state.read().live.phase
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.read().active.is_some()
    }

    /// Message of the most recent completed turn in this session.
    #[must_use]
    pub fn last_message(&self) -> Option<AssembledMessage> {
        self.state.read().last_message.clone()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.state.read().session_id.clone()
    }

    #[must_use]
    pub fn subscribe_stage(&self) -> watch::Receiver<Option<Stage>> {
        self.stage_tx.subscribe()
    }

    /// Run one turn to completion.
    ///
    /// An in-flight turn is cancelled first. The sink sees the result of
    /// this turn only if it is still current when it ends.
    pub async fn send(&self, message: &str) -> TurnOutcome {
        let (generation, token, session_id, replaced) = self.begin_turn();
        tracing::info!(turn = generation, session_id = %session_id, "turn started");
        if replaced {
            tokio::time::sleep(self.turn.cancel_grace()).await;
        }
        let deadline = tokio::time::Instant::now() + self.turn.timeout();
        self.run_turn(generation, &token, deadline, message, session_id)
            .await
    }

    /// Cancel the in-flight turn. Live state is cleared before this returns.
    /// Returns `false` when no turn was running.
    pub fn cancel(&self) -> bool {
        let mut control = self.state.write();
        let Some(active) = control.active.take() else {
            return false;
        };
        active.token.cancel();
        control.rest(TurnPhase::Cancelled, Some(active.generation));
        self.stage_tx
            .send_if_modified(|current| replace_if_changed(current, None));
        tracing::info!(turn = active.generation, "turn cancelled");
        true
    }

    /// Move to another conversation. Any in-flight turn is dropped without
    /// finalization or callbacks.
    pub fn switch_session(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        let mut control = self.state.write();
        if let Some(active) = control.active.take() {
            active.token.cancel();
            tracing::debug!(turn = active.generation, "dropping in-flight turn on session switch");
        }
        control.live = LiveSnapshot::default();
        control.last_message = None;
        tracing::info!(session_id = %session_id, "session switched");
        control.session_id = session_id;
        self.stage_tx
            .send_if_modified(|current| replace_if_changed(current, None));
    }

    fn begin_turn(&self) -> (u64, CancellationToken, String, bool) {
        let mut control = self.state.write();
        control.generation += 1;
        let generation = control.generation;

        let replaced = match control.active.take() {
            Some(previous) => {
                previous.token.cancel();
                tracing::info!(
                    turn = previous.generation,
                    by = generation,
                    "superseding in-flight turn"
                );
                true
            }
            None => false,
        };

        let token = CancellationToken::new();
        control.active = Some(ActiveTurn {
            generation,
            token: token.clone(),
        });
        control.rest(TurnPhase::Sending, Some(generation));
        self.stage_tx
            .send_if_modified(|current| replace_if_changed(current, None));
        (generation, token, control.session_id.clone(), replaced)
    }

    async fn run_turn(
        &self,
        generation: u64,
        token: &CancellationToken,
        deadline: tokio::time::Instant,
        message: &str,
        session_id: String,
    ) -> TurnOutcome {
        let bearer = match self.credentials.token() {
            Ok(bearer) => bearer,
            Err(err) => return self.conclude(generation, TurnTerminal::Failed((&err).into())),
        };
        let request = TurnRequest::new(message, session_id).with_model(self.turn.model.clone());

        let opened = guarded(
            token,
            deadline,
            self.transport.open_turn_stream(&request, bearer.as_deref()),
        )
        .await;
        let response = match opened {
            Guarded::Ready(Ok(response)) => response,
            Guarded::Ready(Err(err)) => {
                return self.conclude(generation, TurnTerminal::Failed((&err).into()));
            }
            Guarded::Cancelled => return self.cancelled(generation),
            Guarded::TimedOut => return self.timed_out(generation, token),
        };

        let records = decoded_record_stream(response.bytes_stream());
        futures_util::pin_mut!(records);
        let mut state = TurnState::new(self.turn.max_tool_rounds, Instant::now());
        self.publish(generation, &state);

        let mut published = state.revision();

        loop {
            let next = match guarded(token, deadline, records.next()).await {
                Guarded::Ready(next) => next,
                Guarded::Cancelled => return self.cancelled(generation),
                Guarded::TimedOut => return self.timed_out(generation, token),
            };

            // Fold every record that is already decoded before publishing,
            // so a burst costs one snapshot instead of one per record.
            let mut step = self.step(generation, &mut state, next);
            let mut batched = 1;
            while step.is_none() && batched < MAX_RECORDS_PER_PUBLISH {
                let Some(next) = records.next().now_or_never() else {
                    break;
                };
                step = self.step(generation, &mut state, next);
                batched += 1;
            }

            match step {
                Some(Step::Concluded(terminal)) => return self.conclude(generation, terminal),
                Some(Step::Ended) => return self.cancelled(generation),
                None if state.revision() != published => {
                    published = state.revision();
                    self.publish(generation, &state);
                }
                None => {}
            }
        }
    }

    fn step(
        &self,
        generation: u64,
        state: &mut TurnState,
        next: Option<Result<DecodedRecord, TurnError>>,
    ) -> Option<Step> {
        let now = Instant::now();
        let ended = next.is_none();
        let terminal = match next {
            Some(Ok(record)) => state.apply_record(record, now),
            Some(Err(err)) => state.fail((&err).into()),
            None => state.finish_stream(now),
        };

        if let Some(title) = state.take_title_update() {
            if self.publish_title(generation, &title) {
                self.sink.title_updated(&title);
            }
        }

        match terminal {
            Some(terminal) => Some(Step::Concluded(terminal)),
            None if ended => Some(Step::Ended),
            None => None,
        }
    }

    fn publish(&self, generation: u64, state: &TurnState) {
        let mut snapshot = state.snapshot();
        let mut control = self.state.write();
        if !control.is_current(generation) {
            return;
        }
        snapshot.turn_id = Some(generation);
        snapshot.title = control.live.title.take();
        let stage = snapshot.stage;
        control.live = snapshot;
        self.stage_tx
            .send_if_modified(|current| replace_if_changed(current, stage));
    }

    fn publish_title(&self, generation: u64, title: &str) -> bool {
        let mut control = self.state.write();
        if !control.is_current(generation) || control.live.title.as_deref() == Some(title) {
            return false;
        }
        control.live.title = Some(title.to_string());
        true
    }

    fn conclude(&self, generation: u64, terminal: TurnTerminal) -> TurnOutcome {
        {
            let mut control = self.state.write();
            if !control.is_current(generation) {
                return control.stale_outcome(generation);
            }
            control.active = None;
            match &terminal {
                TurnTerminal::Finalized(message) => {
                    control.rest(TurnPhase::Finalizing, Some(generation));
                    control.last_message = Some(message.clone());
                }
                TurnTerminal::Failed(_) => control.rest(TurnPhase::Errored, Some(generation)),
            }
            self.stage_tx
                .send_if_modified(|current| replace_if_changed(current, None));
        }

        match terminal {
            TurnTerminal::Finalized(message) => {
                tracing::info!(turn = generation, message_id = %message.id, "turn finalized");
                self.sink.message_finalized(&message);
                self.settle(generation);
                TurnOutcome::Completed(message)
            }
            TurnTerminal::Failed(failure) => {
                tracing::warn!(
                    turn = generation,
                    class = ?failure.class,
                    "turn failed: {}",
                    failure.message
                );
                self.sink.turn_failed(&failure);
                TurnOutcome::Failed(failure)
            }
        }
    }

    /// Finalizing -> Idle once the sink has the message, unless another
    /// turn started meanwhile.
    fn settle(&self, generation: u64) {
        let mut control = self.state.write();
        if control.active.is_none()
            && control.live.turn_id == Some(generation)
            && control.live.phase == TurnPhase::Finalizing
        {
            control.live.phase = TurnPhase::Idle;
        }
    }

    fn cancelled(&self, generation: u64) -> TurnOutcome {
        let mut control = self.state.write();
        if control.generation != generation {
            return TurnOutcome::Superseded;
        }
        if control
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
        {
            control.active = None;
            control.rest(TurnPhase::Cancelled, Some(generation));
            self.stage_tx
                .send_if_modified(|current| replace_if_changed(current, None));
        }
        TurnOutcome::Cancelled
    }

    fn timed_out(&self, generation: u64, token: &CancellationToken) -> TurnOutcome {
        let err = TurnError::Timeout(self.turn.timeout_secs);
        let outcome = self.conclude(generation, TurnTerminal::Failed((&err).into()));
        token.cancel();
        outcome
    }
}
