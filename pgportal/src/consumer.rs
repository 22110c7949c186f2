//! The [`RowConsumer`], backpressure bridge between a plan and a [`ResultSink`].
//!
//! A consumer drains a [`RowStream`] into its sink on a spawned task. When the row cap of
//! the current round is reached the stream is parked and the round ends with
//! [`ResultSink::batch_finished`]. A later [`RowConsumer::resume_with`] continues the
//! parked stream into a replacement sink, no row is delivered twice or skipped.
//!
//! The end of a round is delivered and settled under one turn, state queries wait for
//! it. A caller that observed the terminal signal of a round therefore never sees that
//! round as still running.
use std::{
    collections::VecDeque,
    future::poll_fn,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{
    Error, Result,
    common::{trace, verbose},
    plan::RowStream,
    sink::ResultSink,
};

type Input = Result<RowStream>;

/// Sink, row cap and input of the next round.
type Round = (Box<dyn ResultSink>, u32, Input);

/// Cloneable handle to a row consumer.
///
/// All clones refer to the same consumer. Spawning a drain requires a tokio runtime.
#[derive(Clone, Default)]
pub struct RowConsumer {
    inner: Arc<Inner>,
}

/// Non owning [`RowConsumer`] handle.
#[derive(Clone)]
pub struct WeakRowConsumer {
    inner: Weak<Inner>,
}

#[derive(Default)]
struct Inner {
    shared: Mutex<Shared>,
    /// Held while a round ends, from its terminal signal until the state is settled.
    turn: Mutex<()>,
}

#[derive(Default)]
struct Shared {
    state: State,
    /// `None` while a drain task owns it.
    sink: Option<Box<dyn ResultSink>>,
    max_rows: u32,
    /// Replacement sinks, each takes over when the round before it suspends.
    next: VecDeque<(Box<dyn ResultSink>, u32)>,
    /// Input accepted while a round is draining.
    pending: Option<Input>,
    /// The failed round is retried, its sink waits for the new input.
    restarting: bool,
}

#[derive(Default)]
enum State {
    /// No round drained yet, waiting for input or for a sink.
    #[default]
    Idle,
    /// A drain task owns the sink.
    Draining,
    /// Row cap reached, stream parked.
    Suspended(RowStream),
    /// Output exhausted or failed.
    Finished,
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::Draining => "Draining",
            State::Suspended(_) => "Suspended",
            State::Finished => "Finished",
            State::Closed => "Closed",
        }
    }
}

enum RoundEnd {
    Suspended(RowStream),
    Exhausted,
    Failed(Error),
}

impl RowConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn turn(&self) -> MutexGuard<'_, ()> {
        self.inner.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn downgrade(&self) -> WeakRowConsumer {
        WeakRowConsumer { inner: Arc::downgrade(&self.inner) }
    }

    /// Install the sink and row cap of the first round, `0` means no cap.
    ///
    /// Input accepted before a sink is installed starts draining here. On a consumer
    /// that already has a sink this is [`resume_with`][RowConsumer::resume_with].
    pub fn set_sink(&self, sink: Box<dyn ResultSink>, max_rows: u32) {
        {
            let _turn = self.turn();
            let mut guard = self.lock();
            let shared = &mut *guard;
            if matches!(shared.state, State::Idle) && shared.sink.is_none() {
                self.install(shared, sink, max_rows);
                return;
            }
        }
        self.resume_with(sink, max_rows);
    }

    /// Hand the plan output to the consumer.
    ///
    /// Input after the output was exhausted, failed or closed is dropped.
    pub fn accept(&self, rows: RowStream) {
        self.accept_input(Ok(rows));
    }

    /// Report that the plan failed to produce output.
    pub fn accept_failure(&self, error: Error) {
        self.accept_input(Err(error));
    }

    fn accept_input(&self, input: Input) {
        let mut guard = self.lock();
        let shared = &mut *guard;
        match shared.state {
            State::Idle => self.start(shared, input),
            State::Draining => shared.pending = Some(input),
            State::Suspended(_) | State::Finished | State::Closed => {
                verbose!(state = shared.state.name(), "input dropped");
            },
        }
    }

    /// Expect the input of a retried execution.
    ///
    /// Called while the failed round delivers its failure, the round's sink then
    /// receives the new input instead of finishing.
    pub(crate) fn restart(&self) -> Result<()> {
        let mut shared = self.lock();
        match shared.state {
            State::Closed => Err(Error::closed("row consumer")),
            _ => {
                shared.restarting = true;
                Ok(())
            },
        }
    }

    fn install(&self, shared: &mut Shared, sink: Box<dyn ResultSink>, max_rows: u32) {
        shared.sink = Some(sink);
        shared.max_rows = max_rows;
        if let Some(input) = shared.pending.take() {
            self.start(shared, input);
        }
    }

    /// Spawn a drain task, or park `input` until a sink is installed.
    fn start(&self, shared: &mut Shared, input: Input) {
        let Some(sink) = shared.sink.take() else {
            shared.pending = Some(input);
            return;
        };
        shared.state = State::Draining;
        tokio::spawn(self.clone().drain(sink, shared.max_rows, input));
    }

    /// Replace the sink and row cap, then continue a suspended stream.
    ///
    /// If a round is still draining or waiting for input, the replacement takes over
    /// when that round suspends. If the output is already exhausted, the replacement
    /// finishes with no rows.
    pub fn resume_with(&self, sink: Box<dyn ResultSink>, max_rows: u32) {
        let _turn = self.turn();
        let mut guard = self.lock();
        let shared = &mut *guard;
        verbose!(state = shared.state.name(), max_rows, "resume");
        match mem::take(&mut shared.state) {
            State::Suspended(rows) => {
                shared.sink = Some(sink);
                shared.max_rows = max_rows;
                self.start(shared, Ok(rows));
            },
            State::Idle if shared.sink.is_none() => self.install(shared, sink, max_rows),
            state @ (State::Idle | State::Draining) => {
                shared.state = state;
                shared.next.push_back((sink, max_rows));
            },
            state @ (State::Finished | State::Closed) => {
                let interrupted = matches!(state, State::Closed);
                shared.state = state;
                drop(guard);
                let mut sink = sink;
                sink.all_finished(interrupted);
            },
        }
    }

    /// Returns `true` if the row cap was reached and the stream is parked.
    pub fn is_suspended(&self) -> bool {
        let _turn = self.turn();
        matches!(self.lock().state, State::Suspended(_))
    }

    /// Returns `true` until the output is exhausted, failed or closed, once a sink is
    /// installed or input accepted.
    ///
    /// A round that is ending settles first. Must not be called from within
    /// [`Plan::execute`][crate::Plan::execute] of a retry.
    pub fn is_live(&self) -> bool {
        let _turn = self.turn();
        let shared = self.lock();
        match shared.state {
            State::Idle => shared.sink.is_some() || shared.pending.is_some(),
            State::Draining | State::Suspended(_) => true,
            State::Finished | State::Closed => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        let _turn = self.turn();
        matches!(self.lock().state, State::Closed)
    }

    /// Close the consumer, releasing a parked stream.
    ///
    /// If suspended or still waiting for input, every installed sink receives
    /// `all_finished(true)`. A draining round is not interrupted, its stream is
    /// released when the round ends. Calling this more than once is a no-op.
    pub fn close_and_finish_if_suspended(&self) {
        let _turn = self.turn();
        let mut guard = self.lock();
        let shared = &mut *guard;
        shared.pending = None;
        shared.restarting = false;
        let state = mem::replace(&mut shared.state, State::Closed);
        let sink = shared.sink.take();
        let next = mem::take(&mut shared.next);
        drop(guard);

        match state {
            State::Finished | State::Closed => return,
            State::Suspended(rows) => {
                drop(rows);
                verbose!("closed suspended consumer");
            },
            State::Idle | State::Draining => { },
        }

        for mut sink in sink.into_iter().chain(next.into_iter().map(|(sink, _)| sink)) {
            sink.all_finished(true);
        }
    }

    async fn drain(self, mut sink: Box<dyn ResultSink>, mut max_rows: u32, mut input: Input) {
        loop {
            let end = match input {
                Ok(rows) => round(&mut *sink, rows, max_rows).await,
                Err(err) => RoundEnd::Failed(err),
            };
            match self.end_round(sink, max_rows, end) {
                Some((next, next_max, next_input)) => {
                    sink = next;
                    max_rows = next_max;
                    input = next_input;
                },
                None => return,
            }
        }
    }

    /// Deliver the end of a round and settle the state, returns the round to drain next.
    fn end_round(&self, mut sink: Box<dyn ResultSink>, max_rows: u32, end: RoundEnd) -> Option<Round> {
        let _turn = self.turn();
        match end {
            RoundEnd::Suspended(rows) => {
                let mut guard = self.lock();
                if matches!(guard.state, State::Closed) {
                    drop(guard);
                    drop(rows);
                    sink.all_finished(true);
                    return None;
                }
                if let Some((next, next_max)) = guard.next.pop_front() {
                    drop(guard);
                    sink.batch_finished();
                    trace!("suspended round continues into the replacement sink");
                    return Some((next, next_max, Ok(rows)));
                }
                drop(guard);
                sink.batch_finished();

                verbose!(max_rows, "consumer suspended");
                let mut shared = self.lock();
                shared.state = State::Suspended(rows);
                shared.sink = Some(sink);
                shared.max_rows = max_rows;
                None
            },
            RoundEnd::Exhausted => {
                sink.all_finished(false);
                self.settle(sink, max_rows)
            },
            RoundEnd::Failed(err) => {
                // a retry restarts and accepts in here
                sink.fail(err);
                self.settle(sink, max_rows)
            },
        }
    }

    /// Settle after a terminal signal, unless the round is being retried.
    fn settle(&self, sink: Box<dyn ResultSink>, max_rows: u32) -> Option<Round> {
        let mut guard = self.lock();
        let shared = &mut *guard;

        if mem::take(&mut shared.restarting) {
            if let Some(input) = shared.pending.take() {
                trace!("consumer continues with retried input");
                return Some((sink, max_rows, input));
            }
            shared.state = State::Idle;
            shared.sink = Some(sink);
            shared.max_rows = max_rows;
            return None;
        }

        shared.pending = None;
        if !matches!(shared.state, State::Closed) {
            shared.state = State::Finished;
        }
        let next = mem::take(&mut shared.next);
        drop(guard);
        drop(sink);

        for (mut sink, _) in next {
            sink.all_finished(false);
        }
        None
    }
}

/// Drain `rows` into `sink` until the row cap, the end of output, or a failure.
async fn round(sink: &mut dyn ResultSink, mut rows: RowStream, max_rows: u32) -> RoundEnd {
    verbose!(max_rows, "drain round");
    let mut count = 0u32;
    loop {
        match poll_fn(|cx| rows.as_mut().poll_next(cx)).await {
            Some(Ok(row)) => {
                sink.set_next_row(&row);
                count += 1;
                if max_rows != 0 && count == max_rows {
                    return RoundEnd::Suspended(rows);
                }
            },
            Some(Err(err)) => return RoundEnd::Failed(err),
            None => return RoundEnd::Exhausted,
        }
    }
}

impl WeakRowConsumer {
    pub fn upgrade(&self) -> Option<RowConsumer> {
        self.inner.upgrade().map(|inner| RowConsumer { inner })
    }
}

impl std::fmt::Debug for RowConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("RowConsumer")
            .field("state", &shared.state.name())
            .field("max_rows", &shared.max_rows)
            .field("queued", &shared.next.len())
            .finish()
    }
}

impl std::fmt::Debug for WeakRowConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WeakRowConsumer")
    }
}
