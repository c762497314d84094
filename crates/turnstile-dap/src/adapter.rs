//! The bridge between a running dialog engine and an attached debugger.
//!
//! The engine calls [`DebugAdapter::begin_turn`] when a turn starts and
//! [`TurnGuard::step`] before each step it executes. A step blocks while
//! its turn is paused; the connection task resumes it by posting a new
//! [`Phase`].

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use turnstile_core::{decode, encode, SCALAR_HANDLE};

use crate::breakpoint::BreakpointService;
use crate::data::{DataModel, JsonDataModel, ValueRef};
use crate::error::DapError;
use crate::events::{EventFilters, Events};
use crate::model::{CodeModel, Context, DialogCodeModel, Frame, Item};
use crate::outbox::Outbox;
use crate::protocol::{
    Breakpoint, BreakpointEventBody, ContinueEventBody, Event, Outgoing, OutputEventBody,
    StoppedEventBody, ThreadEventBody,
};
use crate::registry::SessionRegistry;
use crate::session::{Phase, RunState, Session, TurnInfo};
use crate::source::{SourceMap, SourceRange};

/// Called when the debugger asks to end the hosting process.
pub type TerminateFn = Arc<dyn Fn() + Send + Sync>;

pub struct DebugAdapter {
    pub(crate) sessions: SessionRegistry,
    outbox: Outbox,
    pub(crate) breakpoints: Arc<dyn BreakpointService>,
    pub(crate) events: Arc<dyn EventFilters>,
    pub(crate) code_model: Arc<dyn CodeModel>,
    pub(crate) data_model: Arc<dyn DataModel>,
    pub(crate) sources: Arc<dyn SourceMap>,
    pub(crate) terminate: Option<TerminateFn>,
    closed: AtomicBool,
}

impl DebugAdapter {
    /// An adapter with the default code and data models and an empty
    /// event catalog.
    pub fn new(sources: Arc<dyn SourceMap>, breakpoints: Arc<dyn BreakpointService>) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            outbox: Outbox::new(),
            breakpoints,
            events: Arc::new(Events::new(Vec::<String>::new(), &[])),
            code_model: Arc::new(DialogCodeModel),
            data_model: Arc::new(JsonDataModel),
            sources,
            terminate: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventFilters>) -> Self {
        self.events = events;
        self
    }

    pub fn with_code_model(mut self, code_model: Arc<dyn CodeModel>) -> Self {
        self.code_model = code_model;
        self
    }

    pub fn with_data_model(mut self, data_model: Arc<dyn DataModel>) -> Self {
        self.data_model = data_model;
        self
    }

    pub fn with_terminate(mut self, terminate: TerminateFn) -> Self {
        self.terminate = Some(terminate);
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Route outgoing messages to a connection writer.
    pub fn attach(&self, tx: UnboundedSender<Value>) {
        self.outbox.attach(tx);
        tracing::info!("debugger attached");
    }

    /// Drop the connection and resume every paused turn.
    pub fn detach(&self) {
        self.outbox.detach();
        let released = self.release_all();
        tracing::info!(released, "debugger detached");
    }

    pub fn is_attached(&self) -> bool {
        self.outbox.is_attached()
    }

    /// Stop pausing turns for good and resume any that are waiting.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.outbox.detach();
        self.release_all();
    }

    fn release_all(&self) -> usize {
        self.sessions
            .all()
            .iter()
            .filter(|session| session.run().release())
            .count()
    }

    fn should_block(&self) -> bool {
        self.outbox.is_attached() && !self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn send(&self, message: impl Into<Outgoing>) -> Result<(), DapError> {
        self.outbox.send(message.into())
    }

    /// An `output` event carrying one line of text.
    pub(crate) fn output_event(&self, text: &str, location: Option<&SourceRange>) -> Event {
        Event::new(
            "output",
            OutputEventBody {
                output: format!("{text}\n"),
                source: location.map(SourceRange::source),
                line: location.map(|range| range.start.line),
            },
        )
    }

    pub(crate) fn breakpoint_events(&self, breakpoint: &Breakpoint, events: &mut Vec<Event>) {
        if breakpoint.verified {
            if let Some(item) = self.breakpoints.item_for(breakpoint) {
                let text = format!("Set breakpoint at {}", self.code_model.name_for(item.as_ref()));
                let location = self.sources.resolve(item.as_ref());
                events.push(self.output_event(&text, location.as_ref()));
            }
        }
        events.push(Event::new(
            "breakpoint",
            BreakpointEventBody {
                reason: "changed".into(),
                breakpoint: breakpoint.clone(),
            },
        ));
    }

    // -----------------------------------------------------------------------
    // Engine side
    // -----------------------------------------------------------------------

    /// Track a starting turn until the returned guard is dropped.
    pub fn begin_turn(self: &Arc<Self>, turn: &TurnInfo) -> Result<TurnGuard, DapError> {
        let session = self.sessions.open(turn)?;
        {
            let mut state = session.run().lock();
            self.publish_phase(&session, &mut state, None)?;
        }
        Ok(TurnGuard {
            adapter: Arc::clone(self),
            session,
        })
    }

    /// Report that the turn `turn_id` is about to execute `item`.
    ///
    /// Blocks while the turn is paused. Never fails: bridge errors are
    /// logged and the step proceeds.
    pub fn report_step(&self, turn_id: &str, context: &Context, item: &Item, tag: Option<&str>) {
        if let Err(e) = self.try_step(turn_id, context, item, tag) {
            tracing::warn!(turn = turn_id, error = %e, "step report failed");
        }
    }

    fn try_step(
        &self,
        turn_id: &str,
        context: &Context,
        item: &Item,
        tag: Option<&str>,
    ) -> Result<(), DapError> {
        let name = self.code_model.name_for(item.as_ref());
        let text = match tag {
            Some(tag) => format!("Step: {name} {tag}"),
            None => format!("Step: {name}"),
        };
        let location = self.sources.resolve(item.as_ref());
        self.send(self.output_event(&text, location.as_ref()))?;

        let mut events = Vec::new();
        for breakpoint in self.breakpoints.apply_updates()? {
            self.breakpoint_events(&breakpoint, &mut events);
        }
        for event in events {
            self.send(event)?;
        }

        let Some(session) = self.sessions.by_turn(turn_id) else {
            tracing::warn!(turn = turn_id, step = %name, "no session for turn");
            return Ok(());
        };
        session.record(context.clone(), item.clone(), tag);

        if self.should_block()
            && self.breakpoints.is_breakpoint(item.as_ref())
            && self.events.is_enabled(tag)
        {
            session.run().post(Phase::Breakpoint);
        }

        let run = session.run();
        let mut state = run.lock();
        self.publish_phase(&session, &mut state, Some(item))?;
        while !state.phase.is_running() && self.should_block() {
            tracing::debug!(code = session.code(), phase = %state.phase, step = %name, "turn paused");
            state = run.wait(state);
        }
        if state.phase == Phase::Started {
            state.phase = Phase::Continue;
        }
        self.publish_phase(&session, &mut state, Some(item))?;
        if state.phase == Phase::Next {
            state.phase = Phase::Step;
        }
        Ok(())
    }

    /// Tell the debugger about the session's phase if it changed since the
    /// last time.
    fn publish_phase(
        &self,
        session: &Session,
        state: &mut RunState,
        item: Option<&Item>,
    ) -> Result<(), DapError> {
        let phase = state.phase.reported();
        if state.sent == Some(phase) {
            return Ok(());
        }
        state.sent = Some(phase);

        let mut text = format!("'{}' is {}", session.name(), phase);
        if let Some(item) = item {
            let _ = write!(text, " at {}", self.code_model.name_for(item.as_ref()));
        }
        tracing::debug!(code = session.code(), %phase, "phase published");
        self.send(self.output_event(&text, None))?;

        let thread_id = session.code();
        let event = match phase {
            Phase::Started | Phase::Exited => Event::new(
                "thread",
                ThreadEventBody {
                    thread_id,
                    reason: phase.reason().into(),
                },
            ),
            Phase::Continue | Phase::Next => Event::new(
                "continue",
                ContinueEventBody {
                    thread_id,
                    all_threads_continued: false,
                },
            ),
            Phase::Step | Phase::Breakpoint | Phase::Pause => Event::new(
                "stopped",
                StoppedEventBody {
                    reason: phase.reason().into(),
                    description: text.clone(),
                    thread_id,
                    text,
                    preserve_focus_hint: false,
                    all_threads_stopped: false,
                },
            ),
        };
        self.send(event)
    }

    fn end_turn(&self, session: &Arc<Session>) {
        session.run().post(Phase::Exited);
        {
            let mut state = session.run().lock();
            if let Err(e) = self.publish_phase(session, &mut state, None) {
                tracing::warn!(code = session.code(), error = %e, "could not report turn exit");
            }
        }
        self.sessions.close(session);
    }

    // -----------------------------------------------------------------------
    // Debugger side
    // -----------------------------------------------------------------------

    /// Move the session `code` to `phase`. Unknown codes are ignored.
    pub fn post(&self, code: u32, phase: Phase) -> bool {
        match self.sessions.try_by_code(code) {
            Some(session) => {
                tracing::debug!(code, %phase, "phase posted");
                session.run().post(phase);
                true
            }
            None => {
                tracing::debug!(code, %phase, "phase posted to unknown session");
                false
            }
        }
    }

    pub(crate) fn encode_frame(
        &self,
        session: &Session,
        frame: &Arc<dyn Frame>,
    ) -> Result<u64, DapError> {
        let local = session.frame_codes().add(frame)?;
        Ok(encode(session.code(), local))
    }

    pub(crate) fn decode_frame(
        &self,
        handle: u64,
    ) -> Result<(Arc<Session>, Arc<dyn Frame>), DapError> {
        let (code, local) = decode(handle);
        let session = self.sessions.by_code(code)?;
        let frame = session.frame_codes().lookup(local)?;
        Ok((session, frame))
    }

    /// Handle for `value`, or [`SCALAR_HANDLE`] when it cannot be expanded.
    pub(crate) fn encode_value(&self, session: &Session, value: &ValueRef) -> Result<u64, DapError> {
        if self.data_model.is_scalar(value) {
            return Ok(SCALAR_HANDLE);
        }
        let local = session.value_codes().add(value)?;
        Ok(encode(session.code(), local))
    }

    pub(crate) fn decode_value(&self, handle: u64) -> Result<(Arc<Session>, ValueRef), DapError> {
        let (code, local) = decode(handle);
        let session = self.sessions.by_code(code)?;
        let value = session.value_codes().lookup(local)?;
        Ok((session, value))
    }
}

/// Keeps a turn visible to the debugger. Dropping it ends the turn.
pub struct TurnGuard {
    adapter: Arc<DebugAdapter>,
    session: Arc<Session>,
}

impl TurnGuard {
    /// Thread id of the turn.
    pub fn code(&self) -> u32 {
        self.session.code()
    }

    pub fn turn_id(&self) -> &str {
        self.session.turn_id()
    }

    /// Report a step of this turn. See [`DebugAdapter::report_step`].
    pub fn step(&self, context: &Context, item: &Item, tag: Option<&str>) {
        self.adapter
            .report_step(self.session.turn_id(), context, item, tag);
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.adapter.end_turn(&self.session);
    }
}
