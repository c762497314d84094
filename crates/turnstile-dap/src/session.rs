//! Per-turn debugging state and the run-phase monitor.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use turnstile_core::Identifier;

use crate::error::DapError;
use crate::model::{CodeModel, Context, Frame, Item};

/// Where a turn stands in the step-debugger state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The turn just began. Promoted to `Continue` on its first step.
    Started,
    Continue,
    /// One step granted; becomes `Step` once taken.
    Next,
    Step,
    Breakpoint,
    Pause,
    Exited,
}

impl Phase {
    /// The phase as the debugger sees it. A pending `Next` looks like running.
    pub fn reported(self) -> Phase {
        match self {
            Phase::Next => Phase::Continue,
            other => other,
        }
    }

    /// Lower-case name used as a `stopped` reason.
    pub fn reason(self) -> &'static str {
        match self {
            Phase::Started => "started",
            Phase::Continue => "continue",
            Phase::Next => "next",
            Phase::Step => "step",
            Phase::Breakpoint => "breakpoint",
            Phase::Pause => "pause",
            Phase::Exited => "exited",
        }
    }

    /// Whether a step reported in this phase may proceed.
    pub fn is_running(self) -> bool {
        matches!(self, Phase::Started | Phase::Continue | Phase::Next)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Started => "Started",
            Phase::Continue => "Continue",
            Phase::Next => "Next",
            Phase::Step => "Step",
            Phase::Breakpoint => "Breakpoint",
            Phase::Pause => "Pause",
            Phase::Exited => "Exited",
        };
        f.write_str(name)
    }
}

/// Phase guarded by [`RunModel`]'s lock.
#[derive(Debug)]
pub struct RunState {
    pub phase: Phase,
    /// The last phase published to the debugger.
    pub sent: Option<Phase>,
}

/// Mutex + condition variable pair a paused step waits on.
///
/// Every change goes through the lock and wakes all waiters, and every
/// waiter re-checks the phase after waking.
#[derive(Debug)]
pub struct RunModel {
    state: Mutex<RunState>,
    signal: Condvar,
}

impl RunModel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState {
                phase: Phase::Started,
                sent: None,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Set the phase and wake every waiter.
    pub fn post(&self, phase: Phase) {
        let mut state = self.lock();
        state.phase = phase;
        self.signal.notify_all();
    }

    /// Move a paused turn back to `Continue`. Returns whether it was paused.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        let paused = !state.phase.is_running() && state.phase != Phase::Exited;
        if paused {
            state.phase = Phase::Continue;
        }
        self.signal.notify_all();
        paused
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, RunState>) -> MutexGuard<'a, RunState> {
        self.signal
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of one engine turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInfo {
    pub channel_id: String,
    pub activity_id: String,
    /// Text of the message that started the turn.
    pub text: String,
}

impl TurnInfo {
    pub fn new(
        channel_id: impl Into<String>,
        activity_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            activity_id: activity_id.into(),
            text: text.into(),
        }
    }

    /// Key a step callback uses to find its session.
    pub fn turn_id(&self) -> String {
        format!("{}-{}", self.channel_id, self.activity_id)
    }
}

struct LastFrame {
    context: Context,
    item: Item,
    tag: Option<String>,
    frames: Option<Vec<Arc<dyn Frame>>>,
}

/// Debugging state of one in-flight turn, shown to the debugger as a thread.
pub struct Session {
    code: u32,
    turn_id: String,
    name: String,
    run: RunModel,
    last: Mutex<Option<LastFrame>>,
    frames: OnceLock<Identifier<dyn Frame>>,
    values: OnceLock<Identifier<dyn Any + Send + Sync>>,
}

impl Session {
    pub fn new(code: u32, turn: &TurnInfo) -> Self {
        Self {
            code,
            turn_id: turn.turn_id(),
            name: turn.text.clone(),
            run: RunModel::new(),
            last: Mutex::new(None),
            frames: OnceLock::new(),
            values: OnceLock::new(),
        }
    }

    /// Thread id on the wire.
    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> &RunModel {
        &self.run
    }

    fn last(&self) -> MutexGuard<'_, Option<LastFrame>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the step the turn is at.
    pub fn record(&self, context: Context, item: Item, tag: Option<&str>) {
        *self.last() = Some(LastFrame {
            context,
            item,
            tag: tag.map(str::to_string),
            frames: None,
        });
    }

    /// The item of the last recorded step.
    pub fn last_item(&self) -> Option<Item> {
        self.last().as_ref().map(|last| last.item.clone())
    }

    /// Call-stack frames of the last recorded step, computed once per step.
    pub fn frames(&self, code_model: &dyn CodeModel) -> Result<Vec<Arc<dyn Frame>>, DapError> {
        let mut last = self.last();
        let LastFrame {
            context,
            item,
            tag,
            frames,
        } = last.as_mut().ok_or(DapError::NoFrame(self.code))?;
        let frames =
            frames.get_or_insert_with(|| code_model.frames_for(context, item, tag.as_deref()));
        Ok(frames.clone())
    }

    /// Frame codes issued to the debugger.
    pub fn frame_codes(&self) -> &Identifier<dyn Frame> {
        self.frames.get_or_init(Identifier::new)
    }

    /// Value codes issued to the debugger.
    pub fn value_codes(&self) -> &Identifier<dyn Any + Send + Sync> {
        self.values.get_or_init(Identifier::new)
    }
}
