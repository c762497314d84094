//! A tiny scripted bot so a debugger has something to attach to.
//!
//! Each line read from the input is one turn. Turns run on their own
//! threads, so a turn paused at a breakpoint does not hold up the next one.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context as _, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use turnstile_dap::{
    Context, DebugAdapter, Item, MemoryContext, Position, SourceRange, SourceRegistry, Step,
    TurnInfo,
};

/// The dialog the bot runs, as shown to the debugger.
const DIALOG_SOURCE: &str = r#"{
  "$kind": "AdaptiveDialog",
  "id": "root",
  "triggers": [
    { "$kind": "OnBeginDialog",
      "actions": [
        { "$kind": "SetProperty", "property": "user.visits", "value": "=user.visits + 1" },
        { "$kind": "SendActivity", "activity": "Hello, visitor #${user.visits}" },
        { "$kind": "SetProperty", "property": "turn.echo", "value": "=turn.text" },
        { "$kind": "SendActivity", "activity": "You said: ${turn.echo}" },
        { "$kind": "EndDialog" }
      ]
    }
  ]
}
"#;

#[derive(Debug, Clone, Copy)]
enum Action {
    CountVisit,
    Greet,
    Remember,
    Echo,
    End,
}

impl Action {
    fn kind(self) -> &'static str {
        match self {
            Action::CountVisit | Action::Remember => "SetProperty",
            Action::Greet | Action::Echo => "SendActivity",
            Action::End => "EndDialog",
        }
    }

    /// Run the action against turn memory, returning a reply to send.
    fn apply(self, memory: &mut Value) -> Option<String> {
        match self {
            Action::CountVisit => {
                let visits = memory["user"]["visits"].as_u64().unwrap_or(0) + 1;
                memory["user"]["visits"] = json!(visits);
                None
            }
            Action::Greet => Some(format!(
                "Hello, visitor #{}",
                memory["user"]["visits"].as_u64().unwrap_or(0)
            )),
            Action::Remember => {
                memory["turn"]["echo"] = memory["turn"]["text"].clone();
                None
            }
            Action::Echo => Some(format!(
                "You said: {}",
                memory["turn"]["echo"].as_str().unwrap_or_default()
            )),
            Action::End => None,
        }
    }
}

const SCRIPT: [Action; 5] = [
    Action::CountVisit,
    Action::Greet,
    Action::Remember,
    Action::Echo,
    Action::End,
];

/// Line of `needle` in `text`, with the columns it spans (all 1-based).
fn locate(text: &str, needle: &str, from_line: usize) -> Option<SourceRange> {
    text.lines()
        .enumerate()
        .skip(from_line)
        .find(|(_, line)| line.contains(needle))
        .map(|(index, line)| {
            let start = line.len() - line.trim_start().len() + 1;
            let line_no = index as i64 + 1;
            SourceRange::new(
                PathBuf::new(),
                Position::new(line_no, start as i64),
                Position::new(line_no, line.trim_end().len() as i64 + 1),
            )
        })
}

struct Shared {
    user: Value,
    conversation: Value,
}

/// The scripted bot and the dialog file it was loaded from.
pub(crate) struct DemoBot {
    path: PathBuf,
    root: Item,
    trigger: Item,
    actions: Vec<(Item, Action)>,
    state: Mutex<Shared>,
}

impl DemoBot {
    /// Write the dialog file under `dir` and register every step's location.
    pub(crate) fn install(dir: &Path, sources: &SourceRegistry) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join("main.dialog");
        std::fs::write(&path, DIALOG_SOURCE)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let at = |range: SourceRange| SourceRange { path: path.clone(), ..range };
        let line_count = DIALOG_SOURCE.lines().count() as i64;

        let root = Step::dialog("AdaptiveDialog", "root");
        sources.add(
            &root,
            SourceRange::new(&path, Position::new(1, 1), Position::new(line_count, 2)),
        );

        let trigger = Step::action("OnBeginDialog");
        let trigger_range = locate(DIALOG_SOURCE, "OnBeginDialog", 0)
            .context("dialog has no trigger")?;
        let trigger_end = locate(DIALOG_SOURCE, "]", trigger_range.start.line as usize)
            .context("trigger has no end")?;
        sources.add(
            &trigger,
            at(SourceRange {
                end: Position::new(trigger_end.end.line + 1, trigger_end.end.column),
                ..trigger_range
            }),
        );

        let mut actions = Vec::with_capacity(SCRIPT.len());
        let mut line = trigger_range.start.line as usize;
        for action in SCRIPT {
            let item = Step::action(action.kind());
            let range = locate(DIALOG_SOURCE, action.kind(), line)
                .with_context(|| format!("dialog has no {} step", action.kind()))?;
            line = range.start.line as usize;
            sources.add(&item, at(range));
            actions.push((item, action));
        }

        info!(path = %path.display(), steps = actions.len() + 2, "demo dialog installed");
        Ok(Self {
            path,
            root,
            trigger,
            actions,
            state: Mutex::new(Shared {
                user: json!({}),
                conversation: json!({}),
            }),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Run one turn, reporting every step, and return the bot's replies.
    pub(crate) fn run_turn(&self, adapter: &Arc<DebugAdapter>, turn: &TurnInfo) -> Vec<String> {
        let guard = match adapter.begin_turn(turn) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "turn not visible to the debugger");
                None
            }
        };

        let memory = {
            let shared = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            MemoryContext::new_memory(json!({
                "user": shared.user,
                "conversation": shared.conversation,
                "dialog": {},
                "turn": {"text": turn.text},
            }))
        };
        let context: Context = Arc::new(MemoryContext::new(memory.clone(), vec![self.root.clone()]));
        let step = |item: &Item, tag: Option<&str>| {
            if let Some(guard) = &guard {
                guard.step(&context, item, tag);
            }
        };

        let mut replies = Vec::new();
        step(&self.root, Some("begin"));
        step(&self.trigger, None);
        for (item, action) in &self.actions {
            step(item, None);
            let mut value = memory.write().unwrap_or_else(PoisonError::into_inner);
            replies.extend(action.apply(&mut value));
        }
        step(&self.root, Some("end"));

        let value = memory.read().unwrap_or_else(PoisonError::into_inner);
        let mut shared = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        shared.user = value["user"].clone();
        shared.conversation = value["conversation"].clone();
        replies
    }

    /// Start a turn for every input line. Returns the running turns.
    pub(crate) fn serve<R: BufRead>(
        self: &Arc<Self>,
        adapter: &Arc<DebugAdapter>,
        input: R,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut turns = Vec::new();
        for (index, line) in input.lines().enumerate() {
            let text = line.context("failed to read input")?;
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let turn = TurnInfo::new("console", (index + 1).to_string(), text);
            let bot = Arc::clone(self);
            let adapter = Arc::clone(adapter);
            let handle = thread::Builder::new()
                .name(format!("turn-{}", turn.activity_id))
                .spawn(move || {
                    for reply in bot.run_turn(&adapter, &turn) {
                        println!("{reply}");
                    }
                })
                .context("failed to start turn")?;
            turns.push(handle);
            turns.retain(|t| !t.is_finished());
        }
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_dap::{Breakpoints, DialogCodeModel, SourceMap};

    fn bot(dir: &Path) -> (Arc<SourceRegistry>, Arc<DebugAdapter>, Arc<DemoBot>) {
        let sources = Arc::new(SourceRegistry::new());
        let bot = Arc::new(DemoBot::install(dir, &sources).unwrap());
        let breakpoints = Arc::new(Breakpoints::new(sources.clone(), Arc::new(DialogCodeModel)));
        let adapter = Arc::new(DebugAdapter::new(sources.clone(), breakpoints));
        (sources, adapter, bot)
    }

    #[test]
    fn install_writes_dialog_and_maps_steps() {
        let dir = tempfile::tempdir().unwrap();
        let (sources, _, bot) = bot(dir.path());

        let written = std::fs::read_to_string(bot.path()).unwrap();
        assert_eq!(written, DIALOG_SOURCE);

        let root = sources.resolve(bot.root.as_ref()).unwrap();
        assert_eq!(root.start.line, 1);
        let greet = sources.resolve(bot.actions[1].0.as_ref()).unwrap();
        assert_eq!(greet.path, bot.path());
        assert!(written.lines().nth(greet.start.line as usize - 1).unwrap().contains("Hello"));
        let end = sources.resolve(bot.actions[4].0.as_ref()).unwrap();
        assert!(written.lines().nth(end.start.line as usize - 1).unwrap().contains("EndDialog"));

        let (found, _) = sources.item_at(bot.path(), greet.start.line).unwrap();
        assert!(turnstile_dap::model::same_item(found.as_ref(), bot.actions[1].0.as_ref()));
    }

    #[test]
    fn turns_count_visits_and_echo() {
        let dir = tempfile::tempdir().unwrap();
        let (_, adapter, bot) = bot(dir.path());

        let first = bot.run_turn(&adapter, &TurnInfo::new("console", "1", "hi"));
        assert_eq!(first, vec!["Hello, visitor #1", "You said: hi"]);
        let second = bot.run_turn(&adapter, &TurnInfo::new("console", "2", "again"));
        assert_eq!(second, vec!["Hello, visitor #2", "You said: again"]);
        assert!(adapter.sessions().all().is_empty());
    }

    #[test]
    fn serve_runs_a_turn_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let (_, adapter, bot) = bot(dir.path());
        let input = std::io::Cursor::new("one\n\ntwo\n");
        for turn in bot.serve(&adapter, input).unwrap() {
            turn.join().unwrap();
        }
        let shared = bot.state.lock().unwrap();
        assert_eq!(shared.user["visits"], 2);
    }
}
