//! Request routing.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::adapter::DebugAdapter;
use crate::capabilities;
use crate::error::DapError;
use crate::protocol::{
    DisconnectArguments, EvaluateArguments, EvaluateResponseBody, Event, Incoming,
    InitializeRequestArguments, Request, Scope, ScopesArguments, SetBreakpointsArguments,
    SetExceptionBreakpointsArguments, SetFunctionBreakpointsArguments, SetVariableArguments,
    SetVariableResponseBody, StackFrame, StackTraceArguments, Thread, ThreadArguments, Variable,
    VariablesArguments,
};
use crate::session::Phase;

/// A decoded debugger request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize(InitializeRequestArguments),
    Launch,
    Attach,
    SetBreakpoints(SetBreakpointsArguments),
    SetFunctionBreakpoints(SetFunctionBreakpointsArguments),
    SetExceptionBreakpoints(SetExceptionBreakpointsArguments),
    ConfigurationDone,
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    SetVariable(SetVariableArguments),
    Evaluate(EvaluateArguments),
    Continue(ThreadArguments),
    Pause(ThreadArguments),
    Next(ThreadArguments),
    Terminate,
    Disconnect(DisconnectArguments),
    Unknown(String),
}

fn arguments<T: DeserializeOwned>(request: &Request) -> Result<T, DapError> {
    let value = request.arguments.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(value).map_err(|e| DapError::InvalidArguments {
        command: request.command.clone(),
        message: e.to_string(),
    })
}

impl Command {
    pub fn from_request(request: &Request) -> Result<Self, DapError> {
        let command = match request.command.as_str() {
            "initialize" => Command::Initialize(arguments(request)?),
            "launch" => Command::Launch,
            "attach" => Command::Attach,
            "setBreakpoints" => Command::SetBreakpoints(arguments(request)?),
            "setFunctionBreakpoints" => Command::SetFunctionBreakpoints(arguments(request)?),
            "setExceptionBreakpoints" => Command::SetExceptionBreakpoints(arguments(request)?),
            "configurationDone" => Command::ConfigurationDone,
            "threads" => Command::Threads,
            "stackTrace" => Command::StackTrace(arguments(request)?),
            "scopes" => Command::Scopes(arguments(request)?),
            "variables" => Command::Variables(arguments(request)?),
            "setVariable" => Command::SetVariable(arguments(request)?),
            "evaluate" => Command::Evaluate(arguments(request)?),
            "continue" => Command::Continue(arguments(request)?),
            "pause" => Command::Pause(arguments(request)?),
            "next" => Command::Next(arguments(request)?),
            "terminate" => Command::Terminate,
            "disconnect" => Command::Disconnect(arguments(request)?),
            other => Command::Unknown(other.to_string()),
        };
        Ok(command)
    }
}

/// The body of a successful response plus events to send after it.
#[derive(Debug, Default)]
pub struct Reply {
    pub body: Value,
    pub events: Vec<Event>,
}

impl Reply {
    fn body(body: impl serde::Serialize) -> Result<Self, DapError> {
        let body = serde_json::to_value(body).map_err(|e| DapError::InvalidMessage(e.to_string()))?;
        Ok(Self {
            body,
            events: Vec::new(),
        })
    }

    fn empty() -> Self {
        Self {
            body: json!({}),
            events: Vec::new(),
        }
    }
}

impl DebugAdapter {
    /// Handle one inbound message.
    pub fn dispatch(&self, message: &Incoming) -> Result<Reply, DapError> {
        match message {
            Incoming::Request(request) => {
                let command = Command::from_request(request)?;
                self.handle(command)
            }
            other => Err(DapError::NotImplemented(other.kind().to_string())),
        }
    }

    fn handle(&self, command: Command) -> Result<Reply, DapError> {
        match command {
            Command::Initialize(args) => {
                tracing::info!(
                    client = args.client_name.as_deref().unwrap_or("unknown"),
                    "debugger initializing"
                );
                let caps = capabilities::advertised(self.events.as_ref(), self.terminate.is_some());
                let mut reply = Reply::body(caps)?;
                reply.events.push(Event::new("initialized", json!({})));
                Ok(reply)
            }
            Command::Launch | Command::Attach | Command::ConfigurationDone => Ok(Reply::empty()),
            Command::SetBreakpoints(args) => self.set_breakpoints(args),
            Command::SetFunctionBreakpoints(args) => {
                let results = self.breakpoints.set_function_breakpoints(&args.breakpoints);
                let mut reply = Reply::empty();
                reply
                    .events
                    .push(self.output_event("Set function breakpoints.", None));
                for breakpoint in results.iter().filter(|b| b.verified) {
                    self.breakpoint_events(breakpoint, &mut reply.events);
                }
                reply.body = json!({ "breakpoints": results });
                Ok(reply)
            }
            Command::SetExceptionBreakpoints(args) => {
                self.events.reset(&args.filters);
                Ok(Reply::empty())
            }
            Command::Threads => {
                let threads: Vec<Thread> = self
                    .sessions
                    .all()
                    .iter()
                    .map(|session| Thread {
                        id: session.code(),
                        name: session.name().to_string(),
                    })
                    .collect();
                Reply::body(json!({ "threads": threads }))
            }
            Command::StackTrace(args) => self.stack_trace(args),
            Command::Scopes(args) => {
                let (session, frame) = self.decode_frame(args.frame_id)?;
                let scope = Scope {
                    name: frame.name(),
                    variables_reference: self.encode_value(&session, &frame.data())?,
                    expensive: false,
                };
                Reply::body(json!({ "scopes": [scope] }))
            }
            Command::Variables(args) => {
                let (session, value) = self.decode_value(args.variables_reference)?;
                let mut variables = Vec::new();
                for name in self.data_model.names(&value) {
                    let Some(member) = self.data_model.get(&value, &name) else {
                        continue;
                    };
                    variables.push(Variable {
                        value: self.data_model.display(&member),
                        variables_reference: self.encode_value(&session, &member)?,
                        name,
                    });
                }
                Reply::body(json!({ "variables": variables }))
            }
            Command::SetVariable(args) => {
                let (session, value) = self.decode_value(args.variables_reference)?;
                let parsed = self.data_model.parse(&args.value)?;
                let stored = self.data_model.set(&value, &args.name, parsed)?;
                Reply::body(SetVariableResponseBody {
                    value: self.data_model.display(&stored),
                    variables_reference: self.encode_value(&session, &stored)?,
                })
            }
            Command::Evaluate(args) => {
                let frame_id = args.frame_id.ok_or(DapError::MissingFrame)?;
                let (session, frame) = self.decode_frame(frame_id)?;
                let expression = args.expression.trim().trim_matches('"');
                let result = frame
                    .evaluate(expression)
                    .ok_or_else(|| DapError::Evaluate(expression.to_string()))?;
                Reply::body(EvaluateResponseBody {
                    result: self.data_model.display(&result),
                    variables_reference: self.encode_value(&session, &result)?,
                })
            }
            Command::Continue(args) => {
                self.post(args.thread_id, Phase::Continue);
                Reply::body(json!({ "allThreadsContinued": false }))
            }
            Command::Pause(args) => {
                self.post(args.thread_id, Phase::Pause);
                Ok(Reply::empty())
            }
            Command::Next(args) => {
                self.post(args.thread_id, Phase::Next);
                Ok(Reply::empty())
            }
            Command::Terminate => {
                self.request_termination();
                Ok(Reply::empty())
            }
            Command::Disconnect(args) => {
                if args.terminate_debuggee == Some(true) {
                    self.request_termination();
                }
                Ok(Reply::empty())
            }
            Command::Unknown(command) => {
                tracing::debug!(%command, "unhandled request acknowledged");
                Ok(Reply::empty())
            }
        }
    }

    fn set_breakpoints(&self, args: SetBreakpointsArguments) -> Result<Reply, DapError> {
        let path = args
            .source
            .path
            .as_deref()
            .ok_or_else(|| DapError::InvalidArguments {
                command: "setBreakpoints".into(),
                message: "source has no path".into(),
            })?;
        let path = Path::new(path);
        let results = self.breakpoints.set_breakpoints(path, &args.breakpoints);

        let mut reply = Reply::empty();
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        reply
            .events
            .push(self.output_event(&format!("Set breakpoints for {file}"), None));
        for breakpoint in results.iter().filter(|b| b.verified) {
            self.breakpoint_events(breakpoint, &mut reply.events);
        }
        reply.body = json!({ "breakpoints": results });
        Ok(reply)
    }

    fn stack_trace(&self, args: StackTraceArguments) -> Result<Reply, DapError> {
        let session = self.sessions.by_code(args.thread_id)?;
        let frames = session.frames(self.code_model.as_ref())?;
        let total = frames.len();
        let start = args.start_frame.unwrap_or(0).min(total);
        let levels = match args.levels {
            Some(0) | None => total,
            Some(levels) => levels,
        };

        let mut stack_frames = Vec::new();
        for frame in frames.iter().skip(start).take(levels) {
            let range = self.sources.resolve(frame.item().as_ref());
            stack_frames.push(StackFrame {
                id: self.encode_frame(&session, frame)?,
                name: frame.name(),
                source: range.as_ref().map(|r| r.source()),
                line: range.as_ref().map_or(0, |r| r.start.line),
                column: range.as_ref().map_or(0, |r| r.start.column),
                end_line: range.as_ref().map(|r| r.end.line),
                end_column: range.as_ref().map(|r| r.end.column),
            });
        }
        Reply::body(json!({ "stackFrames": stack_frames, "totalFrames": total }))
    }

    fn request_termination(&self) {
        match &self.terminate {
            Some(terminate) => {
                tracing::info!("debugger requested termination");
                terminate();
            }
            None => tracing::debug!("termination requested but not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::Breakpoints;
    use crate::events::Events;
    use crate::memory::MemoryContext;
    use crate::model::{Context, DialogCodeModel, Step};
    use crate::session::TurnInfo;
    use crate::source::{Position, SourceRange, SourceRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use turnstile_core::{encode, SCALAR_HANDLE};

    const FILE: &str = "/bot/main.dialog";

    fn adapter() -> (Arc<DebugAdapter>, Arc<SourceRegistry>) {
        let sources = Arc::new(SourceRegistry::new());
        let breakpoints = Arc::new(Breakpoints::new(sources.clone(), Arc::new(DialogCodeModel)));
        let adapter = DebugAdapter::new(sources.clone(), breakpoints)
            .with_events(Arc::new(Events::new(["begin", "error"], &["error".into()])));
        (Arc::new(adapter), sources)
    }

    fn request(command: &str, arguments: Value) -> Incoming {
        Incoming::from_value(json!({
            "seq": 1,
            "type": "request",
            "command": command,
            "arguments": arguments
        }))
        .unwrap()
    }

    fn run(adapter: &DebugAdapter, command: &str, arguments: Value) -> Result<Reply, DapError> {
        adapter.dispatch(&request(command, arguments))
    }

    #[test]
    fn initialize_returns_capabilities_and_initialized_event() {
        let (adapter, _) = adapter();
        let reply = run(&adapter, "initialize", json!({"clientName": "test"})).unwrap();
        assert_eq!(reply.body["supportsSetVariable"], true);
        assert_eq!(reply.body["exceptionBreakpointFilters"][1]["filter"], "error");
        assert_eq!(reply.body["exceptionBreakpointFilters"][1]["default"], true);
        assert_eq!(reply.body["supportsTerminateRequest"], false);
        assert_eq!(reply.events.len(), 1);
        assert_eq!(reply.events[0].event, "initialized");
    }

    #[test]
    fn launch_and_unknown_commands_are_acknowledged() {
        let (adapter, _) = adapter();
        assert_eq!(run(&adapter, "launch", json!({})).unwrap().body, json!({}));
        assert_eq!(run(&adapter, "attach", json!({})).unwrap().body, json!({}));
        assert_eq!(run(&adapter, "stepBack", json!({})).unwrap().body, json!({}));
    }

    #[test]
    fn inbound_events_are_not_implemented() {
        let (adapter, _) = adapter();
        let event = Incoming::from_value(json!({"seq": 3, "type": "event", "event": "output"}))
            .unwrap();
        assert!(matches!(
            adapter.dispatch(&event),
            Err(DapError::NotImplemented(kind)) if kind == "event"
        ));
    }

    #[test]
    fn bad_arguments_are_reported() {
        let (adapter, _) = adapter();
        let err = run(&adapter, "scopes", json!({"frame": 1})).unwrap_err();
        assert!(matches!(err, DapError::InvalidArguments { ref command, .. } if command == "scopes"));
    }

    #[test]
    fn set_breakpoints_reports_verified_changes() {
        let (adapter, sources) = adapter();
        let ask = Step::dialog("TextInput", "askName");
        sources.add(
            &ask,
            SourceRange::new(FILE, Position::new(3, 5), Position::new(7, 6)),
        );

        let reply = run(
            &adapter,
            "setBreakpoints",
            json!({"source": {"path": FILE}, "breakpoints": [{"line": 4}, {"line": 40}]}),
        )
        .unwrap();

        let results = reply.body["breakpoints"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["verified"], true);
        assert_eq!(results[1]["verified"], false);

        let changed: Vec<&Event> = reply
            .events
            .iter()
            .filter(|e| e.event == "breakpoint")
            .collect();
        assert_eq!(changed.len(), 1);
        let body = changed[0].body.as_ref().unwrap();
        assert_eq!(body["reason"], "changed");
        assert_eq!(body["breakpoint"]["id"], results[0]["id"]);

        let outputs: Vec<&str> = reply
            .events
            .iter()
            .filter(|e| e.event == "output")
            .filter_map(|e| e.body.as_ref()?["output"].as_str())
            .collect();
        assert_eq!(
            outputs,
            vec![
                "Set breakpoints for main.dialog\n",
                "Set breakpoint at TextInput:askName\n"
            ]
        );
    }

    #[test]
    fn set_breakpoints_requires_a_path() {
        let (adapter, _) = adapter();
        let err = run(&adapter, "setBreakpoints", json!({"source": {"name": "x"}})).unwrap_err();
        assert!(matches!(err, DapError::InvalidArguments { .. }));
    }

    #[test]
    fn exception_filters_replace_enabled_set() {
        let (adapter, _) = adapter();
        run(&adapter, "setExceptionBreakpoints", json!({"filters": ["begin"]})).unwrap();
        assert!(adapter.events.is_enabled(Some("begin")));
        assert!(!adapter.events.is_enabled(Some("error")));
    }

    /// A turn paused nowhere in particular, with one recorded step.
    fn recorded_turn(adapter: &Arc<DebugAdapter>) -> crate::adapter::TurnGuard {
        let guard = adapter
            .begin_turn(&TurnInfo::new("test", "1", "hello there"))
            .unwrap();
        let memory = MemoryContext::new_memory(json!({
            "user": {"name": "Ada"},
            "turn": {"x": 5, "items": [1, 2]}
        }));
        let context: Context = Arc::new(MemoryContext::new(
            memory,
            vec![Step::dialog("AdaptiveDialog", "root")],
        ));
        guard.step(&context, &Step::action("SendActivity"), Some("begin"));
        guard
    }

    #[test]
    fn threads_list_live_sessions() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let reply = run(&adapter, "threads", json!({})).unwrap();
        assert_eq!(
            reply.body["threads"],
            json!([{"id": guard.code(), "name": "hello there"}])
        );
        drop(guard);
        let reply = run(&adapter, "threads", json!({})).unwrap();
        assert_eq!(reply.body["threads"], json!([]));
    }

    #[test]
    fn inspection_walks_frames_scopes_and_variables() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);

        let trace = run(&adapter, "stackTrace", json!({"threadId": guard.code()})).unwrap();
        let frames = trace.body["stackFrames"].as_array().unwrap();
        assert_eq!(trace.body["totalFrames"], 2);
        assert_eq!(frames[0]["name"], "SendActivity:begin");
        assert_eq!(frames[1]["name"], "AdaptiveDialog:root");
        assert_eq!(frames[0]["line"], 0);
        let frame_id = frames[0]["id"].as_u64().unwrap();

        let scopes = run(&adapter, "scopes", json!({"frameId": frame_id})).unwrap();
        let scope = &scopes.body["scopes"][0];
        assert_eq!(scope["name"], "SendActivity:begin");
        let scope_ref = scope["variablesReference"].as_u64().unwrap();
        assert_ne!(scope_ref, SCALAR_HANDLE);

        let vars = run(&adapter, "variables", json!({"variablesReference": scope_ref})).unwrap();
        let names: Vec<&str> = vars.body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["user", "conversation", "dialog", "turn", "tags"]);

        let turn = &vars.body["variables"][3];
        let turn_ref = turn["variablesReference"].as_u64().unwrap();
        let turn_vars = run(&adapter, "variables", json!({"variablesReference": turn_ref})).unwrap();
        let x = turn_vars.body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["name"] == "x")
            .unwrap();
        assert_eq!(x["value"], "5");
        assert_eq!(x["variablesReference"], SCALAR_HANDLE);
    }

    #[test]
    fn set_variable_writes_through() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let trace = run(&adapter, "stackTrace", json!({"threadId": guard.code()})).unwrap();
        let frame_id = trace.body["stackFrames"][0]["id"].as_u64().unwrap();

        let evaluated = run(&adapter, "evaluate", json!({"expression": "turn", "frameId": frame_id}))
            .unwrap();
        let turn_ref = evaluated.body["variablesReference"].as_u64().unwrap();

        let reply = run(
            &adapter,
            "setVariable",
            json!({"variablesReference": turn_ref, "name": "x", "value": "{\"y\": 1}"}),
        )
        .unwrap();
        assert_eq!(reply.body["value"], r#"{"y":1}"#);
        assert_ne!(reply.body["variablesReference"], SCALAR_HANDLE);

        let check = run(&adapter, "evaluate", json!({"expression": "turn.x.y", "frameId": frame_id}))
            .unwrap();
        assert_eq!(check.body["result"], "1");

        let err = run(
            &adapter,
            "setVariable",
            json!({"variablesReference": turn_ref, "name": "x", "value": "nope"}),
        )
        .unwrap_err();
        assert!(matches!(err, DapError::Data(_)));
    }

    #[test]
    fn evaluate_reports_unbound_names() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let trace = run(&adapter, "stackTrace", json!({"threadId": guard.code()})).unwrap();
        let frame_id = trace.body["stackFrames"][0]["id"].as_u64().unwrap();

        let ok = run(&adapter, "evaluate", json!({"expression": "\"turn.x\"", "frameId": frame_id}))
            .unwrap();
        assert_eq!(ok.body["result"], "5");
        assert_eq!(ok.body["variablesReference"], SCALAR_HANDLE);

        let err = run(&adapter, "evaluate", json!({"expression": "turn.nope", "frameId": frame_id}))
            .unwrap_err();
        assert_eq!(err.to_string(), "could not evaluate 'turn.nope'");

        let err = run(&adapter, "evaluate", json!({"expression": "turn.x"})).unwrap_err();
        assert!(matches!(err, DapError::MissingFrame));
    }

    #[test]
    fn stale_handles_are_rejected() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let code = guard.code();
        let trace = run(&adapter, "stackTrace", json!({"threadId": code})).unwrap();
        let frame_id = trace.body["stackFrames"][0]["id"].as_u64().unwrap();
        drop(guard);

        assert!(matches!(
            run(&adapter, "scopes", json!({"frameId": frame_id})),
            Err(DapError::NotFound(_))
        ));
        assert!(matches!(
            run(&adapter, "stackTrace", json!({"threadId": code})),
            Err(DapError::NotFound(_))
        ));
        assert!(matches!(
            run(&adapter, "variables", json!({"variablesReference": encode(code, 1)})),
            Err(DapError::NotFound(_))
        ));
    }

    #[test]
    fn stack_trace_paging() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let reply = run(
            &adapter,
            "stackTrace",
            json!({"threadId": guard.code(), "startFrame": 1, "levels": 5}),
        )
        .unwrap();
        let frames = reply.body["stackFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["name"], "AdaptiveDialog:root");
    }

    #[test]
    fn run_commands_ignore_unknown_threads() {
        let (adapter, _) = adapter();
        let reply = run(&adapter, "continue", json!({"threadId": 99})).unwrap();
        assert_eq!(reply.body, json!({"allThreadsContinued": false}));
        run(&adapter, "pause", json!({"threadId": 99})).unwrap();
        run(&adapter, "next", json!({"threadId": 99})).unwrap();
    }

    #[test]
    fn pause_and_next_update_phase() {
        let (adapter, _) = adapter();
        let guard = recorded_turn(&adapter);
        let session = adapter.sessions().by_code(guard.code()).unwrap();
        run(&adapter, "pause", json!({"threadId": guard.code()})).unwrap();
        assert_eq!(session.run().phase(), Phase::Pause);
        run(&adapter, "next", json!({"threadId": guard.code()})).unwrap();
        assert_eq!(session.run().phase(), Phase::Next);
    }

    #[test]
    fn terminate_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sources = Arc::new(SourceRegistry::new());
        let breakpoints = Arc::new(Breakpoints::new(sources.clone(), Arc::new(DialogCodeModel)));
        let adapter = DebugAdapter::new(sources, breakpoints).with_terminate(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let caps = run(&adapter, "initialize", json!({})).unwrap();
        assert_eq!(caps.body["supportTerminateDebuggee"], true);

        run(&adapter, "terminate", json!({})).unwrap();
        run(&adapter, "disconnect", json!({})).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        run(&adapter, "disconnect", json!({"terminateDebuggee": true})).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
