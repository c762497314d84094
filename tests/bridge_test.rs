use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use turnstile_dap::transport::{encode_message, read_message};
use turnstile_dap::{
    serve_connection, Breakpoints, Context, DapError, DebugAdapter, DialogCodeModel, Events,
    MemoryContext, Position, SourceRange, SourceRegistry, Step, TurnInfo,
};

const FILE: &str = "/bots/echo/main.dialog";

// ── Harness ─────────────────────────────────────────────────────

struct Debugger {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    seq: i64,
    seen: Vec<Value>,
}

impl Debugger {
    async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let request = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments
        });
        self.writer
            .write_all(&encode_message(&request).unwrap())
            .await
            .unwrap();
        self.seq
    }

    async fn next(&mut self) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.reader))
            .await
            .expect("bridge went quiet")
            .unwrap()
            .expect("bridge closed the connection");
        self.seen.push(message.clone());
        message
    }

    /// Read until a message matches, returning it.
    async fn until(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        loop {
            let message = self.next().await;
            if matches(&message) {
                return message;
            }
        }
    }

    async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        self.until(|m| m["type"] == "response" && m["request_seq"] == seq)
            .await
    }

    async fn event(&mut self, name: &str) -> Value {
        self.until(|m| m["type"] == "event" && m["event"] == name).await
    }
}

fn bridge() -> (Arc<DebugAdapter>, Arc<SourceRegistry>) {
    let sources = Arc::new(SourceRegistry::new());
    let breakpoints = Arc::new(Breakpoints::new(sources.clone(), Arc::new(DialogCodeModel)));
    let adapter = DebugAdapter::new(sources.clone(), breakpoints)
        .with_events(Arc::new(Events::new(["begin", "end"], &["begin".into()])));
    (Arc::new(adapter), sources)
}

fn connect(adapter: &Arc<DebugAdapter>) -> (Debugger, JoinHandle<Result<(), DapError>>) {
    let (client, server) = duplex(256 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let task = tokio::spawn(serve_connection(
        adapter.clone(),
        BufReader::new(server_read),
        server_write,
    ));
    let (reader, writer) = tokio::io::split(client);
    let debugger = Debugger {
        reader: BufReader::new(reader),
        writer,
        seq: 0,
        seen: Vec::new(),
    };
    (debugger, task)
}

// ── End-to-end ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn breakpoint_round_trip_through_a_connection() {
    let (adapter, sources) = bridge();
    let root = Step::dialog("AdaptiveDialog", "root");
    let ask = Step::dialog("TextInput", "askName");
    sources.add(
        &root,
        SourceRange::new(FILE, Position::new(1, 1), Position::new(20, 2)),
    );
    sources.add(
        &ask,
        SourceRange::new(FILE, Position::new(3, 5), Position::new(7, 6)),
    );

    let (mut debugger, connection) = connect(&adapter);

    let init = debugger.send("initialize", json!({"adapterID": "turnstile"})).await;
    let response = debugger.next().await;
    assert_eq!(response["request_seq"], init);
    assert_eq!(response["success"], true);
    let filters: Vec<&str> = response["body"]["exceptionBreakpointFilters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filter"].as_str().unwrap())
        .collect();
    assert_eq!(filters, vec!["begin", "end"]);
    assert_eq!(debugger.next().await["event"], "initialized");

    let set = debugger
        .request(
            "setBreakpoints",
            json!({"source": {"path": FILE}, "breakpoints": [{"line": 4}, {"line": 40}]}),
        )
        .await;
    let results = set["body"]["breakpoints"].as_array().unwrap().clone();
    assert_eq!(results[0]["verified"], true);
    assert_eq!(results[0]["line"], 3);
    assert_eq!(results[1]["verified"], false);
    let changed = debugger.event("breakpoint").await;
    assert_eq!(changed["body"]["reason"], "changed");
    assert_eq!(changed["body"]["breakpoint"]["id"], results[0]["id"]);

    debugger.request("configurationDone", json!({})).await;

    // The turn runs on its own thread, the way an engine would drive it.
    let turn_adapter = adapter.clone();
    let (ask_item, root_item) = (ask.clone(), root.clone());
    let turn = std::thread::spawn(move || {
        let guard = turn_adapter
            .begin_turn(&TurnInfo::new("emulator", "42", "my name is Ada"))
            .unwrap();
        let memory = MemoryContext::new_memory(json!({
            "user": {},
            "turn": {"x": 5, "text": "my name is Ada"}
        }));
        let context: Context = Arc::new(MemoryContext::new(memory, vec![root_item.clone()]));
        guard.step(&context, &root_item, Some("end"));
        guard.step(&context, &ask_item, None);
    });

    let started = debugger.event("thread").await;
    assert_eq!(started["body"]["reason"], "started");
    let thread_id = started["body"]["threadId"].clone();

    let step = debugger
        .until(|m| {
            m["event"] == "output"
                && m["body"]["output"]
                    .as_str()
                    .is_some_and(|o| o.starts_with("Step: TextInput:askName"))
        })
        .await;
    assert_eq!(step["body"]["line"], 3);
    assert_eq!(step["body"]["source"]["path"], FILE);

    let stopped = debugger.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], thread_id);
    assert!(!turn.is_finished());

    let threads = debugger.request("threads", json!({})).await;
    assert_eq!(
        threads["body"]["threads"],
        json!([{"id": thread_id, "name": "my name is Ada"}])
    );

    let trace = debugger
        .request("stackTrace", json!({"threadId": thread_id}))
        .await;
    let top = &trace["body"]["stackFrames"][0];
    assert_eq!(top["name"], "TextInput:askName");
    assert_eq!(top["line"], 3);
    assert_eq!(top["column"], 5);
    let frame_id = top["id"].clone();

    let scopes = debugger.request("scopes", json!({"frameId": frame_id})).await;
    let scope_ref = scopes["body"]["scopes"][0]["variablesReference"].clone();
    let variables = debugger
        .request("variables", json!({"variablesReference": scope_ref}))
        .await;
    assert!(variables["body"]["variables"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v["name"] == "turn"));

    let evaluated = debugger
        .request("evaluate", json!({"expression": "turn.x", "frameId": frame_id}))
        .await;
    assert_eq!(evaluated["success"], true);
    assert_eq!(evaluated["body"]["result"], "5");

    let unbound = debugger
        .request("evaluate", json!({"expression": "turn.nope", "frameId": frame_id}))
        .await;
    assert_eq!(unbound["success"], false);
    assert_eq!(unbound["message"], "could not evaluate 'turn.nope'");

    let resumed = debugger
        .request("continue", json!({"threadId": thread_id}))
        .await;
    assert_eq!(resumed["success"], true);
    let continued = debugger.event("continue").await;
    assert_eq!(continued["body"]["threadId"], thread_id);

    let exited = debugger
        .until(|m| m["event"] == "thread" && m["body"]["reason"] == "exited")
        .await;
    assert_eq!(exited["body"]["threadId"], thread_id);
    tokio::task::spawn_blocking(move || turn.join().unwrap())
        .await
        .unwrap();

    let seqs: Vec<i64> = debugger
        .seen
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seq out of order: {seqs:?}");

    debugger.writer.shutdown().await.unwrap();
    connection.await.unwrap().unwrap();
    assert!(!adapter.is_attached());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_connection_releases_a_paused_turn() {
    let (adapter, sources) = bridge();
    let ask = Step::action("SendActivity");
    sources.add(
        &ask,
        SourceRange::new(FILE, Position::new(9, 1), Position::new(9, 40)),
    );

    let (mut debugger, connection) = connect(&adapter);
    debugger
        .request(
            "setBreakpoints",
            json!({"source": {"path": FILE}, "breakpoints": [{"line": 9}]}),
        )
        .await;

    let turn_adapter = adapter.clone();
    let turn = std::thread::spawn(move || {
        let guard = turn_adapter
            .begin_turn(&TurnInfo::new("emulator", "7", "hi"))
            .unwrap();
        let memory = MemoryContext::new_memory(json!({"turn": {}}));
        let context: Context = Arc::new(MemoryContext::new(memory, Vec::new()));
        guard.step(&context, &ask, None);
    });

    debugger.event("stopped").await;
    assert!(!turn.is_finished());

    drop(debugger);
    connection.await.unwrap().unwrap();
    tokio::task::spawn_blocking(move || turn.join().unwrap())
        .await
        .unwrap();
    assert!(adapter.sessions().all().is_empty());
}

#[tokio::test]
async fn function_breakpoints_match_by_name() {
    let (adapter, sources) = bridge();
    let ask = Step::dialog("TextInput", "askName");
    sources.add(
        &ask,
        SourceRange::new(FILE, Position::new(3, 5), Position::new(7, 6)),
    );
    let (mut debugger, _connection) = connect(&adapter);

    let reply = debugger
        .request(
            "setFunctionBreakpoints",
            json!({"breakpoints": [{"name": "TextInput:askName"}, {"name": "missing"}]}),
        )
        .await;
    let results = reply["body"]["breakpoints"].as_array().unwrap();
    assert_eq!(results[0]["verified"], true);
    assert_eq!(results[0]["source"]["path"], FILE);
    assert_eq!(results[1]["verified"], false);
    assert_eq!(results[1]["message"], "no dialog step named 'missing'");
}
