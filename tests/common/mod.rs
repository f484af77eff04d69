use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_bridge::{AdapterSettings, EngineAdapter, EngineConfig, EngineFamily, EngineId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// What the scripted engine does when it receives `go`.
pub enum Go {
    /// Print these lines straight away.
    Reply(Vec<&'static str>),
    /// Print nothing until `stop`, then these lines.
    HangUntilStop(Vec<&'static str>),
    /// Print these lines after a pause, unless `stop` comes first.
    Delayed(Duration, Vec<&'static str>),
    /// Exit, closing its output.
    Close,
}

/// Commands the scripted engine received, in order.
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.all().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.count(command) > 0
    }

    fn push(&self, command: &str) {
        self.0.lock().unwrap().push(command.to_string());
    }
}

/// Short timeouts so failure paths finish quickly.
pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        handshake_timeout: Duration::from_millis(300),
        network_handshake_timeout: Duration::from_millis(300),
        search_margin: Duration::from_millis(200),
        open_search_timeout: Duration::from_millis(300),
        quit_grace: Duration::from_millis(200),
    }
}

pub fn fake_config(options: &[(&str, &str)]) -> EngineConfig {
    EngineConfig {
        name: "Scripted".to_string(),
        family: EngineFamily::Native,
        enabled: true,
        path: None,
        args: Vec::new(),
        options: options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Connect an adapter to a scripted engine answering `go` from `script`.
/// Extra `go` commands get `bestmove e2e4`.
pub async fn scripted_adapter(
    script: Vec<Go>,
    options: &[(&str, &str)],
) -> (EngineAdapter, CommandLog) {
    let log = CommandLog::default();
    let (reader, writer) = spawn_scripted(script, true, log.clone());
    let adapter = EngineAdapter::connect(
        EngineId::new("scripted"),
        &fake_config(options),
        reader,
        writer,
        fast_settings(),
    )
    .await
    .expect("handshake with scripted engine");
    (adapter, log)
}

/// Start a scripted engine on an in-memory pipe and return the adapter's
/// ends. With `handshake` false the engine never acknowledges anything.
pub fn spawn_scripted(
    script: Vec<Go>,
    handshake: bool,
    log: CommandLog,
) -> (
    tokio::io::ReadHalf<tokio::io::DuplexStream>,
    tokio::io::WriteHalf<tokio::io::DuplexStream>,
) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(theirs);
        let mut lines = BufReader::new(read).lines();
        let mut script: VecDeque<Go> = script.into();
        let mut pending: Vec<&'static str> = Vec::new();
        let (delayed_tx, mut delayed_rx) = tokio::sync::mpsc::unbounded_channel();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line.trim().to_string(),
                    _ => return,
                },
                Some(()) = delayed_rx.recv() => {
                    if !write_lines(&mut write, std::mem::take(&mut pending)).await {
                        return;
                    }
                    continue;
                }
            };
            log.push(&line);

            let mut out: Vec<&'static str> = Vec::new();
            match line.split_whitespace().next() {
                Some("uci") if handshake => out.extend(["id name Scripted", "uciok"]),
                Some("isready") if handshake => out.push("readyok"),
                Some("go") => match script.pop_front() {
                    Some(Go::Reply(reply)) => out = reply,
                    Some(Go::HangUntilStop(reply)) => pending = reply,
                    Some(Go::Delayed(pause, reply)) => {
                        pending = reply;
                        let delayed_tx = delayed_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(pause).await;
                            let _ = delayed_tx.send(());
                        });
                    }
                    Some(Go::Close) => return,
                    None => out.push("bestmove e2e4"),
                },
                Some("stop") => out = std::mem::take(&mut pending),
                Some("quit") => return,
                _ => {}
            }

            if !write_lines(&mut write, out).await {
                return;
            }
        }
    });
    tokio::io::split(ours)
}

async fn write_lines<W>(write: &mut W, lines: Vec<&'static str>) -> bool
where
    W: tokio::io::AsyncWrite + Unpin,
{
    for line in lines {
        if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            return false;
        }
    }
    write.flush().await.is_ok()
}

/// Registry with embedded engines, one engine whose binary is missing and
/// one disabled engine.
pub const TEST_REGISTRY: &str = r#"{
    "engines": {
        "alpha": {"name": "Alpha", "family": "embedded"},
        "beta": {"name": "Beta", "family": "embedded", "options": {"MaxDepth": "2"}},
        "broken": {"name": "Broken", "family": "native", "path": "/nonexistent/engine-binary"},
        "off": {"name": "Off", "family": "embedded", "enabled": false}
    },
    "pools": {
        "rotation": {"engines": ["alpha", "beta"]},
        "fallback": {"engines": ["broken", "alpha"], "weights": [5.0, 1.0]},
        "dead": {"engines": ["broken"]},
        "disabled": {"engines": ["off"]},
        "partly-disabled": {"engines": ["off", "alpha"]},
        "overweighted": {"engines": ["alpha", "beta"], "weights": [0.0, 1.0, 50.0]}
    }
}"#;

pub fn test_registry() -> engine_bridge::Registry {
    engine_bridge::Registry::from_json_str(TEST_REGISTRY).expect("valid test registry")
}
