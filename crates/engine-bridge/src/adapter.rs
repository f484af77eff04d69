//! UCI engine adapter (async I/O)
//!
//! One adapter owns one engine: it is the only writer to the engine's stdin
//! and the only reader of its stdout. A background task forwards output lines
//! into a bounded channel; searches consume that channel until `bestmove`.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chess_core::{Position, UciMove, UciMoveError};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::embedded;
use crate::error::EngineError;
use crate::protocol::{Command, EngineLine};
use crate::record::{AnalysisResult, MoveRecord, SearchRequest, Variations};
use crate::registry::{EngineConfig, EngineFamily, EngineId};

/// Output lines buffered between the reader task and the adapter. A full
/// buffer stops the reader, which in turn blocks the engine on its pipe.
const LINE_BUFFER: usize = 1024;

/// Size of the in-memory pipe to embedded engines.
const PIPE_CAPACITY: usize = 64 * 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Timing knobs for one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSettings {
    /// Wait for `uciok` / `readyok`
    pub handshake_timeout: Duration,
    /// Same, for engines with a slow network backend
    pub network_handshake_timeout: Duration,
    /// Added on top of the search budget before a search is abandoned
    pub search_margin: Duration,
    /// Stand-in budget for depth and node searches, which have no time limit
    pub open_search_timeout: Duration,
    /// How long `quit` waits for the engine to exit before killing it
    pub quit_grace: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            network_handshake_timeout: Duration::from_secs(10),
            search_margin: Duration::from_secs(5),
            open_search_timeout: Duration::from_secs(30),
            quit_grace: Duration::from_secs(2),
        }
    }
}

/// What keeps the engine alive.
enum Backend {
    Process(Child),
    InProcess(JoinHandle<()>),
    /// Caller-supplied streams; nothing to reap.
    Streams,
}

pub struct EngineAdapter {
    id: EngineId,
    name: String,
    family: EngineFamily,
    settings: AdapterSettings,
    /// `MultiPV` restored after candidate searches
    base_multipv: u32,
    writer: Mutex<Option<Writer>>,
    lines: Mutex<mpsc::Receiver<String>>,
    backend: Mutex<Backend>,
    reader_task: JoinHandle<()>,
    ready: AtomicBool,
    closed: AtomicBool,
    searching: AtomicBool,
    /// Set when the engine may still emit output for a search nobody is
    /// waiting on any more
    residual: AtomicBool,
    /// `go` was sent and its `bestmove` not yet consumed
    awaiting_bestmove: AtomicBool,
    /// `MultiPV` may differ from `base_multipv`
    multipv_dirty: AtomicBool,
}

/// Holds the adapter's single search slot; released on drop.
struct SearchSlot<'a>(&'a AtomicBool);

impl Drop for SearchSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EngineAdapter {
    /// Start the engine described by `config` and run the UCI handshake.
    pub async fn launch(
        id: EngineId,
        config: &EngineConfig,
        settings: AdapterSettings,
    ) -> Result<Self, EngineError> {
        if !config.enabled {
            return Err(EngineError::Disabled(id));
        }

        match config.family {
            EngineFamily::Native | EngineFamily::Network => {
                let path = config.path.as_ref().ok_or_else(|| EngineError::Launch {
                    engine: id.clone(),
                    reason: "no executable path configured".to_string(),
                })?;

                let mut process = ProcessCommand::new(path)
                    .args(&config.args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| EngineError::Launch {
                        engine: id.clone(),
                        reason: format!("{}: {e}", path.display()),
                    })?;

                let (Some(stdin), Some(stdout)) = (process.stdin.take(), process.stdout.take())
                else {
                    return Err(EngineError::Launch {
                        engine: id,
                        reason: "engine stdio was not captured".to_string(),
                    });
                };

                info!(engine = %id, path = %path.display(), "Spawned engine process");
                let backend = Backend::Process(process);
                Self::start(id, config, stdout, Box::new(stdin), backend, settings).await
            }
            EngineFamily::Embedded => {
                let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
                let task = tokio::spawn(embedded::run(theirs));
                let (reader, writer) = tokio::io::split(ours);
                let backend = Backend::InProcess(task);
                Self::start(id, config, reader, Box::new(writer), backend, settings).await
            }
        }
    }

    /// Run the handshake over caller-supplied streams.
    pub async fn connect<R, W>(
        id: EngineId,
        config: &EngineConfig,
        reader: R,
        writer: W,
        settings: AdapterSettings,
    ) -> Result<Self, EngineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(id, config, reader, Box::new(writer), Backend::Streams, settings).await
    }

    async fn start<R>(
        id: EngineId,
        config: &EngineConfig,
        reader: R,
        writer: Writer,
        backend: Backend,
        settings: AdapterSettings,
    ) -> Result<Self, EngineError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let reader_task = tokio::spawn(forward_lines(id.clone(), reader, tx));

        let adapter = Self {
            id,
            name: config.name.clone(),
            family: config.family,
            settings,
            base_multipv: config.multipv(),
            writer: Mutex::new(Some(writer)),
            lines: Mutex::new(rx),
            backend: Mutex::new(backend),
            reader_task,
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            searching: AtomicBool::new(false),
            residual: AtomicBool::new(false),
            awaiting_bestmove: AtomicBool::new(false),
            multipv_dirty: AtomicBool::new(false),
        };

        adapter.handshake(config).await?;
        adapter.ready.store(true, Ordering::Release);
        info!(engine = %adapter.id, name = %adapter.name, "Engine ready");
        Ok(adapter)
    }

    async fn handshake(&self, config: &EngineConfig) -> Result<(), EngineError> {
        let mut rx = self.lines.lock().await;

        self.send(Command::Uci).await?;
        self.wait_for(&mut rx, "uciok").await?;

        for (name, value) in &config.options {
            self.send(Command::SetOption { name, value }).await?;
        }
        self.send(Command::IsReady).await?;
        self.wait_for(&mut rx, "readyok").await
    }

    pub fn id(&self) -> &EngineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> EngineFamily {
        self.family
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Send `position fen`. No acknowledgement is expected.
    pub async fn set_position(&self, position: &Position) -> Result<(), EngineError> {
        self.ensure_ready()?;
        self.send(Command::Position(position)).await
    }

    /// Tell the engine a new game starts and wait until it has reset.
    pub async fn new_game(&self) -> Result<(), EngineError> {
        let _slot = self.claim_search()?;
        let mut rx = self.lines.lock().await;
        self.recover(&mut rx).await?;
        self.send(Command::UciNewGame).await?;
        self.send(Command::IsReady).await?;
        // Anything before readyok, including leftovers from an aborted search,
        // is dropped here.
        self.wait_for(&mut rx, "readyok").await?;
        self.residual.store(false, Ordering::Release);
        Ok(())
    }

    /// Search `request.position` within `request.budget`.
    ///
    /// Fails fast with `ConcurrentSearch` while another search is running.
    /// Dropping the future part way is safe: the next call drains the
    /// abandoned search before starting its own.
    pub async fn search(&self, request: &SearchRequest) -> Result<AnalysisResult, EngineError> {
        let _slot = self.claim_search()?;
        let mut rx = self.lines.lock().await;
        self.recover(&mut rx).await?;
        self.run_search(&mut rx, request).await
    }

    /// Search with `count` lines and return them ranked by variation index.
    ///
    /// The engine's usual `MultiPV` is restored afterwards, also when the
    /// search fails. Engines may report fewer than `count` lines.
    pub async fn search_multi_variation(
        &self,
        count: u32,
        request: &SearchRequest,
    ) -> Result<Vec<MoveRecord>, EngineError> {
        let _slot = self.claim_search()?;
        let mut rx = self.lines.lock().await;
        self.recover(&mut rx).await?;
        let count = count.max(1);

        let requested = count.to_string();
        self.multipv_dirty.store(true, Ordering::Release);
        self.send(Command::SetOption { name: "MultiPV", value: &requested })
            .await?;

        let outcome = self.run_search(&mut rx, request).await;

        let base = self.base_multipv.to_string();
        let restored = self
            .send(Command::SetOption { name: "MultiPV", value: &base })
            .await;
        if restored.is_ok() {
            self.multipv_dirty.store(false, Ordering::Release);
        }

        let result = outcome?;
        restored?;

        let mut lines = result.lines;
        lines.truncate(count as usize);
        Ok(lines)
    }

    /// Ask the engine to stop searching. Does not wait for `bestmove`; a
    /// pending search receives it and completes normally.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.ensure_ready()?;
        if !self.is_searching() {
            // A stray bestmove may follow; the next search syncs past it.
            self.residual.store(true, Ordering::Release);
        }
        self.send(Command::Stop).await
    }

    /// Send `quit` and release the engine. Calling it again does nothing.
    pub async fn quit(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready.store(false, Ordering::Release);

        if let Err(e) = self.send(Command::Quit).await {
            debug!(engine = %self.id, error = %e, "Engine gone before quit");
        }
        // Closing stdin makes engines that ignored `quit` see EOF.
        self.writer.lock().await.take();

        let grace = self.settings.quit_grace;
        let mut backend = self.backend.lock().await;
        match &mut *backend {
            Backend::Process(child) => {
                if timeout(grace, child.wait()).await.is_err() {
                    warn!(engine = %self.id, "Engine ignored quit, killing process");
                    let _ = child.kill().await;
                }
            }
            Backend::InProcess(task) => {
                if timeout(grace, &mut *task).await.is_err() {
                    task.abort();
                }
            }
            Backend::Streams => {}
        }
        self.reader_task.abort();
        info!(engine = %self.id, "Engine shut down");
    }

    /// Bring the engine back to idle after a search that was abandoned,
    /// either by a timeout or by its future being dropped.
    async fn recover(&self, rx: &mut mpsc::Receiver<String>) -> Result<(), EngineError> {
        if self.awaiting_bestmove.load(Ordering::Acquire) {
            debug!(engine = %self.id, "Draining an abandoned search");
            self.send(Command::Stop).await?;
            let waited = self.handshake_timeout();
            let drained = timeout(waited, async {
                while let Some(line) = rx.recv().await {
                    if line.starts_with("bestmove") {
                        return true;
                    }
                }
                false
            })
            .await;
            match drained {
                Ok(true) => {}
                Ok(false) => return Err(self.disconnected()),
                Err(_) => warn!(engine = %self.id, ?waited, "No bestmove after stop"),
            }
            self.awaiting_bestmove.store(false, Ordering::Release);
            self.residual.store(true, Ordering::Release);
        }

        if self.multipv_dirty.load(Ordering::Acquire) {
            let base = self.base_multipv.to_string();
            self.send(Command::SetOption { name: "MultiPV", value: &base })
                .await?;
            self.multipv_dirty.store(false, Ordering::Release);
        }

        if self.residual.swap(false, Ordering::AcqRel) {
            debug!(engine = %self.id, "Syncing past output of an aborted search");
            self.send(Command::IsReady).await?;
            if let Err(e) = self.wait_for(rx, "readyok").await {
                self.residual.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn run_search(
        &self,
        rx: &mut mpsc::Receiver<String>,
        request: &SearchRequest,
    ) -> Result<AnalysisResult, EngineError> {
        let started = std::time::Instant::now();
        let mut variations = Variations::new();
        self.send(Command::Position(&request.position)).await?;
        self.awaiting_bestmove.store(true, Ordering::Release);
        self.send(Command::Go(request.budget)).await?;

        let limit = request
            .budget
            .wall_time()
            .unwrap_or(self.settings.open_search_timeout)
            + self.settings.search_margin;
        let deadline = Instant::now() + limit;

        let (best, ponder) = loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(line)) => match EngineLine::parse(&line) {
                    EngineLine::Info(info) => variations.apply(&info),
                    EngineLine::BestMove { best, ponder } => {
                        self.awaiting_bestmove.store(false, Ordering::Release);
                        break (best, ponder);
                    }
                    _ => {}
                },
                Ok(None) => return Err(self.disconnected()),
                Err(_) => {
                    // The bestmove this stop provokes is drained by the next call.
                    warn!(engine = %self.id, ?limit, "Search timed out, stopping engine");
                    if let Err(e) = self.send(Command::Stop).await {
                        debug!(engine = %self.id, error = %e, "Failed to send stop");
                    }
                    return Err(EngineError::SearchTimeout {
                        engine: self.id.clone(),
                        limit,
                    });
                }
            }
        };

        let best: UciMove = best.parse().map_err(|e| match e {
            UciMoveError::NullMove => EngineError::NoLegalMove(self.id.clone()),
            source => EngineError::InvalidMove {
                engine: self.id.clone(),
                source,
            },
        })?;

        let mut lines = variations.into_ranked();
        let top = lines
            .iter()
            .find(|r| r.mv == best)
            .cloned()
            .unwrap_or_else(|| MoveRecord::bare(best.clone()));
        if lines.is_empty() {
            lines.push(top.clone());
        }

        debug!(
            engine = %self.id,
            best = %best,
            score = top.score,
            depth = top.depth,
            lines = lines.len(),
            "Search finished"
        );

        Ok(AnalysisResult {
            position: request.position.clone(),
            best: top,
            ponder,
            lines,
            engine: self.id.clone(),
            engine_name: self.name.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            analyzed_at: Utc::now(),
        })
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(EngineError::NotReady(self.id.clone()))
        }
    }

    fn claim_search(&self) -> Result<SearchSlot<'_>, EngineError> {
        self.ensure_ready()?;
        self.searching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::ConcurrentSearch(self.id.clone()))?;
        Ok(SearchSlot(&self.searching))
    }

    fn handshake_timeout(&self) -> Duration {
        match self.family {
            EngineFamily::Network => self.settings.network_handshake_timeout,
            _ => self.settings.handshake_timeout,
        }
    }

    /// Send a command line to the engine.
    async fn send(&self, command: Command<'_>) -> Result<(), EngineError> {
        let line = command.to_string();
        debug!(engine = %self.id, cmd = %line, "UCI <");

        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| EngineError::NotReady(self.id.clone()))?;
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        writer.flush().await.map_err(|e| self.io_error(e))
    }

    /// Wait for an exact acknowledgement line, dropping everything before it.
    async fn wait_for(
        &self,
        rx: &mut mpsc::Receiver<String>,
        expected: &'static str,
    ) -> Result<(), EngineError> {
        let waited = self.handshake_timeout();
        let deadline = Instant::now() + waited;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(line)) if line.trim() == expected => return Ok(()),
                Ok(Some(_)) => {}
                Ok(None) => return Err(self.disconnected()),
                Err(_) => {
                    return Err(EngineError::ProtocolTimeout {
                        engine: self.id.clone(),
                        expected,
                        waited,
                    })
                }
            }
        }
    }

    fn disconnected(&self) -> EngineError {
        warn!(engine = %self.id, "Engine output closed");
        self.ready.store(false, Ordering::Release);
        EngineError::Disconnected(self.id.clone())
    }

    fn io_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            self.disconnected()
        } else {
            EngineError::Io {
                engine: self.id.clone(),
                source: e,
            }
        }
    }
}

impl Drop for EngineAdapter {
    fn drop(&mut self) {
        self.reader_task.abort();
        // Best-effort synchronous kill in drop
        match self.backend.get_mut() {
            Backend::Process(child) => {
                let _ = child.start_kill();
            }
            Backend::InProcess(task) => task.abort(),
            Backend::Streams => {}
        }
    }
}

/// Forward engine output line by line until EOF or until the adapter goes
/// away. Invalid UTF-8 is replaced rather than ending the stream.
async fn forward_lines<R>(engine: EngineId, reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!(engine = %engine, line = %line, "UCI >");
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(engine = %engine, error = %e, "Failed to read engine output");
                break;
            }
        }
    }
}
