// TerminalHub (C5): a registry of named pseudo-terminals.
//
// Three terminal kinds share this one implementation, distinguished by
// `TerminalType`:
// - Base (compose-progress): attached to a compose subcommand's output,
//   input ignored, lifetime = child process.
// - Interactive: bidirectional exec session, or the system console (Main).
// - Main: system shell for console access; behaves like Interactive.
//
// Per-terminal state machine: creating -> active -> closing -> closed.
// Writes while `closed` return Gone. A terminal with zero attached clients
// survives for a grace period (configurable; 0 for interactive) before the
// pty is torn down, so a transient reconnect doesn't kill output.
//
// Key features:
// - PTY spawning with configurable rows/cols
// - Output buffering (circular buffer, last 100 chunks)
// - Socket room-based broadcasting (terminalWrite, terminalExit events)
// - Explicit attach refcount (socketioxide exposes no room-member-count API)
// - Grace-period keep-alive instead of a fixed unconditional interval
// - Busy tracking: at most one compose-progress terminal per (endpoint, stack)
// - Static registry: RwLock<HashMap<String, Arc<Terminal>>>
// - exec() — one-shot command execution returning exit code

use crate::errors::CoreError;
use crate::utils::constants::{PROGRESS_TERMINAL_ROWS, TERMINAL_COLS, TERMINAL_ROWS};
use crate::utils::limit_queue::LimitQueue;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use portable_pty::{CommandBuilder, PtyPair, PtySize};
use socketioxide::extract::SocketRef;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Terminal type determines behavior and capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalType {
    /// Compose-progress terminal for running non-interactive commands
    Base,
    /// Interactive terminal that accepts user input (exec, log-follow)
    Interactive,
    /// Main terminal (system shell) for console access
    Main,
}

/// Terminal lifecycle state (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Creating,
    Active,
    Closing,
    Closed,
}

/// Grace period a terminal with zero attached clients is kept alive before
/// the pty is closed and any child signalled. Progress/log terminals get a
/// window for reconnects; interactive exec closes immediately.
fn grace_period(terminal_type: TerminalType) -> Duration {
    match terminal_type {
        TerminalType::Base => Duration::from_secs(10),
        TerminalType::Main | TerminalType::Interactive => Duration::from_secs(0),
    }
}

/// Represents a pseudo-terminal with PTY support
pub struct Terminal {
    /// Terminal type (Base, Interactive, Main)
    terminal_type: TerminalType,
    /// Unique terminal name
    name: String,
    /// Socket.io handle for broadcasting events
    io: socketioxide::SocketIo,
    /// Count of sockets currently attached (explicit refcount; socketioxide
    /// exposes no room-member-count API to derive this from room state).
    attached: AtomicUsize,
    /// Internal mutable state
    inner: Arc<Mutex<TerminalInner>>,
}

/// Internal mutable state of a terminal
struct TerminalInner {
    /// PTY pair (master/slave)
    pty_pair: Option<PtyPair>,
    /// Output buffer (last 100 chunks)
    buffer: LimitQueue<String>,
    /// Number of rows
    rows: u16,
    /// Number of columns
    cols: u16,
    /// Enable keep-alive (close if no clients for the grace period)
    enable_keep_alive: bool,
    /// Exit callback
    on_exit_callback: Option<Box<dyn FnOnce(i32) + Send>>,
    /// Reader task handle
    reader_task: Option<JoinHandle<()>>,
    /// Cleanup tasks handle (grace-period keep-alive)
    cleanup_task: Option<JoinHandle<()>>,
    /// Lifecycle state
    state: TerminalState,
}

/// Static registry of all active terminals
static TERMINAL_REGISTRY: Lazy<RwLock<HashMap<String, Arc<Terminal>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl Terminal {
    /// Create a new terminal
    pub fn new(
        io: socketioxide::SocketIo,
        name: String,
        terminal_type: TerminalType,
        _file: String,
        _args: Vec<String>,
        _cwd: String,
    ) -> Arc<Self> {
        let terminal = Arc::new(Self {
            terminal_type,
            name: name.clone(),
            io: io.clone(),
            attached: AtomicUsize::new(0),
            inner: Arc::new(Mutex::new(TerminalInner {
                pty_pair: None,
                buffer: LimitQueue::new(100),
                rows: TERMINAL_ROWS,
                cols: TERMINAL_COLS,
                enable_keep_alive: false,
                on_exit_callback: None,
                reader_task: None,
                cleanup_task: None,
                state: TerminalState::Creating,
            })),
        });

        // Register in static registry
        let terminal_clone = terminal.clone();
        tokio::spawn(async move {
            let mut registry = TERMINAL_REGISTRY.write().await;
            registry.insert(name, terminal_clone);
        });

        terminal
    }

    /// Create a new interactive terminal
    pub fn new_interactive(
        io: socketioxide::SocketIo,
        name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Arc<Self> {
        Self::new(io, name, TerminalType::Interactive, file, args, cwd)
    }

    /// Create a new main terminal (system shell)
    pub fn new_main(
        io: socketioxide::SocketIo,
        name: String,
        stacks_dir: String,
    ) -> Result<Arc<Self>> {
        let (shell, args) = Self::detect_shell()?;
        Ok(Self::new(
            io,
            name,
            TerminalType::Main,
            shell,
            args,
            stacks_dir,
        ))
    }

    /// Detect system shell. Prefers `$SHELL`, then falls back to `which bash`
    /// on Unix or pwsh/powershell on Windows.
    fn detect_shell() -> Result<(String, Vec<String>)> {
        if let Ok(shell) = std::env::var("SHELL") {
            if !shell.is_empty() {
                return Ok((shell, vec![]));
            }
        }

        #[cfg(target_os = "windows")]
        {
            if which::which("pwsh.exe").is_ok() {
                Ok(("pwsh.exe".to_string(), vec![]))
            } else {
                Ok(("powershell.exe".to_string(), vec![]))
            }
        }

        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(bash) = which::which("bash") {
                Ok((bash.display().to_string(), vec![]))
            } else {
                Ok(("sh".to_string(), vec![]))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terminal_type(&self) -> TerminalType {
        self.terminal_type
    }

    pub async fn state(&self) -> TerminalState {
        self.inner.lock().await.state
    }

    /// Set number of rows
    pub async fn set_rows(&self, rows: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rows = rows;
        if let Some(ref pty_pair) = inner.pty_pair {
            pty_pair
                .master
                .resize(PtySize {
                    rows,
                    cols: inner.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        Ok(())
    }

    /// Set number of columns
    pub async fn set_cols(&self, cols: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cols = cols;
        debug!("Terminal {} cols: {}", self.name, cols);
        if let Some(ref pty_pair) = inner.pty_pair {
            pty_pair
                .master
                .resize(PtySize {
                    rows: inner.rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        Ok(())
    }

    /// A single resize request is serialised through the inner lock (§4.5:
    /// "Resize requests are serialised; the hub sends a single TIOCSWINSZ
    /// equivalent to the pty per resize").
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rows = rows;
        inner.cols = cols;
        if let Some(ref pty_pair) = inner.pty_pair {
            pty_pair
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        Ok(())
    }

    /// Enable keep-alive (terminal closes if no clients for the grace period)
    pub async fn enable_keep_alive(&self, enable: bool) {
        let mut inner = self.inner.lock().await;
        inner.enable_keep_alive = enable;
    }

    /// Start the terminal (spawn PTY and begin output monitoring)
    pub async fn start(
        self: &Arc<Self>,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Don't start if already running
        if inner.pty_pair.is_some() {
            return Ok(());
        }

        let rows = inner.rows;
        let cols = inner.cols;
        let enable_keep_alive = inner.enable_keep_alive;

        drop(inner); // Release lock before spawning tasks

        // Spawn PTY
        let pty_system = portable_pty::native_pty_system();
        let pty_pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        // Spawn command in PTY
        let mut cmd = CommandBuilder::new(&file);
        cmd.args(&args);
        cmd.cwd(&cwd);

        let mut child = pty_pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command in PTY")?;

        debug!(
            "Terminal {} spawned: {} {:?} in {}",
            self.name, file, args, cwd
        );

        // Store PTY pair, transition creating -> active
        let mut inner = self.inner.lock().await;
        inner.pty_pair = Some(pty_pair);
        inner.state = TerminalState::Active;
        drop(inner);

        // Spawn reader task to monitor PTY output
        let reader_task = self.spawn_reader_task().await;

        // Spawn cleanup task for the grace-period keep-alive
        let cleanup_task = self.spawn_cleanup_task(enable_keep_alive);

        // Spawn exit monitor task
        let terminal_clone = self.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            match child.wait() {
                Ok(exit_status) => {
                    let exit_code = exit_status.exit_code() as i32;
                    info!("Terminal {} exited with code {}", name, exit_code);
                    let terminal_ref = terminal_clone.clone();
                    tokio::runtime::Handle::current().block_on(async move {
                        terminal_ref.handle_exit(exit_code).await;
                    });
                }
                Err(e) => {
                    error!("Terminal {} wait error: {}", name, e);
                    let terminal_ref = terminal_clone.clone();
                    tokio::runtime::Handle::current().block_on(async move {
                        terminal_ref.handle_exit(1).await;
                    });
                }
            }
        });

        // Store task handles
        let mut inner = self.inner.lock().await;
        inner.reader_task = Some(reader_task);
        inner.cleanup_task = Some(cleanup_task);

        Ok(())
    }

    /// Spawn task to read PTY output and broadcast to clients
    async fn spawn_reader_task(self: &Arc<Self>) -> JoinHandle<()> {
        let terminal = Arc::clone(self);
        let name = self.name.clone();

        // Get reader before spawning
        let reader_opt = {
            let inner = terminal.inner.lock().await;
            inner
                .pty_pair
                .as_ref()
                .and_then(|p| p.master.try_clone_reader().ok())
        };

        tokio::task::spawn_blocking(move || {
            let Some(reader) = reader_opt else {
                return;
            };
            let rt = tokio::runtime::Handle::current();

            let mut buf_reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                match buf_reader.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let data = line.clone();
                        line.clear();

                        rt.block_on(async {
                            terminal.broadcast_output(&data).await;
                        });
                    }
                    Err(e) => {
                        debug!("Terminal {} reader error: {}", name, e);
                        break;
                    }
                }
            }

            debug!("Terminal {} reader task exited", name);
        })
    }

    /// Broadcast output to all connected clients
    async fn broadcast_output(&self, data: &str) {
        // Add to buffer
        {
            let mut inner = self.inner.lock().await;
            inner.buffer.push(data.to_string());
        }

        // Broadcast to all sockets in the terminal's room
        let room_name = self.name.clone();
        let _ = self
            .io
            .to(room_name)
            .emit("terminalWrite", (&self.name, data));
    }

    /// Spawn the grace-period keep-alive task: once `attached` has been zero
    /// for `grace_period(terminal_type)`, close the terminal. Re-evaluated
    /// every second rather than once at the end so a reconnect during the
    /// window cancels the close.
    fn spawn_cleanup_task(self: &Arc<Self>, enable_keep_alive: bool) -> JoinHandle<()> {
        let terminal = Arc::clone(self);
        let name = self.name.clone();
        let grace = grace_period(self.terminal_type);

        tokio::spawn(async move {
            let mut zero_since: Option<tokio::time::Instant> = None;
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                {
                    let registry = TERMINAL_REGISTRY.read().await;
                    if !registry.contains_key(&name) {
                        break;
                    }
                }

                if !enable_keep_alive {
                    continue;
                }

                if terminal.attached.load(Ordering::SeqCst) == 0 {
                    let since = *zero_since.get_or_insert_with(tokio::time::Instant::now);
                    if since.elapsed() >= grace {
                        debug!(
                            "Terminal {} had zero attached clients for {:?}, closing",
                            name, grace
                        );
                        let _ = terminal.close().await;
                        break;
                    }
                } else {
                    zero_since = None;
                }
            }

            debug!("Terminal {} cleanup task exited", name);
        })
    }

    /// Handle terminal exit
    async fn handle_exit(&self, exit_code: i32) {
        debug!("Terminal {} handling exit: {}", self.name, exit_code);

        {
            let mut inner = self.inner.lock().await;
            inner.state = TerminalState::Closing;
        }

        // Broadcast exit to all clients
        let room_name = self.name.clone();
        let _ = self
            .io
            .to(room_name)
            .emit("terminalExit", (&self.name, exit_code));

        // Call exit callback
        let callback = {
            let mut inner = self.inner.lock().await;
            inner.on_exit_callback.take()
        };

        if let Some(callback) = callback {
            callback(exit_code);
        }

        // Abort cleanup tasks
        {
            let mut inner = self.inner.lock().await;
            if let Some(task) = inner.cleanup_task.take() {
                task.abort();
            }
            if let Some(task) = inner.reader_task.take() {
                task.abort();
            }
            inner.state = TerminalState::Closed;
        }

        // Remove from registry
        let mut registry = TERMINAL_REGISTRY.write().await;
        registry.remove(&self.name);

        debug!("Terminal {} removed from registry", self.name);
    }

    /// Register an exit callback
    pub async fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce(i32) + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.on_exit_callback = Some(Box::new(callback));
    }

    /// Join a socket to this terminal's room. Any buffered output is replayed
    /// to the joining client so late-attach sees history (§4.5's bounded
    /// ring buffer replay).
    pub async fn join(&self, socket: SocketRef) -> Result<()> {
        let room_name = self.name.clone();
        socket
            .join(room_name)
            .context("Failed to join socket to terminal room")?;
        self.attached.fetch_add(1, Ordering::SeqCst);

        let buffered = self.get_buffer().await;
        if !buffered.is_empty() {
            let _ = socket.emit("terminalWrite", (&self.name, buffered));
        }

        debug!("Socket {} joined terminal {}", socket.id, self.name);
        Ok(())
    }

    /// Leave a socket from this terminal's room
    pub async fn leave(&self, socket: SocketRef) -> Result<()> {
        let room_name = self.name.clone();
        socket
            .leave(room_name)
            .context("Failed to leave socket from terminal room")?;
        self.attached.fetch_sub(1, Ordering::SeqCst);
        debug!("Socket {} left terminal {}", socket.id, self.name);
        Ok(())
    }

    /// Get terminal output buffer
    pub async fn get_buffer(&self) -> String {
        let inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            String::new()
        } else {
            inner.buffer.iter().cloned().collect()
        }
    }

    /// Close the terminal (send Ctrl+C)
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = TerminalState::Closing;

        if let Some(ref pty_pair) = inner.pty_pair {
            let mut writer = pty_pair.master.take_writer()?;
            writer.write_all(b"\x03")?; // Ctrl+C
            writer.flush()?;
        }

        if let Some(task) = inner.cleanup_task.take() {
            task.abort();
        }
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }

        Ok(())
    }

    /// Write input to terminal (for interactive terminals only). While
    /// `creating`, input is buffered by the caller until attach completes
    /// (create-to-active is atomic from the client's viewpoint per §4.5);
    /// while `closed`, returns Gone.
    pub async fn write(&self, input: &str) -> Result<()> {
        if !matches!(
            self.terminal_type,
            TerminalType::Interactive | TerminalType::Main
        ) {
            anyhow::bail!("Cannot write to non-interactive terminal");
        }

        let inner = self.inner.lock().await;
        if inner.state == TerminalState::Closed {
            return Err(CoreError::Gone(self.name.clone()).into());
        }
        if let Some(ref pty_pair) = inner.pty_pair {
            let mut writer = pty_pair.master.take_writer()?;
            writer.write_all(input.as_bytes())?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Get a terminal from the registry
    pub async fn get_terminal(name: &str) -> Option<Arc<Terminal>> {
        let registry = TERMINAL_REGISTRY.read().await;
        registry.get(name).cloned()
    }

    /// Get or create a terminal
    pub async fn get_or_create_terminal(
        io: socketioxide::SocketIo,
        name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Arc<Terminal> {
        {
            let registry = TERMINAL_REGISTRY.read().await;
            if let Some(terminal) = registry.get(&name) {
                return terminal.clone();
            }
        }

        Self::new(io, name, TerminalType::Base, file, args, cwd)
    }

    /// Execute a command and wait for it to complete (one-shot execution),
    /// used for compose-progress terminals. Returns `Busy` if another
    /// subcommand is already running for the caller-supplied compose key.
    pub async fn exec(
        io: socketioxide::SocketIo,
        socket: Option<SocketRef>,
        terminal_name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Result<i32> {
        {
            let registry = TERMINAL_REGISTRY.read().await;
            if registry.contains_key(&terminal_name) {
                return Err(CoreError::Busy(terminal_name).into());
            }
        }

        let terminal = Terminal::new(
            io.clone(),
            terminal_name.clone(),
            TerminalType::Base,
            file.clone(),
            args.clone(),
            cwd.clone(),
        );

        terminal.set_rows(PROGRESS_TERMINAL_ROWS).await?;

        if let Some(socket) = socket {
            terminal.join(socket).await?;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();

        terminal
            .on_exit(move |exit_code| {
                let _ = tx.send(exit_code);
            })
            .await;

        terminal.start(file, args, cwd).await?;

        let exit_code = rx.await.unwrap_or(1);

        Ok(exit_code)
    }

    /// Get count of active terminals
    pub async fn get_terminal_count() -> usize {
        let registry = TERMINAL_REGISTRY.read().await;
        registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_io() -> socketioxide::SocketIo {
        let (_, io) = socketioxide::SocketIo::new_layer();
        io
    }

    #[tokio::test]
    async fn test_terminal_creation() {
        let io = create_test_io();
        let terminal = Terminal::new(
            io,
            "test-terminal".to_string(),
            TerminalType::Base,
            "echo".to_string(),
            vec!["hello".to_string()],
            ".".to_string(),
        );

        assert_eq!(terminal.name(), "test-terminal");
        assert_eq!(terminal.terminal_type(), TerminalType::Base);
        assert_eq!(terminal.state().await, TerminalState::Creating);
    }

    #[tokio::test]
    async fn test_terminal_registry() {
        let io = create_test_io();
        let name = format!("test-registry-{}", uuid::Uuid::new_v4());

        let terminal = Terminal::new(
            io.clone(),
            name.clone(),
            TerminalType::Base,
            "echo".to_string(),
            vec![],
            ".".to_string(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        let found = Terminal::get_terminal(&name).await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().name(), name);
        drop(terminal);
    }

    #[tokio::test]
    async fn test_detect_shell() {
        let result = Terminal::detect_shell();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_terminal_resize() {
        let io = create_test_io();
        let terminal = Terminal::new(
            io,
            "test-resize".to_string(),
            TerminalType::Base,
            "echo".to_string(),
            vec![],
            ".".to_string(),
        );

        assert!(terminal.set_rows(50).await.is_ok());
        assert!(terminal.set_cols(120).await.is_ok());
        assert!(terminal.resize(60, 140).await.is_ok());
    }
}
