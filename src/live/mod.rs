//! Live reload is implemented as a three-part system:
//!
//! 1. **WebSocket server**: a dedicated thread using `tungstenite` accepts
//!    persistent connections from open browser tabs.
//! 2. **Push thread**: receives [`ReloadEvent`]s and broadcasts them to every
//!    connected client. Stylesheets are swapped in place, anything else
//!    reloads the page.
//! 3. **HTTP server** (feature `server`): serves the output directory along
//!    with the client script at [`CLIENT_PATH`].
//!
//! Only one bridge may run per process. Pipelines never talk to the bridge
//! directly; they hold a [`Reloader`], which forwards events while a bridge is
//! running and drops them otherwise.

#[cfg(feature = "server")]
mod http;

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tracing::{debug, error, info, warn};
use tungstenite::WebSocket;

use crate::config::{LiveOptions, OpenTarget, Verbosity};
use crate::error::LiveError;

/// Route of the browser client script on the HTTP server.
pub const CLIENT_PATH: &str = "/__tsumugi/client.js";

/// Clients kept open; older connections are closed first.
const MAX_CLIENTS: usize = 10;

static RUNNING: AtomicBool = AtomicBool::new(false);

/// A request for connected browsers to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// The asset at this absolute path was rewritten.
    Asset(Utf8PathBuf),
    /// Reload the whole page.
    Full,
}

/// Cloneable handle used to emit reload events.
#[derive(Clone, Default)]
pub struct Reloader {
    tx: Arc<RwLock<Option<Sender<ReloadEvent>>>>,
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Reloader {
    pub fn notify(&self, event: ReloadEvent) {
        let guard = self.tx.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref()
            && tx.send(event).is_err()
        {
            debug!("live reload bridge is gone, dropping event");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn connect(&self, tx: Sender<ReloadEvent>) {
        *self.tx.write().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    pub(crate) fn disconnect(&self) {
        *self.tx.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// The running development server. Dropping it stops everything.
pub struct LiveReload {
    tx: Sender<ReloadEvent>,
    clients: Clients,
    stopping: Arc<AtomicBool>,
    ws_port: u16,
    thread_i: Option<JoinHandle<()>>,
    thread_o: Option<JoinHandle<()>>,
    #[cfg(feature = "server")]
    http: Option<http::Server>,
}

impl LiveReload {
    /// Starts the bridge serving `root`.
    ///
    /// Fails with [`LiveError::AlreadyRunning`] while another bridge is alive
    /// in this process.
    pub fn start(options: &LiveOptions, root: &Utf8Path) -> Result<Self, LiveError> {
        if RUNNING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LiveError::AlreadyRunning);
        }

        match Self::start_inner(options, root) {
            Ok(bridge) => Ok(bridge),
            Err(e) => {
                RUNNING.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn start_inner(options: &LiveOptions, root: &Utf8Path) -> Result<Self, LiveError> {
        let log = Log::new(options);
        let (tcp, ws_port) = reserve_port(options.ws_port)?;

        #[cfg(feature = "server")]
        let http = {
            let server = http::Server::start(options.port, root, ws_port)?;
            log.info(format_args!(
                "serving {} on {}",
                root,
                style(format!("http://localhost:{}/", server.port())).yellow()
            ));
            log.info(format_args!(
                "add <script src=\"{CLIENT_PATH}\"></script> to your templates"
            ));
            Some(server)
        };

        #[cfg(not(feature = "server"))]
        log.warn(format_args!(
            "built without the `server` feature, {} is not served",
            root
        ));

        let clients: Clients = Arc::new(Mutex::new(vec![]));
        let stopping = Arc::new(AtomicBool::new(false));

        let thread_i = new_thread_ws_incoming(tcp, clients.clone(), stopping.clone(), log.clone());
        let (tx, rx) = std::sync::mpsc::channel();
        let thread_o = new_thread_ws_reload(
            rx,
            clients.clone(),
            stopping.clone(),
            root.to_path_buf(),
            log.clone(),
        );

        log.info(format_args!(
            "reload socket listening on ws://localhost:{ws_port}/"
        ));

        #[cfg(feature = "server")]
        if let Some(server) = &http {
            open(options.open, server.port(), &log);
        }

        Ok(Self {
            tx,
            clients,
            stopping,
            ws_port,
            thread_i: Some(thread_i),
            thread_o: Some(thread_o),
            #[cfg(feature = "server")]
            http,
        })
    }

    pub fn notify(&self, event: ReloadEvent) {
        if self.tx.send(event).is_err() {
            warn!("live reload push thread has exited");
        }
    }

    /// Sender feeding this bridge, for use with [`Reloader::connect`].
    pub fn sender(&self) -> Sender<ReloadEvent> {
        self.tx.clone()
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    #[cfg(feature = "server")]
    pub fn http_port(&self) -> Option<u16> {
        self.http.as_ref().map(http::Server::port)
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Closes every client connection and shuts the servers down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }

        // Wake the accept loop so it can observe the flag.
        let _ = TcpStream::connect(("127.0.0.1", self.ws_port));

        if let Some(thread) = self.thread_i.take() {
            thread.join().ok();
        }
        if let Some(thread) = self.thread_o.take() {
            thread.join().ok();
        }

        if let Ok(mut clients) = self.clients.lock() {
            for mut socket in clients.drain(..) {
                socket.close(None).ok();
                socket.flush().ok();
            }
        }

        #[cfg(feature = "server")]
        if let Some(server) = self.http.take() {
            server.stop();
        }

        RUNNING.store(false, Ordering::Release);
        debug!("live reload bridge stopped");
    }
}

impl Drop for LiveReload {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Log sink honouring the bridge's own verbosity and prefix.
#[derive(Clone)]
struct Log {
    level: Verbosity,
    prefix: Arc<str>,
    connections: bool,
    file_changes: bool,
}

impl Log {
    fn new(options: &LiveOptions) -> Self {
        Self {
            level: options.log_level,
            prefix: options.log_prefix.as_str().into(),
            connections: options.log_connections,
            file_changes: options.log_file_changes,
        }
    }

    fn debug(&self, msg: std::fmt::Arguments<'_>) {
        if self.level >= Verbosity::Debug {
            debug!(prefix = %self.prefix, "{msg}");
        }
    }

    fn info(&self, msg: std::fmt::Arguments<'_>) {
        if self.level >= Verbosity::Info {
            info!(prefix = %self.prefix, "{msg}");
        }
    }

    fn warn(&self, msg: std::fmt::Arguments<'_>) {
        if self.level >= Verbosity::Warn {
            warn!(prefix = %self.prefix, "{msg}");
        }
    }
}

fn reserve_port(preferred: u16) -> Result<(TcpListener, u16), LiveError> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(LiveError::Bind)?,
    };

    let addr = listener.local_addr().map_err(LiveError::Bind)?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    client: Clients,
    stopping: Arc<AtomicBool>,
    log: Log,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            if stopping.load(Ordering::Acquire) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("reload socket accept failed: {e}");
                    continue;
                }
            };

            let peer = stream.peer_addr().ok();
            match tungstenite::accept(stream) {
                Ok(socket) => {
                    if log.connections {
                        match peer {
                            Some(peer) => log.info(format_args!("browser connected ({peer})")),
                            None => log.info(format_args!("browser connected")),
                        }
                    }
                    if let Ok(mut clients) = client.lock() {
                        clients.push(socket);
                    }
                }
                Err(e) => log.debug(format_args!("rejected reload socket handshake: {e}")),
            }
        }
    })
}

fn new_thread_ws_reload(
    rx: Receiver<ReloadEvent>,
    client: Clients,
    stopping: Arc<AtomicBool>,
    root: Utf8PathBuf,
    log: Log,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let event = match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) if !stopping.load(Ordering::Acquire) => continue,
                Err(_) => break,
            };

            let message = message_for(&event, &root);
            if log.file_changes {
                match &event {
                    ReloadEvent::Asset(path) => log.info(format_args!("file changed: {path}")),
                    ReloadEvent::Full => log.info(format_args!("reloading browsers")),
                }
            }

            let Ok(mut clients) = client.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(message.clone().into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                        broken.push(i);
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
                if log.connections {
                    log.info(format_args!("browser disconnected"));
                }
            }

            // Close all but the last few connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    })
}

/// Wire message for an event. Stylesheets under the served root are swapped
/// in place, anything else triggers a page reload.
fn message_for(event: &ReloadEvent, root: &Utf8Path) -> String {
    match event {
        ReloadEvent::Asset(path) if path.extension() == Some("css") => {
            match path.strip_prefix(root) {
                Ok(rel) => format!("css:/{rel}"),
                Err(_) => "reload".to_string(),
            }
        }
        _ => "reload".to_string(),
    }
}

fn open(target: OpenTarget, port: u16, log: &Log) {
    let url = match target {
        OpenTarget::None => return,
        OpenTarget::Local => format!("http://localhost:{port}/"),
        OpenTarget::External => format!("http://{}:{port}/", external_address()),
        OpenTarget::Ui => {
            log.warn(format_args!("no UI dashboard is available, opening the site"));
            format!("http://localhost:{port}/")
        }
        OpenTarget::Tunnel => {
            log.warn(format_args!("tunnels are not supported, not opening a browser"));
            return;
        }
    };

    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };

    match command.arg(&url).spawn() {
        Ok(_) => log.debug(format_args!("opened {url}")),
        Err(e) => log.warn(format_args!("couldn't open a browser at {url}: {e}")),
    }
}

/// Address of the interface used for outbound traffic. No packet is sent.
fn external_address() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
