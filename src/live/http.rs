use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use camino::Utf8Path;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tracing::error;

use super::CLIENT_PATH;

/// Browser side of the bridge. `__PORT__` is replaced with the socket port.
const CLIENT_JS: &str = r#"(function () {
  var socket = new WebSocket("ws://" + location.hostname + ":__PORT__/");
  socket.addEventListener("message", function (event) {
    var data = String(event.data);
    if (data.indexOf("css:") === 0) {
      var target = data.slice(4);
      var links = document.querySelectorAll('link[rel="stylesheet"]');
      var swapped = false;
      for (var i = 0; i < links.length; i++) {
        var href = links[i].getAttribute("href") || "";
        if (href.split("?")[0] === target) {
          links[i].setAttribute("href", target + "?v=" + Date.now());
          swapped = true;
        }
      }
      if (swapped) return;
    }
    location.reload();
  });
})();
"#;

/// Static file server running on its own single-threaded runtime.
pub(crate) struct Server {
    port: u16,
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<Result<(), anyhow::Error>>,
}

impl Server {
    pub(crate) fn start(port: u16, root: &Utf8Path, ws_port: u16) -> std::io::Result<Self> {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = match std::net::TcpListener::bind(address) {
            Ok(listener) => listener,
            Err(_) => std::net::TcpListener::bind("127.0.0.1:0")?,
        };
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let script: Arc<str> = CLIENT_JS.replace("__PORT__", &ws_port.to_string()).into();
        let router = Router::new()
            .route(
                CLIENT_PATH,
                get(move || {
                    let script = script.clone();
                    async move { ([(CONTENT_TYPE, "application/javascript")], script.to_string()) }
                }),
            )
            // path to the output directory
            .fallback_service(ServeDir::new(root.as_std_path()));

        let (shutdown, signal) = oneshot::channel::<()>();

        let thread = thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move {
                            signal.await.ok();
                        })
                        .await?;
                    Ok::<(), anyhow::Error>(())
                })
        });

        Ok(Self {
            port,
            shutdown,
            thread,
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn stop(self) {
        self.shutdown.send(()).ok();

        match self.thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server failed: {e}"),
            Err(_) => error!("HTTP server thread panicked"),
        }
    }
}
