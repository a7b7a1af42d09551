//! Penholder peer runtime.
//!
//! This crate binds the sans-IO protocol to the real world:
//! - Tokio TCP streams for the star transport
//! - System time for timeouts and warning throttles
//! - A line console on stdin/stdout
//!
//! ## Architecture
//!
//! ```text
//! penholder-node
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ transport      (Registrar / connect / Link over any byte stream)
//!   ├─ Driver         (Coordinator + AttributionStrategy event loop)
//!   ├─ LockDriver     (LockSession + LockWatcher + LockFileStrategy)
//!   └─ console        (command parsing, line output)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod console;
mod driver;
mod error;
mod lock_driver;
mod system_env;
pub mod transport;

pub use config::{LockConfig, NodeConfig, NodeRole};
pub use console::Command;
pub use driver::Driver;
pub use error::NodeError;
pub use lock_driver::LockDriver;
use penholder_core::{Environment, HostRelay};
use penholder_proto::PeerId;
pub use system_env::SystemEnv;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
pub use transport::{Link, Registrar, TransportEvent};
use transport::AcceptBackoff;

/// Stdin commands in, stdout lines out.
struct Console {
    output: mpsc::UnboundedSender<String>,
    printer: JoinHandle<()>,
}

impl Console {
    fn spawn() -> Result<(Self, mpsc::UnboundedReceiver<Command>), NodeError> {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (output, lines) = mpsc::unbounded_channel();
        console::spawn_stdin_reader(commands_tx, output.downgrade())?;
        let printer = tokio::spawn(console::write_lines(lines, tokio::io::stdout()));
        Ok((Self { output, printer }, commands))
    }

    /// Wait for every line sent so far to be printed. The driver must have
    /// dropped its output handle already.
    async fn flush(self) {
        drop(self.output);
        if let Err(error) = self.printer.await {
            tracing::debug!(%error, "console printer ended abnormally");
        }
    }
}

/// Run a networked session node until the session ends or the user quits.
///
/// # Errors
///
/// Returns `NodeError` if binding, connecting, the handshake or the initial
/// host/join operation fails.
pub async fn run_node(config: NodeConfig) -> Result<(), NodeError> {
    let (console, commands) = Console::spawn()?;
    let (events_tx, events) = mpsc::unbounded_channel();
    let env = SystemEnv::new();

    let (mut driver, acceptor) = match &config.role {
        NodeRole::Host { bind } => {
            let listener = TcpListener::bind(bind).await?;
            tracing::info!(addr = %listener.local_addr()?, "listening for guests");

            let relay = HostRelay::new(PeerId::HOST, PeerId::HOST);
            let driver = Driver::new(env, &config, relay, console.output.clone());
            let registrar = Registrar::new(events_tx);
            let acceptor = tokio::spawn(accept_guests(listener, registrar, env));
            (driver, Some(acceptor))
        },
        NodeRole::Join { address } => {
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(true)?;
            let (local, link) = transport::connect(stream, events_tx).await?;

            let relay = HostRelay::new(local, PeerId::HOST);
            let mut driver = Driver::new(env, &config, relay, console.output.clone());
            driver.add_link(PeerId::HOST, link);
            (driver, None)
        },
    };

    driver.start(&config.username)?;
    driver.run(events, commands).await;

    if let Some(acceptor) = acceptor {
        acceptor.abort();
    }
    console.flush().await;
    Ok(())
}

/// Run the lock-file variant until the user leaves or quits.
///
/// # Errors
///
/// Returns `NodeError` if the username is invalid or the lock file cannot
/// be written on join.
pub async fn run_lock(config: LockConfig) -> Result<(), NodeError> {
    let (console, commands) = Console::spawn()?;
    let mut driver = LockDriver::new(SystemEnv::new(), config, console.output.clone())?;

    driver.start()?;
    driver.run(commands).await;

    console.flush().await;
    Ok(())
}

async fn accept_guests<E: Environment>(listener: TcpListener, registrar: Registrar, env: E) {
    let mut backoff = AcceptBackoff::new();
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                backoff.succeeded();
                if let Err(error) = stream.set_nodelay(true) {
                    tracing::debug!(%addr, %error, "nodelay not set");
                }
                let registrar = registrar.clone();
                tokio::spawn(async move {
                    if let Err(error) = registrar.admit(stream).await {
                        tracing::warn!(%addr, %error, "guest handshake failed");
                    }
                });
            },
            Err(error) => {
                let delay = backoff.failed();
                tracing::error!(%error, ?delay, "accept failed");
                env.sleep(delay).await;
            },
        }
    }
}
