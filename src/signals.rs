//! Termination signal handling
//!
//! The main thread blocks on the terminal, so signals are awaited on a small
//! lazily-created Tokio runtime instead. Virtual devices outlive the process,
//! which makes running cleanup on Ctrl-C and SIGTERM essential.

use log::{debug, info, warn};
use std::io;
use std::sync::OnceLock;
use tokio::runtime::Runtime;

static SIGNAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> io::Result<&'static Runtime> {
    if let Some(rt) = SIGNAL_RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("soundboard-signals")
        .enable_all()
        .build()?;
    // A racing caller may have won; its runtime is kept and ours dropped
    Ok(SIGNAL_RUNTIME.get_or_init(|| rt))
}

/// Which signal ended the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl Termination {
    /// Conventional shell exit status for the signal
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Interrupt => 130,
            Termination::Terminate => 143,
        }
    }
}

async fn wait_for_termination() -> io::Result<Termination> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| Termination::Interrupt),
            _ = term.recv() => Ok(Termination::Terminate),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| Termination::Interrupt)
    }
}

/// Run `handler` once on the first Ctrl-C or SIGTERM.
///
/// The handler runs on the signal thread; it is expected to clean up and
/// exit the process.
pub fn on_termination<F>(handler: F) -> io::Result<()>
where
    F: FnOnce(Termination) + Send + 'static,
{
    let rt = runtime()?;
    rt.spawn(async move {
        match wait_for_termination().await {
            Ok(signal) => {
                info!("Received {:?}, shutting down", signal);
                handler(signal);
            }
            Err(e) => warn!("Could not listen for termination signals: {}", e),
        }
    });
    debug!("Termination handler installed");
    Ok(())
}
