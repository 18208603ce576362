//! Process-level termination signals
//!
//! tokio's signal driver does only the async-signal-safe write inside the
//! handler; everything else runs on a normal task once the token fires.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shared::{logging, ComponentId};

use crate::error::LauncherResult;

/// Cancel `token` on SIGINT, SIGTERM, SIGHUP or SIGQUIT
///
/// The listener exits on the first signal, or when the token is cancelled
/// by someone else.
pub fn install_signal_handlers(token: CancellationToken) -> LauncherResult<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
            _ = token.cancelled() => return,
        };
        logging::log_shutdown(ComponentId::Launcher, &format!("Received {received}"));
        token.cancel();
    }))
}
