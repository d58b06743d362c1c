use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::state::AppState;

use super::scan::scan_once;

/// Debounces filesystem events into an immediate rescan (the
/// "scan on change" path, distinct from the periodic full scan). `notify`'s
/// callback runs on its own thread, so events are forwarded across a channel
/// into the async driver loop.
pub fn run_watch_driver(state: AppState) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<()>(16);

    let scan_path = state.config.scan_path.clone();
    std::thread::spawn(move || {
        let tx2 = tx.clone();
        let mut watcher = match RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if res.is_ok() {
                    let _ = tx2.blocking_send(());
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(error = %err, "failed to start filesystem watcher");
                return;
            }
        };

        if let Err(err) = watcher.watch(std::path::Path::new(&scan_path), RecursiveMode::Recursive) {
            tracing::warn!(error = %err, path = %scan_path, "failed to watch scan path");
            return;
        }

        // Park this thread for the watcher's lifetime; it drives `tx` from
        // its own callback thread until the channel's receiver is dropped.
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    });

    tokio::spawn(async move {
        const DEBOUNCE: Duration = Duration::from_secs(5);
        loop {
            if rx.recv().await.is_none() {
                return;
            }
            // Drain anything else that arrived during debounce so a burst
            // of writes triggers one rescan, not one per file.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
            scan_once(&state, None).await;
        }
    })
}
