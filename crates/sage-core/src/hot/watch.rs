use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ERROR_LOG_EVERY: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// The watched artifact was written.
    ArtifactChanged,
    /// Someone asked for a reload through a [`ReloadTrigger`].
    Manual,
}

/// Requests a reload regardless of the artifact's content hash.
#[derive(Clone, Debug)]
pub struct ReloadTrigger {
    tx: Sender<()>,
}

impl ReloadTrigger {
    /// Returns `false` once the stream is gone. A request while one is pending coalesces.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Lazy, restartable stream of change notifications for one artifact.
///
/// The poll thread only pushes into a single-slot channel; consumers decide when to act.
/// Nothing is watched until the first `poll`/`wait_timeout`.
pub struct ChangeStream {
    path: PathBuf,
    poll_interval: Duration,
    watcher: Option<PollWatcher>,
    change_tx: Sender<()>,
    change_rx: Receiver<()>,
    manual_tx: Sender<()>,
    manual_rx: Receiver<()>,
    cancelled: bool,
}

impl ChangeStream {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let (change_tx, change_rx) = bounded(1);
        let (manual_tx, manual_rx) = bounded(1);
        Self {
            path: path.into(),
            poll_interval,
            watcher: None,
            change_tx,
            change_rx,
            manual_tx,
            manual_rx,
            cancelled: false,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[inline]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    #[inline]
    pub fn trigger(&self) -> ReloadTrigger {
        ReloadTrigger { tx: self.manual_tx.clone() }
    }

    /// Non-blocking. Manual requests take priority over file changes.
    pub fn poll(&mut self) -> Option<ChangeSignal> {
        if self.cancelled {
            return None;
        }
        self.ensure_started();

        if self.manual_rx.try_recv().is_ok() {
            return Some(ChangeSignal::Manual);
        }
        if self.change_rx.try_recv().is_ok() {
            return Some(ChangeSignal::ArtifactChanged);
        }
        None
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ChangeSignal> {
        if let Some(sig) = self.poll() {
            return Some(sig);
        }
        if self.cancelled {
            return None;
        }

        select! {
            recv(self.manual_rx) -> m => m.ok().map(|_| ChangeSignal::Manual),
            recv(self.change_rx) -> c => c.ok().map(|_| ChangeSignal::ArtifactChanged),
            default(timeout) => None,
        }
    }

    /// Stops the poll thread. Pending notifications are dropped; `poll` yields nothing until
    /// [`ChangeStream::restart`].
    pub fn cancel(&mut self) {
        if self.watcher.take().is_some() {
            log::debug!(target: "sage::watch", "watch: stopped '{}'", self.path.display());
        }
        self.drain();
        self.cancelled = true;
    }

    /// Drops the current watcher and pending signals; watching resumes on the next poll.
    pub fn restart(&mut self) {
        self.watcher = None;
        self.drain();
        self.cancelled = false;
    }

    fn drain(&self) {
        while self.change_rx.try_recv().is_ok() {}
        while self.manual_rx.try_recv().is_ok() {}
    }

    fn ensure_started(&mut self) {
        if self.watcher.is_some() {
            return;
        }
        match self.start() {
            Ok(w) => {
                log::debug!(
                    target: "sage::watch",
                    "watch: polling '{}' every {:?}",
                    self.path.display(),
                    self.poll_interval
                );
                self.watcher = Some(w);
            }
            Err(e) => {
                log::warn!(
                    target: "sage::watch",
                    "watch: cannot watch '{}': {} (retrying)",
                    self.path.display(),
                    e
                );
            }
        }
    }

    fn start(&self) -> notify::Result<PollWatcher> {
        // Watch the directory; the artifact itself may be replaced or briefly absent while the
        // build tool writes it.
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());

        let tx = self.change_tx.clone();
        let mut errors: u64 = 0;
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
                ) {
                    return;
                }
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if ours {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => {
                if errors % ERROR_LOG_EVERY == 0 {
                    log::warn!(
                        target: "sage::watch",
                        "watch: poll error ({} so far): {}",
                        errors + 1,
                        e
                    );
                }
                errors += 1;
            }
        };

        let config = Config::default().with_poll_interval(self.poll_interval);
        let mut watcher = PollWatcher::new(handler, config)?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

impl Iterator for ChangeStream {
    type Item = ChangeSignal;

    /// Blocks until the next change. Ends when the stream is cancelled.
    fn next(&mut self) -> Option<ChangeSignal> {
        loop {
            if self.cancelled {
                return None;
            }
            if let Some(sig) = self.wait_timeout(self.poll_interval) {
                return Some(sig);
            }
        }
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("path", &self.path)
            .field("poll_interval", &self.poll_interval)
            .field("watching", &self.is_watching())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
