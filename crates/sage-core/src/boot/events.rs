use crossbeam_channel::{unbounded, Receiver, Sender};

/// Reload lifecycle notifications published by the boot sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// A validated replacement is about to be swapped in; `generation` is still live.
    AboutToReload { generation: u64 },
    Reloaded { generation: u64 },
    /// The attempt failed; `generation` keeps running.
    Failed {
        generation: u64,
        message: String,
    },
}

#[derive(Default)]
pub(crate) struct ReloadNotifier {
    subscribers: Vec<Sender<ReloadEvent>>,
}

impl ReloadNotifier {
    pub(crate) fn subscribe(&mut self) -> Receiver<ReloadEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Disconnected subscribers are dropped.
    pub(crate) fn publish(&mut self, event: ReloadEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_disconnected_subscribers() {
        let mut n = ReloadNotifier::default();
        let keep = n.subscribe();
        drop(n.subscribe());
        assert_eq!(n.len(), 2);

        n.publish(ReloadEvent::Reloaded { generation: 1 });
        assert_eq!(n.len(), 1);
        assert_eq!(keep.try_recv(), Ok(ReloadEvent::Reloaded { generation: 1 }));
    }
}
