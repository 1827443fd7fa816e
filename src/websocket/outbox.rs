// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Per-client data plane queue with a byte ceiling

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;

use crate::throttler::Throttler;

const DROP_WARNING_INTERVAL: Duration = Duration::from_secs(30);

/// Sending half of the data plane
///
/// A message is dropped when queueing it would push the backlog over `max_bytes`.
/// An empty queue always accepts one message, however large, so oversized messages
/// are still delivered to clients that keep up.
pub(crate) struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    queued_bytes: Arc<AtomicUsize>,
    max_bytes: usize,
    dropped: AtomicU64,
    drop_warning: Mutex<Throttler>,
}

pub(crate) struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
    queued_bytes: Arc<AtomicUsize>,
}

pub(crate) fn outbox(max_bytes: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued_bytes = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            queued_bytes: queued_bytes.clone(),
            max_bytes,
            dropped: AtomicU64::new(0),
            drop_warning: Mutex::new(Throttler::new(DROP_WARNING_INTERVAL)),
        },
        OutboxReceiver { rx, queued_bytes },
    )
}

impl Outbox {
    /// Queues a message, or drops it if the backlog is full. Returns true if queued.
    pub(crate) fn send_lossy(&self, msg: Message, client: impl Display) -> bool {
        let len = msg.len();
        let reserved = self
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                if queued > 0 && queued.saturating_add(len) > self.max_bytes {
                    None
                } else {
                    Some(queued + len)
                }
            });
        if reserved.is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if self.drop_warning.lock().try_acquire() {
                info!(
                    "Outbox for client {} full, dropping messages ({} dropped so far)",
                    client, dropped
                );
            }
            return false;
        }
        if self.tx.send(msg).is_err() {
            self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        true
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl OutboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        let msg = self.rx.recv().await?;
        self.queued_bytes.fetch_sub(msg.len(), Ordering::AcqRel);
        Some(msg)
    }

    pub(crate) fn try_recv(&mut self) -> Option<Message> {
        let msg = self.rx.try_recv().ok()?;
        self.queued_bytes.fetch_sub(msg.len(), Ordering::AcqRel);
        Some(msg)
    }
}
