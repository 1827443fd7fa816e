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

// Context: binding scope between channels and sinks

mod lazy_context;
mod registry;
mod subscriptions;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::channel::{ChannelId, RawChannel};
use crate::log_sink_set::SmallSinkVec;
use crate::sink::{sink_accepts_channel, Sink, SinkId};
use crate::{ChannelBuilder, Error, Schema};
use registry::ChannelRegistry;
use subscriptions::Subscriptions;

pub use lazy_context::LazyContext;

/// Binding scope between channels and sinks
///
/// A context owns a channel registry, the attached sinks, and the table of which
/// sink is subscribed to which channel. Channels created in one context are never
/// seen by sinks attached to another, so independent subsystems (and tests) can
/// use their own context.
///
/// # Concurrency
///
/// Registry and subscription changes take a write lock. Logging does not take the
/// lock: each channel keeps a snapshot of its subscribed sinks, refreshed whenever
/// subscriptions change.
///
/// Messages are delivered synchronously on the logging thread, one sink after
/// another in sink ID order (the order in which sinks were created). Each sink
/// therefore sees the messages of a channel in the order they were logged by any
/// one thread. Messages logged concurrently from different threads may reach two
/// sinks in different relative orders.
pub struct Context(RwLock<ContextInner>);

#[derive(Default)]
struct ContextInner {
    registry: ChannelRegistry,
    sinks: BTreeMap<SinkId, Arc<dyn Sink>>,
    subscriptions: Subscriptions,
}

impl Context {
    /// Creates an independent context.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self(RwLock::new(ContextInner::default())))
    }

    /// Returns the process-wide default context, creating it on first use.
    pub fn get_default() -> Arc<Self> {
        let default: &Arc<Context> = LazyContext::get_default();
        default.clone()
    }

    /// Starts building a channel on this context.
    pub fn channel_builder(self: &Arc<Self>, topic: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder::new(topic).context(self)
    }

    pub fn get_channel(&self, id: ChannelId) -> Option<Arc<RawChannel>> {
        self.0.read().registry.get(id).cloned()
    }

    /// Looks up a channel by topic alone.
    ///
    /// Several channels may share a topic with different encodings; the oldest open
    /// one is returned.
    pub fn get_channel_by_topic(&self, topic: &str) -> Option<Arc<RawChannel>> {
        self.0.read().registry.first_by_topic(topic).cloned()
    }

    /// All open channels, ordered by ID.
    pub fn channels(&self) -> Vec<Arc<RawChannel>> {
        self.0.read().registry.iter().cloned().collect()
    }

    pub(crate) fn create_channel(
        self: &Arc<Self>,
        topic: String,
        message_encoding: String,
        schema: Option<Schema>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Arc<RawChannel>, Error> {
        if topic.is_empty() {
            return Err(Error::ValueError("channel topic cannot be empty".to_string()));
        }
        if message_encoding.is_empty() {
            return Err(Error::MessageEncodingRequired);
        }

        let mut inner = self.0.write();
        if let Some(existing) = inner.registry.find(&topic, &message_encoding) {
            if existing.schema() != schema.as_ref() {
                debug!(
                    "Channel '{}' ({}) already exists with a different schema; keeping the original",
                    topic, message_encoding
                );
            }
            return Ok(existing.clone());
        }

        let channel = inner.registry.insert(
            Arc::downgrade(self),
            topic,
            message_encoding,
            schema,
            metadata,
        );
        debug!(
            "Created channel '{}' ({}) with id {}",
            channel.topic(),
            channel.message_encoding(),
            channel.id()
        );

        let sinks: Vec<_> = inner.sinks.values().cloned().collect();
        let mut changed = false;
        for sink in &sinks {
            changed |= !inner
                .advertise_to_sink(sink, std::slice::from_ref(&channel))
                .is_empty();
        }
        if changed {
            inner.update_channel_sinks([channel.id()]);
        }
        Ok(channel)
    }

    /// Attaches a sink.
    ///
    /// Every existing channel accepted by the sink is advertised to it before this
    /// returns. Returns false if the sink was already attached.
    pub fn add_sink(&self, sink: Arc<dyn Sink>) -> bool {
        let mut inner = self.0.write();
        let sink_id = sink.id();
        if inner.sinks.contains_key(&sink_id) {
            return false;
        }
        inner.sinks.insert(sink_id, sink.clone());
        let channels: Vec<_> = inner.registry.iter().cloned().collect();
        let changed = inner.advertise_to_sink(&sink, &channels);
        inner.update_channel_sinks(changed);
        info!("Attached sink {}", sink_id);
        true
    }

    /// Detaches a sink and drops all of its subscriptions.
    ///
    /// Returns false if the sink was not attached.
    pub fn remove_sink(&self, sink_id: SinkId) -> bool {
        let mut inner = self.0.write();
        if inner.sinks.remove(&sink_id).is_none() {
            return false;
        }
        let changed = inner.subscriptions.remove_sink(sink_id);
        inner.update_channel_sinks(changed);
        info!("Detached sink {}", sink_id);
        true
    }

    /// Subscribes a sink to channels that were advertised to it.
    ///
    /// Channels the sink never accepted are ignored.
    pub fn subscribe_channels(&self, sink_id: SinkId, channel_ids: &[ChannelId]) {
        let mut inner = self.0.write();
        if !inner.sinks.contains_key(&sink_id) {
            return;
        }
        let changed: Vec<_> = channel_ids
            .iter()
            .copied()
            .filter(|&id| inner.subscriptions.subscribe(sink_id, id))
            .collect();
        inner.update_channel_sinks(changed);
    }

    /// Unsubscribes a sink from channels.
    pub fn unsubscribe_channels(&self, sink_id: SinkId, channel_ids: &[ChannelId]) {
        let mut inner = self.0.write();
        let changed: Vec<_> = channel_ids
            .iter()
            .copied()
            .filter(|&id| inner.subscriptions.unsubscribe(sink_id, id))
            .collect();
        inner.update_channel_sinks(changed);
    }

    /// Removes a channel and unadvertises it from every sink it was advertised to.
    ///
    /// Sinks are notified after the lock is released, so their callbacks may use the
    /// context.
    pub(crate) fn remove_channel(&self, channel_id: ChannelId) -> bool {
        let mut inner = self.0.write();
        let Some(channel) = inner.registry.remove(channel_id) else {
            return false;
        };
        channel.clear_sinks();
        let sinks: Vec<Arc<dyn Sink>> = inner
            .subscriptions
            .remove_channel(channel_id)
            .into_iter()
            .filter_map(|sink_id| inner.sinks.get(&sink_id).cloned())
            .collect();
        drop(inner);

        for sink in sinks {
            sink.remove_channel(&channel);
        }
        debug!("Removed channel '{}' ({})", channel.topic(), channel_id);
        true
    }
}

impl ContextInner {
    /// Advertises channels to a sink and records its subscriptions.
    ///
    /// Returns the channels whose subscriber set changed.
    fn advertise_to_sink(
        &mut self,
        sink: &Arc<dyn Sink>,
        channels: &[Arc<RawChannel>],
    ) -> Vec<ChannelId> {
        let sink_id = sink.id();
        let accepted: Vec<&Arc<RawChannel>> = channels
            .iter()
            .filter(|channel| sink_accepts_channel(sink.as_ref(), channel))
            .collect();
        if accepted.is_empty() {
            return Vec::new();
        }
        for channel in &accepted {
            self.subscriptions.advertise(sink_id, channel.id());
        }

        let requested = sink.add_channels(&accepted);
        let wanted: Vec<ChannelId> = if sink.auto_subscribe() {
            accepted.iter().map(|channel| channel.id()).collect()
        } else {
            requested.unwrap_or_default()
        };
        wanted
            .into_iter()
            .filter(|&id| self.subscriptions.subscribe(sink_id, id))
            .collect()
    }

    /// Refreshes the sink snapshots of the given channels.
    fn update_channel_sinks(&self, channel_ids: impl IntoIterator<Item = ChannelId>) {
        let channel_ids: HashSet<ChannelId> = channel_ids.into_iter().collect();
        for id in channel_ids {
            let Some(channel) = self.registry.get(id) else {
                continue;
            };
            let sinks: SmallSinkVec = self
                .subscriptions
                .subscribers(id)
                .filter_map(|sink_id| self.sinks.get(&sink_id).cloned())
                .collect();
            channel.update_sinks(sinks);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let inner = self.0.get_mut();
        for channel in inner.registry.iter() {
            channel.clear_sinks();
        }
        inner.subscriptions.clear();
        inner.sinks.clear();
        inner.registry.clear();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.read();
        f.debug_struct("Context")
            .field("channels", &inner.registry.len())
            .field("sinks", &inner.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ErrorSink, RecordingSink};
    use crate::SinkChannelFilterFn;

    fn channel(ctx: &Arc<Context>, topic: &str) -> Arc<RawChannel> {
        ctx.channel_builder(topic)
            .message_encoding("json")
            .build_raw()
            .unwrap()
    }

    #[test]
    fn test_dedupe_by_topic_and_encoding() {
        let ctx = Context::new();
        let a = channel(&ctx, "/topic");
        let b = ctx
            .channel_builder("/topic")
            .message_encoding("json")
            .schema(Schema::new("Other", "jsonschema", b"{}".to_vec()))
            .build_raw()
            .unwrap();
        assert_eq!(a.id(), b.id());
        assert!(b.schema().is_none());

        let c = ctx
            .channel_builder("/topic")
            .message_encoding("cbor")
            .build_raw()
            .unwrap();
        assert_ne!(a.id(), c.id());
        assert_eq!(ctx.get_channel_by_topic("/topic").unwrap().id(), a.id());
    }

    #[test]
    fn test_empty_topic_rejected() {
        let ctx = Context::new();
        let result = ctx.channel_builder("").message_encoding("json").build_raw();
        assert!(matches!(result, Err(Error::ValueError(_))));
    }

    #[test]
    fn test_sink_attached_after_channels() {
        let ctx = Context::new();
        let channels: Vec<_> = (0..3).map(|i| channel(&ctx, &format!("/t{i}"))).collect();
        assert!(channels.iter().all(|c| !c.has_sinks()));

        let sink = Arc::new(RecordingSink::new());
        assert!(ctx.add_sink(sink.clone()));
        assert!(!ctx.add_sink(sink.clone()));
        assert!(channels.iter().all(|c| c.has_sinks()));
        assert_eq!(sink.advertised().len(), 3);

        for c in &channels {
            c.log(b"{}");
        }
        assert_eq!(sink.take_messages().len(), 3);
    }

    #[test]
    fn test_remove_sink_stops_delivery() {
        let ctx = Context::new();
        let c = channel(&ctx, "/t");
        let sink = Arc::new(RecordingSink::new());
        ctx.add_sink(sink.clone());
        c.log(b"1");
        assert!(ctx.remove_sink(sink.id()));
        assert!(!ctx.remove_sink(sink.id()));
        assert!(!c.has_sinks());
        c.log(b"2");
        assert_eq!(sink.take_messages().len(), 1);
    }

    #[test]
    fn test_filter_evaluated_once_per_channel() {
        let ctx = Context::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let filter = SinkChannelFilterFn::new(move |channel: &crate::ChannelDescriptor<'_>| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            channel.topic() != "/rejected"
        });
        let sink = Arc::new(RecordingSink::new().with_filter(Arc::new(filter)));
        ctx.add_sink(sink.clone());

        let accepted = channel(&ctx, "/accepted");
        let rejected = channel(&ctx, "/rejected");
        for _ in 0..5 {
            accepted.log(b"{}");
            rejected.log(b"{}");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(!rejected.has_sinks());
        let messages = sink.take_messages();
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| m.channel_id == accepted.id()));
        assert_eq!(sink.advertised(), vec![accepted.id()]);
    }

    #[test]
    fn test_supported_encodings_act_as_filter() {
        let ctx = Context::new();
        let sink = Arc::new(RecordingSink::new().with_supported_encodings(&["protobuf"]));
        ctx.add_sink(sink.clone());
        let json = channel(&ctx, "/json");
        let proto = ctx
            .channel_builder("/proto")
            .message_encoding("protobuf")
            .build_raw()
            .unwrap();
        assert!(!json.has_sinks());
        assert!(proto.has_sinks());
    }

    #[test]
    fn test_manual_subscriptions() {
        let ctx = Context::new();
        let a = channel(&ctx, "/a");
        let b = channel(&ctx, "/b");
        let sink = Arc::new(RecordingSink::new().auto_subscribe(false));
        ctx.add_sink(sink.clone());
        assert!(!a.has_sinks());

        ctx.subscribe_channels(sink.id(), &[a.id(), ChannelId::new(999)]);
        assert!(a.has_sinks());
        assert!(!b.has_sinks());
        a.log(b"1");
        b.log(b"2");
        assert_eq!(sink.take_messages().len(), 1);

        ctx.unsubscribe_channels(sink.id(), &[a.id()]);
        assert!(!a.has_sinks());
    }

    #[test]
    fn test_log_to_sink_targets_one_sink() {
        let ctx = Context::new();
        let c = channel(&ctx, "/t");
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        ctx.add_sink(first.clone());
        ctx.add_sink(second.clone());

        c.log_to_sink(b"only-second", Default::default(), second.id());
        assert!(first.take_messages().is_empty());
        assert_eq!(second.take_messages()[0].msg, b"only-second");
    }

    #[test]
    fn test_sink_error_does_not_block_others() {
        let ctx = Context::new();
        let c = channel(&ctx, "/t");
        ctx.add_sink(Arc::new(ErrorSink::new()));
        let good = Arc::new(RecordingSink::new());
        ctx.add_sink(good.clone());
        c.log(b"{}");
        assert_eq!(good.take_messages().len(), 1);
    }

    #[test]
    fn test_close_channel() {
        let ctx = Context::new();
        let sink = Arc::new(RecordingSink::new());
        ctx.add_sink(sink.clone());
        let c = channel(&ctx, "/t");
        assert!(c.has_sinks());
        c.close();
        assert!(!c.has_sinks());
        assert!(c.is_closed());
        assert!(ctx.get_channel(c.id()).is_none());
        assert_eq!(sink.removed(), vec![c.id()]);

        c.log(b"dropped");
        assert!(sink.take_messages().is_empty());

        let next = channel(&ctx, "/other");
        assert!(next.id() > c.id());
        let reopened = channel(&ctx, "/t");
        assert_ne!(reopened.id(), c.id());
    }

    /// Sink that reads the context back while a channel is being removed.
    struct ReentrantSink {
        id: SinkId,
        ctx: std::sync::Weak<Context>,
        seen: parking_lot::Mutex<Option<usize>>,
    }

    impl Sink for ReentrantSink {
        fn id(&self) -> SinkId {
            self.id
        }

        fn log(&self, _: &RawChannel, _: &[u8], _: &crate::Metadata) -> Result<(), Error> {
            Ok(())
        }

        fn remove_channel(&self, _channel: &RawChannel) {
            if let Some(ctx) = self.ctx.upgrade() {
                *self.seen.lock() = Some(ctx.channels().len());
            }
        }
    }

    #[test]
    fn test_close_channel_with_reentrant_sink() {
        let ctx = Context::new();
        let sink = Arc::new(ReentrantSink {
            id: SinkId::next(),
            ctx: Arc::downgrade(&ctx),
            seen: parking_lot::Mutex::new(None),
        });
        ctx.add_sink(sink.clone());
        let c = channel(&ctx, "/t");
        let _other = channel(&ctx, "/other");

        let (tx, rx) = std::sync::mpsc::channel();
        let closing = c.clone();
        std::thread::spawn(move || {
            closing.close();
            let _ = tx.send(());
        });
        rx.recv_timeout(std::time::Duration::from_secs(3))
            .expect("close did not return");
        assert_eq!(*sink.seen.lock(), Some(1));
    }

    #[test]
    fn test_contexts_are_isolated() {
        let ctx_a = Context::new();
        let ctx_b = Context::new();
        let sink = Arc::new(RecordingSink::new());
        ctx_a.add_sink(sink.clone());
        let c = channel(&ctx_b, "/t");
        c.log(b"{}");
        assert!(sink.take_messages().is_empty());
        assert!(sink.advertised().is_empty());
    }

    #[test]
    fn test_concurrent_create_yields_one_channel() {
        let ctx = Context::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || channel(&ctx, "/shared").id())
            })
            .collect();
        let ids: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(ctx.channels().len(), 1);
    }

    #[test]
    fn test_default_context_is_shared() {
        let a = Context::get_default();
        let b = Context::get_default();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_drop_detaches_sinks() {
        let ctx = Context::new();
        let c = channel(&ctx, "/t");
        let sink = Arc::new(RecordingSink::new());
        ctx.add_sink(sink.clone());
        drop(ctx);
        assert!(!c.has_sinks());
        assert_eq!(Arc::strong_count(&sink), 1);
        c.close();
    }
}
