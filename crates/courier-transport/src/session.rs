//! The per-channel drain loop shared by every persistent transport.

use std::sync::Arc;

use courier_core::{Channel, DisposeReason};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::traits::{ChannelSink, Inbound, TransportError};

/// Why a transport session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The channel was disposed by something other than this transport.
    Disposed(DisposeReason),
    /// The client closed the connection.
    ClientClosed,
    /// Writing to the client failed; the channel was disposed.
    DeliveryFailed(TransportError),
    /// Reading from the client failed; the channel was disposed.
    ReceiveFailed(TransportError),
}

/// Attach a transport to a started channel and run it until either side ends.
///
/// Queued values go to `sink` in FIFO order, one at a time. Heartbeats from
/// `inbound` refresh the channel's liveness and are acknowledged through the
/// sink. Any transport-side ending disposes the channel, so by the time this
/// returns the channel is always disposed.
pub async fn drive<T, S, R>(channel: &Arc<Channel<T>>, sink: &mut S, mut inbound: R) -> SessionEnd
where
    T: Send + 'static,
    S: ChannelSink<T> + ?Sized,
    R: Stream<Item = Result<Inbound, TransportError>> + Unpin,
{
    debug!(channel = %channel.key(), transport = sink.name(), "Transport attached");

    let end = loop {
        tokio::select! {
            // Client input first: a backlog must not hold back heartbeats.
            biased;

            event = inbound.next() => match event {
                Some(Ok(Inbound::Heartbeat { timestamp })) => {
                    channel.heartbeat();
                    if let Err(e) = sink.acknowledge_heartbeat(timestamp).await {
                        warn!(channel = %channel.key(), error = %e, "Heartbeat ack failed");
                        channel.dispose_with(DisposeReason::TransportFailure);
                        break SessionEnd::DeliveryFailed(e);
                    }
                }
                Some(Ok(Inbound::Ignored)) => {}
                Some(Ok(Inbound::Close)) | None => {
                    channel.dispose_with(DisposeReason::ClientClosed);
                    break SessionEnd::ClientClosed;
                }
                Some(Err(e)) => {
                    warn!(channel = %channel.key(), error = %e, "Receive failed");
                    channel.dispose_with(DisposeReason::TransportFailure);
                    break SessionEnd::ReceiveFailed(e);
                }
            },

            next = channel.next() => match next {
                Some(value) => {
                    if let Err(e) = sink.deliver(value).await {
                        warn!(channel = %channel.key(), error = %e, "Delivery failed");
                        channel.dispose_with(DisposeReason::TransportFailure);
                        break SessionEnd::DeliveryFailed(e);
                    }
                }
                None => {
                    let reason = channel.disposal_reason().unwrap_or(DisposeReason::Requested);
                    if let Err(e) = sink.close(reason).await {
                        debug!(channel = %channel.key(), error = %e, "Close notification failed");
                    }
                    break SessionEnd::Disposed(reason);
                }
            },
        }
    };

    debug!(channel = %channel.key(), end = ?end, "Transport detached");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::{ChannelRegistry, ChannelState, HeartbeatMonitor, MonitorConfig};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Records everything put on the "wire"; optionally fails after N deliveries.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Vec<String>,
        acks: Vec<Option<u64>>,
        closed: Option<DisposeReason>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ChannelSink<String> for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&mut self, value: String) -> Result<(), TransportError> {
            if self.fail_after == Some(self.delivered.len()) {
                return Err(TransportError::DeliveryFailed("socket reset".into()));
            }
            self.delivered.push(value);
            Ok(())
        }

        async fn acknowledge_heartbeat(&mut self, timestamp: Option<u64>) -> Result<(), TransportError> {
            self.acks.push(timestamp);
            Ok(())
        }

        async fn close(&mut self, reason: DisposeReason) -> Result<(), TransportError> {
            self.closed = Some(reason);
            Ok(())
        }
    }

    fn inbound_channel() -> (
        mpsc::UnboundedSender<Result<Inbound, TransportError>>,
        impl Stream<Item = Result<Inbound, TransportError>> + Unpin,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (tx, Box::pin(stream))
    }

    #[tokio::test]
    async fn test_delivers_in_fifo_order() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();
        channel.queue("m1".to_string());
        channel.queue("m2".to_string());
        channel.queue("m3".to_string());

        let (tx, inbound) = inbound_channel();
        let mut sink = RecordingSink::default();

        let driver = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let end = drive(&channel, &mut sink, inbound).await;
                (end, sink)
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.dispose();

        let (end, sink) = driver.await.unwrap();
        assert!(matches!(end, SessionEnd::Disposed(DisposeReason::Requested)));
        assert_eq!(sink.delivered, vec!["m1", "m2", "m3"]);
        assert_eq!(sink.closed, Some(DisposeReason::Requested));
        drop(tx);
    }

    #[tokio::test]
    async fn test_delivery_failure_disposes_channel() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();
        channel.queue("m1".to_string());
        channel.queue("m2".to_string());
        channel.queue("m3".to_string());

        let (_tx, inbound) = inbound_channel();
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };

        let end = drive(&channel, &mut sink, inbound).await;

        assert!(matches!(end, SessionEnd::DeliveryFailed(_)));
        assert_eq!(sink.delivered, vec!["m1"]);
        assert_eq!(channel.state(), ChannelState::Disposed);
        assert_eq!(channel.disposal_reason(), Some(DisposeReason::TransportFailure));
        assert!(!registry.contains("user1", "/chat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_and_acknowledges() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();
        let before = channel.last_heartbeat();

        let (tx, inbound) = inbound_channel();
        let driver = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut sink = RecordingSink::default();
                let end = drive(&channel, &mut sink, inbound).await;
                (end, sink)
            })
        };

        tokio::time::advance(Duration::from_secs(5)).await;
        tx.send(Ok(Inbound::Heartbeat { timestamp: Some(7) })).unwrap();
        tx.send(Ok(Inbound::Ignored)).unwrap();
        tx.send(Ok(Inbound::Close)).unwrap();

        let (end, sink) = driver.await.unwrap();
        assert!(matches!(end, SessionEnd::ClientClosed));
        assert_eq!(sink.acks, vec![Some(7)]);
        assert!(channel.last_heartbeat() >= before + Duration::from_secs(5));
        assert!(channel.last_heartbeat() <= Instant::now());
        assert_eq!(channel.disposal_reason(), Some(DisposeReason::ClientClosed));
    }

    #[tokio::test]
    async fn test_receive_error_disposes_channel() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();

        let (tx, inbound) = inbound_channel();
        tx.send(Err(TransportError::ReceiveFailed("garbage".into()))).unwrap();

        let mut sink = RecordingSink::default();
        let end = drive(&channel, &mut sink, inbound).await;

        assert!(matches!(end, SessionEnd::ReceiveFailed(_)));
        assert_eq!(channel.disposal_reason(), Some(DisposeReason::TransportFailure));
    }

    #[tokio::test]
    async fn test_inbound_end_counts_as_client_close() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();

        let (tx, inbound) = inbound_channel();
        drop(tx);

        let mut sink = RecordingSink::default();
        let end = drive(&channel, &mut sink, inbound).await;

        assert!(matches!(end, SessionEnd::ClientClosed));
        assert!(channel.is_disposed());
        assert!(sink.closed.is_none());
    }

    /// Takes `delay` per delivery, like a client on a slow link.
    struct SlowSink {
        delay: Duration,
        delivered: usize,
    }

    #[async_trait]
    impl ChannelSink<String> for SlowSink {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn deliver(&mut self, _value: String) -> Result<(), TransportError> {
            tokio::time::sleep(self.delay).await;
            self.delivered += 1;
            Ok(())
        }
    }

    /// Forwards every delivery to the test body.
    struct ForwardingSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ChannelSink<String> for ForwardingSink {
        fn name(&self) -> &'static str {
            "forwarding"
        }

        async fn deliver(&mut self, value: String) -> Result<(), TransportError> {
            self.0
                .send(value)
                .map_err(|e| TransportError::DeliveryFailed(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_refresh_while_backlogged() {
        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let monitor = HeartbeatMonitor::new(registry.clone(), MonitorConfig::default())
            .unwrap()
            .spawn();

        let channel = registry.get_or_create("user1", "/chat").unwrap();
        for i in 0..1000 {
            channel.queue(format!("m{}", i));
        }

        let (tx, inbound) = inbound_channel();
        let driver = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut sink = SlowSink {
                    delay: Duration::from_millis(100),
                    delivered: 0,
                };
                let end = drive(&channel, &mut sink, inbound).await;
                (end, sink)
            })
        };

        // 60s of heartbeats every 5s against a 30s timeout; the backlog
        // needs 100s to drain.
        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(Ok(Inbound::Heartbeat { timestamp: None })).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!channel.is_disposed(), "evicted: {:?}", channel.disposal_reason());
        assert!(channel.queued_len() > 0);
        assert!(Instant::now().saturating_duration_since(channel.last_heartbeat()) <= Duration::from_secs(2));

        channel.dispose();
        let (end, sink) = driver.await.unwrap();
        assert!(matches!(end, SessionEnd::Disposed(DisposeReason::Requested)));
        assert!(sink.delivered > 500);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let registry: ChannelRegistry<String> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();

        let (_inbound_tx, inbound) = inbound_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let driver = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut sink = ForwardingSink(out_tx);
                drive(&channel, &mut sink, inbound).await
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for n in 0..PER_PRODUCER {
                        channel.queue(format!("{}:{}", p, n));
                    }
                })
            })
            .collect();

        let mut next_expected: HashMap<usize, usize> = HashMap::new();
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let value = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let (p, n) = value.split_once(':').unwrap();
            let (p, n): (usize, usize) = (p.parse().unwrap(), n.parse().unwrap());
            let expected = next_expected.entry(p).or_insert(0);
            assert_eq!(n, *expected, "producer {} out of order", p);
            *expected += 1;
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(next_expected.values().all(|&n| n == PER_PRODUCER));

        channel.dispose();
        assert!(matches!(driver.await.unwrap(), SessionEnd::Disposed(_)));
    }
}
