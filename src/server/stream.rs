//! Live sample stream over WebSocket.
//!
//! Each client is a hub subscriber backed by a bounded queue. On connect it
//! receives the current value, then one text frame per accepted sample. A
//! client that falls behind far enough to fill its queue is disconnected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::StreamConfig;
use crate::hub::{ChannelSink, Hub};
use crate::shutdown::stopped;

/// Accept stream clients until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    config: StreamConfig,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    info!(
        addr = %listener.local_addr()?,
        max_clients = config.max_clients,
        "Stream server listening"
    );

    loop {
        let (stream, addr) = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept stream connection");
                    continue;
                }
            },
        };

        let current = active.load(Ordering::Relaxed);
        if current >= config.max_clients {
            warn!(
                addr = %addr,
                current,
                max = config.max_clients,
                "Rejecting connection: max clients reached"
            );
            continue;
        }

        active.fetch_add(1, Ordering::Relaxed);
        let hub = hub.clone();
        let active = active.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            client_task(stream, addr, hub, config, shutdown).await;
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }

    hub.close_all();
    info!("Stream server stopped");
    Ok(())
}

async fn client_task(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    config: StreamConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (sink, mut events) = ChannelSink::channel(config.queue_depth);
    let subscriber = hub.clone();
    let handle = match tokio::task::spawn_blocking(move || subscriber.subscribe(Arc::new(sink))).await
    {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            warn!(addr = %addr, error = %e, "Could not register stream client");
            return;
        }
        Err(e) => {
            warn!(addr = %addr, error = %e, "Subscription task failed");
            return;
        }
    };
    info!(client = handle.id(), addr = %addr, "Client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Dropped by the hub: shutdown or a full queue.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize event");
                        continue;
                    }
                };
                match tokio::time::timeout(config.send_timeout, ws_tx.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(client = handle.id(), error = %e, "Failed to send event");
                        break;
                    }
                    Err(_) => {
                        debug!(client = handle.id(), "Send timed out");
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        debug!(client = handle.id(), "Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(client = handle.id(), error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                }
            }
            _ = stopped(&mut shutdown) => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    hub.unsubscribe(&handle);
    info!(client = handle.id(), "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{SampleStore, SqliteStore};
    use chrono::{TimeZone, Utc};
    use moodwatch_types::{SampleEvent, Status};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    struct Running {
        addr: SocketAddr,
        hub: Arc<Hub>,
        store: Arc<SqliteStore>,
        stop: watch::Sender<bool>,
        server: tokio::task::JoinHandle<std::io::Result<()>>,
    }

    async fn start(config: StreamConfig) -> Running {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
        let hub = Arc::new(Hub::new(store.clone(), clock));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, hub.clone(), config, stop_rx));

        Running {
            addr,
            hub,
            store,
            stop,
            server,
        }
    }

    async fn next_event<S>(ws: &mut S) -> SampleEvent
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for_subscribers(hub: &Hub, n: usize) {
        for _ in 0..100 {
            if hub.subscriber_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} subscribers, have {}", hub.subscriber_count());
    }

    #[tokio::test]
    async fn test_client_gets_sentinel_then_updates() {
        let server = start(StreamConfig::default()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();

        let initial = next_event(&mut ws).await;
        assert_eq!(initial.value, 50.0);
        assert_eq!(initial.status, Status::Same);

        wait_for_subscribers(&server.hub, 1).await;
        let sample = server.store.append(57.5, Status::Same).unwrap();
        server.hub.publish(&sample);

        let update = next_event(&mut ws).await;
        assert_eq!(update, sample.event());
    }

    #[tokio::test]
    async fn test_client_gets_latest_stored_sample() {
        let server = start(StreamConfig::default()).await;
        let stored = server.store.append(63.0, Status::Same).unwrap();

        let (mut ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
        assert_eq!(next_event(&mut ws).await, stored.event());
    }

    #[tokio::test]
    async fn test_ping_gets_a_single_pong() {
        let server = start(StreamConfig::default()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
        next_event(&mut ws).await;
        wait_for_subscribers(&server.hub, 1).await;

        ws.send(Message::Ping(b"beat".to_vec())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::Pong(b"beat".to_vec()));

        let sample = server.store.append(58.0, Status::Same).unwrap();
        server.hub.publish(&sample);

        let after = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(after, Message::Text(_)), "unexpected frame {after:?}");
    }

    #[tokio::test]
    async fn test_max_clients() {
        let server = start(StreamConfig {
            max_clients: 1,
            ..Default::default()
        })
        .await;

        let (mut first, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
        next_event(&mut first).await;

        assert!(connect_async(format!("ws://{}", server.addr)).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes() {
        let server = start(StreamConfig::default()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
        next_event(&mut ws).await;
        wait_for_subscribers(&server.hub, 1).await;

        ws.close(None).await.unwrap();
        wait_for_subscribers(&server.hub, 0).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let server = start(StreamConfig::default()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
        next_event(&mut ws).await;

        server.stop.send(true).unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = ws.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        tokio::time::timeout(Duration::from_secs(5), server.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
