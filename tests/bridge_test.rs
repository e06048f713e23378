use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use redisbridge::{
    BridgeClient, BridgeConfig, BridgeError, BridgeMessage, BridgeResponse, MemoryBroker,
    MemoryTransport, MessageEntity, Transport,
};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Greeting {
    content: String,
}

impl BridgeMessage for Greeting {
    fn namespace(&self) -> &str {
        "test:greeting"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AckedPing {
    seq: u32,
}

impl BridgeMessage for AckedPing {
    fn namespace(&self) -> &str {
        "test:acked_ping"
    }

    fn ack_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct EchoRequest {
    text: String,
}

impl BridgeMessage for EchoRequest {
    fn namespace(&self) -> &str {
        "test:echo"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct EchoReply {
    text: String,
}

impl BridgeResponse for EchoReply {}

fn new_client(server_id: &str, broker: &Arc<MemoryBroker>, config: BridgeConfig) -> Arc<BridgeClient> {
    let transport = Arc::new(MemoryTransport::new(broker.clone()));
    Arc::new(BridgeClient::new(server_id, transport, config))
}

#[tokio::test]
async fn test_publish_round_trip() {
    let broker = MemoryBroker::new();
    let client = new_client("alpha", &broker, BridgeConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .registry()
        .register::<Greeting>("test:greeting")
        .on_receive(move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope.message().content.clone());
            }
        })
        .build()
        .unwrap();

    client.load().await.unwrap();

    client
        .router()
        .publish(
            Greeting {
                content: "hello".to_string(),
            },
            client.entity(),
        )
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no message within 5s")
        .expect("channel closed");
    assert_eq!(received, "hello");

    client.unload().await;
}

#[tokio::test]
async fn test_wait_response_echo() {
    let broker = MemoryBroker::new();
    let requester = new_client("req", &broker, BridgeConfig::default());
    let responder = new_client("resp", &broker, BridgeConfig::default());

    // The requester only decodes the response; its receive side stays inert.
    requester
        .registry()
        .register_with_response::<EchoRequest, EchoReply>("test:echo")
        .build()
        .unwrap();

    let responder_handle = responder.clone();
    responder
        .registry()
        .register_with_response::<EchoRequest, EchoReply>("test:echo")
        .on_receive(move |envelope| {
            let client = responder_handle.clone();
            async move {
                let reply = EchoReply {
                    text: format!("Echo: {}", envelope.message().text),
                };
                client
                    .router()
                    .reply(&envelope, reply)
                    .await
                    .expect("reply failed");
            }
        })
        .build()
        .unwrap();

    requester.load().await.unwrap();
    responder.load().await.unwrap();

    let response = requester
        .router()
        .wait_response::<EchoRequest, EchoReply>(
            EchoRequest {
                text: "Hi".to_string(),
            },
            responder.entity(),
        )
        .await
        .unwrap();

    assert_eq!(response.response().text, "Echo: Hi");
    assert_eq!(response.original_message().message().text, "Hi");

    requester.unload().await;
    responder.unload().await;
}

#[tokio::test]
async fn test_publish_with_ack_resolves_on_receipt() {
    let broker = MemoryBroker::new();
    let sender = new_client("ack-sender", &broker, BridgeConfig::default());
    let receiver = new_client("ack-receiver", &broker, BridgeConfig::default());

    receiver
        .registry()
        .register::<AckedPing>("test:acked_ping")
        .build()
        .unwrap();

    sender.load().await.unwrap();
    receiver.load().await.unwrap();

    let started = Instant::now();
    sender
        .router()
        .publish(AckedPing { seq: 1 }, receiver.entity())
        .await
        .unwrap();
    // Resolved by the ack, well inside the 5s default timeout.
    assert!(started.elapsed() < Duration::from_secs(5));

    sender.unload().await;
    receiver.unload().await;
}

#[tokio::test]
async fn test_publish_with_ack_times_out_without_receiver() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        ack_timeout: Duration::from_millis(300),
        ..BridgeConfig::default()
    };
    let sender = new_client("lonely", &broker, config);
    sender.load().await.unwrap();

    let started = Instant::now();
    let result = sender
        .router()
        .publish(AckedPing { seq: 1 }, &MessageEntity::of("ghost"))
        .await;

    assert!(matches!(result, Err(BridgeError::NoAck)));
    // The failure comes from eviction, not an early bail-out.
    assert!(started.elapsed() >= Duration::from_millis(250));

    sender.unload().await;
}

#[tokio::test]
async fn test_queued_publishing_delivers_every_message() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        queue_enabled: true,
        queue_interval: Duration::from_millis(20),
        ..BridgeConfig::default()
    };
    let client = new_client("queued", &broker, config);
    let received = Arc::new(AtomicUsize::new(0));

    let counter = received.clone();
    client
        .registry()
        .register::<Greeting>("test:greeting")
        .on_receive(move |_envelope| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

    client.load().await.unwrap();

    for i in 0..5 {
        client
            .router()
            .publish_queued(
                Greeting {
                    content: format!("msg-{}", i),
                },
                client.entity(),
            )
            .await
            .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while received.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.load(Ordering::SeqCst), 5);

    client.unload().await;
}

#[tokio::test]
async fn test_publish_queued_rejected_when_queue_disabled() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        queue_enabled: false,
        ..BridgeConfig::default()
    };
    let client = new_client("no-queue", &broker, config);
    client.load().await.unwrap();

    let result = client
        .router()
        .publish_queued(
            Greeting {
                content: "dropped".to_string(),
            },
            client.entity(),
        )
        .await;
    assert!(matches!(result, Err(BridgeError::QueueDisabled)));

    client.unload().await;
}

#[tokio::test]
async fn test_unload_fails_pending_wait() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        response_timeout: Duration::from_secs(30),
        ..BridgeConfig::default()
    };
    let client = new_client("teardown", &broker, config);

    client
        .registry()
        .register_with_response::<EchoRequest, EchoReply>("test:echo")
        .build()
        .unwrap();

    client.load().await.unwrap();

    let waiting = client.clone();
    let pending = tokio::spawn(async move {
        waiting
            .router()
            .wait_response::<EchoRequest, EchoReply>(
                EchoRequest {
                    text: "anyone?".to_string(),
                },
                &MessageEntity::of("ghost"),
            )
            .await
    });

    // Let the publish land before tearing down.
    sleep(Duration::from_millis(100)).await;
    client.unload().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(BridgeError::ShuttingDown)));
}

#[tokio::test]
async fn test_publish_queued_after_unload_fails_fast() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        queue_enabled: true,
        queue_interval: Duration::from_millis(20),
        ..BridgeConfig::default()
    };
    let client = new_client("gone", &broker, config);
    client.load().await.unwrap();
    client.unload().await;

    let result = timeout(
        Duration::from_secs(2),
        client.router().publish_queued(
            Greeting {
                content: "too late".to_string(),
            },
            client.entity(),
        ),
    )
    .await
    .expect("publish_queued after unload must fail fast, not hang");
    assert!(matches!(result, Err(BridgeError::ShuttingDown)));
}

#[tokio::test]
async fn test_response_hook_runs_before_waiter_resolves() {
    let broker = MemoryBroker::new();
    let requester = new_client("hook-req", &broker, BridgeConfig::default());
    let responder = new_client("hook-resp", &broker, BridgeConfig::default());

    let hook_ran = Arc::new(AtomicUsize::new(0));
    let hook_marker = hook_ran.clone();
    requester
        .registry()
        .register_with_response::<EchoRequest, EchoReply>("test:echo")
        .on_response(move |response| {
            let hook_marker = hook_marker.clone();
            async move {
                assert_eq!(response.response().text, "Echo: order");
                hook_marker.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

    let responder_handle = responder.clone();
    responder
        .registry()
        .register_with_response::<EchoRequest, EchoReply>("test:echo")
        .on_receive(move |envelope| {
            let client = responder_handle.clone();
            async move {
                let reply = EchoReply {
                    text: format!("Echo: {}", envelope.message().text),
                };
                client
                    .router()
                    .reply(&envelope, reply)
                    .await
                    .expect("reply failed");
            }
        })
        .build()
        .unwrap();

    requester.load().await.unwrap();
    responder.load().await.unwrap();

    let response = requester
        .router()
        .wait_response::<EchoRequest, EchoReply>(
            EchoRequest {
                text: "order".to_string(),
            },
            responder.entity(),
        )
        .await
        .unwrap();

    // The hook completed strictly before the waiting future resolved.
    assert_eq!(hook_ran.load(Ordering::SeqCst), 1);
    assert_eq!(response.response().text, "Echo: order");

    requester.unload().await;
    responder.unload().await;
}

#[tokio::test]
async fn test_configure_queued_publishing_applies_to_running_router() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        queue_enabled: true,
        queue_interval: Duration::from_millis(25),
        ..BridgeConfig::default()
    };
    let client = new_client("retimed", &broker, config);

    client
        .registry()
        .register::<Greeting>("test:greeting")
        .build()
        .unwrap();

    client.load().await.unwrap();

    // The fast initial interval flushes promptly.
    client
        .router()
        .publish_queued(
            Greeting {
                content: "fast".to_string(),
            },
            client.entity(),
        )
        .await
        .unwrap();

    client
        .router()
        .configure_queued_publishing(Duration::from_millis(500))
        .unwrap();
    // Let the worker pass one more fast tick and re-read the interval.
    sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let flushed = timeout(
        Duration::from_secs(3),
        client.router().publish_queued(
            Greeting {
                content: "slow".to_string(),
            },
            client.entity(),
        ),
    )
    .await
    .expect("queued publish never flushed");
    flushed.unwrap();
    // Flushed on the stretched tick, not the original 25ms cadence.
    assert!(started.elapsed() >= Duration::from_millis(300));

    client.unload().await;
}

#[tokio::test]
async fn test_unknown_namespace_does_not_kill_the_dispatcher() {
    let broker = MemoryBroker::new();
    let client = new_client("sturdy", &broker, BridgeConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .registry()
        .register::<Greeting>("test:greeting")
        .on_receive(move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope.message().content.clone());
            }
        })
        .build()
        .unwrap();

    client.load().await.unwrap();

    // Unregistered namespace, then garbage, then a valid envelope.
    let transport = Arc::new(MemoryTransport::new(broker.clone()));
    transport.connect().await.unwrap();
    let stray = serde_json::json!({
        "uniqueId": uuid::Uuid::new_v4(),
        "sender": { "id": "stranger", "channel": "redisbridge:response:stranger" },
        "message": { "namespace": "test:unknown", "seq": 7 }
    })
    .to_string();
    transport
        .publish(client.entity().channel(), stray)
        .await
        .unwrap();
    transport
        .publish(client.entity().channel(), "not json".to_string())
        .await
        .unwrap();

    client
        .router()
        .publish(
            Greeting {
                content: "still alive".to_string(),
            },
            client.entity(),
        )
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no message within 5s")
        .expect("channel closed");
    assert_eq!(received, "still alive");

    client.unload().await;
}
