use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use node::{NodeConfig, render_event};
use p2p::{EventSink, NetworkEvent, NetworkHandle};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config(nickname: &str) -> NodeConfig {
    NodeConfig {
        listen_port: 0,
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        nickname: nickname.to_string(),
        ..NodeConfig::default()
    }
}

async fn spawn_node(config: &NodeConfig) -> (NetworkHandle, mpsc::Receiver<NetworkEvent>) {
    let (tx, rx) = mpsc::channel(32);
    let events: Arc<dyn EventSink> = Arc::new(tx);
    let identity = Arc::new(config.identity().expect("identity"));
    let network = NetworkHandle::new(config.p2p_config(), identity, events);
    network.start().await.expect("start");
    (network, rx)
}

async fn next_line(rx: &mut mpsc::Receiver<NetworkEvent>) -> String {
    let event = timeout(WAIT, rx.recv())
        .await
        .expect("event within deadline")
        .expect("channel open");
    render_event(&event)
}

#[tokio::test]
async fn configured_nodes_chat_over_loopback() {
    let (alice, mut alice_events) = spawn_node(&config("alice")).await;
    let (bob, mut bob_events) = spawn_node(&config("bob")).await;
    let alice_addr = alice.local_addr().await.expect("alice bound");

    bob.connect_to_remote(&alice_addr.to_string())
        .await
        .expect("connect");
    assert!(next_line(&mut alice_events).await.starts_with("* bob joined from 127.0.0.1:"));
    assert_eq!(
        next_line(&mut bob_events).await,
        format!("* alice joined from {alice_addr}")
    );

    let report = bob.send_message("hi alice").await;
    assert!(report.is_complete());
    assert_eq!(next_line(&mut alice_events).await, "<bob> hi alice");

    bob.shutdown().await;
    assert_eq!(next_line(&mut alice_events).await, "* bob left");
    alice.shutdown().await;
}
