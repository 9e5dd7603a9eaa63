//! End-to-end tests for discovery, the load-balancing client, and the
//! naming registry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use beamrpc::client::{
    BalancedClient, Discovery, RegistryDiscovery, SelectMode, StaticDiscovery,
};
use beamrpc::common::Handshake;
use beamrpc::registry::{heartbeat, Registry, DEFAULT_PATH};
use beamrpc::server::{MethodError, Server, Service};

/// A server instance that reports its own tag and can be told to fail.
struct Echo {
    tag: String,
    fail: bool,
}

#[derive(Serialize, Deserialize)]
struct Empty {}

impl Echo {
    async fn whoami(self: Arc<Self>, _args: Empty) -> Result<String, MethodError> {
        if self.fail {
            return Err(MethodError::new(format!("{} is broken", self.tag)));
        }
        Ok(self.tag.clone())
    }
}

async fn start_echo_server(tag: &str, fail: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let service = Service::builder(Echo {
        tag: tag.to_string(),
        fail,
    })
    .method("Whoami", Echo::whoami)
    .build()
    .unwrap();
    let server = Arc::new(Server::new());
    server.register(service).unwrap();
    tokio::spawn(Arc::clone(&server).accept(listener));
    addr
}

#[tokio::test]
async fn round_robin_reaches_every_server() {
    let a = start_echo_server("a", false).await;
    let b = start_echo_server("b", false).await;

    let discovery = Discovery::from(StaticDiscovery::new(vec![a, b]));
    let client = BalancedClient::new(discovery, SelectMode::RoundRobin, Handshake::default());

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let tag: String = client.call("Echo.Whoami", &Empty {}).await.unwrap();
        seen.insert(tag);
    }
    assert_eq!(seen.len(), 2);
    client.close().await;
}

#[tokio::test]
async fn random_mode_serves_calls() {
    let a = start_echo_server("a", false).await;
    let discovery = Discovery::from(StaticDiscovery::new(vec![a]));
    let client = BalancedClient::new(discovery, SelectMode::Random, Handshake::default());

    let tag: String = client.call("Echo.Whoami", &Empty {}).await.unwrap();
    assert_eq!(tag, "a");
}

#[tokio::test]
async fn broadcast_returns_a_successful_reply() {
    let a = start_echo_server("a", false).await;
    let b = start_echo_server("b", false).await;

    let discovery = Discovery::from(StaticDiscovery::new(vec![a, b]));
    let client = BalancedClient::new(discovery, SelectMode::RoundRobin, Handshake::default());

    // Which server answers first is unspecified; the reply must be one of
    // them.
    let tag: String = client.broadcast("Echo.Whoami", &Empty {}).await.unwrap();
    assert!(tag == "a" || tag == "b");
}

#[tokio::test]
async fn broadcast_surfaces_the_first_error() {
    let a = start_echo_server("a", false).await;
    let b = start_echo_server("b", true).await;

    let discovery = Discovery::from(StaticDiscovery::new(vec![a, b]));
    let client = BalancedClient::new(discovery, SelectMode::RoundRobin, Handshake::default());

    let err = client
        .broadcast::<_, String>("Echo.Whoami", &Empty {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("b is broken"));
}

#[tokio::test]
async fn pool_reuses_connections_per_endpoint() {
    let a = start_echo_server("a", false).await;
    let discovery = Discovery::from(StaticDiscovery::new(vec![a]));
    let client = BalancedClient::new(discovery, SelectMode::RoundRobin, Handshake::default());

    for _ in 0..3 {
        let _: String = client.call("Echo.Whoami", &Empty {}).await.unwrap();
    }

    // After close the pool is empty; the next call dials fresh.
    client.close().await;
    let tag: String = client.call("Echo.Whoami", &Empty {}).await.unwrap();
    assert_eq!(tag, "a");
}

#[tokio::test]
async fn registry_discovery_routes_heartbeating_servers() {
    let registry = Arc::new(Registry::new(Duration::from_secs(60)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry_url = format!("http://{}{}", listener.local_addr().unwrap(), DEFAULT_PATH);
    tokio::spawn(Arc::clone(&registry).serve(listener, DEFAULT_PATH));

    let a = start_echo_server("a", false).await;
    let b = start_echo_server("b", false).await;
    let _beat_a = heartbeat(&registry_url, &a, Duration::from_secs(30)).await.unwrap();
    let _beat_b = heartbeat(&registry_url, &b, Duration::from_secs(30)).await.unwrap();

    let discovery = RegistryDiscovery::new(&registry_url, Duration::from_secs(5));
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(discovery.get_all().await.unwrap(), expected);

    let client = BalancedClient::new(
        Discovery::from(discovery),
        SelectMode::RoundRobin,
        Handshake::default(),
    );
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let tag: String = client.call("Echo.Whoami", &Empty {}).await.unwrap();
        seen.insert(tag);
    }
    assert_eq!(seen.len(), 2);
}
