//! HTTP plumbing between nodes.
//!
//! Peers are identified by base URL. Chain fetches are awaited with a deadline;
//! everything pushed to peers is best-effort and runs on detached tasks.

use crate::blockchain::Block;
use crate::consensus::{PeerChain, PeerTransport};
use crate::error::ChainError;
use crate::transaction::{Amount, Transaction};
use crate::crypto::Address;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Trims a peer entry into a base URL, adding `http://` when no scheme is given.
pub fn normalize_peer_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{}", trimmed))
    }
}

#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
    timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `body` to `path` on every peer without waiting for answers.
    /// The handles are returned for callers that want to await delivery.
    pub fn post_to_peers<T: Serialize>(&self, peers: &[String], path: &str, body: &T) -> Vec<JoinHandle<()>> {
        let payload = match serde_json::to_value(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path, error = %e, "Could not encode broadcast payload");
                return Vec::new();
            }
        };

        peers
            .iter()
            .map(|peer| {
                let client = self.client.clone();
                let url = format!("{}{}", peer, path);
                let payload: Value = payload.clone();
                tokio::spawn(async move {
                    match client.post(&url).json(&payload).send().await {
                        Ok(resp) if resp.status().is_success() => debug!(url = %url, "Broadcast delivered"),
                        Ok(resp) => warn!(url = %url, status = %resp.status(), "Peer refused broadcast"),
                        Err(e) => {
                            let e = ChainError::PeerUnreachable(format!("{}: {}", url, e));
                            warn!(error = %e, "Broadcast failed");
                        }
                    }
                })
            })
            .collect()
    }

    pub fn broadcast_block(&self, peers: &[String], block: &Block) -> Vec<JoinHandle<()>> {
        self.post_to_peers(peers, "/add_block", block)
    }

    pub fn broadcast_transaction(&self, peers: &[String], tx: &Transaction) -> Vec<JoinHandle<()>> {
        self.post_to_peers(peers, "/add_mempool", tx)
    }

    pub fn push_mempool(&self, peers: &[String], transactions: &[Transaction]) -> Vec<JoinHandle<()>> {
        self.post_to_peers(peers, "/update_mempool", &json!({ "transactions": transactions }))
    }

    pub fn push_wallets(&self, peers: &[String], wallets: &HashMap<Address, Amount>) -> Vec<JoinHandle<()>> {
        self.post_to_peers(peers, "/wallet_details/update", &json!({ "wallets": wallets }))
    }
}

impl PeerTransport for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<PeerChain, ChainError> {
        let url = format!("{}/chain", peer);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::PeerUnreachable(format!("{}: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(ChainError::PeerUnreachable(format!("{} answered {}", url, resp.status())));
        }
        resp.json::<PeerChain>()
            .await
            .map_err(|e| ChainError::SerializationError(format!("{}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::{get, post}, Json, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    async fn spawn_peer(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_normalize_peer_url() {
        assert_eq!(normalize_peer_url("127.0.0.1:5001").as_deref(), Some("http://127.0.0.1:5001"));
        assert_eq!(normalize_peer_url(" http://node:5000/ ").as_deref(), Some("http://node:5000"));
        assert_eq!(normalize_peer_url("https://node").as_deref(), Some("https://node"));
        assert_eq!(normalize_peer_url("   "), None);
    }

    #[tokio::test]
    async fn test_fetch_chain_from_peer() {
        let router = Router::new().route(
            "/chain",
            get(|| async {
                let chain = vec![Block::genesis()];
                Json(json!({ "length": chain.len(), "chain": chain }))
            }),
        );
        let peer = spawn_peer(router).await;

        let client = HttpPeerClient::new(Duration::from_secs(2)).unwrap();
        let fetched = client.fetch_chain(&peer).await.unwrap();
        assert_eq!(fetched.length, 1);
        assert_eq!(fetched.chain, vec![Block::genesis()]);
    }

    #[tokio::test]
    async fn test_fetch_chain_unreachable_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        let result = client.fetch_chain(&format!("http://{}", addr)).await;
        assert!(matches!(result, Err(ChainError::PeerUnreachable(_))));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_live_peer() {
        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let router = Router::new().route(
            "/add_block",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push(body);
                    Json(json!({ "ok": true }))
                }
            }),
        );
        let live = spawn_peer(router).await;

        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        let peers = vec!["http://127.0.0.1:1".to_string(), live];
        for handle in client.broadcast_block(&peers, &Block::genesis()) {
            handle.await.unwrap();
        }

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["hash"], Block::genesis().hash);
    }
}
