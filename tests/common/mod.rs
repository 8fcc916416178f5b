//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use client_balancer::health::{HealthProbe, ProbeError};
use client_balancer::{AttemptFailure, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a mock backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> Server {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a mock backend whose status and body come from `f`, called per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> Server
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    429 => "429 Too Many Requests",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    server_at(addr)
}

/// A local port with nothing listening on it.
pub async fn dead_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    server_at(addr)
}

pub fn server_at(addr: SocketAddr) -> Server {
    Server::new(addr.ip().to_string(), addr.port())
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(2))
        .no_proxy()
        .build()
        .unwrap()
}

/// Issue `GET /` to `server`, translating transport errors into attempt failures.
pub async fn send(client: &reqwest::Client, server: &Server) -> Result<String, AttemptFailure> {
    let url = format!("http://{server}/");
    let response = client.get(url).send().await.map_err(classify)?;
    let status = response.status();
    if !status.is_success() {
        return Err(AttemptFailure::Response {
            status: status.as_u16(),
        });
    }
    response.text().await.map_err(classify)
}

fn classify(e: reqwest::Error) -> AttemptFailure {
    if e.is_connect() {
        if e.is_timeout() {
            AttemptFailure::ConnectTimeout
        } else {
            AttemptFailure::ConnectionRefused
        }
    } else if e.is_timeout() {
        AttemptFailure::ReadTimeout
    } else {
        AttemptFailure::Other(e.to_string())
    }
}

/// Probe that never answers for the listed servers and says "alive" for the rest.
#[derive(Debug)]
pub struct HangingProbe {
    pub stuck: Vec<Server>,
}

#[async_trait]
impl HealthProbe for HangingProbe {
    async fn probe(&self, server: &Server) -> Result<bool, ProbeError> {
        if self.stuck.contains(server) {
            std::future::pending::<()>().await;
        }
        Ok(true)
    }
}
