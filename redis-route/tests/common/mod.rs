//! Scripted RESP server for integration tests
//!
//! Speaks enough of the protocol for the client engine: a tiny key/value
//! store plus a per-test hook that can override any command.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use redis_route::protocol::RespDecoder;
use redis_route::{Endpoint, RespValue};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const STANDALONE_INFO: &str =
    "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n# Replication\r\nrole:master\r\nconnected_slaves:0\r\n";

pub const CLUSTER_INFO: &str =
    "# Server\r\nredis_version:7.2.4\r\nredis_mode:cluster\r\n# Replication\r\nrole:master\r\nconnected_slaves:0\r\n";

/// What the hook wants done with a command
pub enum Reply {
    /// Fall through to the built-in store
    Default,
    /// Send these raw bytes
    Raw(String),
    /// Never answer
    Hang,
    /// Drop the connection
    Close,
}

type Hook = Arc<dyn Fn(&[String]) -> Reply + Send + Sync>;

#[derive(Default)]
struct Store {
    values: HashMap<String, (String, Option<Instant>)>,
}

impl Store {
    fn live(&mut self, key: &str) -> Option<&mut (String, Option<Instant>)> {
        let expired = matches!(self.values.get(key), Some((_, Some(at))) if *at <= Instant::now());
        if expired {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }

    fn apply(&mut self, args: &[String], info: &str) -> String {
        let name = args[0].to_ascii_uppercase();
        match (name.as_str(), &args[1..]) {
            ("PING", _) => "+PONG\r\n".to_string(),
            ("AUTH" | "SELECT" | "ASKING" | "READONLY", _) => "+OK\r\n".to_string(),
            ("INFO", _) => bulk(info),
            ("SET", [key, value, rest @ ..]) => {
                let expires = match rest {
                    [unit, amount] if unit.eq_ignore_ascii_case("PX") => amount
                        .parse()
                        .ok()
                        .map(|ms| Instant::now() + Duration::from_millis(ms)),
                    [unit, amount] if unit.eq_ignore_ascii_case("EX") => amount
                        .parse()
                        .ok()
                        .map(|s| Instant::now() + Duration::from_secs(s)),
                    _ => None,
                };
                self.values.insert(key.clone(), (value.clone(), expires));
                "+OK\r\n".to_string()
            }
            ("GET", [key]) => match self.live(key) {
                Some((value, _)) => bulk(value),
                None => "$-1\r\n".to_string(),
            },
            ("DEL", keys) => {
                let removed = keys
                    .iter()
                    .filter(|key| self.live(key).is_some())
                    .count();
                for key in keys {
                    self.values.remove(key);
                }
                format!(":{}\r\n", removed)
            }
            ("EXISTS", keys) => {
                let found = keys.iter().filter(|key| self.live(key).is_some()).count();
                format!(":{}\r\n", found)
            }
            ("INCR" | "INCRBY", [key, by @ ..]) => {
                let by: i64 = by.first().and_then(|b| b.parse().ok()).unwrap_or(1);
                let current = self
                    .live(key)
                    .map_or(Some(0), |(value, _)| value.parse::<i64>().ok());
                match current {
                    Some(current) => {
                        let next = current + by;
                        let expires = self.live(key).and_then(|(_, at)| *at);
                        self.values.insert(key.clone(), (next.to_string(), expires));
                        format!(":{}\r\n", next)
                    }
                    None => "-ERR value is not an integer or out of range\r\n".to_string(),
                }
            }
            ("EXPIRE", [key, seconds]) => match (self.live(key), seconds.parse::<u64>()) {
                (Some(entry), Ok(seconds)) => {
                    entry.1 = Some(Instant::now() + Duration::from_secs(seconds));
                    ":1\r\n".to_string()
                }
                _ => ":0\r\n".to_string(),
            },
            ("TTL", [key]) => match self.live(key) {
                Some((_, Some(at))) => {
                    let left = at.saturating_duration_since(Instant::now());
                    format!(":{}\r\n", (left.as_millis() + 999) / 1000)
                }
                Some((_, None)) => ":-1\r\n".to_string(),
                None => ":-2\r\n".to_string(),
            },
            _ => format!("-ERR unknown command '{}'\r\n", args[0]),
        }
    }
}

pub fn bulk(value: &str) -> String {
    format!("${}\r\n{}\r\n", value.len(), value)
}

/// A mock server on an ephemeral local port
pub struct MockServer {
    pub endpoint: Endpoint,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Serve the built-in store only
    pub async fn start(info: &str) -> Self {
        Self::start_with(info, |_| Reply::Default).await
    }

    /// Serve with `hook` consulted before the built-in store
    pub async fn start_with<F>(info: &str, hook: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));
        let hook: Hook = Arc::new(hook);
        let info = info.to_string();

        let task = {
            let log = log.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        store.clone(),
                        hook.clone(),
                        log.clone(),
                        info.clone(),
                    ));
                }
            })
        };

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            log,
            connections,
            task,
        }
    }

    /// `host:port` for connection strings
    pub fn address(&self) -> String {
        self.endpoint.address()
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().clone()
    }

    /// How many times `name` was received
    pub fn count(&self, name: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|args| args[0].eq_ignore_ascii_case(name))
            .count()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    store: Arc<Mutex<Store>>,
    hook: Hook,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    info: String,
) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let mut out = String::new();
        loop {
            let mut cursor = Cursor::new(&buf[..]);
            let Ok(Some(value)) = RespDecoder::decode(&mut cursor) else {
                break;
            };
            let consumed = cursor.position() as usize;
            buf.advance(consumed);

            let args = command_args(value);
            if args.is_empty() {
                continue;
            }
            log.lock().push(args.clone());

            match hook(&args) {
                Reply::Default => out.push_str(&store.lock().apply(&args, &info)),
                Reply::Raw(raw) => out.push_str(&raw),
                Reply::Hang => {
                    let _ = socket.write_all(out.as_bytes()).await;
                    std::future::pending::<()>().await;
                }
                Reply::Close => return,
            }
        }

        if !out.is_empty() && socket.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn command_args(value: RespValue) -> Vec<String> {
    match value {
        RespValue::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_string().ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// `CLUSTER NODES` line for a master
pub fn cluster_node_line(id: &str, port: u16, myself: bool, slots: &str) -> String {
    let flags = if myself { "myself,master" } else { "master" };
    format!(
        "{} 127.0.0.1:{}@{} {} - 0 0 1 connected {}\n",
        id,
        port,
        u32::from(port) + 10000,
        flags,
        slots
    )
    .replace(" \n", "\n")
}
