#![allow(dead_code)]
//! 测试用的 Clash 控制面
//!
//! 只实现 `GET /proxies/{name}/delay`，响应内容由测试提供的闭包决定，
//! 每个请求都会被记录下来供断言使用。

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 控制面收到的一次 delay 请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub proxy: String,
    pub target: String,
    pub timeout: Option<u64>,
    pub expected: Option<u16>,
}

type Responder = Arc<dyn Fn(&Probe) -> (u16, String) + Send + Sync>;

pub struct FakeController {
    pub addr: String,
    probes: Arc<Mutex<Vec<Probe>>>,
}

impl FakeController {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Probe) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let probes = Arc::new(Mutex::new(Vec::new()));
        let responder: Responder = Arc::new(responder);

        let recorded = probes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let responder = responder.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, responder, recorded).await;
                });
            }
        });

        Self { addr, probes }
    }

    pub fn probes(&self) -> Vec<Probe> {
        self.probes.lock().unwrap().clone()
    }

    pub fn probes_for(&self, proxy: &str) -> Vec<Probe> {
        self.probes()
            .into_iter()
            .filter(|p| p.proxy == proxy)
            .collect()
    }
}

/// 返回 `{"delay": n}`
pub fn delay(n: i64) -> (u16, String) {
    (200, format!("{{\"delay\":{}}}", n))
}

/// 一个没有进程监听的本地地址
pub async fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);
    addr
}

async fn handle(
    mut stream: TcpStream,
    responder: Responder,
    recorded: Arc<Mutex<Vec<Probe>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = String::from_utf8_lossy(&buf);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let (status, body) = match parse_probe(&path) {
        Some(probe) => {
            let response = responder(&probe);
            recorded.lock().unwrap().push(probe);
            response
        }
        None => (404, "{\"message\":\"not found\"}".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn parse_probe(path: &str) -> Option<Probe> {
    let (route, query) = path.split_once('?')?;
    let name = route.strip_prefix("/proxies/")?.strip_suffix("/delay")?;

    let mut probe = Probe {
        proxy: urlencoding::decode(name).ok()?.into_owned(),
        target: String::new(),
        timeout: None,
        expected: None,
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value).ok()?.into_owned();
        match key {
            "url" => probe.target = value,
            "timeout" => probe.timeout = value.parse().ok(),
            "expected" => probe.expected = value.parse().ok(),
            _ => {}
        }
    }
    Some(probe)
}
