//! Clash 配置文档与探测结果结构体定义

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::proxy::ProxyDescriptor;

/// 自动测速组名称
pub const AUTOMATIC_GROUP: &str = "automatic";
/// 手动选择组名称
pub const SELECT_GROUP: &str = "🌐 Proxy";
/// 自动测速组默认探测地址
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/favicon.ico";
/// 自动测速组默认探测间隔（秒）
pub const DEFAULT_PROBE_INTERVAL: u64 = 300;

/// 配置文档顶层设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub mixed_port: u16,
    pub external_controller: String,
    pub mode: String,
    pub log_level: String,
    pub probe_url: String,
    pub probe_interval: u64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            mixed_port: 7890,
            external_controller: "127.0.0.1:9090".to_string(),
            mode: "Rule".to_string(),
            log_level: "silent".to_string(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    UrlTest,
    Select,
}

/// 代理组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GroupKind,
    pub proxies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub interval: Option<u64>,
}

impl ProxyGroup {
    pub fn new(name: &str, kind: GroupKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            proxies: vec![],
            url: None,
            interval: None,
        }
    }

    pub fn with_probe(mut self, url: &str, interval: u64) -> Self {
        self.url = Some(url.to_string());
        self.interval = Some(interval);
        self
    }

    pub fn add_proxy(&mut self, name: String) {
        self.proxies.push(name);
    }

    pub fn size(&self) -> usize {
        self.proxies.len()
    }
}

/// 生成的 Clash 配置文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutingConfig {
    pub mixed_port: u16,
    pub external_controller: String,
    pub mode: String,
    pub log_level: String,
    pub proxies: Vec<ProxyDescriptor>,
    pub proxy_groups: Vec<ProxyGroup>,
    pub rules: Vec<String>,
}

/// 控制面 delay 接口的响应体
#[derive(Debug, Clone, Deserialize)]
pub struct DelayResponse {
    pub delay: Option<i64>,
}

/// 单个节点在一次检测中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Probing,
    Alive,
    Dead,
    /// 存活且通过 ChatGPT 能力检测
    Annotated,
}

impl HealthState {
    pub fn is_alive(&self) -> bool {
        matches!(self, HealthState::Alive | HealthState::Annotated)
    }
}

/// 一次检测的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub state: HealthState,
    /// 供调用方重试前等待的随机间隔（30ms ~ 200ms）
    pub retry_after: Duration,
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }
}

/// 一次检测要探测的目标列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    pub targets: Vec<String>,
    pub retry_after: Duration,
}
