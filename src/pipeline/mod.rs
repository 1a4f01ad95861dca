//! 生成流程：读取节点 → 生成配置并写盘 → 可选的健康检查 → 用存活节点覆盖配置

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tokio::sync::watch;

use crate::check::{CheckResult, ProxyChecker};
use crate::clash_proxy::{RoutingConfig, assemble, rebuild};
use crate::config::Config;

/// 一次运行的结果
#[derive(Debug)]
pub struct RunReport {
    /// 最终写入输出文件的配置
    pub routing: RoutingConfig,
    /// 未开启检测时为空
    pub results: Vec<CheckResult>,
}

/// 读取节点列表，条目本身的格式留给去重阶段过滤
pub fn read_proxies<P: AsRef<Path>>(path: P) -> Result<Vec<Value>> {
    let content = fs::read_to_string(&path)?;
    let yaml: Value = serde_yaml::from_str(&content)?;

    match yaml {
        Value::Sequence(items) => Ok(items),
        Value::Mapping(map) => match map.get("proxies") {
            Some(Value::Sequence(items)) => Ok(items.clone()),
            _ => Err(anyhow!("No 'proxies' list found in {}", path.as_ref().display())),
        },
        _ => Err(anyhow!("Unexpected YAML document in {}", path.as_ref().display())),
    }
}

/// 执行完整流程
///
/// 生成的配置先写入 `config.output`，Clash 加载这份配置后才能通过控制面检测节点。
/// 检测后只有存在存活节点时才覆盖输出文件，否则保留检测前的配置。
pub async fn run(config: &Config, shutdown: watch::Receiver<bool>) -> Result<RunReport> {
    let settings = config.routing_settings();
    let raw = read_proxies(&config.input)?;
    info!("读取到 {} 个节点: {}", raw.len(), config.input);

    let routing = assemble(raw, &settings);
    info!("去重后剩余 {} 个节点", routing.proxies.len());
    routing.write_to_file(&config.output)?;

    if !config.check || routing.proxies.is_empty() {
        return Ok(RunReport {
            routing,
            results: Vec::new(),
        });
    }

    let checker = ProxyChecker::from_config(config)?;
    let results = checker.check_proxies(routing.proxies.clone(), shutdown).await;
    checker.print_stats();

    let alive: Vec<_> = results
        .iter()
        .filter(|r| r.is_alive())
        .map(|r| r.proxy.clone())
        .collect();
    if alive.is_empty() {
        warn!("没有存活节点，保留检测前的配置: {}", config.output);
        return Ok(RunReport { routing, results });
    }

    let routing = rebuild(alive, &settings);
    routing.write_to_file(&config.output)?;
    Ok(RunReport { routing, results })
}
