use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::clash_proxy::RoutingSettings;
use crate::clash_proxy::health_check::DEFAULT_TEST_URL;
use crate::clash_proxy::types::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_URL};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 进度显示
    pub print_progress: bool,

    // Clash 配置
    pub mixed_port: u16,
    pub external_controller: String,
    pub mode: String,
    pub clash_log_level: String,
    pub group_probe_url: String,
    pub group_probe_interval: u64,

    // 检测参数
    pub check: bool,
    pub timeout: u64,
    pub max_delay: u64,
    pub test_url: String,
    pub strict: bool,
    pub concurrent: usize,
    pub retries: u32,

    // 输入输出
    pub input: String,
    pub output: String,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_progress: true,
            mixed_port: 7890,
            external_controller: "127.0.0.1:9090".to_string(),
            mode: "Rule".to_string(),
            clash_log_level: "silent".to_string(),
            group_probe_url: DEFAULT_PROBE_URL.to_string(),
            group_probe_interval: DEFAULT_PROBE_INTERVAL,
            check: false,
            timeout: 5000,
            max_delay: 5000,
            test_url: DEFAULT_TEST_URL.to_string(),
            strict: false,
            concurrent: 20,
            retries: 0,
            input: "./proxies.yaml".to_string(),
            output: "./output/clash.yaml".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 生成配置文档的顶层设置
    pub fn routing_settings(&self) -> RoutingSettings {
        RoutingSettings {
            mixed_port: self.mixed_port,
            external_controller: self.external_controller.clone(),
            mode: self.mode.clone(),
            log_level: self.clash_log_level.clone(),
            probe_url: self.group_probe_url.clone(),
            probe_interval: self.group_probe_interval,
        }
    }
}
