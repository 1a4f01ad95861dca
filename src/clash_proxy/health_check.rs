//! 基于 Clash 控制面的代理健康检查模块
//! 通过 `/proxies/{name}/delay` 接口测试节点延迟，并可选检测 ChatGPT 可用性

use anyhow::{Result, anyhow};
use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::Duration;
use url::Url;

use super::types::{DelayResponse, HealthState, ProbeOutcome, ProbePlan};
use crate::config::Config;
use crate::error::{ProbeError, ProbeResult};
use crate::proxy::ProxyDescriptor;

/// 默认测试地址
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";
/// 每次检测都会探测的固定地址
pub const REFERENCE_URL: &str =
    "https://www.youtube.com/s/player/23010b46/player_ias.vflset/en_US/remote.js";
/// 严格模式下随机抽取一个大文件下载地址
pub const DOWNLOAD_URLS: [&str; 3] = [
    "https://github.com/2dust/v2rayN/releases/latest/download/v2rayN.zip",
    "https://cachefly.cachefly.net/10mb.test",
    "http://speedtest-sgp1.digitalocean.com/10mb.test",
];
/// 通过 ChatGPT 检测的节点名称后缀
pub const CHATGPT_FLAG: &str = "-GPT";

const CHATGPT_WEB_URL: &str = "https://chat.openai.com/favicon.ico";
const CHATGPT_API_URL: &str = "https://api.openai.com/v1/engines";
const CHATGPT_WEB_TIMEOUT: Duration = Duration::from_secs(5);

/// 失败重试间隔：30ms ~ 200ms
const RETRY_JITTER_MS: std::ops::RangeInclusive<u64> = 30..=200;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// 代理健康检查器
///
/// 同一个检查器可在多个任务间共享（内部 `reqwest::Client` 自带连接池），
/// 控制面被视为无状态的查询服务。
#[derive(Debug, Clone)]
pub struct ProxyHealthChecker {
    client: reqwest::Client,
    /// 控制面地址（host:port）
    controller: String,
    /// 单次请求超时时间（毫秒）
    timeout_ms: u64,
    /// 测试目标 URL
    test_url: String,
    /// 可接受的最大延迟（毫秒）
    max_delay_ms: u64,
    /// 严格模式：额外探测一个大文件下载地址
    strict: bool,
}

impl ProxyHealthChecker {
    /// 创建新的健康检查器
    pub fn new(controller: &str, timeout_ms: u64, test_url: Option<String>) -> Result<Self> {
        // 控制面在本机，不能走系统代理
        let client = reqwest::Client::builder()
            .no_proxy()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            controller: controller.to_string(),
            timeout_ms,
            test_url: test_url.unwrap_or_else(|| DEFAULT_TEST_URL.to_string()),
            max_delay_ms: timeout_ms,
            strict: false,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            &config.external_controller,
            config.timeout,
            Some(config.test_url.clone()),
        )?
        .with_max_delay(config.max_delay)
        .with_strict(config.strict))
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn get_timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn get_test_url(&self) -> &str {
        &self.test_url
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// 生成本次检测的目标列表与重试间隔
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> ProbePlan {
        let mut targets = vec![self.test_url.clone(), REFERENCE_URL.to_string()];
        if self.strict {
            if let Some(url) = DOWNLOAD_URLS.choose(rng) {
                targets.push(url.to_string());
            }
        }

        ProbePlan {
            targets,
            retry_after: Duration::from_millis(rng.gen_range(RETRY_JITTER_MS)),
        }
    }

    /// 检查单个节点是否存活
    pub async fn check(&self, proxy: &mut ProxyDescriptor) -> bool {
        self.check_detailed(proxy).await.is_alive()
    }

    /// 检查单个节点，返回最终状态和建议的重试间隔
    pub async fn check_detailed(&self, proxy: &mut ProxyDescriptor) -> ProbeOutcome {
        // ThreadRng 不能跨 await 持有
        let plan = {
            let mut rng = rand::thread_rng();
            self.plan(&mut rng)
        };
        self.check_with_plan(proxy, &plan).await
    }

    /// 按给定目标列表检查节点
    ///
    /// 总会移除 chatgpt 标记；只有存活且带标记的节点才会做 ChatGPT 检测。
    pub async fn check_with_plan(
        &self,
        proxy: &mut ProxyDescriptor,
        plan: &ProbePlan,
    ) -> ProbeOutcome {
        let outcome = |state: HealthState| ProbeOutcome {
            state,
            retry_after: plan.retry_after,
        };

        let wants_chatgpt = proxy.take_chatgpt_flag();
        let name = proxy.name_text();

        let base = match proxy
            .name()
            .ok_or_else(|| ProbeError::Encode(format!("节点名称无效: {:?}", proxy.get("name"))))
            .and_then(|n| self.delay_base(n))
        {
            Ok(base) => base,
            Err(e) => {
                debug!("check failed, proxy: {}, message: {}", name, e);
                return outcome(HealthState::Dead);
            }
        };

        debug!("{:?} -> {:?}: {}", HealthState::Unknown, HealthState::Probing, name);
        for target in &plan.targets {
            let url = format!("{}{}", base, urlencoding::encode(target));
            debug!("Checking proxy: {}, URL: {}", name, url);

            let result = self
                .fetch_delay(&url, self.timeout(), None)
                .await
                .and_then(|delay| validate_delay(delay, self.max_delay_ms));
            if let Err(e) = result {
                debug!("proxy {} failed on {}: {}", name, target, e);
                return outcome(HealthState::Dead);
            }
        }

        if !wants_chatgpt || name.ends_with(CHATGPT_FLAG) {
            return outcome(HealthState::Alive);
        }

        match self.probe_chatgpt(&base).await {
            Ok(true) => {
                proxy.set_name(format!("{}{}", name, CHATGPT_FLAG));
                outcome(HealthState::Annotated)
            }
            Ok(false) => outcome(HealthState::Alive),
            Err(e) => {
                debug!("check for OpenAI failed, proxy: {}, message: {}", name, e);
                outcome(HealthState::Alive)
            }
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 构造 delay 接口地址，`url=` 参数留空待拼接
    fn delay_base(&self, name: &str) -> ProbeResult<String> {
        let base = format!(
            "http://{}/proxies/{}/delay?timeout={}&url=",
            self.controller,
            urlencoding::encode(name),
            self.timeout_ms
        );
        Url::parse(&base).map_err(|e| ProbeError::Encode(format!("{}: {}", base, e)))?;
        Ok(base)
    }

    /// 请求控制面，返回 delay 字段
    async fn fetch_delay(
        &self,
        url: &str,
        timeout: Duration,
        expected_status: Option<u16>,
    ) -> ProbeResult<i64> {
        let response = self.client.get(url).timeout(timeout).send().await?;

        let status = response.status();
        let accepted = match expected_status {
            Some(code) => status.as_u16() == code,
            None => status.is_success(),
        };
        if !accepted {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let data: DelayResponse = serde_json::from_slice(&body)?;
        data.delay.ok_or(ProbeError::MissingDelay)
    }

    /// ChatGPT 两段检测：网页需返回 200，API 需返回 401
    async fn probe_chatgpt(&self, base: &str) -> ProbeResult<bool> {
        let web = format!(
            "{}{}&expected=200",
            base,
            urlencoding::encode(CHATGPT_WEB_URL)
        );
        if self.fetch_delay(&web, CHATGPT_WEB_TIMEOUT, Some(200)).await? <= 0 {
            return Ok(false);
        }

        let api = format!(
            "{}{}&expected=401",
            base,
            urlencoding::encode(CHATGPT_API_URL)
        );
        Ok(self.fetch_delay(&api, self.timeout(), None).await? > 0)
    }
}

fn validate_delay(delay: i64, max_delay_ms: u64) -> ProbeResult<i64> {
    if delay <= 0 || delay as u64 > max_delay_ms {
        return Err(ProbeError::DelayOutOfRange {
            delay,
            max: max_delay_ms,
        });
    }
    Ok(delay)
}
