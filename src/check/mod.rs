//! 批量健康检查
//! 每个节点一个任务，信号量限制并发，收到停止信号后不再启动新的检测

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::clash_proxy::{HealthState, ProxyHealthChecker};
use crate::config::Config;
use crate::proxy::{CHATGPT_KEY, ProxyDescriptor};
use crate::ui::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Dead,
    /// 停止信号到达前未开始检测
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub proxy: ProxyDescriptor,
    pub verdict: Verdict,
    /// 是否通过 ChatGPT 检测
    pub annotated: bool,
    pub attempts: u32,
}

impl CheckResult {
    fn skipped(proxy: ProxyDescriptor) -> Self {
        Self {
            proxy,
            verdict: Verdict::Skipped,
            annotated: false,
            attempts: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.verdict == Verdict::Alive
    }
}

#[derive(Default)]
pub struct Stats {
    pub total_nodes: AtomicU64,
    pub checked_nodes: AtomicU64,
    pub alive_nodes: AtomicU64,
    pub dead_nodes: AtomicU64,
    pub annotated_nodes: AtomicU64,
    pub skipped_nodes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, result: &CheckResult) {
        match result.verdict {
            Verdict::Alive => {
                self.checked_nodes.fetch_add(1, Ordering::Relaxed);
                self.alive_nodes.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Dead => {
                self.checked_nodes.fetch_add(1, Ordering::Relaxed);
                self.dead_nodes.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Skipped => {
                self.skipped_nodes.fetch_add(1, Ordering::Relaxed);
            }
        }
        if result.annotated {
            self.annotated_nodes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_success_rate(&self) -> f64 {
        let checked = self.checked_nodes.load(Ordering::Relaxed);
        let alive = self.alive_nodes.load(Ordering::Relaxed);

        if checked > 0 {
            (alive as f64 / checked as f64) * 100.0
        } else {
            0.0
        }
    }
}

pub struct ProxyChecker {
    checker: Arc<ProxyHealthChecker>,
    concurrent: usize,
    retries: u32,
    stats: Arc<Stats>,
    progress: ProgressTracker,
}

impl ProxyChecker {
    pub fn new(checker: ProxyHealthChecker, concurrent: usize, retries: u32) -> Self {
        Self {
            checker: Arc::new(checker),
            concurrent: concurrent.max(1),
            retries,
            stats: Arc::new(Stats::new()),
            progress: ProgressTracker::hidden(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let checker = ProxyHealthChecker::from_config(config)?;
        Ok(Self::new(checker, config.concurrent, config.retries)
            .with_progress(ProgressTracker::new(config.print_progress)))
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// 并发检查所有节点，结果顺序与输入一致
    ///
    /// `shutdown` 变为 true 后，尚未开始的节点原样返回并标记为 Skipped，
    /// 正在检测的节点会跑完当前这一次检测。
    pub async fn check_proxies(
        &self,
        proxies: Vec<ProxyDescriptor>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<CheckResult> {
        let total = proxies.len();
        self.stats.total_nodes.store(total as u64, Ordering::Relaxed);
        self.progress.set_total_nodes(total as u64);

        let semaphore = Arc::new(Semaphore::new(self.concurrent));
        let mut tasks = JoinSet::new();
        // 任务异常退出时用原始节点补位
        let originals = proxies.clone();

        for (index, proxy) in proxies.into_iter().enumerate() {
            let checker = self.checker.clone();
            let semaphore = semaphore.clone();
            let stats = self.stats.clone();
            let progress = self.progress.clone();
            let retries = self.retries;
            let mut shutdown = shutdown.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let stopped = *shutdown.borrow();
                let result = match permit {
                    Some(_permit) if !stopped => {
                        check_single_proxy(&checker, proxy, retries).await
                    }
                    _ => CheckResult::skipped(proxy),
                };

                stats.record(&result);
                if result.verdict != Verdict::Skipped {
                    progress.increment_checked(result.is_alive());
                }
                (index, result)
            });
        }

        let mut slots: Vec<Option<CheckResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("检测任务异常退出: {}", e),
            }
        }
        self.progress.finalize();

        fill_missing(slots, originals, &self.stats)
    }

    pub fn print_stats(&self) {
        let total = self.stats.total_nodes.load(Ordering::Relaxed);
        let checked = self.stats.checked_nodes.load(Ordering::Relaxed);
        let alive = self.stats.alive_nodes.load(Ordering::Relaxed);
        let dead = self.stats.dead_nodes.load(Ordering::Relaxed);
        let annotated = self.stats.annotated_nodes.load(Ordering::Relaxed);
        let skipped = self.stats.skipped_nodes.load(Ordering::Relaxed);

        info!(
            "检测统计: 总数 {}, 已检测 {}, 存活 {}, 失败 {}, ChatGPT {}, 跳过 {}, 成功率 {:.2}%",
            total,
            checked,
            alive,
            dead,
            annotated,
            skipped,
            self.stats.get_success_rate()
        );
    }

    pub fn get_stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }
}

/// 按输入顺序收集结果，缺失的位置以原始节点标记为 Skipped
fn fill_missing(
    slots: Vec<Option<CheckResult>>,
    originals: Vec<ProxyDescriptor>,
    stats: &Stats,
) -> Vec<CheckResult> {
    slots
        .into_iter()
        .zip(originals)
        .enumerate()
        .map(|(index, (slot, original))| {
            slot.unwrap_or_else(|| {
                warn!("第 {} 个节点 {} 没有检测结果", index, original.name_text());
                let result = CheckResult::skipped(original);
                stats.record(&result);
                result
            })
        })
        .collect()
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // 发送端被丢弃视为永不停止
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// 检查单个节点，失败时按检查器给出的间隔重试
async fn check_single_proxy(
    checker: &ProxyHealthChecker,
    mut proxy: ProxyDescriptor,
    retries: u32,
) -> CheckResult {
    let chatgpt = proxy.get(CHATGPT_KEY).cloned();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = checker.check_detailed(&mut proxy).await;

        if outcome.is_alive() || attempts > retries {
            debug!(
                "{} -> {:?} (attempts: {})",
                proxy.name_text(),
                outcome.state,
                attempts
            );
            return CheckResult {
                proxy,
                verdict: if outcome.is_alive() {
                    Verdict::Alive
                } else {
                    Verdict::Dead
                },
                annotated: outcome.state == HealthState::Annotated,
                attempts,
            };
        }

        // 重试时恢复 ChatGPT 标记，保证最后一次检测仍可标注
        if let Some(flag) = &chatgpt {
            proxy.insert(CHATGPT_KEY, flag.clone());
        }
        tokio::time::sleep(outcome.retry_after).await;
    }
}
