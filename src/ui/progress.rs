use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 健康检查进度显示
#[derive(Clone)]
pub struct ProgressTracker {
    progress: Option<ProgressBar>,
    total_nodes: Arc<AtomicU64>,
    alive_nodes: Arc<AtomicU64>,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        let progress = enabled.then(|| {
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

            let pb = ProgressBar::new(0);
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });

        Self {
            progress,
            total_nodes: Arc::new(AtomicU64::new(0)),
            alive_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 不显示任何内容，只计数
    pub fn hidden() -> Self {
        Self::new(false)
    }

    pub fn set_total_nodes(&self, total: u64) {
        self.total_nodes.store(total, Ordering::Relaxed);

        if let Some(pb) = &self.progress {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn increment_checked(&self, alive: bool) {
        if alive {
            self.alive_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.progress {
            pb.inc(1);
            pb.set_message(format!(
                "存活 {}",
                self.alive_nodes.load(Ordering::Relaxed)
            ));
        }
    }

    pub fn finalize(&self) {
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!(
                "检测完成，存活 {}/{}",
                self.alive_nodes.load(Ordering::Relaxed),
                self.total_nodes.load(Ordering::Relaxed)
            ));
        }
    }
}
