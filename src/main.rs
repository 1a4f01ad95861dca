use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use tokio::sync::watch;

use subs_clash_rust::check::{CheckResult, Verdict};
use subs_clash_rust::config::Config;
use subs_clash_rust::pipeline;

/// Clash 配置生成与节点检测工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 节点列表文件（YAML，包含 proxies 字段或直接为列表）
    #[arg(short = 'i', long)]
    input: Option<String>,

    /// 输出的 Clash 配置文件
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// 通过 Clash 控制面检测节点（配置会先写入输出文件，需要 Clash 加载该文件运行）
    #[arg(long)]
    check: Option<bool>,

    /// 严格模式：额外测试大文件下载
    #[arg(long)]
    strict: Option<bool>,

    /// 并发数
    #[arg(long)]
    concurrent: Option<usize>,

    /// 超时时间（毫秒）
    #[arg(long)]
    timeout: Option<u64>,

    /// 最大可接受延迟（毫秒）
    #[arg(long)]
    max_delay: Option<u64>,

    /// 失败重试次数
    #[arg(long)]
    retries: Option<u32>,

    /// 是否显示进度条
    #[arg(long)]
    progress: Option<bool>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Config {
    let mut config = if Path::new(&args.config).exists() {
        match Config::load_from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("⚠️  配置文件加载失败: {}, 使用默认配置", e);
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    // 覆盖命令行参数
    if let Some(input) = &args.input {
        config.input = input.clone();
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(check) = args.check {
        config.check = check;
    }
    if let Some(strict) = args.strict {
        config.strict = strict;
    }
    if let Some(concurrent) = args.concurrent {
        config.concurrent = concurrent;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(max_delay) = args.max_delay {
        config.max_delay = max_delay;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }

    config
}

fn print_summary(results: &[CheckResult]) {
    let alive = results.iter().filter(|r| r.is_alive()).count();
    let skipped = results
        .iter()
        .filter(|r| r.verdict == Verdict::Skipped)
        .count();

    println!("\n检测摘要:");
    println!("{:=<80}", "");
    println!("总节点数: {}", results.len());
    println!("存活节点: {}", alive);
    if skipped > 0 {
        println!("跳过节点: {}", skipped);
    }
    for result in results.iter().filter(|r| r.annotated) {
        println!("  ChatGPT: {}", result.proxy.name_text());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("🚀 Clash 配置生成工具 v{}", env!("CARGO_PKG_VERSION"));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止启动新的检测");
            let _ = stop_tx.send(true);
        }
    });

    let report = pipeline::run(&config, stop_rx).await?;
    if !report.results.is_empty() {
        print_summary(&report.results);
    }
    println!("\n🎉 完成! 共 {} 个节点", report.routing.proxies.len());

    Ok(())
}
