//! 延迟探测错误类型

use thiserror::Error;

/// 单次延迟探测失败的原因
///
/// 所有变体都只影响当前目标（或当前节点），不会向批量检测外抛出。
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("编码失败: {0}")]
    Encode(String),

    #[error("请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("非预期状态码: {0}")]
    Status(u16),

    #[error("响应不是合法 JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("响应中缺少 delay 字段")]
    MissingDelay,

    #[error("延迟 {delay}ms 超出范围 (上限 {max}ms)")]
    DelayOutOfRange { delay: i64, max: u64 },
}

pub type ProbeResult<T> = Result<T, ProbeError>;
