//! Clash 相关模块封装
//! 对外提供配置生成（去重、重命名、乱序）与基于控制面的健康检查

pub mod assembler;
pub mod health_check;
pub mod types;

pub use assembler::{assemble, assemble_with_rng, rebuild, rebuild_with_rng};
pub use health_check::{CHATGPT_FLAG, ProxyHealthChecker};
pub use types::{
    GroupKind, HealthState, ProbeOutcome, ProbePlan, ProxyGroup, RoutingConfig, RoutingSettings,
};
