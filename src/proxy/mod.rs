//! 代理节点描述
//! 节点以原始 YAML 映射保存，保证所有字段原样输出

use log::warn;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::borrow::Cow;

mod protocol;

pub use protocol::{Accessor, Comparator, DuplicateRule, duplicate_rule, is_duplicate};

/// 请求 ChatGPT 能力检测的标记字段
pub const CHATGPT_KEY: &str = "chatgpt";

/// REALITY 中必须以字符串形式输出的字段
const QUOTED_REALITY_FIELDS: [&str; 1] = ["short-id"];

/// 单个代理节点
///
/// 所有权在流水线各阶段之间转移：去重、重命名、健康检查都直接修改自己持有的节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyDescriptor(Mapping);

impl ProxyDescriptor {
    pub fn new(name: &str, server: &str, port: u16, protocol: &str) -> Self {
        let mut map = Mapping::new();
        map.insert(Value::from("name"), Value::from(name));
        map.insert(Value::from("server"), Value::from(server));
        map.insert(Value::from("port"), Value::from(port));
        map.insert(Value::from("type"), Value::from(protocol));
        Self(map)
    }

    /// 从任意 YAML 值构建节点，非映射返回 None
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Mapping(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(Value::from(key), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.0.insert(Value::from(key), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// 节点名称（仅当 name 为字符串时）
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    /// 名称的文本形式，用于排序和分组
    pub fn name_text(&self) -> String {
        self.get("name").map(scalar_text).unwrap_or_default()
    }

    pub fn set_name(&mut self, name: String) {
        self.0.insert(Value::from("name"), Value::String(name));
    }

    pub fn protocol(&self) -> &str {
        self.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// 获取代理地址（server:port）
    pub fn endpoint(&self) -> String {
        let server = self.get("server").map(scalar_text).unwrap_or_default();
        let port = self.get("port").map(scalar_text).unwrap_or_default();
        format!("{}:{}", server, port)
    }

    /// 读取密钥类字段，缺失时视为空字符串
    pub fn secret(&self, key: &str) -> Cow<'_, Value> {
        match self.get(key) {
            Some(value) => Cow::Borrowed(value),
            None => Cow::Owned(Value::String(String::new())),
        }
    }

    /// 取出并移除 chatgpt 标记
    pub fn take_chatgpt_flag(&mut self) -> bool {
        self.remove(CHATGPT_KEY)
            .map(|v| truthy(&v))
            .unwrap_or(false)
    }

    /// 将 REALITY short-id 等字段统一为字符串
    ///
    /// 数字形式的 short-id 会被 mihomo 拒绝（invalid REALITY short ID），
    /// 转成字符串后 serde_yaml 会自动加引号输出。
    /// 浮点数已无法还原原始写法（`1e3` 会变成 `1000.0`），保持原样。
    pub fn normalize_quoted_fields(&mut self) {
        let name = self.name_text();
        let Some(Value::Mapping(opts)) = self.0.get_mut("reality-opts") else {
            return;
        };
        for key in QUOTED_REALITY_FIELDS {
            let Some(value) = opts.get_mut(key) else {
                continue;
            };
            let text = match &*value {
                Value::Number(n) if n.is_f64() => {
                    warn!("节点 {} 的 {} 是浮点数 {}，无法还原为字符串", name, key, n);
                    None
                }
                Value::Number(_) | Value::Bool(_) => Some(scalar_text(value)),
                _ => None,
            };
            if let Some(text) = text {
                *value = Value::String(text);
            }
        }
    }
}

/// YAML 标量转文本，非标量使用紧凑 YAML 表示
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}
