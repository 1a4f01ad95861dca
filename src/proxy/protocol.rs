//! 协议去重规则表
//! 每种协议对应一个取值器和比较器，新增协议只需在表中追加一行

use lazy_static::lazy_static;
use serde_yaml::Value;
use std::borrow::Cow;
use std::collections::HashMap;

use super::{ProxyDescriptor, scalar_text};

/// 从节点中取出参与比较的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// 比较 server:port，同一地址即视为重复
    Endpoint,
    /// 比较单个字段
    Field(&'static str),
    /// 候选节点带 token 时比较 token，否则比较 uuid
    TokenOrUuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Exact,
    CaseInsensitive,
}

/// 协议去重规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateRule {
    pub accessor: Accessor,
    pub comparator: Comparator,
}

impl DuplicateRule {
    const fn new(accessor: Accessor, comparator: Comparator) -> Self {
        Self {
            accessor,
            comparator,
        }
    }

    /// 判断候选节点是否与某个已接受的节点重复
    ///
    /// 调用方保证两者的 server:port 相同。
    pub fn matches(&self, candidate: &ProxyDescriptor, accepted: &ProxyDescriptor) -> bool {
        let (a, b) = self.extract(candidate, accepted);
        match self.comparator {
            Comparator::Exact => a == b,
            Comparator::CaseInsensitive => {
                scalar_text(&a).to_lowercase() == scalar_text(&b).to_lowercase()
            }
        }
    }

    fn extract<'a>(
        &self,
        candidate: &'a ProxyDescriptor,
        accepted: &'a ProxyDescriptor,
    ) -> (Cow<'a, Value>, Cow<'a, Value>) {
        let key = match self.accessor {
            Accessor::Endpoint => {
                return (
                    Cow::Owned(Value::String(candidate.endpoint())),
                    Cow::Owned(Value::String(accepted.endpoint())),
                );
            }
            Accessor::Field(key) => key,
            Accessor::TokenOrUuid => {
                if scalar_text(&candidate.secret("token")).is_empty() {
                    "uuid"
                } else {
                    "token"
                }
            }
        };
        (candidate.secret(key), accepted.secret(key))
    }
}

lazy_static! {
    static ref DUPLICATE_RULES: HashMap<&'static str, DuplicateRule> = {
        use Accessor::*;
        use Comparator::*;

        let mut rules = HashMap::new();
        for proto in ["http", "socks5"] {
            rules.insert(proto, DuplicateRule::new(Endpoint, Exact));
        }
        for proto in ["ss", "trojan", "anytls", "hysteria2"] {
            rules.insert(proto, DuplicateRule::new(Field("password"), Exact));
        }
        rules.insert("ssr", DuplicateRule::new(Field("protocol-param"), CaseInsensitive));
        for proto in ["vmess", "vless"] {
            rules.insert(proto, DuplicateRule::new(Field("uuid"), Exact));
        }
        rules.insert("snell", DuplicateRule::new(Field("psk"), Exact));
        rules.insert("tuic", DuplicateRule::new(TokenOrUuid, Exact));
        rules
    };
}

/// 查找协议对应的去重规则，未知协议返回 None（永不合并）
pub fn duplicate_rule(protocol: &str) -> Option<&'static DuplicateRule> {
    DUPLICATE_RULES.get(protocol)
}

/// 节点是否与同地址已有节点重复
pub fn is_duplicate(candidate: &ProxyDescriptor, accepted: &[ProxyDescriptor]) -> bool {
    if accepted.is_empty() {
        return false;
    }
    match duplicate_rule(candidate.protocol()) {
        Some(rule) => accepted.iter().any(|p| rule.matches(candidate, p)),
        None => false,
    }
}
