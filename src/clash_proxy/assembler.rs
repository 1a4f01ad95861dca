//! Clash 配置生成
//! 节点去重、重名处理、乱序，最后组装成 Clash 配置文档

use anyhow::Result;
use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use super::types::{
    AUTOMATIC_GROUP, GroupKind, ProxyGroup, RoutingConfig, RoutingSettings, SELECT_GROUP,
};
use crate::proxy::{ProxyDescriptor, is_duplicate};

const LETTERS: usize = 26;
/// 单个节点后缀冲突时最多尝试的次数，超过后改用随机后缀
const MAX_SUFFIX_ATTEMPTS: usize = LETTERS * LETTERS;
const RANDOM_SUFFIX_LEN: usize = 6;
const SHUFFLE_ROUNDS: usize = 3;

/// 兜底规则，无可用节点时直连
const FALLBACK_RULE: &str = "MATCH,DIRECT";

/// 由原始节点列表生成 Clash 配置
pub fn assemble(raw: Vec<Value>, settings: &RoutingSettings) -> RoutingConfig {
    assemble_with_rng(raw, settings, &mut rand::thread_rng())
}

/// 同 [`assemble`]，随机源由调用方提供
pub fn assemble_with_rng<R: Rng + ?Sized>(
    raw: Vec<Value>,
    settings: &RoutingSettings,
    rng: &mut R,
) -> RoutingConfig {
    let proxies = collect_descriptors(raw);
    if proxies.is_empty() {
        warn!("没有有效的代理节点");
        return RoutingConfig::empty(settings);
    }

    let total = proxies.len();
    let unique = deduplicate(proxies);
    info!("节点去重: {} -> {}", total, unique.len());

    let mut renamed = rename_collisions(unique, rng);
    shuffle_proxies(&mut renamed, rng);

    RoutingConfig::from_proxies(renamed, settings)
}

/// 健康检查后重新生成配置
///
/// ChatGPT 标记可能让名称与已有节点重复，这里只重新处理重名并乱序，不再去重。
pub fn rebuild(proxies: Vec<ProxyDescriptor>, settings: &RoutingSettings) -> RoutingConfig {
    rebuild_with_rng(proxies, settings, &mut rand::thread_rng())
}

pub fn rebuild_with_rng<R: Rng + ?Sized>(
    proxies: Vec<ProxyDescriptor>,
    settings: &RoutingSettings,
    rng: &mut R,
) -> RoutingConfig {
    let mut renamed = rename_collisions(proxies, rng);
    shuffle_proxies(&mut renamed, rng);
    RoutingConfig::from_proxies(renamed, settings)
}

/// 过滤掉非映射的条目
pub fn collect_descriptors(raw: Vec<Value>) -> Vec<ProxyDescriptor> {
    let total = raw.len();
    let proxies: Vec<ProxyDescriptor> = raw
        .into_iter()
        .filter_map(ProxyDescriptor::from_value)
        .collect();

    if proxies.len() < total {
        warn!("丢弃 {} 个格式错误的节点", total - proxies.len());
    }
    proxies
}

/// 按名称排序后去重
///
/// 同一 server:port 下按协议规则比较密钥字段，排序靠前的节点优先保留。
pub fn deduplicate(mut proxies: Vec<ProxyDescriptor>) -> Vec<ProxyDescriptor> {
    proxies.sort_by_cached_key(|p| p.name_text());

    let mut hosts: HashMap<String, Vec<ProxyDescriptor>> = HashMap::new();
    let mut unique = Vec::with_capacity(proxies.len());

    for proxy in proxies {
        let key = proxy.endpoint();
        let accepted = hosts.entry(key).or_default();
        if is_duplicate(&proxy, accepted) {
            debug!("重复节点: {} ({})", proxy.name_text(), proxy.endpoint());
            continue;
        }
        accepted.push(proxy.clone());
        unique.push(proxy);
    }

    unique
}

/// 处理重名节点
///
/// 同名节点依次追加 `-{页}{字母}` 后缀，单个节点保持原名。
/// 按簇大小升序处理，保证原名先于生成的后缀名占位。
pub fn rename_collisions<R: Rng + ?Sized>(
    proxies: Vec<ProxyDescriptor>,
    rng: &mut R,
) -> Vec<ProxyDescriptor> {
    let mut clusters: Vec<(String, Vec<ProxyDescriptor>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for proxy in proxies {
        let name = proxy.name_text();
        match index.get(&name) {
            Some(&i) => clusters[i].1.push(proxy),
            None => {
                index.insert(name.clone(), clusters.len());
                clusters.push((name, vec![proxy]));
            }
        }
    }
    clusters.sort_by_key(|(_, items)| items.len());

    let mut names: HashSet<String> = HashSet::new();
    let mut renamed = Vec::new();

    for (base, items) in clusters {
        if items.len() <= 1 {
            names.insert(base);
            renamed.extend(items);
            continue;
        }

        for (i, mut item) in items.into_iter().enumerate() {
            let name = unique_suffixed_name(&base, i, &names, rng);
            debug!("重命名节点: {} -> {}", base, name);
            item.set_name(name.clone());
            names.insert(name);
            renamed.push(item);
        }
    }

    renamed
}

fn suffixed(base: &str, page: usize, letter: usize) -> String {
    format!("{}-{}{}", base, page, (b'A' + letter as u8) as char)
}

/// 计算第 i 个同名节点的名称，冲突时顺延字母和页码
fn unique_suffixed_name<R: Rng + ?Sized>(
    base: &str,
    i: usize,
    taken: &HashSet<String>,
    rng: &mut R,
) -> String {
    let mut letter = i % LETTERS;
    let mut page = i / LETTERS + 1;
    let mut name = suffixed(base, page, letter);

    let mut attempts = 0;
    while taken.contains(&name) {
        attempts += 1;
        if attempts > MAX_SUFFIX_ATTEMPTS {
            return random_suffixed_name(base, taken, rng);
        }
        letter += 1;
        page += letter / LETTERS;
        letter %= LETTERS;
        name = suffixed(base, page, letter);
    }
    name
}

fn random_suffixed_name<R: Rng + ?Sized>(
    base: &str,
    taken: &HashSet<String>,
    rng: &mut R,
) -> String {
    let token: String = (0..RANDOM_SUFFIX_LEN)
        .map(|_| char::from(rng.sample::<u8, _>(Alphanumeric)))
        .collect();
    let candidate = format!("{}-{}", base, token);
    if !taken.contains(&candidate) {
        return candidate;
    }

    (1..)
        .map(|n| format!("{}-{}", candidate, n))
        .find(|name| !taken.contains(name))
        .unwrap_or(candidate)
}

/// 打乱节点顺序
pub fn shuffle_proxies<R: Rng + ?Sized>(proxies: &mut [ProxyDescriptor], rng: &mut R) {
    for _ in 0..SHUFFLE_ROUNDS {
        proxies.shuffle(rng);
    }
}

impl RoutingConfig {
    /// 空配置：无节点，代理组为空，仅保留兜底规则
    pub fn empty(settings: &RoutingSettings) -> Self {
        Self {
            mixed_port: settings.mixed_port,
            external_controller: settings.external_controller.clone(),
            mode: settings.mode.clone(),
            log_level: settings.log_level.clone(),
            proxies: vec![],
            proxy_groups: vec![
                ProxyGroup::new(AUTOMATIC_GROUP, GroupKind::UrlTest)
                    .with_probe(&settings.probe_url, settings.probe_interval),
                ProxyGroup::new(SELECT_GROUP, GroupKind::Select),
            ],
            rules: vec![FALLBACK_RULE.to_string()],
        }
    }

    /// 由已去重、已重命名的节点构建配置，节点顺序保持不变
    pub fn from_proxies(mut proxies: Vec<ProxyDescriptor>, settings: &RoutingSettings) -> Self {
        let mut config = Self::empty(settings);
        if proxies.is_empty() {
            return config;
        }

        for proxy in proxies.iter_mut() {
            proxy.normalize_quoted_fields();
        }
        let names: Vec<String> = proxies.iter().map(|p| p.name_text()).collect();

        let mut auto_group = ProxyGroup::new(AUTOMATIC_GROUP, GroupKind::UrlTest)
            .with_probe(&settings.probe_url, settings.probe_interval);
        let mut select_group = ProxyGroup::new(SELECT_GROUP, GroupKind::Select);
        select_group.add_proxy(AUTOMATIC_GROUP.to_string());
        for name in names {
            auto_group.add_proxy(name.clone());
            select_group.add_proxy(name);
        }

        config.proxies = proxies;
        config.proxy_groups = vec![auto_group, select_group];
        config.rules = vec![format!("MATCH,{}", SELECT_GROUP)];
        config
    }

    pub fn proxy_names(&self) -> Vec<String> {
        self.proxies.iter().map(|p| p.name_text()).collect()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// 写入配置文件，自动创建父目录
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_yaml()?)?;
        info!("配置已写入: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn node(name: &str, server: &str, port: u16, proto: &str) -> ProxyDescriptor {
        ProxyDescriptor::new(name, server, port, proto)
    }

    fn values(proxies: Vec<ProxyDescriptor>) -> Vec<Value> {
        proxies
            .into_iter()
            .map(|p| serde_yaml::to_value(p).unwrap())
            .collect()
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    #[test]
    fn test_identical_vmess_collapsed() {
        let a = node("A", "1.1.1.1", 443, "vmess").with_field("uuid", "x");
        let raw = values(vec![a.clone(), a]);

        let config = assemble(raw, &RoutingSettings::default());
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].protocol(), "vmess");
        assert_eq!(config.proxy_names(), vec!["A".to_string()]);
    }

    #[test]
    fn test_same_name_distinct_endpoints_suffixed() {
        let raw = values(vec![
            node("B", "1.1.1.1", 443, "ss").with_field("password", "p"),
            node("B", "2.2.2.2", 443, "ss").with_field("password", "p"),
            node("B", "3.3.3.3", 443, "ss").with_field("password", "p"),
        ]);

        let config = assemble(raw, &RoutingSettings::default());
        assert_eq!(
            sorted(config.proxy_names()),
            vec!["B-1A".to_string(), "B-1B".to_string(), "B-1C".to_string()]
        );
    }

    #[test]
    fn test_empty_input() {
        let config = assemble(vec![], &RoutingSettings::default());
        assert!(config.proxies.is_empty());
        assert_eq!(config.proxy_groups.len(), 2);
        assert!(config.proxy_groups.iter().all(|g| g.proxies.is_empty()));
        assert_eq!(config.rules, vec![FALLBACK_RULE.to_string()]);
    }

    #[test]
    fn test_non_mapping_entries_discarded() {
        let raw = vec![
            Value::from("ss://not-a-mapping"),
            Value::from(42),
            Value::Null,
        ];
        let config = assemble(raw, &RoutingSettings::default());
        assert!(config.proxies.is_empty());
        assert_eq!(config.rules.len(), 1);

        let mut raw = values(vec![node("ok", "1.1.1.1", 1, "http")]);
        raw.push(Value::Sequence(vec![]));
        let config = assemble(raw, &RoutingSettings::default());
        assert_eq!(config.proxy_names(), vec!["ok".to_string()]);
    }

    #[test]
    fn test_dedup_keeps_first_by_name() {
        let proxies = vec![
            node("z-http", "1.1.1.1", 8080, "http"),
            node("a-http", "1.1.1.1", 8080, "http").with_field("username", "u"),
        ];
        let unique = deduplicate(proxies);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].name(), Some("a-http"));
        assert_eq!(unique[0].get("username"), Some(&Value::from("u")));
    }

    #[test]
    fn test_dedup_different_protocol_same_endpoint() {
        // 同地址不同协议按候选节点的规则比较，vmess 的 uuid 与 ss 节点不冲突
        let proxies = vec![
            node("a", "1.1.1.1", 443, "ss").with_field("password", "k"),
            node("b", "1.1.1.1", 443, "vmess").with_field("uuid", "k"),
        ];
        assert_eq!(deduplicate(proxies).len(), 2);
    }

    #[test]
    fn test_singleton_name_not_reused_by_suffix() {
        let proxies = vec![
            node("B", "1.1.1.1", 1, "vmess"),
            node("B", "2.2.2.2", 1, "vmess"),
            node("B-1A", "3.3.3.3", 1, "vmess"),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let renamed = rename_collisions(deduplicate(proxies), &mut rng);
        let names: Vec<String> = renamed.iter().map(|p| p.name_text()).collect();

        assert_eq!(names, vec!["B-1A", "B-1B", "B-1C"]);
    }

    #[test]
    fn test_page_rolls_after_26() {
        let proxies: Vec<ProxyDescriptor> = (0..28)
            .map(|i| node("N", &format!("10.0.0.{}", i), 443, "trojan"))
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        let renamed = rename_collisions(deduplicate(proxies), &mut rng);
        let names: HashSet<String> = renamed.iter().map(|p| p.name_text()).collect();

        assert_eq!(names.len(), 28);
        assert!(names.contains("N-1A"));
        assert!(names.contains("N-1Z"));
        assert!(names.contains("N-2A"));
        assert!(names.contains("N-2B"));
    }

    #[test]
    fn test_rename_is_deterministic() {
        let proxies: Vec<ProxyDescriptor> = ["C", "C", "D", "C", "D", "E"]
            .iter()
            .enumerate()
            .map(|(i, name)| node(name, &format!("10.0.1.{}", i), 80, "snell"))
            .collect();
        let unique = deduplicate(proxies);

        let first = rename_collisions(unique.clone(), &mut StdRng::seed_from_u64(1));
        let second = rename_collisions(unique, &mut StdRng::seed_from_u64(99));
        assert_eq!(first, second);
    }

    #[test]
    fn test_suffix_overflow_falls_back_to_random_token() {
        let mut taken = HashSet::new();
        for page in 1..=30 {
            for letter in 0..LETTERS {
                taken.insert(suffixed("C", page, letter));
            }
        }
        let mut rng = StdRng::seed_from_u64(3);
        let name = unique_suffixed_name("C", 0, &taken, &mut rng);

        assert!(!taken.contains(&name));
        assert!(name.starts_with("C-"));
        assert_eq!(name.len(), 2 + RANDOM_SUFFIX_LEN);
    }

    #[test]
    fn test_shuffle_seeded() {
        let build = || -> Vec<Value> {
            values(
                (0..20)
                    .map(|i| node(&format!("n{:02}", i), "1.1.1.1", 1000 + i, "vless"))
                    .collect(),
            )
        };
        let settings = RoutingSettings::default();
        let a = assemble_with_rng(build(), &settings, &mut StdRng::seed_from_u64(42));
        let b = assemble_with_rng(build(), &settings, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.proxy_names(), b.proxy_names());
        assert_eq!(a.proxies.len(), 20);
    }

    #[test]
    fn test_document_groups_and_rule() {
        let raw = values(vec![
            node("x", "1.1.1.1", 1, "ss").with_field("password", "a"),
            node("y", "2.2.2.2", 1, "ss").with_field("password", "a"),
        ]);
        let config = assemble(raw, &RoutingSettings::default());
        let names = config.proxy_names();

        let auto = &config.proxy_groups[0];
        assert_eq!(auto.name, AUTOMATIC_GROUP);
        assert_eq!(auto.kind, GroupKind::UrlTest);
        assert_eq!(auto.proxies, names);
        assert_eq!(auto.interval, Some(300));

        let select = &config.proxy_groups[1];
        assert_eq!(select.kind, GroupKind::Select);
        assert_eq!(select.proxies[0], AUTOMATIC_GROUP);
        assert_eq!(select.size(), 3);

        assert_eq!(config.rules, vec![format!("MATCH,{}", SELECT_GROUP)]);
    }

    #[test]
    fn test_yaml_top_level_keys() {
        let raw = values(vec![node("x", "1.1.1.1", 1, "ss")]);
        let yaml = assemble(raw, &RoutingSettings::default()).to_yaml().unwrap();

        assert!(yaml.contains("mixed-port: 7890"));
        assert!(yaml.contains("external-controller:"));
        assert!(yaml.contains("mode: Rule"));
        assert!(yaml.contains("log-level: silent"));
        assert!(yaml.contains("proxy-groups:"));
        assert!(yaml.contains("type: url-test"));
        assert!(yaml.contains("MATCH,"));
    }
}
