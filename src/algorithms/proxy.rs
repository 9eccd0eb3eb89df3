/// 蓝牙代理（固定位置接收器）定义

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 单个代理的参考坐标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyReference {
    /// 代理唯一标识（与上报主题中的 ID 一致）
    pub proxy_id: String,
    /// 友好名称
    #[serde(default)]
    pub name: Option<String>,
    /// 纬度（度）
    pub latitude: f64,
    /// 经度（度）
    pub longitude: f64,
}

impl ProxyReference {
    pub fn new(proxy_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        ProxyReference {
            proxy_id: proxy_id.into(),
            name: None,
            latitude,
            longitude,
        }
    }

    /// 附带名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 获取 (纬度, 经度)
    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// 代理集合
#[derive(Clone, Debug, Default)]
pub struct ProxySet {
    proxies: HashMap<String, ProxyReference>,
}

impl ProxySet {
    pub fn new() -> Self {
        ProxySet {
            proxies: HashMap::new(),
        }
    }

    /// 从代理向量创建集合
    pub fn from_vec(proxies: Vec<ProxyReference>) -> Self {
        let mut set = ProxySet::new();
        for proxy in proxies {
            set.insert(proxy);
        }
        set
    }

    /// 添加或替换代理，返回被替换的旧值
    pub fn insert(&mut self, proxy: ProxyReference) -> Option<ProxyReference> {
        self.proxies.insert(proxy.proxy_id.clone(), proxy)
    }

    pub fn get(&self, proxy_id: &str) -> Option<&ProxyReference> {
        self.proxies.get(proxy_id)
    }

    pub fn remove(&mut self, proxy_id: &str) -> Option<ProxyReference> {
        self.proxies.remove(proxy_id)
    }

    pub fn contains(&self, proxy_id: &str) -> bool {
        self.proxies.contains_key(proxy_id)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// 迭代代理 ID 和代理
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProxyReference)> {
        self.proxies.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.proxies.keys()
    }
}
