//! 合约目录加载
//!
//! 从合约服务下载全量合约信息（一份大 JSON），带本地文件缓存：
//!
//! - 缓存文件固定为 `<cache_dir>/latest.json`，内容与服务端响应一致
//! - 文件修改时间即缓存时间戳
//! - 三种策略：总是走网络 / 优先本地 / 超龄自动刷新
//!
//! 加载在后台进行，行情/序列订阅不等待它完成。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

use super::{Client, SymbolsCacheStrategy};
use crate::{ClientError, Result};

impl Client {
    /// 按配置的缓存策略加载合约目录
    pub(crate) async fn load_symbols(self: Arc<Self>) {
        let strategy = self.config().symbols_cache_strategy;

        let loaded: Result<(Value, &'static str)> = match strategy {
            SymbolsCacheStrategy::AlwaysNetwork => match self.fetch_symbols_from_network().await {
                Ok(data) => {
                    let _ = self.save_symbols_cache(&data).await;
                    Ok((data, "network"))
                }
                Err(e) => Err(e),
            },

            SymbolsCacheStrategy::PreferLocal => match self.load_symbols_from_cache().await {
                Ok(data) => Ok((data, "cache")),
                Err(_) => {
                    log::info!("Local cache not available, fetching from network");
                    match self.fetch_symbols_from_network().await {
                        Ok(data) => {
                            let _ = self.save_symbols_cache(&data).await;
                            Ok((data, "network"))
                        }
                        Err(e) => Err(e),
                    }
                }
            },

            SymbolsCacheStrategy::AutoRefresh => {
                if self.is_cache_expired() {
                    log::info!("Cache expired, fetching from network");
                    match self.fetch_symbols_from_network().await {
                        Ok(data) => {
                            let _ = self.save_symbols_cache(&data).await;
                            Ok((data, "network"))
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    match self.load_symbols_from_cache().await {
                        Ok(data) => Ok((data, "cache")),
                        Err(_) => {
                            log::info!("Failed to load cache, fetching from network");
                            match self.fetch_symbols_from_network().await {
                                Ok(data) => {
                                    let _ = self.save_symbols_cache(&data).await;
                                    Ok((data, "network"))
                                }
                                Err(e) => Err(e),
                            }
                        }
                    }
                }
            }
        };

        let (data, source) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("Failed to load symbols: {}", e);
                return;
            }
        };

        self.ingest_symbols(data);

        log::info!(
            "Symbols loaded: source={}, count={}",
            source,
            self.symbols_count()
        );
    }

    /// 合约信息入库（离线数据源也可直接注入），FUTURE_OPTION 归一成 OPTION
    pub fn ingest_symbols(&self, data: Value) {
        let quotes_map = match data {
            Value::Object(m) => m,
            _ => return,
        };

        let mut quotes_info = self.quotes_info_mut().write();
        for (symbol, mut quote) in quotes_map {
            if let Some(obj) = quote.as_object_mut() {
                if obj.get("class").and_then(Value::as_str) == Some("FUTURE_OPTION") {
                    obj.insert("class".to_string(), Value::from("OPTION"));
                }
            }
            quotes_info.insert(symbol, quote);
        }
    }

    async fn fetch_symbols_from_network(&self) -> Result<Value> {
        let url = self.config().symbols_server_url.clone();
        let response = reqwest::get(&url).await?;

        if !response.status().is_success() {
            return Err(ClientError::TransportError(format!(
                "symbols fetch failed: HTTP {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn load_symbols_from_cache(&self) -> Result<Value> {
        let cache_path = self.symbols_cache_path();

        let data = tokio::fs::read(&cache_path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save_symbols_cache(&self, data: &Value) -> Result<()> {
        let cache_path = self.symbols_cache_path();

        if let Some(cache_dir) = cache_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(cache_dir).await {
                log::error!("Failed to create cache directory {:?}: {}", cache_dir, e);
                return Err(e.into());
            }
        }

        let json = serde_json::to_string_pretty(data)?;
        if let Err(e) = tokio::fs::write(&cache_path, json).await {
            log::error!("Failed to write cache file {:?}: {}", cache_path, e);
            return Err(e.into());
        }

        log::debug!("Symbols cache saved: {:?}", cache_path);
        Ok(())
    }

    /// 缓存文件是否超过有效期（文件不存在视为过期）
    fn is_cache_expired(&self) -> bool {
        let cache_path = self.symbols_cache_path();

        let modified = match std::fs::metadata(&cache_path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return true,
        };

        match SystemTime::now().duration_since(modified) {
            Ok(elapsed) => elapsed.as_secs() > self.config().symbols_cache_max_age,
            Err(_) => false,
        }
    }

    fn symbols_cache_path(&self) -> PathBuf {
        self.config().symbols_cache_dir.join("latest.json")
    }
}
