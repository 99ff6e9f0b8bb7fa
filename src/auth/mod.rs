//! 认证与权限
//!
//! 认证流程（外部协作方，HTTP）：
//!
//! 1. 密码模式换取访问令牌（OAuth password grant）
//! 2. 从 JWT 载荷里读出用户标识与功能/账户授权（客户端不验签，
//!    授权的最终裁决在服务端）
//! 3. 按需解析行情/交易服务器地址
//!
//! 权限门禁：期货/现货/主连类合约需要 `futr`，股票类需要 `sec`，
//! 受限指数需要 `lmt_idx`，历史数据锚点订阅需要 `td_dl`。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::{ClientError, Result};

/// SDK 版本（User-Agent 用）
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_AUTH_URL: &str = "https://auth.shinnytech.com";
const CLIENT_ID: &str = "shinny_tq";
const CLIENT_SECRET: &str = "be30b9f4-6862-488a-99ad-21bde0400081";

/// 期货公司接入信息
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerInfo {
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub broker_type: String,
}

/// 认证器接口
///
/// 抽象认证相关的全部操作，便于在测试里用假实现替换真实 HTTP 流程。
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 包含认证信息的基础 HTTP 头
    fn base_headers(&self) -> Vec<(String, String)>;

    /// 执行登录
    async fn login(&self) -> Result<()>;

    /// 获取指定期货公司的交易服务器地址
    async fn get_td_url(&self, broker_id: &str, account_id: &str) -> Result<BrokerInfo>;

    /// 获取行情服务器地址
    async fn get_md_url(&self, stock: bool, backtest: bool) -> Result<String>;

    /// 是否具有指定功能权限
    fn has_feature(&self, feature: &str) -> bool;

    /// 是否具有指定账户权限
    fn has_account(&self, account: &str) -> bool;

    /// 是否有查看指定合约行情数据的权限
    fn has_md_grants(&self, symbols: &[&str]) -> Result<()>;

    /// 是否有交易指定合约的权限
    fn has_td_grants(&self, symbol: &str) -> Result<()>;

    /// 认证 ID（JWT sub）
    fn auth_id(&self) -> String;

    /// 访问令牌
    fn access_token(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct AuthResp {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenGrants {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    accounts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AccessTokenClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    grants: TokenGrants,
}

#[derive(Default)]
struct AuthState {
    access_token: String,
    refresh_token: String,
    auth_id: String,
    features: HashSet<String>,
    accounts: HashSet<String>,
}

/// 天勤认证器
pub struct ShinnyAuth {
    username: String,
    password: String,
    auth_url: String,
    http: reqwest::Client,
    state: RwLock<AuthState>,
}

impl ShinnyAuth {
    pub fn new(username: &str, password: &str) -> Self {
        let auth_url = std::env::var("TQ_AUTH_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string());

        Self {
            username: username.to_string(),
            password: password.to_string(),
            auth_url,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            state: RwLock::new(AuthState::default()),
        }
    }

    async fn request_token(&self) -> Result<AuthResp> {
        let url = format!(
            "{}/auth/realms/shinnytech/protocol/openid-connect/token",
            self.auth_url
        );

        let form = [
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("grant_type", "password"),
        ];

        let response = self
            .http
            .post(&url)
            .header("User-Agent", format!("qadiff {}", VERSION))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::AuthError(body));
        }

        Ok(response.json::<AuthResp>().await?)
    }

    /// 读取 JWT 载荷段（不验签）
    fn parse_claims(token: &str) -> Result<AccessTokenClaims> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ClientError::AuthError("malformed access token".to_string()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| ClientError::AuthError(format!("token payload decode: {}", e)))?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    fn is_in_exchange_group(prefix: &str, groups: &[&[&str]]) -> bool {
        groups.iter().any(|group| group.contains(&prefix))
    }
}

/// 期货交易所
const FUTURE_EXCHANGES: &[&str] = &["CFFEX", "SHFE", "DCE", "CZCE", "INE", "GFEX"];
/// 股票交易所
const STOCK_EXCHANGES: &[&str] = &["SSE", "SZSE"];
/// 现货交易所
const SPOT_EXCHANGES: &[&str] = &["SSWE"];
/// 主连/指数合约
const KQ_EXCHANGES: &[&str] = &["KQ"];
const KQD_EXCHANGES: &[&str] = &["KQD"];
/// 受限指数
const LIMITED_INDEXES: &[&str] = &["SSE.000016", "SSE.000300", "SSE.000905", "SSE.000852"];

#[async_trait]
impl Authenticator for ShinnyAuth {
    fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), format!("qadiff {}", VERSION)),
            ("Accept".to_string(), "application/json".to_string()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.state.read().access_token),
            ),
        ]
    }

    async fn login(&self) -> Result<()> {
        let resp = self.request_token().await?;
        let claims = Self::parse_claims(&resp.access_token)?;

        let mut state = self.state.write();
        state.access_token = resp.access_token;
        state.refresh_token = resp.refresh_token;
        state.auth_id = claims.sub;
        state.features = claims.grants.features.into_iter().collect();
        state.accounts = claims.grants.accounts.into_iter().collect();

        log::info!(
            "Auth login ok: auth_id={}, features={}",
            state.auth_id,
            state.features.len()
        );
        Ok(())
    }

    async fn get_td_url(&self, broker_id: &str, account_id: &str) -> Result<BrokerInfo> {
        let url = format!("https://files.shinnytech.com/{}.json", broker_id);

        let mut request = self
            .http
            .get(&url)
            .query(&[("account_id", account_id), ("auth", self.username.as_str())]);
        for (key, value) in self.base_headers() {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ClientError::AuthError(format!(
                "不支持该期货公司 - {}",
                broker_id
            )));
        }

        let mut broker_infos: HashMap<String, BrokerInfo> = response.json().await?;
        match broker_infos.remove(broker_id) {
            Some(mut info) => {
                if info.broker_type.is_empty() {
                    info.broker_type = "FUTURE".to_string();
                }
                Ok(info)
            }
            None => Err(ClientError::AuthError(format!(
                "该期货公司 - {} 暂不支持登录，请联系期货公司",
                broker_id
            ))),
        }
    }

    async fn get_md_url(&self, stock: bool, backtest: bool) -> Result<String> {
        let url = format!(
            "https://api.shinnytech.com/ns?stock={}&backtest={}",
            stock, backtest
        );

        let mut request = self.http.get(&url);
        for (key, value) in self.base_headers() {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::AuthError(format!(
                "调用名称服务失败: {}, {}",
                status, body
            )));
        }

        #[derive(Deserialize)]
        struct MdUrl {
            mdurl: String,
        }

        Ok(response.json::<MdUrl>().await?.mdurl)
    }

    fn has_feature(&self, feature: &str) -> bool {
        self.state.read().features.contains(feature)
    }

    fn has_account(&self, account: &str) -> bool {
        self.state.read().accounts.contains(account)
    }

    fn has_md_grants(&self, symbols: &[&str]) -> Result<()> {
        for symbol in symbols {
            let prefix = symbol.split('.').next().unwrap_or_default();

            if Self::is_in_exchange_group(
                prefix,
                &[FUTURE_EXCHANGES, SPOT_EXCHANGES, KQ_EXCHANGES, KQD_EXCHANGES],
            ) {
                if self.has_feature("futr") {
                    continue;
                }
                log::error!("您的账户不支持查看 {} 的行情数据，需要购买后才能使用", symbol);
                return Err(ClientError::PermissionDenied(symbol.to_string()));
            }

            if prefix == "CSI" || Self::is_in_exchange_group(prefix, &[STOCK_EXCHANGES]) {
                if self.has_feature("sec") {
                    continue;
                }
                log::error!("您的账户不支持查看 {} 的行情数据，需要购买后才能使用", symbol);
                return Err(ClientError::PermissionDenied(symbol.to_string()));
            }

            if LIMITED_INDEXES.contains(symbol) {
                if self.has_feature("lmt_idx") {
                    continue;
                }
                log::error!("您的账户不支持查看 {} 的行情数据，需要购买后才能使用", symbol);
                return Err(ClientError::PermissionDenied(symbol.to_string()));
            }

            // 不在任何已知交易所列表中
            return Err(ClientError::PermissionDenied(symbol.to_string()));
        }

        Ok(())
    }

    fn has_td_grants(&self, symbol: &str) -> Result<()> {
        let prefix = symbol.split('.').next().unwrap_or_default();

        if Self::is_in_exchange_group(
            prefix,
            &[FUTURE_EXCHANGES, SPOT_EXCHANGES, KQ_EXCHANGES, KQD_EXCHANGES],
        ) {
            if self.has_feature("futr") {
                return Ok(());
            }
            log::error!("您的账户不支持交易 {}，需要购买后才能使用", symbol);
            return Err(ClientError::PermissionDenied(symbol.to_string()));
        }

        if prefix == "CSI" || Self::is_in_exchange_group(prefix, &[STOCK_EXCHANGES]) {
            if self.has_feature("sec") {
                return Ok(());
            }
            log::error!("您的账户不支持交易 {}，需要购买后才能使用", symbol);
            return Err(ClientError::PermissionDenied(symbol.to_string()));
        }

        log::error!("您的账户不支持交易 {}，需要购买后才能使用", symbol);
        Err(ClientError::PermissionDenied(symbol.to_string()))
    }

    fn auth_id(&self) -> String {
        self.state.read().auth_id.clone()
    }

    fn access_token(&self) -> String {
        self.state.read().access_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with_features(features: &[&str]) -> ShinnyAuth {
        let auth = ShinnyAuth::new("user", "pass");
        {
            let mut state = auth.state.write();
            state.features = features.iter().map(|s| s.to_string()).collect();
        }
        auth
    }

    #[test]
    fn test_parse_claims_from_unsigned_token() {
        // header.payload.signature，payload 为 base64url 无填充
        let payload = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"user-123","grants":{"features":["futr","td_dl"],"accounts":["*"]}}"#,
        );
        let token = format!("eyJhbGciOiJub25lIn0.{}.sig", payload);

        let claims = ShinnyAuth::parse_claims(&token).unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.grants.features, vec!["futr", "td_dl"]);
    }

    #[test]
    fn test_parse_claims_malformed() {
        assert!(ShinnyAuth::parse_claims("not-a-token").is_err());
    }

    #[test]
    fn test_md_grants_future_feature() {
        let auth = auth_with_features(&["futr"]);
        assert!(auth.has_md_grants(&["SHFE.au2602", "DCE.m2605"]).is_ok());
        // 股票行情需要 sec
        assert!(auth.has_md_grants(&["SSE.600000"]).is_err());
    }

    #[test]
    fn test_md_grants_denied_without_feature() {
        let auth = auth_with_features(&[]);
        assert!(matches!(
            auth.has_md_grants(&["SHFE.au2602"]),
            Err(ClientError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_td_grants() {
        let auth = auth_with_features(&["futr"]);
        assert!(auth.has_td_grants("SHFE.au2602").is_ok());
        assert!(auth.has_td_grants("SSE.600000").is_err());
        assert!(auth.has_td_grants("UNKNOWN.x").is_err());
    }

    #[test]
    fn test_unknown_exchange_rejected() {
        let auth = auth_with_features(&["futr", "sec", "lmt_idx"]);
        assert!(auth.has_md_grants(&["NASDAQ.AAPL"]).is_err());
    }
}
