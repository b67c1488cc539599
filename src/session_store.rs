//! 会话存储
//!
//! 把浏览器上下文的认证状态（Cookie + localStorage 快照）序列化到
//! `data/session.json`，服务重启后用它恢复登录态，避免重复扫码。
//! 文件不存在表示"没有已保存的会话"；文件损坏按无会话处理并告警。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 序列化后的会话快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Cookie 数组（登录态主要靠它）
    pub cookies: Vec<StoredCookie>,
    /// 微博域下的 localStorage 快照
    #[serde(default)]
    pub storage: HashMap<String, String>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.storage.is_empty()
    }
}

/// 单条 Cookie 记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// 过期时间（UNIX 秒），会话级 Cookie 为 None
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl StoredCookie {
    /// 从 CDP 返回的 Cookie 转换
    pub fn from_cdp(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: if cookie.session || cookie.expires < 0.0 {
                None
            } else {
                Some(cookie.expires)
            },
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: cookie.same_site.as_ref().map(same_site_to_string),
        }
    }

    /// 转换成 Network.setCookies 的参数
    pub fn to_param(&self) -> Option<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(&self.name)
            .value(&self.value)
            .domain(&self.domain)
            .path(&self.path)
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(expires) = self.expires {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(same_site_from_str) {
            builder = builder.same_site(same_site);
        }
        match builder.build() {
            Ok(param) => Some(param),
            Err(err) => {
                warn!("[会话] ⚠️ 跳过无效的 Cookie 记录 {}: {}", self.name, err);
                None
            }
        }
    }
}

fn same_site_to_string(same_site: &CookieSameSite) -> String {
    match same_site {
        CookieSameSite::Strict => "Strict".to_string(),
        CookieSameSite::Lax => "Lax".to_string(),
        CookieSameSite::None => "None".to_string(),
    }
}

fn same_site_from_str(value: &str) -> Option<CookieSameSite> {
    match value {
        "Strict" => Some(CookieSameSite::Strict),
        "Lax" => Some(CookieSameSite::Lax),
        "None" => Some(CookieSameSite::None),
        _ => None,
    }
}

/// 会话文件读写
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(config: &Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|err| {
            AppError::SessionStore(format!("无法创建数据目录 ({}): {}", config.data_dir, err))
        })?;
        Ok(Self {
            path: config.session_file(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载会话，文件不存在或解析失败时返回 None
    pub async fn load(&self) -> Option<SessionState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };
        match serde_json::from_slice::<SessionState>(&bytes) {
            Ok(state) => {
                info!("[会话] 会话已加载 ({} 条 Cookie)", state.cookies.len());
                Some(state)
            }
            Err(err) => {
                warn!("[会话] ⚠️ 会话文件损坏，按未登录处理: {}", err);
                None
            }
        }
    }

    /// 整体覆盖写入会话文件
    pub async fn save(&self, state: &SessionState) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&self.path, json).await.map_err(|err| {
            AppError::SessionStore(format!("写入会话文件失败 ({}): {}", self.path.display(), err))
        })?;
        info!("[会话] 会话已保存 ({} 条 Cookie)", state.cookies.len());
        Ok(())
    }

    /// 删除会话文件（登出时调用），文件不存在不算错误
    pub async fn clear(&self) -> AppResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(_) => {
                info!("[会话] 会话文件已删除");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::SessionStore(format!(
                "删除会话文件失败 ({}): {}",
                self.path.display(),
                err
            ))),
        }
    }
}
