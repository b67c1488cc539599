//! 登录状态检查
//!
//! 导航到主页探测登录标记。"未登录"是正常结果；只有基础设施故障
//! （导航超时、浏览器断开）才会以错误透出。

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::browser::{LoginStatus, SessionManager};
use crate::config::Config;
use crate::error::AppResult;
use crate::executor::RetryPolicy;
use crate::site::SiteAdapter;

pub struct LoginService {
    manager: Arc<SessionManager>,
    adapter: Arc<dyn SiteAdapter>,
    retry: RetryPolicy,
    cache_ttl: Duration,
}

impl LoginService {
    pub fn new(
        config: &Config,
        manager: Arc<SessionManager>,
        adapter: Arc<dyn SiteAdapter>,
    ) -> Self {
        Self {
            manager,
            adapter,
            retry: RetryPolicy::from_config(config),
            cache_ttl: Duration::from_secs(config.login_cache_ttl_secs),
        }
    }

    /// 检查当前登录状态
    ///
    /// 带短 TTL 缓存，连续的状态查询不会反复驱动浏览器；缓存过期后
    /// 重新探测并更新全局登录态。
    pub async fn check_login_status(&self) -> AppResult<bool> {
        if let Some(cached) = self.manager.cached_login_status(self.cache_ttl) {
            debug!("[登录检查] 使用缓存的登录状态: {:?}", cached);
            return Ok(cached == LoginStatus::LoggedIn);
        }

        let manager = Arc::clone(&self.manager);
        let adapter = Arc::clone(&self.adapter);
        let result = self
            .retry
            .run("登录检查", move |_| {
                let manager = Arc::clone(&manager);
                let adapter = Arc::clone(&adapter);
                async move {
                    manager
                        .with_page(move |page| async move { adapter.detect_logged_in(&page).await })
                        .await
                }
            })
            .await;

        match result {
            Ok(logged_in) => {
                self.manager.set_login_status(if logged_in {
                    LoginStatus::LoggedIn
                } else {
                    LoginStatus::LoggedOut
                });
                Ok(logged_in)
            }
            Err(err) => {
                // 检查失败时无法区分"未登录"和"选择器失效"，按登出处理
                self.manager.set_login_status(LoginStatus::LoggedOut);
                Err(err)
            }
        }
    }

    /// 退出登录：删除会话文件、销毁上下文、重置登录态
    pub async fn logout(&self) -> AppResult<()> {
        self.manager.logout().await
    }
}
