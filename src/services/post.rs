//! 发布微博
//!
//! 前置条件：登录态不能是明确的"已登出"，否则立即拒绝，连页面都不会
//! 创建。进入页面后不信任缓存，发布前总是重新探测一次登录标记，
//! 避免带着过期的"已登录"缓存把发布失败吞掉。

use std::sync::Arc;

use tracing::{info, warn};

use crate::browser::{LoginStatus, SessionManager};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::executor::RetryPolicy;
use crate::site::SiteAdapter;

/// 发布成功的结果
#[derive(Debug, Clone)]
pub struct PostOutcome {
    /// 新微博的 ID
    pub post_id: String,
    /// 服务端回显的正文
    pub content: String,
}

pub struct PostService {
    manager: Arc<SessionManager>,
    adapter: Arc<dyn SiteAdapter>,
    retry: RetryPolicy,
    max_chars: usize,
}

impl PostService {
    pub fn new(
        config: &Config,
        manager: Arc<SessionManager>,
        adapter: Arc<dyn SiteAdapter>,
    ) -> Self {
        Self {
            manager,
            adapter,
            retry: RetryPolicy::from_config(config),
            max_chars: config.max_post_chars,
        }
    }

    /// 内容校验，由请求层在发布前调用
    pub fn validate_content(&self, content: &str) -> AppResult<()> {
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput("内容不能为空".to_string()));
        }
        if content.chars().count() > self.max_chars {
            return Err(AppError::InvalidInput(format!(
                "内容过长，最多 {} 字",
                self.max_chars
            )));
        }
        Ok(())
    }

    /// 发布一条微博
    pub async fn post_status(&self, content: &str) -> AppResult<PostOutcome> {
        info!("[发送微博] 开始发送微博");
        info!("[发送微博] 微博内容: \"{}\"", content);

        if self.manager.login_status() == LoginStatus::LoggedOut {
            return Err(AppError::NotAuthenticated);
        }

        let manager = Arc::clone(&self.manager);
        let adapter = Arc::clone(&self.adapter);
        let content_owned = content.to_string();
        let result = self
            .retry
            .run("发送微博", move |_| {
                let manager = Arc::clone(&manager);
                let adapter = Arc::clone(&adapter);
                let content = content_owned.clone();
                async move {
                    let manager_for_page = Arc::clone(&manager);
                    manager
                        .with_page(move |page| async move {
                            // 发布前重新验证登录态，不沿用缓存
                            if !adapter.detect_logged_in(&page).await? {
                                return Err(AppError::NotAuthenticated);
                            }
                            let receipt = adapter.submit_post(&page, &content).await?;
                            // 发布成功后刷新持久化的会话（失败不影响本次结果）
                            if let Err(err) = manager_for_page.capture_session(&page).await {
                                warn!("[会话] ⚠️ 保存会话失败: {}", err);
                            }
                            Ok(receipt)
                        })
                        .await
                }
            })
            .await;

        match result {
            Ok(receipt) => {
                self.manager.set_login_status(LoginStatus::LoggedIn);
                Ok(PostOutcome {
                    post_id: receipt.post_id,
                    content: receipt.content,
                })
            }
            Err(err) => {
                // DOM 层面的失败无法区分登录态失效和页面改版，按登出处理
                if matches!(
                    err,
                    AppError::NotAuthenticated | AppError::SiteStructure(_)
                ) {
                    self.manager.set_login_status(LoginStatus::LoggedOut);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::SessionStore;
    use crate::site::WeiboAdapter;
    use tempfile::tempdir;

    fn service(dir: &std::path::Path) -> (PostService, Arc<SessionManager>) {
        let config = Arc::new(Config {
            data_dir: dir.join("data").to_string_lossy().into_owned(),
            ..Config::default()
        });
        let store = SessionStore::new(&config).unwrap();
        let adapter: Arc<dyn SiteAdapter> = Arc::new(WeiboAdapter::new(&config));
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&config),
            store,
            adapter.page_init_scripts(),
        ));
        (
            PostService::new(&config, Arc::clone(&manager), adapter),
            manager,
        )
    }

    #[tokio::test]
    async fn logged_out_fails_fast_without_touching_the_browser() {
        let dir = tempdir().unwrap();
        let (service, manager) = service(dir.path());
        manager.set_login_status(LoginStatus::LoggedOut);

        let err = service.post_status("hello world").await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthenticated));
        // 浏览器从未被启动，说明没有创建过任何页面
        assert_eq!(manager.browser_status().await, "stopped");
    }

    #[tokio::test]
    async fn content_validation() {
        let dir = tempdir().unwrap();
        let (service, _manager) = service(dir.path());

        assert!(service.validate_content("hello world").is_ok());
        assert!(matches!(
            service.validate_content("   "),
            Err(AppError::InvalidInput(_))
        ));
        let too_long = "微".repeat(2001);
        assert!(matches!(
            service.validate_content(&too_long),
            Err(AppError::InvalidInput(_))
        ));
        // 恰好到达上限的内容放行
        let at_limit = "微".repeat(2000);
        assert!(service.validate_content(&at_limit).is_ok());
    }
}
