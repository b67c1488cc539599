//! 浏览器会话生命周期管理
//!
//! 全进程只维护一个浏览器进程和一个逻辑上下文（一次只服务一个微博
//! 账号），所有生命周期变更都在一把异步锁里完成，并发的 `ensure_ready`
//! 调用共享同一次初始化，不会竞争出多个浏览器进程。
//!
//! 页面是短命资源：每个操作通过 [`SessionManager::with_page`] 拿到
//! 自己的页面，操作结束（无论成败）页面都会被关闭。唯一的例外是
//! 扫码登录页，它在轮询窗口内被保留，由本模块独占管理。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::inspector::EventTargetCrashed;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, SetCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EventExceptionThrown;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::session_store::{SessionState, SessionStore, StoredCookie};

use super::launcher;

/// 登录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Unknown,
    LoggedOut,
    LoggedIn,
}

/// 扫码登录状态机
///
/// `WaitingScan → {ScannedPendingConfirm | Succeeded | Expired | Failed}`，
/// 到达终态后不会回到等待态，必须重新请求二维码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    WaitingScan,
    ScannedPendingConfirm,
    Succeeded,
    Expired,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Succeeded | ScanState::Expired | ScanState::Failed
        )
    }
}

/// 浏览器进程句柄：进程本体 + CDP 事件循环任务
///
/// 事件循环结束意味着连接已断开，用它判断存活。
struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl BrowserHandle {
    fn is_connected(&self) -> bool {
        !self.handler_task.is_finished()
    }
}

/// 逻辑浏览上下文
///
/// CDP 没有 Playwright 那样的独立 context 对象可以带着 storageState
/// 创建，这里把"上下文"落在默认上下文上：创建时清空并重新播种
/// Cookie，localStorage 快照随每个新页面的初始化脚本注入。
struct SessionContext {
    user_agent: String,
    storage: HashMap<String, String>,
}

/// 生命周期字段，整体由一把锁保护
struct Lifecycle {
    browser: Option<BrowserHandle>,
    context: Option<SessionContext>,
}

/// 扫码登录保留页（同一时刻最多一个）
struct PendingLogin {
    page: Page,
    state: ScanState,
    created_at: Instant,
}

/// 保留页快照，供轮询方使用
pub struct PendingSnapshot {
    pub page: Page,
    pub state: ScanState,
    pub created_at: Instant,
}

struct LoginCell {
    status: LoginStatus,
    checked_at: Option<Instant>,
}

/// 会话管理器
pub struct SessionManager {
    config: Arc<Config>,
    store: SessionStore,
    /// 新页面创建时注入的站点初始化脚本
    init_scripts: Vec<String>,
    /// localStorage 只在该主机名下播种
    session_host: String,
    lifecycle: AsyncMutex<Lifecycle>,
    login: StdMutex<LoginCell>,
    pending_login: AsyncMutex<Option<PendingLogin>>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, store: SessionStore, init_scripts: Vec<String>) -> Self {
        let session_host = host_of(&config.weibo_home_url);
        Self {
            config,
            store,
            init_scripts,
            session_host,
            lifecycle: AsyncMutex::new(Lifecycle {
                browser: None,
                context: None,
            }),
            login: StdMutex::new(LoginCell {
                status: LoginStatus::Unknown,
                checked_at: None,
            }),
            pending_login: AsyncMutex::new(None),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ========== 生命周期 ==========

    /// 保证浏览器和上下文可用
    ///
    /// 幂等：健康时重复调用不会重建任何东西。失败时尽力清理全部句柄
    /// 并重置登录态，这里不做重试，由操作执行器决定是否再来一次。
    pub async fn ensure_ready(&self) -> AppResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.ensure_ready_locked(&mut lifecycle).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("[浏览器] 浏览器初始化失败: {}", err);
                Self::teardown_locked(&mut lifecycle).await;
                drop(lifecycle);
                self.set_login_status(LoginStatus::LoggedOut);
                Err(match err {
                    init @ AppError::BrowserInit(_) => init,
                    other => AppError::BrowserInit(other.to_string()),
                })
            }
        }
    }

    async fn ensure_ready_locked(&self, lifecycle: &mut Lifecycle) -> AppResult<()> {
        // 浏览器进程：不存在或已断开则重建
        let relaunch = match &lifecycle.browser {
            Some(handle) if handle.is_connected() => false,
            Some(_) => {
                warn!("[浏览器] 检测到浏览器连接已断开，准备重建...");
                true
            }
            None => true,
        };
        if relaunch {
            if let Some(stale) = lifecycle.browser.take() {
                Self::close_browser(stale).await;
            }
            lifecycle.context = None;

            let (browser, mut handler) = launcher::launch_browser(&self.config).await?;
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            // 等待浏览器状态同步
            sleep(Duration::from_millis(300)).await;
            lifecycle.browser = Some(BrowserHandle {
                browser,
                handler_task,
            });
        }

        // 上下文有效性：不存在，或探测（列出页面）失败，都算失效
        let context_valid = if lifecycle.context.is_none() {
            false
        } else {
            match &lifecycle.browser {
                Some(handle) if handle.is_connected() => handle.browser.pages().await.is_ok(),
                _ => false,
            }
        };

        if !context_valid {
            if lifecycle.context.take().is_some() {
                warn!("[浏览器] 检测到上下文已失效，准备重建...");
            }
            let handle = lifecycle
                .browser
                .as_ref()
                .ok_or_else(|| AppError::BrowserInit("浏览器未启动".to_string()))?;
            let saved = self.store.load().await;
            let context = Self::create_context(&handle.browser, &self.config, saved).await?;
            lifecycle.context = Some(context);
            info!("[浏览器] 浏览器和上下文准备就绪");
        }
        Ok(())
    }

    /// 创建新上下文：清空默认上下文的 Cookie，再用保存的会话播种
    async fn create_context(
        browser: &Browser,
        config: &Config,
        saved: Option<SessionState>,
    ) -> AppResult<SessionContext> {
        info!("[浏览器] 创建浏览器上下文...");
        let bootstrap = browser.new_page("about:blank").await?;
        // 引导页无论播种成败都要关闭
        let seeded = Self::seed_cookies(&bootstrap, &saved).await;
        Self::close_page(bootstrap).await;
        seeded?;

        Ok(SessionContext {
            user_agent: config.user_agent.clone(),
            storage: saved.map(|state| state.storage).unwrap_or_default(),
        })
    }

    /// 清空默认上下文的 Cookie，再写入保存的会话 Cookie
    async fn seed_cookies(bootstrap: &Page, saved: &Option<SessionState>) -> AppResult<()> {
        if let Err(err) = bootstrap.execute(ClearBrowserCookiesParams::default()).await {
            warn!("[浏览器] ⚠️ 清理旧 Cookie 失败: {}", err);
        }
        if let Some(state) = saved {
            let params: Vec<CookieParam> = state
                .cookies
                .iter()
                .filter_map(StoredCookie::to_param)
                .collect();
            if !params.is_empty() {
                let restored = params.len();
                bootstrap.execute(SetCookiesParams::new(params)).await?;
                info!("[浏览器] 已恢复 {} 条 Cookie", restored);
            }
        }
        Ok(())
    }

    /// 尽力关闭全部句柄并置空
    async fn teardown_locked(lifecycle: &mut Lifecycle) {
        lifecycle.context = None;
        if let Some(handle) = lifecycle.browser.take() {
            Self::close_browser(handle).await;
        }
    }

    async fn close_browser(mut handle: BrowserHandle) {
        if let Err(err) = handle.browser.close().await {
            warn!("[浏览器] ⚠️ 关闭浏览器失败: {}", err);
        }
        handle.handler_task.abort();
    }

    async fn close_page(page: Page) {
        if let Err(err) = page.close().await {
            warn!("[页面管理] ⚠️ 关闭页面时出错: {}", err);
        }
    }

    // ========== 页面代理 ==========

    /// 在一个受管理的临时页面上执行操作
    ///
    /// 页面在操作结束后必定被关闭（包括操作抛错的情况）；关闭失败只
    /// 记日志不向上传播。`ensure_ready` 失败时不会创建页面，错误原样
    /// 透出。
    pub async fn with_page<F, Fut, T>(&self, operation: F) -> AppResult<T>
    where
        F: FnOnce(Page) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.ensure_ready().await?;
        let page = self.create_page().await?;
        let result = operation(page.clone()).await;
        if let Err(err) = page.close().await {
            warn!("[页面管理] ⚠️ 关闭页面时出错: {}", err);
        } else {
            debug!("[页面管理] 临时页面已关闭");
        }
        result
    }

    /// 创建并配置一个新页面（UA 覆盖、存储播种、站点钩子、崩溃观察）
    async fn create_page(&self) -> AppResult<Page> {
        let (page, user_agent, storage) = {
            let lifecycle = self.lifecycle.lock().await;
            let handle = lifecycle
                .browser
                .as_ref()
                .ok_or_else(|| AppError::BrowserInit("浏览器未初始化".to_string()))?;
            let context = lifecycle
                .context
                .as_ref()
                .ok_or_else(|| AppError::BrowserInit("浏览器上下文未初始化".to_string()))?;
            let page = handle.browser.new_page("about:blank").await?;
            (page, context.user_agent.clone(), context.storage.clone())
        };

        match self.configure_page(&page, &user_agent, &storage).await {
            Ok(()) => Ok(page),
            Err(err) => {
                Self::close_page(page).await;
                Err(err)
            }
        }
    }

    async fn configure_page(
        &self,
        page: &Page,
        user_agent: &str,
        storage: &HashMap<String, String>,
    ) -> AppResult<()> {
        let ua_params = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(AppError::BrowserInit)?;
        page.set_user_agent(ua_params).await?;

        if !storage.is_empty() {
            let script = storage_seed_script(&self.session_host, storage)?;
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script)
                    .build()
                    .map_err(AppError::BrowserInit)?,
            )
            .await?;
        }

        for script in &self.init_scripts {
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script.clone())
                    .build()
                    .map_err(AppError::BrowserInit)?,
            )
            .await?;
        }

        Self::attach_observers(page).await;
        Ok(())
    }

    /// 页面崩溃/脚本异常只影响当前操作，记下来便于排查
    async fn attach_observers(page: &Page) {
        match page.event_listener::<EventTargetCrashed>().await {
            Ok(mut crashes) => {
                tokio::spawn(async move {
                    while crashes.next().await.is_some() {
                        error!("[页面崩溃] 页面崩溃!");
                    }
                });
            }
            Err(err) => warn!("[页面管理] ⚠️ 注册崩溃监听失败: {}", err),
        }
        match page.event_listener::<EventExceptionThrown>().await {
            Ok(mut exceptions) => {
                tokio::spawn(async move {
                    while let Some(event) = exceptions.next().await {
                        debug!("[页面错误] {}", event.exception_details.text);
                    }
                });
            }
            Err(err) => warn!("[页面管理] ⚠️ 注册页面错误监听失败: {}", err),
        }
    }

    // ========== 扫码登录保留页 ==========

    /// 创建扫码登录保留页
    ///
    /// 已存在的保留页会被确定地替换（旧页面关闭），不会悄悄泄漏。
    pub async fn begin_pending_login(&self) -> AppResult<Page> {
        self.ensure_ready().await?;
        let page = self.create_page().await?;

        let mut pending = self.pending_login.lock().await;
        if let Some(old) = pending.take() {
            info!("[二维码] 收到新的二维码请求，释放旧的登录页面");
            Self::close_page(old.page).await;
        }
        *pending = Some(PendingLogin {
            page: page.clone(),
            state: ScanState::WaitingScan,
            created_at: Instant::now(),
        });
        Ok(page)
    }

    pub async fn pending_login_snapshot(&self) -> Option<PendingSnapshot> {
        self.pending_login
            .lock()
            .await
            .as_ref()
            .map(|pending| PendingSnapshot {
                page: pending.page.clone(),
                state: pending.state,
                created_at: pending.created_at,
            })
    }

    pub async fn set_pending_state(&self, state: ScanState) {
        if let Some(pending) = self.pending_login.lock().await.as_mut() {
            pending.state = state;
        }
    }

    pub async fn release_pending_login(&self, reason: &str) {
        let mut pending = self.pending_login.lock().await;
        if let Some(old) = pending.take() {
            info!("[二维码] 释放登录页面: {}", reason);
            Self::close_page(old.page).await;
        }
    }

    // ========== 会话持久化 ==========

    /// 从页面抓取当前认证状态并写入会话文件
    pub async fn capture_session(&self, page: &Page) -> AppResult<()> {
        let cookies = page.get_cookies().await?;
        let stored: Vec<StoredCookie> = cookies.iter().map(StoredCookie::from_cdp).collect();
        let storage: HashMap<String, String> = page
            .evaluate(LOCAL_STORAGE_SNAPSHOT_SCRIPT)
            .await?
            .into_value()?;

        let state = SessionState {
            cookies: stored,
            storage: storage.clone(),
        };
        self.store.save(&state).await?;

        // 同步到内存中的上下文，让后续新页面带上最新快照
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(context) = lifecycle.context.as_mut() {
            context.storage = storage;
        }
        Ok(())
    }

    // ========== 登录状态 ==========

    pub fn login_status(&self) -> LoginStatus {
        self.login.lock().unwrap().status
    }

    pub fn set_login_status(&self, status: LoginStatus) {
        let mut cell = self.login.lock().unwrap();
        cell.status = status;
        cell.checked_at = Some(Instant::now());
    }

    /// 短 TTL 内的缓存登录状态；未检查过或已过期返回 None
    pub fn cached_login_status(&self, ttl: Duration) -> Option<LoginStatus> {
        let cell = self.login.lock().unwrap();
        match (cell.status, cell.checked_at) {
            (LoginStatus::Unknown, _) => None,
            (status, Some(checked_at)) if checked_at.elapsed() <= ttl => Some(status),
            _ => None,
        }
    }

    // ========== 登出 / 失效 / 关停 ==========

    /// 退出登录：删除会话文件、清空上下文、重置登录态
    pub async fn logout(&self) -> AppResult<()> {
        info!("[登出] 收到退出登录请求");
        self.release_pending_login("用户退出登录").await;
        self.store.clear().await?;

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.context.take().is_some() {
            if let Some(handle) = &lifecycle.browser {
                if handle.is_connected() {
                    match handle.browser.new_page("about:blank").await {
                        Ok(page) => {
                            if let Err(err) =
                                page.execute(ClearBrowserCookiesParams::default()).await
                            {
                                warn!("[登出] ⚠️ 清理 Cookie 失败: {}", err);
                            }
                            Self::close_page(page).await;
                        }
                        Err(err) => warn!("[登出] ⚠️ 清理 Cookie 失败: {}", err),
                    }
                }
            }
            info!("[登出] 浏览器上下文已关闭");
        }
        drop(lifecycle);

        self.set_login_status(LoginStatus::LoggedOut);
        Ok(())
    }

    /// 标记上下文失效，下次 `ensure_ready` 会重建并重新播种，
    /// 登录态回到未知（需要重新探测而不是沿用旧值）
    pub async fn invalidate(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.context = None;
        drop(lifecycle);

        let mut cell = self.login.lock().unwrap();
        cell.status = LoginStatus::Unknown;
        cell.checked_at = None;
    }

    /// 关停：关闭浏览器进程并置空全部句柄
    pub async fn shutdown(&self) {
        info!("[关闭] 关闭浏览器...");
        self.release_pending_login("服务关闭").await;
        let mut lifecycle = self.lifecycle.lock().await;
        Self::teardown_locked(&mut lifecycle).await;
        info!("[关闭] 资源清理完成");
    }

    /// /health 用的浏览器状态
    pub async fn browser_status(&self) -> &'static str {
        let lifecycle = self.lifecycle.lock().await;
        match &lifecycle.browser {
            Some(handle) if handle.is_connected() => "running",
            _ => "stopped",
        }
    }
}

/// 提取 URL 的主机名（不引入完整的 URL 解析）
fn host_of(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// 生成 localStorage 播种脚本，只在目标站点的域下生效
fn storage_seed_script(host: &str, storage: &HashMap<String, String>) -> AppResult<String> {
    let host_json = serde_json::to_string(host)?;
    let data = serde_json::to_string(storage)?;
    Ok(format!(
        r#"(function() {{
    const host = {host_json};
    if (!location.hostname || !location.hostname.includes(host)) return;
    try {{
        const data = {data};
        for (const [key, value] of Object.entries(data)) {{
            localStorage.setItem(key, value);
        }}
    }} catch (e) {{}}
}})();"#
    ))
}

/// localStorage 快照脚本
const LOCAL_STORAGE_SNAPSHOT_SCRIPT: &str = r#"(function() {
    const storage = {};
    try {
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            if (key) {
                storage[key] = localStorage.getItem(key);
            }
        }
    } catch (e) {}
    return storage;
})()"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager_without_browser(dir: &std::path::Path) -> SessionManager {
        let config = Arc::new(Config {
            data_dir: dir.join("data").to_string_lossy().into_owned(),
            ..Config::default()
        });
        let store = SessionStore::new(&config).unwrap();
        SessionManager::new(Arc::clone(&config), store, Vec::new())
    }

    #[tokio::test]
    async fn login_status_starts_unknown_and_cache_respects_ttl() {
        let dir = tempdir().unwrap();
        let manager = manager_without_browser(dir.path());

        assert_eq!(manager.login_status(), LoginStatus::Unknown);
        assert!(manager.cached_login_status(Duration::from_secs(5)).is_none());

        manager.set_login_status(LoginStatus::LoggedIn);
        assert_eq!(
            manager.cached_login_status(Duration::from_secs(5)),
            Some(LoginStatus::LoggedIn)
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            manager
                .cached_login_status(Duration::from_millis(1))
                .is_none(),
            "超过 TTL 的缓存不应再生效"
        );
    }

    #[tokio::test]
    async fn invalidate_resets_login_to_unknown() {
        let dir = tempdir().unwrap();
        let manager = manager_without_browser(dir.path());

        manager.set_login_status(LoginStatus::LoggedIn);
        manager.invalidate().await;

        assert_eq!(manager.login_status(), LoginStatus::Unknown);
        assert!(manager.cached_login_status(Duration::from_secs(5)).is_none());
    }

    #[tokio::test]
    async fn pending_snapshot_is_none_without_qr_request() {
        let dir = tempdir().unwrap();
        let manager = manager_without_browser(dir.path());
        assert!(manager.pending_login_snapshot().await.is_none());
        // 没有保留页时释放是空操作
        manager.release_pending_login("测试").await;
    }

    #[test]
    fn scan_state_terminality() {
        assert!(!ScanState::WaitingScan.is_terminal());
        assert!(!ScanState::ScannedPendingConfirm.is_terminal());
        assert!(ScanState::Succeeded.is_terminal());
        assert!(ScanState::Expired.is_terminal());
        assert!(ScanState::Failed.is_terminal());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://weibo.com"), "weibo.com");
        assert_eq!(host_of("https://weibo.com/home"), "weibo.com");
        assert_eq!(host_of("http://localhost:3000/x"), "localhost:3000");
    }

    #[test]
    fn storage_seed_script_embeds_host_and_data() {
        let storage = HashMap::from([("k".to_string(), "v".to_string())]);
        let script = storage_seed_script("weibo.com", &storage).unwrap();
        assert!(script.contains("\"weibo.com\""));
        assert!(script.contains("localStorage.setItem"));
    }
}
