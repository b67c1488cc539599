//! 真实浏览器集成测试
//!
//! 这些用例需要本机有可用的 Chrome/Chromium，扫码用例还需要人工配合，
//! 默认全部忽略。手动运行：
//!
//! ```text
//! cargo test -- --ignored --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use weibo_auto_post::browser::{LoginStatus, SessionManager};
use weibo_auto_post::config::Config;
use weibo_auto_post::error::{AppError, AppResult};
use weibo_auto_post::logger;
use weibo_auto_post::services::{LoginService, PostService, QrLoginService};
use weibo_auto_post::session_store::SessionStore;
use weibo_auto_post::site::{SiteAdapter, WeiboAdapter};

fn build_manager() -> (Arc<Config>, Arc<SessionManager>, Arc<dyn SiteAdapter>) {
    let config = Arc::new(Config::from_env());
    let store = SessionStore::new(&config).expect("创建会话存储失败");
    let adapter: Arc<dyn SiteAdapter> = Arc::new(WeiboAdapter::new(&config));
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&config),
        store,
        adapter.page_init_scripts(),
    ));
    (config, manager, adapter)
}

#[tokio::test]
#[ignore] // 需要可用的浏览器
async fn ensure_ready_is_idempotent() {
    logger::init();
    let (_config, manager, _adapter) = build_manager();

    manager.ensure_ready().await.expect("初始化浏览器失败");
    manager.ensure_ready().await.expect("重复初始化应该成功");
    assert_eq!(manager.browser_status().await, "running");

    manager.shutdown().await;
    assert_eq!(manager.browser_status().await, "stopped");
}

#[tokio::test]
#[ignore] // 需要可用的浏览器
async fn page_failure_does_not_break_the_shared_context() {
    logger::init();
    let (_config, manager, _adapter) = build_manager();

    // 操作内抛错，页面会被关闭，但上下文保持可用
    let result: AppResult<()> = manager
        .with_page(|_page| async { Err(AppError::SiteStructure("模拟操作失败".to_string())) })
        .await;
    assert!(result.is_err());

    let url = manager
        .with_page(|page| async move { Ok(page.url().await?.unwrap_or_default()) })
        .await
        .expect("后续页面操作应该成功");
    assert!(url.is_empty() || url.contains("about:blank"));

    manager.shutdown().await;
}

#[tokio::test]
#[ignore] // 需要可用的浏览器
async fn context_recovers_after_invalidate() {
    logger::init();
    let (_config, manager, _adapter) = build_manager();

    manager.ensure_ready().await.expect("初始化浏览器失败");
    manager.invalidate().await;
    assert_eq!(manager.login_status(), LoginStatus::Unknown);

    // 重建后上下文会重新从会话文件播种
    manager.ensure_ready().await.expect("重建上下文失败");
    assert_eq!(manager.browser_status().await, "running");

    manager.shutdown().await;
}

#[tokio::test]
#[ignore] // 需要可用的浏览器和外网
async fn check_login_status_against_real_site() {
    logger::init();
    let (config, manager, adapter) = build_manager();
    let login = LoginService::new(&config, Arc::clone(&manager), adapter);

    let logged_in = login.check_login_status().await.expect("登录检查失败");
    println!("当前登录状态: {}", logged_in);

    manager.shutdown().await;
}

#[tokio::test]
#[ignore] // 需要人工扫码配合
async fn qr_login_then_post_end_to_end() {
    logger::init();
    let (config, manager, adapter) = build_manager();
    let login = LoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter));
    let qr = QrLoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter));
    let post = PostService::new(&config, Arc::clone(&manager), Arc::clone(&adapter));

    if !login.check_login_status().await.expect("登录检查失败") {
        let qr_url = qr.fetch_qr_code().await.expect("获取二维码失败");
        println!("请用微博APP扫码登录（二维码地址前 80 字符）: {:.80}", qr_url);

        let mut logged_in = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let report = qr.check_scan_status().await.expect("扫码状态检查失败");
            println!("扫码状态: {} - {}", report.status, report.message);
            match report.status {
                "success" => {
                    logged_in = true;
                    break;
                }
                "error" => panic!("扫码登录失败: {}", report.message),
                _ => {}
            }
        }
        assert!(logged_in, "扫码登录超时");

        // 登录成功后会话文件应包含非空 Cookie
        let state = manager.store().load().await.expect("会话文件缺失");
        assert!(!state.cookies.is_empty(), "会话文件里应有 Cookie");
    }

    let outcome = post.post_status("hello world").await.expect("发布失败");
    assert!(!outcome.post_id.is_empty(), "应返回新微博的 ID");
    println!("✅ 发布成功: {}", outcome.post_id);

    manager.shutdown().await;
}
