use std::sync::Arc;

use anyhow::Result;

use weibo_auto_post::browser::SessionManager;
use weibo_auto_post::config::Config;
use weibo_auto_post::logger;
use weibo_auto_post::server::{self, AppState};
use weibo_auto_post::services::{LoginService, PostService, QrLoginService};
use weibo_auto_post::session_store::SessionStore;
use weibo_auto_post::site::{SiteAdapter, WeiboAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init();

    // 加载配置
    let config = Arc::new(Config::from_env());

    // 组装：会话存储 → 站点适配器 → 生命周期管理器 → 业务服务
    let store = SessionStore::new(&config)?;
    let adapter: Arc<dyn SiteAdapter> = Arc::new(WeiboAdapter::new(&config));
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&config),
        store,
        adapter.page_init_scripts(),
    ));

    let state = Arc::new(AppState {
        login: LoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
        qr: QrLoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
        post: PostService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
        manager,
        config,
    });

    // 启动 HTTP 服务，阻塞到退出信号
    server::run(state).await?;

    Ok(())
}
