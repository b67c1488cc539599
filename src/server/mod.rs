//! HTTP 服务层
//!
//! 薄胶水：把各端点映射到业务服务，不包含任何业务逻辑。`/api` 前缀
//! 下的端点走 Bearer Token 鉴权，`/health` 对外开放。

pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::browser::SessionManager;
use crate::config::Config;
use crate::error::AppResult;
use crate::services::{LoginService, PostService, QrLoginService};

/// 请求处理器共享的应用状态
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<SessionManager>,
    pub login: LoginService,
    pub qr: QrLoginService,
    pub post: PostService,
}

pub type SharedState = Arc<AppState>;

/// 组装路由
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/status", get(routes::status))
        .route("/qrcode", get(routes::qrcode))
        .route("/scan-status", get(routes::scan_status))
        .route("/post", post(routes::post_weibo))
        .route("/logout", post(routes::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::authenticate,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(50 * 1024))
        .with_state(state)
}

/// 启动服务并阻塞到退出信号，退出前关闭浏览器
pub async fn run(state: SharedState) -> AppResult<()> {
    let app = build_router(state.clone());
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("[启动] 🚀 服务器运行在端口 {}", state.config.port);
    info!("[启动] 🌐 访问地址: http://localhost:{}", state.config.port);
    info!("[启动] ❤️ 健康检查: http://localhost:{}/health", state.config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("[关闭] 收到退出信号，正在优雅关闭服务器...");
}
