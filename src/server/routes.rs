//! 端点处理器
//!
//! 错误映射规则：参数校验失败返回 400，鉴权失败返回 401，其余错误
//! 一律 500 并把错误信息作为 `error` 字段返回。

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::browser::LoginStatus;
use crate::error::AppError;

use super::SharedState;

/// Bearer Token 鉴权中间件
pub async fn authenticate(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match token {
        Some(token) if token == state.config.auth_token => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "未经授权：Token 无效或缺失" })),
        )
            .into_response(),
    }
}

fn error_response(err: &AppError) -> Response {
    let status = match err {
        AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// GET /api/status
pub async fn status(State(state): State<SharedState>) -> Response {
    info!("[API] 收到登录状态检查请求");
    match state.login.check_login_status().await {
        Ok(is_logged_in) => Json(json!({ "isLoggedIn": is_logged_in })).into_response(),
        Err(err) => {
            error!("[API] 状态检查 API 错误: {}", err);
            error_response(&err)
        }
    }
}

/// GET /api/qrcode
pub async fn qrcode(State(state): State<SharedState>) -> Response {
    info!("[API] 收到获取二维码请求");
    match state.qr.fetch_qr_code().await {
        Ok(qr_code_url) => Json(json!({ "qrCodeUrl": qr_code_url })).into_response(),
        Err(err) => {
            error!("[API] 二维码 API 错误: {}", err);
            error_response(&err)
        }
    }
}

/// GET /api/scan-status
pub async fn scan_status(State(state): State<SharedState>) -> Response {
    match state.qr.check_scan_status().await {
        Ok(report) => Json(json!({
            "status": report.status,
            "message": report.message,
        }))
        .into_response(),
        Err(err) => {
            error!("[API] 扫码状态 API 错误: {}", err);
            error_response(&err)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub content: Option<String>,
}

/// POST /api/post
pub async fn post_weibo(
    State(state): State<SharedState>,
    Json(body): Json<PostRequest>,
) -> Response {
    info!("[API] ========== 收到发送微博请求 ==========");
    let content = body.content.unwrap_or_default();

    if let Err(err) = state.post.validate_content(&content) {
        return error_response(&err);
    }

    match state.post.post_status(&content).await {
        Ok(outcome) => {
            info!("[API] ✅ 微博发送API处理完成");
            Json(json!({
                "success": true,
                "message": "微博发送成功",
                "postId": outcome.post_id,
                "content": outcome.content,
            }))
            .into_response()
        }
        Err(err) => {
            error!("[API] ❌ 发送微博 API 错误: {}", err);
            error_response(&err)
        }
    }
}

/// POST /api/logout
pub async fn logout(State(state): State<SharedState>) -> Response {
    match state.login.logout().await {
        Ok(()) => Json(json!({ "success": true, "message": "退出登录成功" })).into_response(),
        Err(err) => {
            error!("[API] 退出登录 API 错误: {}", err);
            error_response(&err)
        }
    }
}

/// GET /health（无鉴权）
pub async fn health(State(state): State<SharedState>) -> Response {
    let health_info = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "isLoggedIn": state.manager.login_status() == LoginStatus::LoggedIn,
        "browserStatus": state.manager.browser_status().await,
    });
    info!("[健康检查] {}", health_info);
    Json(health_info).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SessionManager;
    use crate::config::Config;
    use crate::server::{build_router, AppState};
    use crate::services::{LoginService, PostService, QrLoginService};
    use crate::session_store::SessionStore;
    use crate::site::{SiteAdapter, WeiboAdapter};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_router(dir: &std::path::Path) -> axum::Router {
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
        let state = Arc::new(AppState {
            login: LoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
            qr: QrLoginService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
            post: PostService::new(&config, Arc::clone(&manager), Arc::clone(&adapter)),
            manager,
            config,
        });
        build_router(state)
    }

    #[tokio::test]
    async fn health_is_open_and_reports_stopped_browser() {
        let dir = tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["browserStatus"], "stopped");
        assert_eq!(body["isLoggedIn"], false);
    }

    #[tokio::test]
    async fn api_requires_bearer_token() {
        let dir = tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/scan-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let dir = tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/scan-status")
                    .header(header::AUTHORIZATION, "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_post_content_is_a_validation_failure() {
        let dir = tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/api/post")
                    .header(header::AUTHORIZATION, "Bearer weibo-proxy")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"content":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("内容不能为空"));
    }

    #[tokio::test]
    async fn scan_status_without_qr_request_is_a_400() {
        let dir = tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/scan-status")
                    .header(header::AUTHORIZATION, "Bearer weibo-proxy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
