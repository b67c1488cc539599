//! 微博站点适配器
//!
//! 登录检测、二维码提取、扫码进度探测、发布提交的具体 DOM 操作都在
//! 这里。所有探测通过注入 JS 完成，候选选择器按历史版本整理成链，
//! 改版后只需要在链上追加新选择器。

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::Page;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

use super::selectors::SelectorChain;
use super::{PostReceipt, ScanProbe, SiteAdapter};

/// 发布接口响应捕获钩子写入的全局变量名
const POST_CAPTURE_BUCKET: &str = "__wbPostResponses";

/// 发布确认接口的 URL 特征
const POST_CONFIRM_URL: &str = "/ajax/statuses/update";

/// 轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 微博适配器
#[derive(Debug)]
pub struct WeiboAdapter {
    home_url: String,
    login_url: String,
    navigation_timeout: Duration,
    selector_timeout: Duration,
    login_probe_timeout: Duration,
    post_response_timeout: Duration,
    http: reqwest::Client,
    login_markers: SelectorChain,
    qr_images: SelectorChain,
    composer: SelectorChain,
}

impl WeiboAdapter {
    pub fn new(config: &Config) -> Self {
        Self {
            home_url: config.weibo_home_url.clone(),
            login_url: config.weibo_login_url.clone(),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            selector_timeout: Duration::from_secs(config.selector_timeout_secs),
            login_probe_timeout: Duration::from_secs(config.login_probe_timeout_secs),
            post_response_timeout: Duration::from_secs(config.post_response_timeout_secs),
            http: reqwest::Client::new(),
            login_markers: SelectorChain::new(
                "登录标记",
                vec![
                    "button[title=\"发微博\"]",
                    ".gn_name",
                    ".UserName",
                    "[node-type=\"username\"]",
                ],
            ),
            qr_images: SelectorChain::new(
                "二维码图片",
                vec![
                    "img[src*=\"qr.weibo.cn\"]",
                    ".qrcode_img img",
                    ".login_qrcode img",
                    ".code_box img",
                    "img[src*=\"qrcode\"]",
                ],
            ),
            composer: SelectorChain::new(
                "发布框",
                vec![
                    "textarea[placeholder=\"有什么新鲜事想分享给大家？\"]",
                    "textarea[placeholder*=\"新鲜事\"]",
                    "textarea[node-type=\"text\"]",
                ],
            ),
        }
    }

    /// 带超时的导航，超时按操作超时处理
    async fn goto(&self, page: &Page, url: &str) -> AppResult<()> {
        debug!("导航到: {}", url);
        let navigation = tokio::time::timeout(self.navigation_timeout, async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<(), AppError>(())
        })
        .await;
        match navigation {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(
                format!("导航到 {}", url),
                self.navigation_timeout,
            )),
        }
    }

    /// 把相对/协议相对的二维码地址补成完整 URL
    fn normalize_qr_url(&self, src: &str) -> String {
        if src.starts_with("//") {
            format!("https:{}", src)
        } else if src.starts_with('/') {
            format!("{}{}", self.home_url.trim_end_matches('/'), src)
        } else {
            src.to_string()
        }
    }

    /// 把二维码图片下载并内联成 data URI
    ///
    /// 微博的二维码图片地址带防盗链限制，前端直接引用可能加载失败，
    /// 内联后客户端不再依赖原始地址。失败时退回原始 URL。
    async fn inline_as_data_uri(&self, url: &str) -> Option<String> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await.ok()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Some(format!("data:{};base64,{}", content_type, encoded))
    }

    /// 填写发布框并触发 input 事件（微博前端靠它启用发送按钮）
    async fn fill_composer(&self, page: &Page, selector: &str, content: &str) -> AppResult<()> {
        let script = format!(
            r#"(function() {{
    const el = document.querySelector({selector});
    if (!el) return {{ ok: false, error: '发布框不存在' }};
    el.focus();
    el.value = {content};
    el.dispatchEvent(new Event('input', {{ bubbles: true, cancelable: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return {{ ok: true, error: null }};
}})()"#,
            selector = json!(selector),
            content = json!(content),
        );
        let result: FillResult = page.evaluate(script).await?.into_value()?;
        if !result.ok {
            return Err(AppError::SiteStructure(
                result.error.unwrap_or_else(|| "填写发布框失败".to_string()),
            ));
        }
        Ok(())
    }

    /// 等待发送按钮出现并变为可用（站点有输入校验的防抖延迟）
    async fn wait_send_button_enabled(&self, page: &Page) -> AppResult<()> {
        let deadline = Instant::now() + self.selector_timeout;
        let mut seen_button = false;
        loop {
            let state: SendButtonState = page
                .evaluate(SEND_BUTTON_PROBE_SCRIPT)
                .await?
                .into_value()?;
            if state.present {
                seen_button = true;
                if state.enabled {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return if seen_button {
                    Err(AppError::timeout("发送按钮可用", self.selector_timeout))
                } else {
                    Err(AppError::SiteStructure("未找到发送按钮".to_string()))
                };
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 清空捕获缓冲并点击发送按钮
    async fn click_send_button(&self, page: &Page) -> AppResult<()> {
        let script = format!(
            r#"(function() {{
    if (window.{bucket}) window.{bucket}.length = 0;
    const candidates = Array.from(document.querySelectorAll('button'));
    const target = candidates.find((btn) => (btn.textContent || '').trim() === '发送' && !btn.disabled);
    if (!target) return false;
    target.click();
    return true;
}})()"#,
            bucket = POST_CAPTURE_BUCKET,
        );
        let clicked: bool = page.evaluate(script).await?.into_value()?;
        if !clicked {
            return Err(AppError::SiteStructure("点击发送按钮失败".to_string()));
        }
        Ok(())
    }

    /// 等待页面钩子捕获到发布接口的响应
    async fn await_post_confirmation(&self, page: &Page) -> AppResult<CapturedResponse> {
        let script = format!(
            r#"(function() {{
    const bucket = window.{bucket};
    if (!bucket || !bucket.length) return null;
    return bucket[bucket.length - 1];
}})()"#,
            bucket = POST_CAPTURE_BUCKET,
        );
        let deadline = Instant::now() + self.post_response_timeout;
        loop {
            let captured: Option<CapturedResponse> =
                page.evaluate(script.clone()).await?.into_value()?;
            if let Some(captured) = captured {
                return Ok(captured);
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout("发布接口响应", self.post_response_timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 解析发布接口响应
    fn parse_post_confirmation(
        captured: CapturedResponse,
        content: &str,
    ) -> AppResult<PostReceipt> {
        if let Some(status) = captured.status {
            if status != 200 {
                return Err(AppError::PostFailed(format!("接口返回状态 {}", status)));
            }
        }
        let body = captured
            .body
            .ok_or_else(|| AppError::PostFailed("接口响应不是合法 JSON".to_string()))?;
        let ok = body.get("ok").and_then(|value| value.as_i64()).unwrap_or(0);
        if ok != 1 {
            let message = body
                .get("msg")
                .and_then(|value| value.as_str())
                .unwrap_or("未知错误");
            return Err(AppError::PostFailed(format!("接口返回失败: {}", message)));
        }
        let data = body.get("data");
        let post_id = data
            .and_then(|data| data.get("idstr"))
            .and_then(|value| value.as_str().map(str::to_string))
            .or_else(|| {
                data.and_then(|data| data.get("id"))
                    .and_then(|value| value.as_i64())
                    .map(|id| id.to_string())
            })
            .ok_or_else(|| AppError::PostFailed("接口未返回微博ID".to_string()))?;
        let normalized = data
            .and_then(|data| data.get("text_raw"))
            .and_then(|value| value.as_str())
            .unwrap_or(content)
            .to_string();
        Ok(PostReceipt {
            post_id,
            content: normalized,
        })
    }
}

#[async_trait]
impl SiteAdapter for WeiboAdapter {
    fn page_init_scripts(&self) -> Vec<String> {
        vec![post_capture_hook()]
    }

    async fn detect_logged_in(&self, page: &Page) -> AppResult<bool> {
        info!("[登录检查] 检查登录状态");
        self.goto(page, &self.home_url).await?;
        match self.login_markers.wait(page, self.login_probe_timeout).await {
            Ok(selector) => {
                info!("[登录检查] ✅ 用户已登录 (命中 {})", selector);
                Ok(true)
            }
            Err(AppError::OperationTimeout { .. }) => {
                info!("[登录检查] ❌ 用户未登录");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn request_qr_code(&self, page: &Page) -> AppResult<String> {
        info!("[二维码] 获取二维码");
        self.goto(page, &self.login_url).await?;
        let src = self
            .qr_images
            .wait_attribute(page, "src", self.selector_timeout)
            .await
            .map_err(|err| match err {
                AppError::OperationTimeout { .. } => {
                    AppError::SiteStructure("登录页上未找到二维码".to_string())
                }
                other => other,
            })?;
        let url = self.normalize_qr_url(&src);
        if url.starts_with("data:") {
            info!("[二维码] ✅ 二维码获取成功 (data URI)");
            return Ok(url);
        }
        match self.inline_as_data_uri(&url).await {
            Some(data_uri) => {
                info!("[二维码] ✅ 二维码获取成功，已内联为 data URI");
                Ok(data_uri)
            }
            None => {
                warn!("[二维码] ⚠️ 二维码图片下载失败，返回原始地址");
                Ok(url)
            }
        }
    }

    async fn poll_scan_state(&self, page: &Page) -> AppResult<ScanProbe> {
        let current_url = page.url().await?.unwrap_or_default();
        debug!("[扫码状态] 当前页面URL: {}", current_url);
        if current_url.contains("weibo.com") && !current_url.contains("passport") {
            return Ok(ScanProbe::Succeeded);
        }

        let raw: ScanProbeRaw = page.evaluate(SCAN_PROBE_SCRIPT).await?.into_value()?;
        let probe = match raw.kind.as_str() {
            "error" => ScanProbe::Failed(
                raw.message.unwrap_or_else(|| "扫码登录失败".to_string()),
            ),
            "expired" => ScanProbe::Expired,
            "confirm" => ScanProbe::PendingConfirm(
                raw.message
                    .unwrap_or_else(|| "扫描成功，请在手机上确认登录".to_string()),
            ),
            _ => ScanProbe::Waiting(raw.message.unwrap_or_else(|| "等待扫码".to_string())),
        };
        Ok(probe)
    }

    async fn submit_post(&self, page: &Page, content: &str) -> AppResult<PostReceipt> {
        info!("[发送微博] 等待发布框加载...");
        let composer_selector = self
            .composer
            .wait(page, self.selector_timeout)
            .await
            .map_err(|err| match err {
                AppError::OperationTimeout { .. } => {
                    AppError::SiteStructure("未找到发布框，页面可能已更新".to_string())
                }
                other => other,
            })?;

        info!("[发送微博] 清空并输入内容...");
        self.fill_composer(page, &composer_selector, content).await?;

        info!("[发送微博] 等待发送按钮可用...");
        self.wait_send_button_enabled(page).await?;

        info!("[发送微博] 点击发送按钮并等待响应...");
        self.click_send_button(page).await?;
        let captured = self.await_post_confirmation(page).await?;

        let receipt = Self::parse_post_confirmation(captured, content)?;
        info!("[发送微博] ✅ 微博发送成功 (id: {})", receipt.post_id);
        Ok(receipt)
    }
}

#[derive(Debug, Deserialize)]
struct FillResult {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendButtonState {
    present: bool,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CapturedResponse {
    status: Option<i64>,
    body: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ScanProbeRaw {
    kind: String,
    message: Option<String>,
}

/// 扫码进度探测脚本
///
/// 依次检查：明确的错误文案 → 过期提示 → 已扫码待确认 → 等待中。
const SCAN_PROBE_SCRIPT: &str = r#"(function() {
    const error = document.querySelector('.txt_red');
    if (error && error.textContent && error.textContent.trim()) {
        return { kind: 'error', message: error.textContent.trim() };
    }
    const body = document.body ? document.body.innerText : '';
    if (body.includes('二维码已失效') || body.includes('二维码已过期')) {
        return { kind: 'expired', message: null };
    }
    const hints = Array.from(document.querySelectorAll('.txt'));
    for (const hint of hints) {
        const text = (hint.textContent || '').trim();
        if (!text) continue;
        if (text.includes('扫描成功') || text.includes('请确认')) {
            return { kind: 'confirm', message: '扫描成功，请在手机上确认登录' };
        }
        if (text.includes('等待') || text.includes('扫描')) {
            return { kind: 'waiting', message: text };
        }
    }
    return { kind: 'waiting', message: null };
})()"#;

/// 发送按钮探测脚本：微博的发送按钮没有稳定 id，按文案匹配
const SEND_BUTTON_PROBE_SCRIPT: &str = r#"(function() {
    const candidates = Array.from(document.querySelectorAll('button'));
    const target = candidates.find((btn) => (btn.textContent || '').trim() === '发送');
    if (!target) return { present: false, enabled: false };
    return { present: true, enabled: !target.disabled };
})()"#;

/// 生成发布响应捕获钩子
///
/// 在每个新文档里包一层 fetch/XHR，把发布接口的响应体存进页面全局
/// 数组，提交后轮询该数组即可拿到服务端确认结果。
fn post_capture_hook() -> String {
    format!(
        r#"(() => {{
    const bucket = [];
    try {{
        Object.defineProperty(window, '{bucket}', {{
            value: bucket,
            writable: false,
            configurable: false,
        }});
    }} catch (_) {{
        return;
    }}
    const matches = (url) => String(url || '').includes('{confirm_url}');
    const push = (entry) => {{ try {{ bucket.push(entry); }} catch (_) {{}} }};

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {{
        const response = await originalFetch(...args);
        try {{
            const request = args[0];
            const url = typeof request === 'string' ? request : request.url;
            if (matches(url)) {{
                response.clone().json()
                    .then((body) => push({{ url: String(url), status: response.status, body: body }}))
                    .catch(() => push({{ url: String(url), status: response.status, body: null }}));
            }}
        }} catch (_) {{}}
        return response;
    }};

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {{
        const xhr = new OriginalXHR();
        let url = '';
        const open = xhr.open;
        xhr.open = function(method, target) {{
            url = target || '';
            return open.apply(xhr, arguments);
        }};
        xhr.addEventListener('loadend', function() {{
            if (!matches(url)) return;
            let body = null;
            try {{ body = JSON.parse(xhr.responseText); }} catch (_) {{}}
            push({{ url: String(url), status: xhr.status, body: body }});
        }});
        return xhr;
    }};
}})();"#,
        bucket = POST_CAPTURE_BUCKET,
        confirm_url = POST_CONFIRM_URL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> WeiboAdapter {
        WeiboAdapter::new(&Config::default())
    }

    #[test]
    fn qr_url_normalization() {
        let adapter = adapter();
        assert_eq!(
            adapter.normalize_qr_url("//qr.weibo.cn/abc"),
            "https://qr.weibo.cn/abc"
        );
        assert_eq!(
            adapter.normalize_qr_url("/qrcode/xyz"),
            "https://weibo.com/qrcode/xyz"
        );
        assert_eq!(
            adapter.normalize_qr_url("https://qr.weibo.cn/abc"),
            "https://qr.weibo.cn/abc"
        );
    }

    #[test]
    fn post_confirmation_success_extracts_id_and_text() {
        let captured = CapturedResponse {
            status: Some(200),
            body: Some(serde_json::json!({
                "ok": 1,
                "data": { "idstr": "500123", "text_raw": "hello world" }
            })),
        };
        let receipt = WeiboAdapter::parse_post_confirmation(captured, "hello world").unwrap();
        assert_eq!(receipt.post_id, "500123");
        assert_eq!(receipt.content, "hello world");
    }

    #[test]
    fn post_confirmation_falls_back_to_numeric_id_and_original_content() {
        let captured = CapturedResponse {
            status: Some(200),
            body: Some(serde_json::json!({
                "ok": 1,
                "data": { "id": 500124 }
            })),
        };
        let receipt = WeiboAdapter::parse_post_confirmation(captured, "原始内容").unwrap();
        assert_eq!(receipt.post_id, "500124");
        assert_eq!(receipt.content, "原始内容");
    }

    #[test]
    fn post_confirmation_rejection_carries_server_message() {
        let captured = CapturedResponse {
            status: Some(200),
            body: Some(serde_json::json!({ "ok": 0, "msg": "内容重复" })),
        };
        let err = WeiboAdapter::parse_post_confirmation(captured, "x").unwrap_err();
        match err {
            AppError::PostFailed(message) => assert!(message.contains("内容重复")),
            other => panic!("意外的错误类型: {other:?}"),
        }
    }

    #[test]
    fn post_confirmation_non_200_status_fails() {
        let captured = CapturedResponse {
            status: Some(502),
            body: None,
        };
        let err = WeiboAdapter::parse_post_confirmation(captured, "x").unwrap_err();
        assert!(matches!(err, AppError::PostFailed(_)));
    }

    #[test]
    fn capture_hook_targets_confirm_url() {
        let hook = post_capture_hook();
        assert!(hook.contains(POST_CONFIRM_URL));
        assert!(hook.contains(POST_CAPTURE_BUCKET));
    }
}
