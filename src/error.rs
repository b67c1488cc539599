//! 应用程序错误类型
//!
//! 按失败类别区分错误，重试策略据此决定"重试"还是"直接失败"：
//! 初始化/超时/页面结构类错误允许重试，未登录和参数错误立即失败。

use thiserror::Error;

/// 应用程序错误
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器或上下文初始化失败，需要完整重建后才能恢复
    #[error("浏览器初始化失败: {0}")]
    BrowserInit(String),

    /// 用户未登录（前置条件不满足，重试无意义）
    #[error("用户未登录，请先扫码登录")]
    NotAuthenticated,

    /// 某个步骤超出了等待预算
    #[error("等待 {step} 超时 ({timeout_ms}ms)")]
    OperationTimeout { step: String, timeout_ms: u64 },

    /// 期望的页面元素不存在（页面可能已改版，与瞬时故障难以区分）
    #[error("页面结构不符合预期: {0}")]
    SiteStructure(String),

    /// 站点明确拒绝了发布请求
    #[error("微博发布失败: {0}")]
    PostFailed(String),

    /// 会话文件读写失败
    #[error("会话存储错误: {0}")]
    SessionStore(String),

    /// 请求参数无效
    #[error("参数无效: {0}")]
    InvalidInput(String),

    /// CDP 协议层错误
    #[error("浏览器协议错误: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 解析错误
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// 该错误是否值得重试
    ///
    /// 未登录、参数无效、会话文件损坏属于确定性失败，重试不会改变结果；
    /// 其余错误（超时、协议故障、页面结构变化）按瞬时故障处理。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::NotAuthenticated
                | AppError::InvalidInput(_)
                | AppError::SessionStore(_)
        )
    }

    /// 创建超时错误
    pub fn timeout(step: impl Into<String>, timeout: std::time::Duration) -> Self {
        AppError::OperationTimeout {
            step: step.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
