//! 站点适配层
//!
//! 所有依赖微博页面结构的操作都收敛在这一层，核心流程只通过
//! [`SiteAdapter`] 的能力接口访问站点，选择器变化不影响生命周期管理。

pub mod selectors;
pub mod weibo;

use async_trait::async_trait;
use chromiumoxide::Page;

use crate::error::AppResult;

pub use selectors::SelectorChain;
pub use weibo::WeiboAdapter;

/// 扫码状态探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanProbe {
    /// 已跳转回主站，登录成功
    Succeeded,
    /// 等待扫码（附页面上的提示文案）
    Waiting(String),
    /// 已扫码，等待手机端确认
    PendingConfirm(String),
    /// 页面给出了明确的失败文案
    Failed(String),
    /// 二维码已失效
    Expired,
}

/// 发布成功后的回执
#[derive(Debug, Clone)]
pub struct PostReceipt {
    /// 服务端返回的新微博 ID
    pub post_id: String,
    /// 服务端回显的正文（可能经过规范化）
    pub content: String,
}

/// 站点能力接口
///
/// 每个操作自己负责导航到需要的页面；`submit_post` 例外，它假定调用方
/// 已经验证过登录态并停留在主页（避免一次发布里重复导航两趟）。
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// 新页面创建时需要注入的初始化脚本（例如发布响应捕获钩子）
    fn page_init_scripts(&self) -> Vec<String> {
        Vec::new()
    }

    /// 导航到主页并探测登录标记。"未登录"是正常结果而不是错误。
    async fn detect_logged_in(&self, page: &Page) -> AppResult<bool>;

    /// 导航到扫码登录入口并提取二维码图片地址
    async fn request_qr_code(&self, page: &Page) -> AppResult<String>;

    /// 在已保留的登录页上探测一次扫码进度
    async fn poll_scan_state(&self, page: &Page) -> AppResult<ScanProbe>;

    /// 在主页上完成一次发布（填写、等待按钮可用、提交、确认服务端响应）
    async fn submit_post(&self, page: &Page, content: &str) -> AppResult<PostReceipt>;
}
