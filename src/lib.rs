//! # Weibo Auto Post
//!
//! 通过无头浏览器自动化微博扫码登录与发布的 HTTP 服务
//!
//! ## 架构设计
//!
//! 自下而上分四层：
//!
//! ### ① 浏览器基础设施层（browser/）
//! - 持有唯一的浏览器进程和浏览上下文，负责启动、探活、重建、关停
//! - `SessionManager` - 生命周期管理 + 页面代理（每个操作一个短命页面）
//!
//! ### ② 站点适配层（site/）
//! - 所有微博页面结构相关的探测和操作，选择器按候选链组织
//! - `SiteAdapter` - 能力接口（登录探测 / 二维码 / 扫码轮询 / 发布）
//!
//! ### ③ 业务服务层（services/）
//! - `LoginService` - 登录状态检查与登出
//! - `QrLoginService` - 扫码登录状态机
//! - `PostService` - 发布微博（发布前重新验证登录态）
//!
//! ### ④ HTTP 层（server/）
//! - axum 路由 + Bearer Token 鉴权，只做请求/响应映射
//!
//! 横切模块：`config`（环境变量配置）、`error`（错误分类）、
//! `executor`（有界重试）、`session_store`（会话持久化）。

pub mod browser;
pub mod config;
pub mod error;
pub mod executor;
pub mod logger;
pub mod server;
pub mod services;
pub mod session_store;
pub mod site;

// 重新导出常用类型
pub use browser::{LoginStatus, ScanState, SessionManager};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use executor::RetryPolicy;
pub use services::{LoginService, PostOutcome, PostService, QrLoginService, ScanReport};
pub use session_store::{SessionState, SessionStore, StoredCookie};
pub use site::{PostReceipt, ScanProbe, SiteAdapter, WeiboAdapter};
