//! 浏览器基础设施层
//!
//! 持有浏览器进程和上下文这两个稀缺资源，向上只暴露"拿一个页面干活"
//! 的能力，不认识任何站点细节。

pub mod launcher;
pub mod manager;

pub use manager::{LoginStatus, PendingSnapshot, ScanState, SessionManager};
