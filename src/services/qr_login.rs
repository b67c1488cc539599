//! 扫码登录流程
//!
//! 两步：先请求二维码（在生命周期管理器里保留登录页，后续轮询复用
//! 同一个页面，保住页面侧的登录流程状态），再反复轮询扫码进度。
//! 到达终态（成功/过期/失败）后保留页被释放，继续轮询会得到确定的
//! 错误，不会再悄悄回到"等待扫码"。
//!
//! 状态机自身不限制轮询时长，过期界限由配置的二维码有效期给出。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::{LoginStatus, ScanState, SessionManager};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::executor::RetryPolicy;
use crate::site::{ScanProbe, SiteAdapter};

/// 扫码进度报告（HTTP 层直接照此返回）
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// "waiting" / "success" / "error"
    pub status: &'static str,
    pub message: String,
}

pub struct QrLoginService {
    manager: Arc<SessionManager>,
    adapter: Arc<dyn SiteAdapter>,
    retry: RetryPolicy,
    qr_expiry: Duration,
}

impl QrLoginService {
    pub fn new(
        config: &Config,
        manager: Arc<SessionManager>,
        adapter: Arc<dyn SiteAdapter>,
    ) -> Self {
        Self {
            manager,
            adapter,
            retry: RetryPolicy::from_config(config),
            qr_expiry: Duration::from_secs(config.qr_expiry_secs),
        }
    }

    /// 请求新的二维码
    ///
    /// 已有未完成的扫码流程时旧的保留页会被确定地替换掉。
    pub async fn fetch_qr_code(&self) -> AppResult<String> {
        let manager = Arc::clone(&self.manager);
        let adapter = Arc::clone(&self.adapter);
        self.retry
            .run("获取二维码", move |_| {
                let manager = Arc::clone(&manager);
                let adapter = Arc::clone(&adapter);
                async move {
                    let page = manager.begin_pending_login().await?;
                    match adapter.request_qr_code(&page).await {
                        Ok(url) => Ok(url),
                        Err(err) => {
                            manager.release_pending_login("获取二维码失败").await;
                            Err(err)
                        }
                    }
                }
            })
            .await
    }

    /// 轮询一次扫码进度
    pub async fn check_scan_status(&self) -> AppResult<ScanReport> {
        let Some(pending) = self.manager.pending_login_snapshot().await else {
            return Err(AppError::InvalidInput(
                "尚未获取二维码，请先请求二维码".to_string(),
            ));
        };

        if pending.state.is_terminal() {
            self.manager.release_pending_login("扫码流程已结束").await;
            return Err(AppError::InvalidInput(
                "扫码流程已结束，请重新获取二维码".to_string(),
            ));
        }

        if pending.created_at.elapsed() >= self.qr_expiry {
            info!("[扫码状态] ⏰ 二维码已过期");
            self.manager.set_pending_state(ScanState::Expired).await;
            self.manager.release_pending_login("二维码已过期").await;
            return Ok(ScanReport {
                status: "error",
                message: "二维码已过期，请刷新".to_string(),
            });
        }

        let probe = match self.adapter.poll_scan_state(&pending.page).await {
            Ok(probe) => probe,
            Err(err) => {
                // 保留页已经坏掉，继续轮询没有意义
                self.manager.release_pending_login("扫码状态检查失败").await;
                return Err(err);
            }
        };

        Ok(match probe {
            ScanProbe::Succeeded => {
                info!("[扫码状态] ✅ 用户扫码登录成功！");
                self.manager.set_pending_state(ScanState::Succeeded).await;
                self.manager.set_login_status(LoginStatus::LoggedIn);
                if let Err(err) = self.manager.capture_session(&pending.page).await {
                    warn!("[会话] ⚠️ 保存会话失败: {}", err);
                }
                self.manager.release_pending_login("登录成功").await;
                ScanReport {
                    status: "success",
                    message: "登录成功".to_string(),
                }
            }
            ScanProbe::Failed(message) => {
                warn!("[扫码状态] ❌ 扫码登录失败: {}", message);
                self.manager.set_pending_state(ScanState::Failed).await;
                self.manager.release_pending_login("扫码登录失败").await;
                ScanReport {
                    status: "error",
                    message,
                }
            }
            ScanProbe::Expired => {
                info!("[扫码状态] ⏰ 二维码已过期");
                self.manager.set_pending_state(ScanState::Expired).await;
                self.manager.release_pending_login("二维码已过期").await;
                ScanReport {
                    status: "error",
                    message: "二维码已过期，请刷新".to_string(),
                }
            }
            ScanProbe::PendingConfirm(message) => {
                info!("[扫码状态] 📱 用户已扫码，等待确认");
                self.manager
                    .set_pending_state(ScanState::ScannedPendingConfirm)
                    .await;
                ScanReport {
                    status: "waiting",
                    message,
                }
            }
            ScanProbe::Waiting(message) => ScanReport {
                status: "waiting",
                message,
            },
        })
    }
}
