use std::path::Path;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 启动无头浏览器
///
/// 返回浏览器句柄和 CDP 事件处理器，事件循环由调用方负责驱动
/// （生命周期管理器持有 JoinHandle，以便判断连接是否还活着）。
pub async fn launch_browser(config: &Config) -> AppResult<(Browser, Handler)> {
    info!("[浏览器] 🚀 启动浏览器 (headless: {})...", config.headless);

    let browser_config = build_browser_config(config)?;

    let (browser, handler) = Browser::launch(browser_config).await.map_err(|err| {
        error!("[浏览器] 启动浏览器失败: {}", err);
        AppError::BrowserInit(format!("启动浏览器失败: {}", err))
    })?;
    debug!("[浏览器] 浏览器进程启动成功");

    Ok((browser, handler))
}

/// 构建浏览器启动配置
///
/// 禁用沙盒/GPU/后台节流等，这些开关是在容器环境里稳定运行的前提。
fn build_browser_config(config: &Config) -> AppResult<BrowserConfig> {
    let mut builder = BrowserConfig::builder();

    if config.headless {
        builder = builder.new_headless_mode();
    } else {
        builder = builder.with_head();
    }

    if let Some(executable) = &config.chrome_executable {
        builder = builder.chrome_executable(Path::new(executable));
    }

    builder = builder.no_sandbox().args(vec![
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage", // 防止共享内存不足
        "--disable-gpu",
        "--disable-extensions",
        "--no-first-run",
        "--disable-default-apps",
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--disable-hang-monitor",
        "--disable-prompt-on-repost",
        "--disable-domain-reliability",
    ]);

    builder.build().map_err(|err| {
        error!("[浏览器] 配置无头浏览器失败: {}", err);
        AppError::BrowserInit(format!("配置无头浏览器失败: {}", err))
    })
}
