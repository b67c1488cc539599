/// 程序配置
///
/// 所有字段都可以通过同名环境变量覆盖，未设置时使用默认值。
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP 服务端口
    pub port: u16,
    /// API 鉴权 token（Authorization: Bearer <token>）
    pub auth_token: String,
    /// 数据目录（会话文件存放于此）
    pub data_dir: String,
    /// 是否无头模式运行浏览器
    pub headless: bool,
    /// 浏览器可执行文件路径（不设置则自动探测）
    pub chrome_executable: Option<String>,
    /// 浏览器上下文使用的桌面版 User-Agent
    pub user_agent: String,
    /// 微博主页地址
    pub weibo_home_url: String,
    /// 微博扫码登录入口地址
    pub weibo_login_url: String,
    /// 页面导航超时（秒）
    pub navigation_timeout_secs: u64,
    /// 等待页面元素出现的超时（秒）
    pub selector_timeout_secs: u64,
    /// 登录标记探测超时（秒）
    pub login_probe_timeout_secs: u64,
    /// 等待发布接口响应的超时（秒）
    pub post_response_timeout_secs: u64,
    /// 操作最大尝试次数（含首次）
    pub max_retries: usize,
    /// 重试间隔（毫秒，固定间隔）
    pub retry_backoff_ms: u64,
    /// 登录状态缓存有效期（秒，仅用于状态查询，发布前总是重新验证）
    pub login_cache_ttl_secs: u64,
    /// 二维码有效期（秒），超时后轮询返回过期
    pub qr_expiry_secs: u64,
    /// 微博内容最大字符数
    pub max_post_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            auth_token: "weibo-proxy".to_string(),
            data_dir: "data".to_string(),
            headless: true,
            chrome_executable: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            weibo_home_url: "https://weibo.com".to_string(),
            weibo_login_url: "https://passport.weibo.com/sso/signin?entry=miniblog&source=miniblog".to_string(),
            navigation_timeout_secs: 20,
            selector_timeout_secs: 10,
            login_probe_timeout_secs: 5,
            post_response_timeout_secs: 15,
            max_retries: 2,
            retry_backoff_ms: 3000,
            login_cache_ttl_secs: 5,
            qr_expiry_secs: 300,
            max_post_chars: 2000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            port: std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.port),
            auth_token: std::env::var("AUTH_TOKEN").unwrap_or(default.auth_token),
            data_dir: std::env::var("DATA_DIR").unwrap_or(default.data_dir),
            headless: std::env::var("HEADLESS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.headless),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            user_agent: std::env::var("USER_AGENT").unwrap_or(default.user_agent),
            weibo_home_url: std::env::var("WEIBO_HOME_URL").unwrap_or(default.weibo_home_url),
            weibo_login_url: std::env::var("WEIBO_LOGIN_URL").unwrap_or(default.weibo_login_url),
            navigation_timeout_secs: std::env::var("NAVIGATION_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.navigation_timeout_secs),
            selector_timeout_secs: std::env::var("SELECTOR_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.selector_timeout_secs),
            login_probe_timeout_secs: std::env::var("LOGIN_PROBE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.login_probe_timeout_secs),
            post_response_timeout_secs: std::env::var("POST_RESPONSE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.post_response_timeout_secs),
            max_retries: std::env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_retries),
            retry_backoff_ms: std::env::var("RETRY_BACKOFF_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_backoff_ms),
            login_cache_ttl_secs: std::env::var("LOGIN_CACHE_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.login_cache_ttl_secs),
            qr_expiry_secs: std::env::var("QR_EXPIRY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.qr_expiry_secs),
            max_post_chars: std::env::var("MAX_POST_CHARS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_post_chars),
        }
    }

    /// 会话文件完整路径
    pub fn session_file(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("session.json")
    }
}
