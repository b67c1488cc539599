//! 操作执行器
//!
//! 站点操作的统一重试入口：固定间隔、有界次数，按错误类别决定
//! 继续重试还是直接失败，全部尝试用尽后把最后一个错误原样交给调用方。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::Config;
use crate::error::AppResult;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1
    max_attempts: usize,
    /// 两次尝试之间的固定等待
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// 执行操作，失败则按策略重试
    ///
    /// 闭包每次收到当前尝试序号（从 1 开始）。不可重试的错误
    /// （未登录、参数错误等）立即透出，不消耗剩余次数。
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut operation: F) -> AppResult<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    warn!("[重试] {} 失败且不可重试: {}", op_name, err);
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    error!(
                        "[重试] ❌ {} 连续 {} 次尝试均失败: {}",
                        op_name, attempt, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "[重试] ⚠️ {} 第 {}/{} 次尝试失败: {}，{}ms 后重试",
                        op_name,
                        attempt,
                        self.max_attempts,
                        err,
                        self.backoff.as_millis()
                    );
                    if !self.backoff.is_zero() {
                        sleep(self.backoff).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};

    fn counting_policy() -> (RetryPolicy, Arc<Mutex<usize>>) {
        (
            RetryPolicy::new(2, Duration::ZERO),
            Arc::new(Mutex::new(0usize)),
        )
    }

    #[tokio::test]
    async fn always_failing_op_runs_exactly_max_attempts_and_surfaces_last_error() {
        let (policy, calls) = counting_policy();
        let calls_for_run = Arc::clone(&calls);

        let result: AppResult<()> = policy
            .run("测试操作", move |attempt| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(AppError::SiteStructure(format!("第{}次失败", attempt)))
                }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 2, "应恰好尝试 2 次");
        match result {
            Err(AppError::SiteStructure(message)) => assert_eq!(message, "第2次失败"),
            other => panic!("意外的结果: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let (policy, calls) = counting_policy();
        let calls_for_run = Arc::clone(&calls);

        let result: AppResult<()> = policy
            .run("发布", move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(AppError::NotAuthenticated)
                }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 1, "不可重试的错误不应消耗重试次数");
        assert!(matches!(result, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = Arc::new(Mutex::new(0usize));
        let calls_for_run = Arc::clone(&calls);

        let result = policy
            .run("登录检查", move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    if *guard < 2 {
                        Err(AppError::SiteStructure("瞬时故障".to_string()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
