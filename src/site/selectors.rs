//! 选择器链
//!
//! 微博前端改版频繁，单个选择器随时可能失效。这里把同一目标的多个候选
//! 选择器按优先级组成一条链，在页面里一次性探测，命中第一个可见元素即
//! 返回。链的内容由站点适配器定义，本模块只负责探测和等待。

use std::time::Duration;

use chromiumoxide::Page;
use tokio::time::{sleep, Instant};

use crate::error::{AppError, AppResult};

/// 探测轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 按顺序尝试的一组候选选择器
#[derive(Debug, Clone)]
pub struct SelectorChain {
    name: &'static str,
    selectors: Vec<&'static str>,
}

impl SelectorChain {
    pub fn new(name: &'static str, selectors: Vec<&'static str>) -> Self {
        Self { name, selectors }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 探测一次，返回命中的选择器
    pub async fn probe(&self, page: &Page) -> AppResult<Option<String>> {
        let matched: Option<String> = page
            .evaluate(self.probe_script())
            .await?
            .into_value()?;
        Ok(matched)
    }

    /// 等待任一候选选择器出现，超时报错
    pub async fn wait(&self, page: &Page, timeout: Duration) -> AppResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(selector) = self.probe(page).await? {
                return Ok(selector);
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout(self.name, timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 等待并读取第一个命中元素的属性值
    pub async fn wait_attribute(
        &self,
        page: &Page,
        attribute: &str,
        timeout: Duration,
    ) -> AppResult<String> {
        let script = self.attribute_script(attribute);
        let deadline = Instant::now() + timeout;
        loop {
            let value: Option<String> = page.evaluate(script.clone()).await?.into_value()?;
            if let Some(value) = value {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout(self.name, timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 生成探测脚本：依次 querySelector，返回第一个可见命中的选择器
    fn probe_script(&self) -> String {
        format!(
            r#"(function() {{
    const selectors = {selectors};
    for (const selector of selectors) {{
        let el = null;
        try {{ el = document.querySelector(selector); }} catch (e) {{ continue; }}
        if (!el) continue;
        if (el.offsetWidth > 0 || el.offsetHeight > 0 || el.getClientRects().length > 0) {{
            return selector;
        }}
    }}
    return null;
}})()"#,
            selectors = self.selectors_json()
        )
    }

    /// 生成属性读取脚本：返回第一个可见命中元素的指定属性
    fn attribute_script(&self, attribute: &str) -> String {
        format!(
            r#"(function() {{
    const selectors = {selectors};
    const attribute = {attribute};
    for (const selector of selectors) {{
        let el = null;
        try {{ el = document.querySelector(selector); }} catch (e) {{ continue; }}
        if (!el) continue;
        if (el.offsetWidth > 0 || el.offsetHeight > 0 || el.getClientRects().length > 0) {{
            const value = el.getAttribute(attribute);
            if (value) return value;
        }}
    }}
    return null;
}})()"#,
            selectors = self.selectors_json(),
            attribute = serde_json::json!(attribute)
        )
    }

    fn selectors_json(&self) -> String {
        serde_json::json!(self.selectors).to_string()
    }
}
