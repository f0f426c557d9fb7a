//! Article listing extraction for news/blog index pages.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolResult};
use crate::page::PageSurface;
use crate::runner::RuntimeConfig;

// Candidate containers checked in order of specificity; the generic heading
// sweep at the end catches index pages with no semantic markup.
const ARTICLES_SCRIPT: &str = r#"
    (() => {
        const out = [];
        const push = (title, url) => {
            title = (title || '').trim();
            if (title.length >= 8 && url) out.push({ title: title.slice(0, 160), url });
        };
        for (const article of document.querySelectorAll('article')) {
            const h = article.querySelector('h1, h2, h3');
            const a = (h && h.querySelector('a[href]'))
                || article.querySelector('a[href]');
            if (a) push(h ? h.innerText : a.innerText, a.href);
        }
        for (const sel of ['.post', '.entry', '.news-item', '[class*="article"]']) {
            for (const node of document.querySelectorAll(sel)) {
                const a = node.querySelector('a[href]');
                if (a) push(a.innerText, a.href);
            }
        }
        for (const h of document.querySelectorAll('h2 a[href], h3 a[href]')) {
            push(h.innerText, h.href);
        }
        return out;
    })()
"#;

pub struct ArticlesExtractTool;

#[async_trait]
impl Tool for ArticlesExtractTool {
    fn name(&self) -> &'static str {
        "articles.extract"
    }

    fn description(&self) -> &'static str {
        "Extract article titles and URLs from a listing page."
    }

    async fn execute(
        &self,
        _args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let raw = page.evaluate(ARTICLES_SCRIPT).await?;

        let mut seen = std::collections::HashSet::new();
        let articles: Vec<Value> = raw
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.get("url")
                            .and_then(Value::as_str)
                            .is_some_and(|url| seen.insert(url.to_string()))
                    })
                    .take(50)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({ "articles": articles }))
    }
}
