//! Product listing extraction with price parsing and threshold filtering.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use super::{Tool, ToolResult, opt_f64};
use crate::page::PageSurface;
use crate::runner::RuntimeConfig;

// Currency symbol or code next to a number, thousands separators allowed.
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[$€£¥]|USD|EUR|GBP)\s*([0-9]{1,3}(?:[\s,.][0-9]{3})*(?:[.,][0-9]{2})?)|([0-9]{1,3}(?:[\s,.][0-9]{3})*(?:[.,][0-9]{2})?)\s*(?:[$€£¥]|USD|EUR|GBP)")
        .expect("price regex")
});

const PRODUCTS_SCRIPT: &str = r#"
    (() => {
        const out = [];
        const sels = [
            '[class*="product"]', '[class*="item-card"]', '[data-product-id]',
            '.card', 'li[class*="listing"]'
        ];
        const seen = new Set();
        for (const sel of sels) {
            for (const node of document.querySelectorAll(sel)) {
                if (seen.has(node)) continue;
                seen.add(node);
                const text = (node.innerText || '').trim();
                if (!text || text.length > 600) continue;
                const a = node.querySelector('a[href]');
                out.push({ text: text.slice(0, 300), url: a ? a.href : null });
                if (out.length >= 80) return out;
            }
        }
        return out;
    })()
"#;

/// Parse the first price-looking token out of a text blob.
fn parse_price(text: &str) -> Option<f64> {
    let captures = PRICE_RE.captures(text)?;
    let digits = captures.get(1).or_else(|| captures.get(2))?.as_str();

    // Normalize separators: the last [.,] group of 1-2 digits is decimal,
    // everything else is thousands noise.
    let cleaned: String = digits.chars().filter(|c| *c != ' ').collect();
    let normalized = match cleaned.rfind([',', '.']) {
        Some(pos) if cleaned.len() - pos <= 3 => {
            let (head, tail) = cleaned.split_at(pos);
            let head: String = head.chars().filter(char::is_ascii_digit).collect();
            format!("{head}.{}", &tail[1..])
        }
        _ => cleaned.chars().filter(char::is_ascii_digit).collect(),
    };
    normalized.parse().ok()
}

/// Derive a product name: first non-price line of the card text.
fn parse_name(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.len() >= 3 && !PRICE_RE.is_match(line))
        .map(|line| line.to_string())
}

pub struct ProductsExtractTool;

#[async_trait]
impl Tool for ProductsExtractTool {
    fn name(&self) -> &'static str {
        "products.extract"
    }

    fn description(&self) -> &'static str {
        "Extract product names, prices, and URLs; `threshold` keeps items at or below a price."
    }

    async fn execute(
        &self,
        args: &Value,
        page: &dyn PageSurface,
        _config: &RuntimeConfig,
    ) -> ToolResult {
        let threshold = opt_f64(args, "threshold");
        let raw = page.evaluate(PRODUCTS_SCRIPT).await?;

        let mut items = Vec::new();
        for candidate in raw.as_array().map(Vec::as_slice).unwrap_or_default() {
            let Some(text) = candidate.get("text").and_then(Value::as_str) else {
                continue;
            };
            let Some(price) = parse_price(text) else {
                continue;
            };
            if let Some(max) = threshold
                && price > max
            {
                continue;
            }
            let Some(name) = parse_name(text) else {
                continue;
            };
            items.push(json!({
                "name": name,
                "price": price,
                "url": candidate.get("url").cloned().unwrap_or(Value::Null),
            }));
        }

        Ok(json!({ "count": items.len(), "items": items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_price_formats() {
        assert_eq!(parse_price("$19.99"), Some(19.99));
        assert_eq!(parse_price("price: € 1.299,00 incl. VAT"), Some(1299.00));
        assert_eq!(parse_price("1 499,00 €"), Some(1499.00));
        assert_eq!(parse_price("USD 42"), Some(42.0));
        assert_eq!(parse_price("no price here"), None);
    }

    #[test]
    fn name_is_first_non_price_line() {
        let text = "Wireless Mouse X2\n$24.99\nIn stock";
        assert_eq!(parse_name(text).as_deref(), Some("Wireless Mouse X2"));
    }
}
