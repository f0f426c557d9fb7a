//! Navigation failure classification.
//!
//! When the initial navigation fails, the run terminates immediately with a
//! classified error in `data.error` and a suggested retry command, instead
//! of stepping against a page that never loaded.

use serde::Serialize;
use url::Url;

/// Category of a navigation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavFailureKind {
    DnsFailure,
    TlsFailure,
    ConnectionRefused,
    Timeout,
    HttpError,
    BadUrl,
    Other,
}

/// Classified navigation failure with remediation.
#[derive(Debug, Clone, Serialize)]
pub struct NavDiagnosis {
    pub kind: NavFailureKind,
    pub message: String,
    pub suggested_command: String,
}

/// Classify a navigation error message for `url`.
pub fn classify_navigation_error(url: &str, message: &str) -> NavDiagnosis {
    let lowered = message.to_ascii_lowercase();

    let kind = if lowered.contains("name_not_resolved")
        || lowered.contains("dns")
        || lowered.contains("name or service not known")
    {
        NavFailureKind::DnsFailure
    } else if lowered.contains("cert")
        || lowered.contains("ssl")
        || lowered.contains("tls")
        || lowered.contains("handshake")
    {
        NavFailureKind::TlsFailure
    } else if lowered.contains("connection_refused") || lowered.contains("connection refused") {
        NavFailureKind::ConnectionRefused
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        NavFailureKind::Timeout
    } else if lowered.contains("404")
        || lowered.contains("403")
        || lowered.contains("500")
        || lowered.contains("502")
        || lowered.contains("http error")
    {
        NavFailureKind::HttpError
    } else if lowered.contains("must start with http") || lowered.contains("invalid url") {
        NavFailureKind::BadUrl
    } else {
        NavFailureKind::Other
    };

    let suggested_command = suggest_command(url, kind);
    NavDiagnosis {
        kind,
        message: message.to_string(),
        suggested_command,
    }
}

fn suggest_command(url: &str, kind: NavFailureKind) -> String {
    match kind {
        NavFailureKind::DnsFailure => {
            let host = Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| url.to_string());
            format!("Check the hostname spelling, then retry: pagepilot --url https://{host}")
        }
        NavFailureKind::TlsFailure => {
            let http_url = url.replacen("https://", "http://", 1);
            format!(
                "The TLS handshake failed; if the site is trusted try plain HTTP: pagepilot --url {http_url}"
            )
        }
        NavFailureKind::ConnectionRefused => {
            format!("The host refused the connection; verify the port and retry later: pagepilot --url {url}")
        }
        NavFailureKind::Timeout => {
            format!("pagepilot --url {url} --navigation-timeout-ms 90000")
        }
        NavFailureKind::HttpError => {
            format!("The server answered with an error status; verify the path: pagepilot --url {url}")
        }
        NavFailureKind::BadUrl => {
            format!("pagepilot --url https://{}", url.trim_start_matches('/'))
        }
        NavFailureKind::Other => {
            format!("pagepilot --url {url} --max-steps 30")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dns_failures() {
        let diagnosis =
            classify_navigation_error("https://nope.invalid", "net::ERR_NAME_NOT_RESOLVED");
        assert_eq!(diagnosis.kind, NavFailureKind::DnsFailure);
        assert!(diagnosis.suggested_command.contains("nope.invalid"));
    }

    #[test]
    fn classifies_tls_failures_with_http_fallback() {
        let diagnosis =
            classify_navigation_error("https://example.com", "SSL handshake failed");
        assert_eq!(diagnosis.kind, NavFailureKind::TlsFailure);
        assert!(diagnosis.suggested_command.contains("http://example.com"));
    }

    #[test]
    fn classifies_timeouts_with_longer_budget() {
        let diagnosis =
            classify_navigation_error("https://slow.example", "navigation timed out after 30000ms");
        assert_eq!(diagnosis.kind, NavFailureKind::Timeout);
        assert!(diagnosis.suggested_command.contains("navigation-timeout-ms"));
    }

    #[test]
    fn unknown_errors_still_carry_a_command() {
        let diagnosis = classify_navigation_error("https://example.com", "mystery failure");
        assert_eq!(diagnosis.kind, NavFailureKind::Other);
        assert!(!diagnosis.suggested_command.is_empty());
    }
}
