// Scrubbing of error text before it leaves the process

use once_cell::sync::Lazy;
use openpact_core::ServerConfig;
use regex::{Captures, Regex};
use std::path::Path;

/// Longest error message emitted on the wire, in characters
pub const MAX_MESSAGE_CHARS: usize = 512;

/// Secrets shorter than this are not redacted; they would match ordinary text
const MIN_SECRET_LEN: usize = 4;

const REDACTED: &str = "[REDACTED]";
const PATH_PLACEHOLDER: &str = "<path>";

/// Rewrites configured roots to placeholders, hides other absolute paths
/// and known secret values, and bounds message length
#[derive(Clone, Default)]
pub struct Sanitizer {
    /// (root, placeholder), longest root first
    roots: Vec<(String, &'static str)>,
    /// Longest first so overlapping values are fully covered
    secrets: Vec<String>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new()
            .with_root(&config.data_dir, "<data>")
            .with_root(&config.scripts_dir, "<scripts>")
            .with_root(&config.ai_data_dir, "<ai-data>")
            .with_root(&config.workspace_path, "<workspace>")
    }

    pub fn with_root(mut self, root: &Path, placeholder: &'static str) -> Self {
        let mut forms = vec![root.to_string_lossy().trim_end_matches('/').to_string()];
        if let Ok(canonical) = root.canonicalize() {
            forms.push(canonical.to_string_lossy().trim_end_matches('/').to_string());
        }
        for form in forms {
            if !form.is_empty() && !self.roots.iter().any(|(r, _)| *r == form) {
                self.roots.push((form, placeholder));
            }
        }
        self.roots.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn with_secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secrets.extend(
            secrets
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| s.len() >= MIN_SECRET_LEN),
        );
        self.secrets.sort();
        self.secrets.dedup();
        self.secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        self
    }

    /// Seed secrets from environment variables whose names mark them as
    /// credentials
    pub fn with_env_secrets(self) -> Self {
        let values = std::env::vars()
            .filter(|(name, _)| is_secret_env_name(name))
            .map(|(_, value)| value);
        self.with_secrets(values)
    }

    pub fn sanitize(&self, message: &str) -> String {
        let mut text = message.to_string();
        for secret in &self.secrets {
            if text.contains(secret.as_str()) {
                text = text.replace(secret.as_str(), REDACTED);
            }
        }
        for (root, placeholder) in &self.roots {
            text = replace_root(&text, root, placeholder);
        }
        let text = self.hide_absolute_paths(&text);
        truncate_chars(&text, MAX_MESSAGE_CHARS)
    }

    /// Replace absolute paths with a placeholder. URLs are kept, except
    /// `file://` URLs whose path is hidden. A path directly after a root
    /// placeholder is the workspace-relative remainder and is kept.
    fn hide_absolute_paths(&self, text: &str) -> String {
        absolute_path_pattern()
            .replace_all(text, |caps: &Captures| {
                if let Some(url) = caps.name("url") {
                    let url = url.as_str();
                    return match url.get(..7) {
                        Some(scheme) if scheme.eq_ignore_ascii_case("file://") && url.len() > 7 => {
                            format!("{}{}", scheme, PATH_PLACEHOLDER)
                        }
                        _ => url.to_string(),
                    };
                }

                let (Some(lead), Some(path)) = (caps.name("lead"), caps.name("path")) else {
                    return caps[0].to_string();
                };
                let before = &text[..lead.end()];
                if self.roots.iter().any(|(_, placeholder)| before.ends_with(placeholder)) {
                    return caps[0].to_string();
                }

                let mut out = format!("{}{}", lead.as_str(), PATH_PLACEHOLDER);
                // Keep sentence punctuation that trailed the path
                if let Some(last @ ('.' | ':')) = path.as_str().chars().last() {
                    out.push(last);
                }
                out
            })
            .into_owned()
    }
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer")
            .field("roots", &self.roots)
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

fn is_secret_env_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    ["_KEY", "_TOKEN", "_SECRET", "_PASSWORD"]
        .iter()
        .any(|suffix| upper.ends_with(suffix))
}

fn is_path_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '"' | '\'' | '`' | ')' | ']' | '}' | ',' | ';' | '<' | '>'))
}

/// Replace `root` where it appears as a whole path prefix
fn replace_root(text: &str, root: &str, placeholder: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(root) {
        let after = &rest[pos + root.len()..];
        let boundary = after.chars().next().map_or(true, |c| c == '/' || !is_path_char(c));
        out.push_str(&rest[..pos]);
        out.push_str(if boundary { placeholder } else { root });
        rest = after;
    }
    out.push_str(rest);
    out
}

/// A URL, or an absolute path preceded by anything that cannot continue a
/// relative path or word
fn absolute_path_pattern() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?P<url>[A-Za-z][A-Za-z0-9+.-]*://[^\s"'`<>]*)|(?P<lead>^|[^A-Za-z0-9_.~/-])(?P<path>/[^\s"'`)\]},;<>/][^\s"'`)\]},;<>]*)"#,
        )
        .expect("valid absolute path regex")
    });
    &PATTERN
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sanitizer() -> Sanitizer {
        let mut config = ServerConfig::for_workspace("/srv/openpact/workspace");
        config.ai_data_dir = PathBuf::from("/srv/openpact/ai");
        Sanitizer::from_config(&config)
    }

    #[test]
    fn test_rewrites_configured_roots() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize("failed to read /srv/openpact/workspace/notes.md"),
            "failed to read <workspace>/notes.md"
        );
        assert_eq!(
            s.sanitize("cannot open /srv/openpact/workspace/data/x.json"),
            "cannot open <data>/x.json"
        );
        assert_eq!(s.sanitize("missing /srv/openpact/ai/MEMORY.md"), "missing <ai-data>/MEMORY.md");
    }

    #[test]
    fn test_root_prefix_must_end_at_boundary() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize("open /srv/openpact/workspace2/file"),
            "open <path>"
        );
    }

    #[test]
    fn test_hides_other_absolute_paths() {
        let s = sanitizer();
        assert_eq!(s.sanitize("denied: /etc/shadow"), "denied: <path>");
        assert_eq!(s.sanitize("at (/home/me/.ssh/id_rsa)."), "at (<path>).");
        assert_eq!(s.sanitize("path=/var/lib/x"), "path=<path>");
    }

    #[test]
    fn test_hides_paths_after_any_separator() {
        let s = sanitizer();
        assert_eq!(s.sanitize("open failed:/etc/shadow"), "open failed:<path>");
        assert_eq!(s.sanitize("ENOENT:/root/.ssh/id_rsa"), "ENOENT:<path>");
        assert_eq!(s.sanitize("bad path|/home/alice/.aws/credentials"), "bad path|<path>");
        assert_eq!(s.sanitize("user@/var/lib/app.db"), "user@<path>");
        assert_eq!(s.sanitize("/etc/passwd is unreadable"), "<path> is unreadable");
        assert_eq!(s.sanitize("read file:///etc/hosts"), "read file://<path>");
    }

    #[test]
    fn test_keeps_urls_and_fractions() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize("GET https://docs.rs/tokio failed"),
            "GET https://docs.rs/tokio failed"
        );
        assert_eq!(s.sanitize("3/4 done"), "3/4 done");
        assert_eq!(s.sanitize("see src/main.rs"), "see src/main.rs");
        assert_eq!(
            s.sanitize("fetch http://localhost:8080/api failed"),
            "fetch http://localhost:8080/api failed"
        );
    }

    #[test]
    fn test_redacts_secrets() {
        let s = sanitizer().with_secrets(["sk-live-123456", "abc"]);
        assert_eq!(
            s.sanitize("auth failed with key sk-live-123456"),
            "auth failed with key [REDACTED]"
        );
        // Too short to redact safely
        assert_eq!(s.sanitize("abc"), "abc");
    }

    #[test]
    fn test_overlapping_secrets_redact_longest_first() {
        let s = Sanitizer::new().with_secrets(["token", "token-extended"]);
        assert_eq!(s.sanitize("got token-extended"), "got [REDACTED]");
    }

    #[test]
    fn test_truncates_long_messages() {
        let s = Sanitizer::new();
        let long = "é".repeat(MAX_MESSAGE_CHARS + 10);
        let out = s.sanitize(&long);
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_secret_env_names() {
        assert!(is_secret_env_name("OPENAI_API_KEY"));
        assert!(is_secret_env_name("discord_token"));
        assert!(is_secret_env_name("DB_PASSWORD"));
        assert!(!is_secret_env_name("PATH"));
        assert!(!is_secret_env_name("KEYBOARD"));
    }
}
