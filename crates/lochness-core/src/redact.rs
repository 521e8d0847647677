use once_cell::sync::Lazy;
use regex::Regex;

use crate::keystore::Secret;

pub const REDACTED: &str = "[redacted]";

static CREDENTIAL_ECHOES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r#"(?i)("(?:token|api[_-]?key|password|passwd|secret|access[_-]?key)"\s*:\s*")[^"]*(")"#,
            "${1}[redacted]${2}",
        ),
        (r"(?i)(authorization\s*[:=]\s*bearer\s+)[^\s,;]+", "${1}[redacted]"),
        (
            r#"(?i)((?:token|api[_-]?key|password|passwd|secret|access[_-]?key)\s*[:=]\s*)[^\s,;&"']+"#,
            "${1}[redacted]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Scrubs credential material from diagnostics before they are persisted.
#[derive(Clone, Default)]
pub struct Redactor {
    secrets: Vec<Secret>,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret: &Secret) -> Self {
        self.add_secret(secret);
        self
    }

    pub fn add_secret(&mut self, secret: &Secret) {
        if !secret.expose().is_empty() {
            self.secrets.push(secret.clone());
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.expose(), REDACTED);
        }
        for (re, replacement) in CREDENTIAL_ECHOES.iter() {
            out = re.replace_all(&out, *replacement).into_owned();
        }
        out
    }
}
