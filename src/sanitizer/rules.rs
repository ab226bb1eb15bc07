use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MARKER: &str = "<REDACTED>";
pub const DEFAULT_MAX_DEPTH: usize = 64;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static SSN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CARD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Visa, Mastercard, Amex, Discover prefixes; optional space/dash grouping
    Regex::new(r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6011)[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,4}\b").unwrap()
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{8,}").unwrap());

static PRIVATE_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap());

static KNOWN_KEY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"(?:sk|pk|rk)[-_][A-Za-z0-9_\-]{4,}",
        r"|gh[pousr]_[A-Za-z0-9]{20,}",
        r"|xox[abprs]-[A-Za-z0-9-]{10,}",
        r"|AKIA[0-9A-Z]{16}",
        r"|AIza[0-9A-Za-z_\-]{35}",
        r")$"
    ))
    .unwrap()
});

static JWT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^eyJ[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]*$").unwrap()
});

static UUID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

const DEFAULT_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "client_secret",
    "token",
    "access_token",
    "refresh_token",
    "id_token",
    "session_token",
    "api_key",
    "api_secret",
    "authorization",
    "auth",
    "cookie",
    "set_cookie",
    "credential",
    "credentials",
    "private_key",
    "ssn",
    "credit_card",
    "card_number",
    "cvv",
];

const DEFAULT_FIELD_FRAGMENTS: &[&str] = &["password", "secret", "apikey"];

/// Lowercases ASCII and drops `_`/`-`, so `api_key`, `apiKey` and `API-KEY` compare equal.
pub fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Matches on the name of a mapping entry.
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// Normalized exact match.
    Exact(String),
    /// Normalized substring match.
    Contains(String),
    /// Regex against the raw key.
    Pattern(Regex),
}

impl FieldRule {
    pub fn exact(name: &str) -> Self {
        FieldRule::Exact(normalize_field(name))
    }

    pub fn contains(fragment: &str) -> Self {
        FieldRule::Contains(normalize_field(fragment))
    }

    fn matches(&self, raw: &str, normalized: &str) -> bool {
        match self {
            FieldRule::Exact(name) => normalized == name,
            FieldRule::Contains(fragment) => normalized.contains(fragment.as_str()),
            FieldRule::Pattern(re) => re.is_match(raw),
        }
    }
}

/// Matches on string values.
#[derive(Debug, Clone)]
pub enum ValueRule {
    Pattern { name: String, regex: Regex },
    /// Structural heuristic for API keys, tokens and similar opaque secrets.
    CredentialShape,
}

impl ValueRule {
    pub fn pattern(name: impl Into<String>, regex: Regex) -> Self {
        ValueRule::Pattern {
            name: name.into(),
            regex,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ValueRule::Pattern { name, .. } => name,
            ValueRule::CredentialShape => "credential_shape",
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            ValueRule::Pattern { regex, .. } => regex.is_match(value),
            ValueRule::CredentialShape => looks_like_credential(value),
        }
    }
}

/// Heuristic: well-known key prefixes, JWTs, or a long single token with high
/// character variety mixing letters and digits. UUIDs are left alone.
pub fn looks_like_credential(value: &str) -> bool {
    let value = value.trim();
    if KNOWN_KEY_PREFIX.is_match(value) || JWT_SHAPE.is_match(value) {
        return true;
    }
    if value.len() < 32 || value.len() > 512 || UUID_SHAPE.is_match(value) {
        return false;
    }

    let mut has_digit = false;
    let mut has_alpha = false;
    let mut seen = [false; 128];
    let mut distinct = 0;
    for c in value.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '/' | '=')) {
            return false;
        }
        has_digit |= c.is_ascii_digit();
        has_alpha |= c.is_ascii_alphabetic();
        let slot = &mut seen[c as usize];
        if !*slot {
            *slot = true;
            distinct += 1;
        }
    }
    has_digit && has_alpha && distinct >= 18
}

/// An ordered rule set. Field rules are consulted before value rules and the
/// first match wins.
#[derive(Debug, Clone)]
pub struct SanitizationRules {
    field_rules: Vec<FieldRule>,
    value_rules: Vec<ValueRule>,
    marker: String,
    max_depth: usize,
}

impl Default for SanitizationRules {
    fn default() -> Self {
        Self::pii_defaults()
    }
}

impl SanitizationRules {
    /// No rules at all: every value passes through.
    pub fn empty() -> Self {
        Self {
            field_rules: Vec::new(),
            value_rules: Vec::new(),
            marker: DEFAULT_MARKER.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Common PII and credential rules.
    pub fn pii_defaults() -> Self {
        let mut rules = Self::empty();
        rules
            .field_rules
            .extend(DEFAULT_FIELDS.iter().map(|f| FieldRule::exact(f)));
        rules
            .field_rules
            .extend(DEFAULT_FIELD_FRAGMENTS.iter().map(|f| FieldRule::contains(f)));
        rules.value_rules.extend([
            ValueRule::pattern("private_key", PRIVATE_KEY_PATTERN.clone()),
            ValueRule::pattern("bearer_token", BEARER_PATTERN.clone()),
            ValueRule::pattern("email", EMAIL_PATTERN.clone()),
            ValueRule::pattern("ssn", SSN_PATTERN.clone()),
            ValueRule::pattern("credit_card", CARD_PATTERN.clone()),
            ValueRule::CredentialShape,
        ]);
        rules
    }

    pub fn with_field(mut self, name: &str) -> Self {
        self.field_rules.push(FieldRule::exact(name));
        self
    }

    pub fn with_field_fragment(mut self, fragment: &str) -> Self {
        self.field_rules.push(FieldRule::contains(fragment));
        self
    }

    pub fn with_field_pattern(mut self, regex: Regex) -> Self {
        self.field_rules.push(FieldRule::Pattern(regex));
        self
    }

    pub fn with_value_pattern(mut self, name: impl Into<String>, regex: Regex) -> Self {
        self.value_rules.push(ValueRule::pattern(name, regex));
        self
    }

    pub fn with_credential_heuristics(mut self) -> Self {
        if !self
            .value_rules
            .iter()
            .any(|r| matches!(r, ValueRule::CredentialShape))
        {
            self.value_rules.push(ValueRule::CredentialShape);
        }
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn field_rules(&self) -> &[FieldRule] {
        &self.field_rules
    }

    pub fn value_rules(&self) -> &[ValueRule] {
        &self.value_rules
    }

    pub fn match_field(&self, key: &str) -> Option<&FieldRule> {
        let normalized = normalize_field(key);
        self.field_rules
            .iter()
            .find(|rule| rule.matches(key, &normalized))
    }

    pub fn match_value(&self, value: &str) -> Option<&ValueRule> {
        self.value_rules.iter().find(|rule| rule.matches(value))
    }
}
