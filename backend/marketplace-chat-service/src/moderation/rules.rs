//! Versioned rule table.
//!
//! A rule set is an ordered list of `{id, matcher, severity}` entries compiled
//! from a JSON document. The built-in table mirrors what the marketplace ships
//! with; deployments override it through `RULES_PATH`.

use crate::models::{DetectedViolation, Severity, ViolationType};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub const BUILTIN_VERSION: &str = "builtin-1";

const PHONE_PATTERN: &str =
    r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3,4}\)?[\s.-]?\d{3}[\s.-]?\d{2}[\s.-]?\d{2}\b";
const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const LINK_PATTERN: &str = r"(?i)\b(?:https?://[^\s]+|www\.[^\s]+|[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.(?:com|net|org|info|biz|io|co|me|ve|app|link|ly|site|online|store|shop)\b(?:/[^\s]*)?)";
const FRAUD_PATTERN: &str = r"(?i)\b(?:zelle|paypal|binance|zinli|western\s+union|pago\s+m[oó]vil|transferencia\s+directa|deposit[aá]me|pago\s+(?:por\s+)?fuera|fuera\s+de\s+la\s+(?:plataforma|app|p[aá]gina))\b";

const DEFAULT_KEYWORDS: &[&str] = &[
    "whatsapp",
    "wasap",
    "telegram",
    "instagram",
    "facebook",
    "gmail",
    "hotmail",
    "arroba",
    "llámame",
    "llamame",
    "mi número",
    "mi numero",
];

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rules from {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse rules: {0}")]
    Parse(String),

    #[error("rule {rule_id}: invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule {0}: keyword list is empty")]
    EmptyKeywords(String),

    #[error("duplicate rule id: {0}")]
    DuplicateId(String),
}

/// How fraud-phrase hits are escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudEscalation {
    Never,
    /// Critical when a payment-diversion phrase travels with contact details
    WithContact,
    Always,
}

impl Default for FraudEscalation {
    fn default() -> Self {
        FraudEscalation::WithContact
    }
}

impl std::str::FromStr for FraudEscalation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(FraudEscalation::Never),
            "with_contact" => Ok(FraudEscalation::WithContact),
            "always" => Ok(FraudEscalation::Always),
            other => Err(format!("unknown fraud escalation policy: {other}")),
        }
    }
}

/// Deployment-level knobs applied on top of a rule document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePolicy {
    /// Domains links may point to without tripping the link rule
    pub platform_domains: Vec<String>,
    pub fraud_escalation: FraudEscalation,
}

/// Serialized form of a rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub version: String,
    /// Extra allow-listed domains, merged with the deployment's
    #[serde(default)]
    pub platform_domains: Vec<String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub violation_type: ViolationType,
    /// Defaults to the violation type's severity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub matcher: MatcherSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "matcher", rename_all = "snake_case")]
pub enum MatcherSpec {
    /// Regular expression; every non-overlapping match is reported
    Pattern { pattern: String },
    /// Case-insensitive substring search over a keyword list
    Keywords { keywords: Vec<String> },
    /// Regular expression whose matches are dropped when they point at an
    /// allow-listed domain or are the domain half of an email address
    Link { pattern: String },
}

#[derive(Debug)]
enum Matcher {
    Pattern(Regex),
    Keywords(Regex),
    Link {
        regex: Regex,
        allowed_domains: Vec<String>,
    },
}

impl Matcher {
    fn find_all(&self, text: &str) -> Vec<String> {
        match self {
            Matcher::Pattern(regex) | Matcher::Keywords(regex) => regex
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect(),
            Matcher::Link {
                regex,
                allowed_domains,
            } => regex
                .find_iter(text)
                .filter(|m| !text[..m.start()].ends_with('@'))
                .map(|m| trim_link(m.as_str()))
                .filter(|link| !is_allowed_link(link, allowed_domains))
                .map(str::to_string)
                .collect(),
        }
    }
}

/// One compiled entry of the rule table.
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
    matcher: Matcher,
}

impl Rule {
    /// Run this rule alone against `content`.
    pub fn evaluate(&self, content: &str) -> Option<DetectedViolation> {
        let mut seen = HashSet::new();
        let matches: Vec<String> = self
            .matcher
            .find_all(content)
            .into_iter()
            .filter(|m| !m.is_empty() && seen.insert(m.clone()))
            .collect();

        if matches.is_empty() {
            return None;
        }

        Some(DetectedViolation {
            rule_id: self.id.clone(),
            violation_type: self.violation_type,
            severity: self.severity,
            matches,
            description: self.description.clone(),
        })
    }
}

/// Compiled, immutable rule table.
#[derive(Debug)]
pub struct RuleSet {
    version: String,
    rules: Vec<Rule>,
    policy: RulePolicy,
}

impl RuleSet {
    pub fn compile(document: RuleDocument, policy: &RulePolicy) -> Result<Self, RuleError> {
        let mut allowed_domains: Vec<String> = policy
            .platform_domains
            .iter()
            .chain(document.platform_domains.iter())
            .map(|d| d.trim().trim_start_matches("www.").to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        allowed_domains.sort();
        allowed_domains.dedup();

        let mut ids = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());

        for spec in document.rules {
            if !ids.insert(spec.id.clone()) {
                return Err(RuleError::DuplicateId(spec.id));
            }

            let matcher = match spec.matcher {
                MatcherSpec::Pattern { pattern } => {
                    Matcher::Pattern(compile_pattern(&spec.id, &pattern)?)
                }
                MatcherSpec::Keywords { keywords } => {
                    Matcher::Keywords(compile_keywords(&spec.id, &keywords)?)
                }
                MatcherSpec::Link { pattern } => Matcher::Link {
                    regex: compile_pattern(&spec.id, &pattern)?,
                    allowed_domains: allowed_domains.clone(),
                },
            };

            rules.push(Rule {
                severity: spec
                    .severity
                    .unwrap_or_else(|| spec.violation_type.default_severity()),
                description: spec
                    .description
                    .unwrap_or_else(|| spec.violation_type.as_str().replace('_', " ")),
                id: spec.id,
                violation_type: spec.violation_type,
                matcher,
            });
        }

        Ok(Self {
            version: document.version,
            rules,
            policy: RulePolicy {
                platform_domains: allowed_domains,
                fraud_escalation: policy.fraud_escalation,
            },
        })
    }

    /// Parse and compile a JSON rule document.
    pub fn from_json(json: &str, policy: &RulePolicy) -> Result<Self, RuleError> {
        let document: RuleDocument =
            serde_json::from_str(json).map_err(|e| RuleError::Parse(e.to_string()))?;
        Self::compile(document, policy)
    }

    pub fn from_file(path: impl AsRef<Path>, policy: &RulePolicy) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content, policy)
    }

    pub fn builtin(policy: &RulePolicy) -> Self {
        // the built-in patterns are constants covered by tests
        Self::compile(builtin_document(), policy).unwrap_or_else(|e| {
            tracing::error!(error = %e, "built-in rule table failed to compile");
            Self {
                version: BUILTIN_VERSION.to_string(),
                rules: Vec::new(),
                policy: policy.clone(),
            }
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The default marketplace rule table.
pub fn builtin_document() -> RuleDocument {
    RuleDocument {
        version: BUILTIN_VERSION.to_string(),
        platform_domains: Vec::new(),
        rules: vec![
            RuleSpec {
                id: "phone_number".into(),
                violation_type: ViolationType::Phone,
                severity: None,
                description: Some("phone number".into()),
                matcher: MatcherSpec::Pattern {
                    pattern: PHONE_PATTERN.into(),
                },
            },
            RuleSpec {
                id: "email_address".into(),
                violation_type: ViolationType::Email,
                severity: None,
                description: Some("email address".into()),
                matcher: MatcherSpec::Pattern {
                    pattern: EMAIL_PATTERN.into(),
                },
            },
            RuleSpec {
                id: "external_link".into(),
                violation_type: ViolationType::ExternalLink,
                severity: None,
                description: Some("link to an external site".into()),
                matcher: MatcherSpec::Link {
                    pattern: LINK_PATTERN.into(),
                },
            },
            RuleSpec {
                id: "forbidden_keyword".into(),
                violation_type: ViolationType::ForbiddenKeyword,
                severity: None,
                description: Some("off-platform contact keyword".into()),
                matcher: MatcherSpec::Keywords {
                    keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
                },
            },
            RuleSpec {
                id: "fraud_payment_diversion".into(),
                violation_type: ViolationType::FraudPattern,
                severity: None,
                description: Some("off-platform payment request".into()),
                matcher: MatcherSpec::Pattern {
                    pattern: FRAUD_PATTERN.into(),
                },
            },
        ],
    }
}

fn compile_pattern(rule_id: &str, pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
        rule_id: rule_id.to_string(),
        source,
    })
}

fn compile_keywords(rule_id: &str, keywords: &[String]) -> Result<Regex, RuleError> {
    let mut escaped: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();

    if escaped.is_empty() {
        return Err(RuleError::EmptyKeywords(rule_id.to_string()));
    }

    // leftmost-first alternation: prefer the longest keyword at a position
    escaped.sort_by(|a, b| b.len().cmp(&a.len()));

    RegexBuilder::new(&escaped.join("|"))
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleError::InvalidPattern {
            rule_id: rule_id.to_string(),
            source,
        })
}

fn trim_link(link: &str) -> &str {
    link.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '"' | '\''))
}

fn link_host(link: &str) -> String {
    let lower = link.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme
        .split(|c: char| matches!(c, '/' | '?' | '#' | ':'))
        .next()
        .unwrap_or_default();
    host.trim_start_matches("www.").to_string()
}

fn is_allowed_link(link: &str, allowed_domains: &[String]) -> bool {
    let host = link_host(link);
    allowed_domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
