//! Content moderation: the rule table, the classifier that runs it, and the
//! source that keeps it current.

pub mod classifier;
pub mod rule_source;
pub mod rules;

pub use classifier::{classify, Classification, REDACTION};
pub use rule_source::{RuleSetInfo, RuleSource};
pub use rules::{FraudEscalation, RuleDocument, RuleError, RulePolicy, RuleSet};
