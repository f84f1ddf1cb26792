use super::rules::{FraudEscalation, RuleSet};
use crate::models::{DetectedViolation, Severity, ValidationInfo, ViolationType};
use serde::{Deserialize, Serialize};

/// Placeholder written over every blocked span.
pub const REDACTION: &str = "***";

/// Verdict for one piece of message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_valid: bool,
    /// One entry per rule that fired, in rule-table order
    pub violations: Vec<DetectedViolation>,
    /// Union of matched spans across all hits
    pub blocked_content: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Classification {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    /// Hit that names the ledger entry: highest severity, earliest rule on ties.
    pub fn primary(&self) -> Option<&DetectedViolation> {
        self.violations.iter().fold(None, |best, hit| match best {
            Some(current) if current.severity >= hit.severity => Some(current),
            _ => Some(hit),
        })
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    /// Human readable summary, e.g. `phone: 0414-5551212; fraud_pattern: Zelle`.
    pub fn details(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.violation_type, v.matches.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Content with every blocked span replaced by [`REDACTION`].
    pub fn redact(&self, content: &str) -> String {
        let mut spans: Vec<&str> = self.blocked_content.iter().map(String::as_str).collect();
        // longer spans first so a span contained in another can't split it
        spans.sort_by(|a, b| b.len().cmp(&a.len()));

        spans
            .into_iter()
            .fold(content.to_string(), |text, span| text.replace(span, REDACTION))
    }

    pub fn validation_info(&self) -> ValidationInfo {
        ValidationInfo {
            is_blocked: !self.is_valid,
            violations: self.violations.clone(),
            blocked_content: self.blocked_content.clone(),
            auto_moderated: true,
        }
    }
}

/// Run every rule of `rules` over `content`.
///
/// Pure: the same content and rule set always give the same verdict. Any hit
/// invalidates the message.
pub fn classify(rules: &RuleSet, content: &str) -> Classification {
    if content.trim().is_empty() {
        return Classification::valid();
    }

    let mut violations: Vec<DetectedViolation> = rules
        .rules()
        .iter()
        .filter_map(|rule| rule.evaluate(content))
        .collect();

    if violations.is_empty() {
        return Classification::valid();
    }

    escalate_fraud(&mut violations, rules.policy().fraud_escalation);

    let mut blocked_content: Vec<String> = Vec::new();
    for span in violations.iter().flat_map(|v| v.matches.iter()) {
        if !blocked_content.contains(span) {
            blocked_content.push(span.clone());
        }
    }

    let mut suggestions: Vec<String> = Vec::new();
    for hit in &violations {
        let tip = suggestion_for(hit.violation_type).to_string();
        if !suggestions.contains(&tip) {
            suggestions.push(tip);
        }
    }

    tracing::debug!(
        rules_version = rules.version(),
        hits = violations.len(),
        "message flagged"
    );

    Classification {
        is_valid: false,
        violations,
        blocked_content,
        suggestions,
    }
}

fn escalate_fraud(violations: &mut [DetectedViolation], policy: FraudEscalation) {
    let escalate = match policy {
        FraudEscalation::Never => false,
        FraudEscalation::Always => true,
        FraudEscalation::WithContact => violations
            .iter()
            .any(|v| v.violation_type.is_contact_info()),
    };

    if !escalate {
        return;
    }

    for hit in violations
        .iter_mut()
        .filter(|v| v.violation_type == ViolationType::FraudPattern)
    {
        hit.severity = Severity::Critical;
    }
}

fn suggestion_for(violation_type: ViolationType) -> &'static str {
    match violation_type {
        ViolationType::Phone => {
            "Keep phone numbers out of the chat; the store can reach you through your order."
        }
        ViolationType::Email => {
            "Email addresses can't be shared here; keep the conversation on the platform."
        }
        ViolationType::ExternalLink => {
            "Links to other sites aren't allowed; share product details or photos instead."
        }
        ViolationType::ForbiddenKeyword => {
            "Avoid moving the conversation to other apps or social networks."
        }
        ViolationType::FraudPattern => {
            "Pay only through the platform checkout; direct transfers are not protected."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::rules::RulePolicy;

    fn rules(fraud_escalation: FraudEscalation) -> RuleSet {
        RuleSet::builtin(&RulePolicy {
            platform_domains: vec!["mercadoautos.com".into()],
            fraud_escalation,
        })
    }

    #[test]
    fn test_phone_number_blocks_message() {
        let result = classify(
            &rules(FraudEscalation::WithContact),
            "Cel: 0414-5551212, escríbeme",
        );

        assert!(!result.is_valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].violation_type, ViolationType::Phone);
        assert_eq!(result.blocked_content, vec!["0414-5551212".to_string()]);
        assert_eq!(result.suggestions.len(), 1);
    }

    #[test]
    fn test_product_question_is_valid() {
        let result = classify(
            &rules(FraudEscalation::WithContact),
            "Filtro de aceite compatible con Toyota Corolla 2015",
        );

        assert!(result.is_valid);
        assert!(result.violations.is_empty());
        assert!(result.blocked_content.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_payment_diversion_is_fraud() {
        let result = classify(&rules(FraudEscalation::WithContact), "Pago por Zelle directo");

        assert!(!result.is_valid);
        let hit = result.primary().unwrap();
        assert_eq!(hit.violation_type, ViolationType::FraudPattern);
        assert_eq!(hit.matches, vec!["Zelle".to_string()]);
        // no contact details alongside: keeps the rule's severity
        assert_eq!(hit.severity, Severity::High);
    }

    #[test]
    fn test_fraud_with_contact_escalates() {
        let content = "te paso mi zelle, llama al 0414-5551212";

        let escalated = classify(&rules(FraudEscalation::WithContact), content);
        assert_eq!(escalated.max_severity(), Some(Severity::Critical));
        let primary = escalated.primary().unwrap();
        assert_eq!(primary.violation_type, ViolationType::FraudPattern);

        let flat = classify(&rules(FraudEscalation::Never), content);
        assert_eq!(flat.max_severity(), Some(Severity::High));
        // tie between phone and fraud: earliest rule wins
        assert_eq!(flat.primary().unwrap().violation_type, ViolationType::Phone);

        let always = classify(&rules(FraudEscalation::Always), "solo zelle");
        assert_eq!(always.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let set = rules(FraudEscalation::WithContact);
        let content = "escríbeme a ventas@tienda.com o por WhatsApp, pago móvil";

        let first = classify(&set, content);
        let second = classify(&set, content);
        assert_eq!(first, second);
        assert_eq!(first.violations.len(), 3);
    }

    #[test]
    fn test_email_is_not_double_reported_as_link() {
        let result = classify(
            &rules(FraudEscalation::WithContact),
            "correo: pedro.perez@gmail.com",
        );

        let types: Vec<ViolationType> = result.violations.iter().map(|v| v.violation_type).collect();
        assert!(types.contains(&ViolationType::Email));
        assert!(!types.contains(&ViolationType::ExternalLink));
    }

    #[test]
    fn test_platform_links_are_allowed() {
        let result = classify(
            &rules(FraudEscalation::WithContact),
            "aquí está: https://mercadoautos.com/p/filtro-123",
        );
        assert!(result.is_valid);
    }

    #[test]
    fn test_blocked_content_is_union_of_spans() {
        let result = classify(
            &rules(FraudEscalation::WithContact),
            "whatsapp 0414-5551212 o whatsapp",
        );

        assert_eq!(
            result.blocked_content,
            vec!["0414-5551212".to_string(), "whatsapp".to_string()]
        );
    }

    #[test]
    fn test_redaction() {
        let content = "Cel: 0414-5551212, o por telegram";
        let result = classify(&rules(FraudEscalation::WithContact), content);

        let redacted = result.redact(content);
        assert_eq!(redacted, "Cel: ***, o por ***");
        assert!(!redacted.contains("0414"));
    }

    #[test]
    fn test_details_and_validation_info() {
        let result = classify(&rules(FraudEscalation::Never), "0414-5551212");
        assert_eq!(result.details(), "phone: 0414-5551212");

        let info = result.validation_info();
        assert!(info.is_blocked);
        assert!(info.auto_moderated);
        assert_eq!(info.blocked_content, result.blocked_content);
    }

    #[test]
    fn test_empty_content_is_valid() {
        assert!(classify(&rules(FraudEscalation::Always), "   ").is_valid);
    }
}
