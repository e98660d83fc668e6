//! Error Classifier
//!
//! Pure domain logic mapping raw service failures to an [`ErrorCategory`].
//! Classification is driven by an ordered rule table: structured signals
//! (error code, HTTP status) are consulted first, message wording only when
//! the failure carries neither.

use crate::domain::entities::CategorizedError;
use crate::domain::ports::ServiceError;
use crate::domain::value_objects::{ConnectionStatus, ErrorCategory};

/// Code attached to failures synthesized when the service is unreachable.
pub const NOT_CONNECTED_CODE: &str = "NOT_CONNECTED";

/// Code attached to failures synthesized from a panicking operation.
pub const PANIC_CODE: &str = "OPERATION_PANICKED";

/// What a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Exact error code
    Code(&'static str),
    /// Error code class, e.g. `08` for SQLSTATE connection exceptions
    CodePrefix(&'static str),
    /// HTTP status returned by the endpoint
    Status(u16),
    /// Case-insensitive substring of the message or details
    MessageContains(&'static str),
}

impl Matcher {
    fn is_structured(&self) -> bool {
        !matches!(self, Matcher::MessageContains(_))
    }

    fn matches(&self, error: &ServiceError, haystack: &str) -> bool {
        match self {
            Matcher::Code(code) => error.code.as_deref() == Some(*code),
            Matcher::CodePrefix(prefix) => error
                .code
                .as_deref()
                .map(|c| c.starts_with(prefix))
                .unwrap_or(false),
            Matcher::Status(status) => error.status == Some(*status),
            Matcher::MessageContains(needle) => haystack.contains(needle),
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationRule {
    pub matcher: Matcher,
    pub category: ErrorCategory,
    /// Overrides the category's default user message
    pub user_message: Option<&'static str>,
}

const fn rule(matcher: Matcher, category: ErrorCategory) -> ClassificationRule {
    ClassificationRule {
        matcher,
        category,
        user_message: None,
    }
}

const fn rule_msg(
    matcher: Matcher,
    category: ErrorCategory,
    user_message: &'static str,
) -> ClassificationRule {
    ClassificationRule {
        matcher,
        category,
        user_message: Some(user_message),
    }
}

use ErrorCategory::{Authentication, Authorization, Network, Validation};
use Matcher::{Code, CodePrefix, MessageContains, Status};

/// Default rule table for a PostgREST/Postgres backed service. First match wins.
pub const DEFAULT_RULES: &[ClassificationRule] = &[
    // Authentication
    rule(Code("PGRST301"), Authentication),
    rule(Code("PGRST302"), Authentication),
    rule(Code("28000"), Authentication),
    rule(Code("28P01"), Authentication),
    rule(Status(401), Authentication),
    // Authorization
    rule(Code("42501"), Authorization),
    rule(Status(403), Authorization),
    // Constraint violations
    rule_msg(Code("23505"), Validation, "This record already exists."),
    rule_msg(
        Code("23503"),
        Validation,
        "This record is linked to other data and cannot be changed.",
    ),
    rule_msg(Code("23502"), Validation, "A required field is missing."),
    rule_msg(Code("23514"), Validation, "One of the values is not allowed."),
    rule_msg(Code("22P02"), Validation, "One of the values has an invalid format."),
    // Connection, timeout, serialization and deadlock
    rule(CodePrefix("08"), Network),
    rule(Code("57014"), Network),
    rule(Code("57P01"), Network),
    rule(Code("40001"), Network),
    rule(Code("40P01"), Network),
    rule(Code("PGRST000"), Network),
    rule(Code("PGRST001"), Network),
    rule(Code("PGRST002"), Network),
    rule(Status(408), Network),
    rule(Status(429), Network),
    rule(Status(502), Network),
    rule(Status(503), Network),
    rule(Status(504), Network),
    // Message heuristics, only for failures without code or status
    rule(MessageContains("jwt expired"), Authentication),
    rule(MessageContains("invalid jwt"), Authentication),
    rule(MessageContains("not authenticated"), Authentication),
    rule(MessageContains("unauthorized"), Authentication),
    rule(MessageContains("permission denied"), Authorization),
    rule(MessageContains("row-level security"), Authorization),
    rule(MessageContains("forbidden"), Authorization),
    rule_msg(MessageContains("duplicate key"), Validation, "This record already exists."),
    rule(MessageContains("violates"), Validation),
    rule(MessageContains("network"), Network),
    rule(MessageContains("fetch failed"), Network),
    rule(MessageContains("failed to fetch"), Network),
    rule(MessageContains("timeout"), Network),
    rule(MessageContains("timed out"), Network),
    rule(MessageContains("connection"), Network),
    rule(MessageContains("econnrefused"), Network),
    rule(MessageContains("econnreset"), Network),
];

/// Classifies raw failures into [`CategorizedError`]s using a rule table.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    /// Create a classifier with the default rule table.
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES.to_vec())
    }

    /// Create a classifier with a custom rule table.
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Find the first rule matching this failure, if any.
    ///
    /// Failures carrying a code or status are matched only against structured
    /// rules; message rules apply when neither is present.
    pub fn matching_rule(&self, error: &ServiceError) -> Option<&ClassificationRule> {
        let structured = error.code.is_some() || error.status.is_some();
        let haystack = match &error.details {
            Some(details) => format!("{} {}", error.message, details).to_lowercase(),
            None => error.message.to_lowercase(),
        };

        self.rules
            .iter()
            .filter(|r| r.matcher.is_structured() == structured)
            .find(|r| r.matcher.matches(error, &haystack))
    }

    /// Classify a failure. Anything no rule recognizes is a database error.
    pub fn classify(&self, error: ServiceError) -> CategorizedError {
        let (category, user_message) = match self.matching_rule(&error) {
            Some(rule) => (
                rule.category,
                rule.user_message
                    .unwrap_or_else(|| rule.category.default_user_message()),
            ),
            None => (
                ErrorCategory::Database,
                ErrorCategory::Database.default_user_message(),
            ),
        };
        CategorizedError::new(category, user_message, error)
    }

    /// Failure used when a call is skipped because the service is unreachable.
    pub fn not_connected(&self, status: ConnectionStatus) -> CategorizedError {
        CategorizedError::new(
            ErrorCategory::Network,
            ErrorCategory::Network.default_user_message(),
            ServiceError::new(format!("backing service is {}", status)).with_code(NOT_CONNECTED_CODE),
        )
    }

    /// Failure used when the operation itself panicked.
    pub fn panicked(&self, message: impl Into<String>) -> CategorizedError {
        CategorizedError::new(
            ErrorCategory::Unknown,
            ErrorCategory::Unknown.default_user_message(),
            ServiceError::new(message).with_code(PANIC_CODE),
        )
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: ServiceError) -> CategorizedError {
        ErrorClassifier::new().classify(error)
    }

    #[test]
    fn test_auth_codes() {
        let err = classify(ServiceError::new("JWT expired").with_code("PGRST301"));
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert!(!err.is_recoverable());

        let err = classify(ServiceError::new("nope").with_status(401));
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn test_authorization_code() {
        let err = classify(
            ServiceError::new("permission denied for table invoices").with_code("42501"),
        );
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[test]
    fn test_constraint_violations_are_validation() {
        let err = classify(
            ServiceError::new("duplicate key value violates unique constraint").with_code("23505"),
        );
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.user_message(), "This record already exists.");
        assert!(!err.is_recoverable());

        let err = classify(ServiceError::new("null value").with_code("23502"));
        assert_eq!(err.user_message(), "A required field is missing.");
    }

    #[test]
    fn test_connection_class_codes_are_network() {
        for code in ["08000", "08003", "08006", "57014", "40001", "40P01", "PGRST000"] {
            let err = classify(ServiceError::new("x").with_code(code));
            assert_eq!(err.category(), ErrorCategory::Network, "code {}", code);
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_gateway_statuses_are_network() {
        let err = classify(ServiceError::new("bad gateway").with_status(502));
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_message_heuristics_without_code() {
        let err = classify(ServiceError::new("TypeError: Failed to fetch"));
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = classify(ServiceError::new("request timed out"));
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = classify(ServiceError::new("new row violates row-level security policy"));
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[test]
    fn test_message_rules_ignored_when_code_present() {
        // A coded failure is never reclassified by its wording
        let err = classify(ServiceError::new("connection reset").with_code("P0001"));
        assert_eq!(err.category(), ErrorCategory::Database);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_details_are_searched() {
        let err = classify(ServiceError::new("request failed").with_details("ECONNREFUSED 10.0.0.1"));
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_unrecognized_defaults_to_database() {
        let err = classify(ServiceError::new("something odd"));
        assert_eq!(err.category(), ErrorCategory::Database);
        assert_eq!(err.original().message, "something odd");
    }

    #[test]
    fn test_custom_rule_table() {
        let classifier = ErrorClassifier::with_rules(vec![rule(Code("P0001"), Validation)]);
        let err = classifier.classify(ServiceError::new("raised").with_code("P0001"));
        assert_eq!(err.category(), ErrorCategory::Validation);

        // Default rules are gone
        let err = classifier.classify(ServiceError::new("x").with_code("08006"));
        assert_eq!(err.category(), ErrorCategory::Database);
    }

    #[test]
    fn test_not_connected_and_panicked() {
        let classifier = ErrorClassifier::new();

        let err = classifier.not_connected(ConnectionStatus::Error);
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.original().code.as_deref(), Some(NOT_CONNECTED_CODE));

        let err = classifier.panicked("index out of bounds");
        assert_eq!(err.category(), ErrorCategory::Unknown);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_first_match_wins() {
        let rules = DEFAULT_RULES;
        let first_network = rules
            .iter()
            .position(|r| r.matcher == MessageContains("network"))
            .unwrap();
        let unauthorized = rules
            .iter()
            .position(|r| r.matcher == MessageContains("unauthorized"))
            .unwrap();
        assert!(unauthorized < first_network);

        let err = classify(ServiceError::new("unauthorized network call"));
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }
}
