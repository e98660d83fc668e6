pub mod error_classifier;

pub use error_classifier::{ClassificationRule, ErrorClassifier, Matcher, DEFAULT_RULES};
