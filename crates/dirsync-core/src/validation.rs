use regex::Regex;
use thiserror::Error;

pub const DEFAULT_USERNAME_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9._-]{0,31}$";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error(
        "username <{username}> must be 1-32 letters, digits, underscores, dots or hyphens, starting with a letter or digit"
    )]
    MalformedUsername { username: String },
    #[error("invalid username pattern: {0}")]
    InvalidPattern(String),
}

pub trait UsernameRule {
    fn validate(&self, username: &str) -> Result<(), ValidationError>;
}

#[derive(Debug, Clone)]
pub struct PatternUsernameRule {
    pattern: Regex,
}

impl PatternUsernameRule {
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        let pattern =
            Regex::new(pattern).map_err(|err| ValidationError::InvalidPattern(err.to_string()))?;
        Ok(Self { pattern })
    }
}

impl Default for PatternUsernameRule {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_USERNAME_PATTERN).expect("default username pattern"),
        }
    }
}

impl UsernameRule for PatternUsernameRule {
    fn validate(&self, username: &str) -> Result<(), ValidationError> {
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if !self.pattern.is_match(username) {
            return Err(ValidationError::MalformedUsername {
                username: username.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rule_accepts_directory_usernames() {
        let rule = PatternUsernameRule::default();
        for username in ["alice", "bob.smith", "u_01", "9lives", "a-b"] {
            assert!(rule.validate(username).is_ok(), "{username} should pass");
        }
    }

    #[test]
    fn default_rule_rejects_malformed_usernames() {
        let rule = PatternUsernameRule::default();
        assert_eq!(rule.validate(""), Err(ValidationError::EmptyUsername));
        for username in [".alice", "al ice", "ali@ce", &"a".repeat(33)] {
            assert!(
                matches!(
                    rule.validate(username),
                    Err(ValidationError::MalformedUsername { .. })
                ),
                "{username} should fail"
            );
        }
    }

    #[test]
    fn custom_pattern_is_compiled_once() {
        let rule = PatternUsernameRule::new(r"^[a-z]+$").expect("pattern");
        assert!(rule.validate("alice").is_ok());
        assert!(rule.validate("alice1").is_err());
        assert!(matches!(
            PatternUsernameRule::new("("),
            Err(ValidationError::InvalidPattern(_))
        ));
    }
}
