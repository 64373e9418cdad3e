//! Supported languages and starter templates.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const JAVASCRIPT_TEMPLATE: &str = r#"// Welcome to your coding interview!
// Write your solution below

function solution(input) {
  // Your code here
  return input;
}

// Test your solution
console.log(solution("Hello, World!"));
"#;

const TYPESCRIPT_TEMPLATE: &str = r#"// Welcome to your coding interview!
// Write your solution below

function solution(input: string): string {
  // Your code here
  return input;
}

// Test your solution
console.log(solution("Hello, World!"));
"#;

const PYTHON_TEMPLATE: &str = r#"# Welcome to your coding interview!
# Write your solution below

def solution(input):
    # Your code here
    return input

# Test your solution
print(solution("Hello, World!"))
"#;

/// Language tag that is not one of the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Language a session is edited and executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    Python,
}

impl Language {
    /// Every supported language, in selector order.
    pub const ALL: [Self; 3] = [Self::JavaScript, Self::TypeScript, Self::Python];

    /// Wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::Python => "Python",
        }
    }

    /// Starter code a session is reset to when switching to this language.
    #[must_use]
    pub const fn default_code(self) -> &'static str {
        match self {
            Self::JavaScript => JAVASCRIPT_TEMPLATE,
            Self::TypeScript => TYPESCRIPT_TEMPLATE,
            Self::Python => PYTHON_TEMPLATE,
        }
    }

    /// Extension used for the script file handed to the runtime.
    #[must_use]
    pub const fn file_extension(self) -> &'static str {
        match self {
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
            Self::Python => "py",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_non_empty_and_language_specific() {
        for lang in Language::ALL {
            assert!(!lang.default_code().is_empty());
            assert!(lang.default_code().ends_with('\n'));
        }
        assert!(Language::TypeScript.default_code().contains("input: string"));
        assert!(Language::Python.default_code().contains("def solution(input):"));
        assert!(Language::JavaScript.default_code().starts_with("// Welcome"));
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!("python".parse::<Language>(), Ok(Language::Python));
        assert_eq!(
            "rust".parse::<Language>(),
            Err(UnsupportedLanguage("rust".to_string()))
        );
        // tags are case-sensitive, matching the wire format
        assert!("Python".parse::<Language>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&Language::TypeScript).unwrap();
        assert_eq!(json, "\"typescript\"");
        let parsed: Language = serde_json::from_str("\"javascript\"").unwrap();
        assert_eq!(parsed, Language::JavaScript);
    }
}
