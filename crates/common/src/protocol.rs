//! Wire types shared between the crypto core and its consumers.
//!
//! These types are serialised as JSON: the JWT header inside every token, and
//! the file-setup diagnostics report printed by the CLI.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JWT
// ---------------------------------------------------------------------------

/// The JOSE header of a compact JWT.
///
/// Serialises to exactly `{"alg":"<alg>","typ":"JWT"}`. Unknown header fields
/// in incoming tokens are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signature algorithm name, e.g. `"HS256"`.
    pub alg: String,
    /// Token type. Tokens whose `typ` is missing or not `"JWT"` are rejected.
    #[serde(default)]
    pub typ: String,
}

impl JwtHeader {
    /// Token type value written into every header.
    pub const TYPE: &'static str = "JWT";

    /// Construct a header for the given algorithm name.
    pub fn new(alg: impl Into<String>) -> Self {
        Self {
            alg: alg.into(),
            typ: Self::TYPE.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// File-encryption diagnostics
// ---------------------------------------------------------------------------

/// Result of probing for one external command used by the pipeline backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCheck {
    /// Program name, e.g. `"openssl"`.
    pub name: String,
    /// What the pipeline uses the program for.
    pub purpose: String,
    /// Whether the version check ran and exited with status 0.
    pub found: bool,
    /// Exit code of the version check; `127` means the program was not found.
    pub exit_code: Option<i32>,
    /// First line of the version check's stdout, usually a version banner.
    pub version: Option<String>,
}

/// Structured report returned by `FileEncryption::check_file_setup`.
///
/// Purely diagnostic; producing it never changes encryption behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSetupReport {
    /// Whether the current platform can run the pipeline backend at all.
    pub platform_supported: bool,
    /// One entry per required external command.
    pub commands: Vec<CommandCheck>,
}

impl FileSetupReport {
    /// `true` when the platform is supported and every command was found.
    pub fn is_ready(&self) -> bool {
        self.platform_supported && self.commands.iter().all(|c| c.found)
    }

    /// Names of commands that could not be run.
    pub fn missing(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| !c.found)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serialises_in_canonical_order() {
        let h = JwtHeader::new("HS256");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#"{"alg":"HS256","typ":"JWT"}"#);
    }

    #[test]
    fn header_ignores_unknown_fields() {
        let h: JwtHeader = serde_json::from_str(r#"{"alg":"RS256","typ":"JWT","kid":"k1"}"#).unwrap();
        assert_eq!(h.alg, "RS256");
        assert_eq!(h.typ, "JWT");
    }

    #[test]
    fn header_without_typ_deserialises_empty() {
        let h: JwtHeader = serde_json::from_str(r#"{"alg":"HS256"}"#).unwrap();
        assert!(h.typ.is_empty());
    }

    fn check(name: &str, found: bool) -> CommandCheck {
        CommandCheck {
            name: name.into(),
            purpose: "test".into(),
            found,
            exit_code: Some(if found { 0 } else { 127 }),
            version: None,
        }
    }

    #[test]
    fn report_readiness() {
        let report = FileSetupReport {
            platform_supported: true,
            commands: vec![check("openssl", true), check("xxd", false)],
        };
        assert!(!report.is_ready());
        assert_eq!(report.missing(), vec!["xxd"]);

        let ready = FileSetupReport {
            platform_supported: true,
            commands: vec![check("openssl", true)],
        };
        assert!(ready.is_ready());
    }

    #[test]
    fn report_serde_round_trip() {
        let report = FileSetupReport {
            platform_supported: false,
            commands: vec![check("truncate", true)],
        };
        let json = serde_json::to_string(&report).unwrap();
        let decoded: FileSetupReport = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, report);
    }
}
