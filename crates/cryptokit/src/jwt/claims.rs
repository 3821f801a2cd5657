//! Registered-claim validation.
//!
//! A claim is checked when it is required, or when it is present and
//! `validate_defined_claims` is on. Required-but-missing and wrong-typed
//! claims fail [`CryptoError::ClaimValidationFailed`] naming the claim;
//! date claims fail [`CryptoError::Expired`] / [`CryptoError::NotYetValid`].

use serde_json::Value as Json;

use common::{CryptoError, Result};

use super::Claims;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimRules {
    /// Allowed `iss` values. Non-empty makes `iss` required.
    pub issuers: Vec<String>,
    /// Required `sub` value.
    pub subject: Option<String>,
    /// Allowed `aud` values. Non-empty makes `aud` required.
    pub audiences: Vec<String>,
    /// Required `jti` value.
    pub jwt_id: Option<String>,
    pub require_exp: bool,
    pub require_nbf: bool,
    pub require_iat: bool,
    pub validate_defined_claims: bool,
    /// Clock skew tolerance for `exp` and `nbf`, in seconds.
    pub leeway_secs: u64,
}

impl ClaimRules {
    pub fn validate(&self, claims: &Claims, now_secs: i64) -> Result<()> {
        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);

        if let Some(iss) = self.string_claim(claims, "iss", !self.issuers.is_empty())? {
            if !self.issuers.is_empty() && !self.issuers.iter().any(|allowed| allowed == iss) {
                return Err(failed("iss", format!("issuer `{iss}` is not allowed")));
            }
        }

        if let Some(sub) = self.string_claim(claims, "sub", self.subject.is_some())? {
            if let Some(required) = &self.subject {
                if sub != required {
                    return Err(failed("sub", "subject does not match"));
                }
            }
        }

        self.check_audience(claims)?;

        if let Some(exp) = self.date_claim(claims, "exp", self.require_exp)? {
            if now_secs > exp.saturating_add(leeway) {
                return Err(CryptoError::Expired(format!("token expired at {exp}")));
            }
        }

        if let Some(nbf) = self.date_claim(claims, "nbf", self.require_nbf)? {
            if now_secs < nbf.saturating_sub(leeway) {
                return Err(CryptoError::NotYetValid(format!("token not valid before {nbf}")));
            }
        }

        if self.checks("iat", claims, self.require_iat) {
            match claims.get("iat") {
                None => return Err(failed("iat", "required claim is missing")),
                Some(v) if v.as_i64().is_none() => return Err(failed("iat", "must be an integer")),
                Some(_) => {}
            }
        }

        if let Some(jti) = self.string_claim(claims, "jti", self.jwt_id.is_some())? {
            if let Some(required) = &self.jwt_id {
                if jti != required {
                    return Err(failed("jti", "token id does not match"));
                }
            }
        }

        Ok(())
    }

    fn checks(&self, name: &str, claims: &Claims, required: bool) -> bool {
        required || (self.validate_defined_claims && claims.contains_key(name))
    }

    /// The claim as a string, if it must be checked.
    fn string_claim<'c>(&self, claims: &'c Claims, name: &str, required: bool) -> Result<Option<&'c str>> {
        if !self.checks(name, claims, required) {
            return Ok(None);
        }
        match claims.get(name) {
            None => Err(failed(name, "required claim is missing")),
            Some(Json::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(failed(name, "must be a string")),
        }
    }

    /// The claim as NumericDate seconds, if it must be checked.
    fn date_claim(&self, claims: &Claims, name: &str, required: bool) -> Result<Option<i64>> {
        if !self.checks(name, claims, required) {
            return Ok(None);
        }
        match claims.get(name) {
            None => Err(failed(name, "required claim is missing")),
            Some(Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.floor() as i64))
                .map(Some)
                .ok_or_else(|| failed(name, "must be a NumericDate")),
            Some(_) => Err(failed(name, "must be a NumericDate")),
        }
    }

    fn check_audience(&self, claims: &Claims) -> Result<()> {
        if !self.checks("aud", claims, !self.audiences.is_empty()) {
            return Ok(());
        }
        let values: Vec<&str> = match claims.get("aud") {
            None => return Err(failed("aud", "required claim is missing")),
            Some(Json::String(s)) => vec![s.as_str()],
            Some(Json::Array(items)) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| failed("aud", "must contain only strings")))
                .collect::<Result<_>>()?,
            Some(_) => return Err(failed("aud", "must be a string or an array of strings")),
        };
        if !self.audiences.is_empty() && !values.iter().any(|v| self.audiences.iter().any(|a| a == v)) {
            return Err(failed("aud", "no audience is allowed"));
        }
        Ok(())
    }
}

fn failed(claim: &str, reason: impl Into<String>) -> CryptoError {
    CryptoError::ClaimValidationFailed {
        claim: claim.to_owned(),
        reason: reason.into(),
    }
}
