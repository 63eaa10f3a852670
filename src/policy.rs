//! Endorsement policies
//!
//! A policy is a threshold tree over organization principals. `AND` and `OR`
//! are sugar for `OutOf(n, ..)` with n equal to the number of rules or 1.
//! The textual form follows the familiar signature-policy syntax:
//!
//! ```text
//! AND('Org1MSP.member', 'Org2MSP.member')
//! OR('Org1MSP.member', AND('Org2MSP.admin', 'Org3MSP.peer'))
//! OutOf(2, 'Org1MSP.member', 'Org2MSP.member', 'Org3MSP.member')
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::types::{LifecycleError, Result};

/// Role a principal must hold within its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MspRole {
    Member,
    Admin,
    Client,
    Peer,
}

impl MspRole {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Client => "client",
            Self::Peer => "peer",
        }
    }
}

impl FromStr for MspRole {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "client" => Ok(Self::Client),
            "peer" => Ok(Self::Peer),
            other => Err(LifecycleError::Policy(format!("unknown role '{other}'"))),
        }
    }
}

/// An organization plus the role a signer must have in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Principal {
    pub msp_id: String,
    pub role: MspRole,
}

impl Principal {
    pub fn new(msp_id: impl Into<String>, role: MspRole) -> Self {
        Self {
            msp_id: msp_id.into(),
            role,
        }
    }

    pub fn member(msp_id: impl Into<String>) -> Self {
        Self::new(msp_id, MspRole::Member)
    }

    /// Any identity of the organization satisfies `member`; other roles must match exactly.
    pub fn is_satisfied_by(&self, signer: &Principal) -> bool {
        self.msp_id == signer.msp_id && (self.role == MspRole::Member || self.role == signer.role)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}.{}'", self.msp_id, self.role.as_str())
    }
}

/// Boolean expression over organization principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndorsementPolicy {
    SignedBy {
        principal: Principal,
    },
    OutOf {
        required: usize,
        rules: Vec<EndorsementPolicy>,
    },
}

impl EndorsementPolicy {
    pub fn signed_by(principal: Principal) -> Self {
        Self::SignedBy { principal }
    }

    /// Satisfied by a signature from any member of any listed organization.
    pub fn signed_by_any_member<S: AsRef<str>>(msp_ids: &[S]) -> Self {
        Self::OutOf {
            required: 1,
            rules: Self::member_rules(msp_ids),
        }
    }

    /// Satisfied only when every listed organization has signed.
    pub fn signed_by_all_members<S: AsRef<str>>(msp_ids: &[S]) -> Self {
        let rules = Self::member_rules(msp_ids);
        Self::OutOf {
            required: rules.len(),
            rules,
        }
    }

    fn member_rules<S: AsRef<str>>(msp_ids: &[S]) -> Vec<EndorsementPolicy> {
        msp_ids
            .iter()
            .map(|id| Self::signed_by(Principal::member(id.as_ref())))
            .collect()
    }

    /// Every organization referenced anywhere in the expression.
    pub fn organizations(&self) -> BTreeSet<String> {
        let mut orgs = BTreeSet::new();
        self.collect_organizations(&mut orgs);
        orgs
    }

    fn collect_organizations(&self, orgs: &mut BTreeSet<String>) {
        match self {
            Self::SignedBy { principal } => {
                orgs.insert(principal.msp_id.clone());
            }
            Self::OutOf { rules, .. } => {
                for rule in rules {
                    rule.collect_organizations(orgs);
                }
            }
        }
    }

    /// Check that the expression can be satisfied at all.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SignedBy { principal } => {
                if principal.msp_id.trim().is_empty() {
                    return Err(LifecycleError::Policy(
                        "principal with empty organization".to_string(),
                    ));
                }
                Ok(())
            }
            Self::OutOf { required, rules } => {
                if rules.is_empty() {
                    return Err(LifecycleError::Policy(
                        "policy references no organizations".to_string(),
                    ));
                }
                if *required == 0 || *required > rules.len() {
                    return Err(LifecycleError::Policy(format!(
                        "unsatisfiable threshold: {} of {}",
                        required,
                        rules.len()
                    )));
                }
                rules.iter().try_for_each(|rule| rule.validate())
            }
        }
    }

    /// Validate the structure and that every organization is known to the network.
    pub fn validate_against<S: AsRef<str>>(&self, known_msp_ids: &[S]) -> Result<()> {
        self.validate()?;
        let unknown: Vec<String> = self
            .organizations()
            .into_iter()
            .filter(|org| !known_msp_ids.iter().any(|k| k.as_ref() == org))
            .collect();
        if !unknown.is_empty() {
            return Err(LifecycleError::Policy(format!(
                "unknown organization(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }

    /// Whether the given set of signers satisfies the expression.
    pub fn is_satisfied_by(&self, signers: &[Principal]) -> bool {
        match self {
            Self::SignedBy { principal } => signers.iter().any(|s| principal.is_satisfied_by(s)),
            Self::OutOf { required, rules } => {
                let satisfied = rules
                    .iter()
                    .filter(|rule| rule.is_satisfied_by(signers))
                    .count();
                satisfied >= *required
            }
        }
    }
}

impl fmt::Display for EndorsementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedBy { principal } => write!(f, "{principal}"),
            Self::OutOf { required, rules } => {
                if *required == 1 {
                    f.write_str("OR(")?;
                } else if *required == rules.len() {
                    f.write_str("AND(")?;
                } else {
                    write!(f, "OutOf({required}, ")?;
                }
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{rule}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for EndorsementPolicy {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser::new(s);
        let policy = parser.parse_expr()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(parser.error("trailing input"));
        }
        Ok(policy)
    }
}

/// Recursive-descent parser for the textual policy syntax.
struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, what: &str) -> LifecycleError {
        LifecycleError::Policy(format!(
            "cannot parse '{}': {} at position {}",
            self.input, what, self.pos
        ))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn parse_expr(&mut self) -> Result<EndorsementPolicy> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') | Some('"') => {
                let principal = self.parse_principal()?;
                Ok(EndorsementPolicy::signed_by(principal))
            }
            Some(c) if c.is_ascii_alphabetic() => self.parse_gate(),
            _ => Err(self.error("expected a gate or a quoted principal")),
        }
    }

    fn parse_gate(&mut self) -> Result<EndorsementPolicy> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.expect('(')?;

        let required = if name.eq_ignore_ascii_case("outof") {
            let n = self.parse_number()?;
            self.expect(',')?;
            Some(n)
        } else if name.eq_ignore_ascii_case("and") || name.eq_ignore_ascii_case("or") {
            None
        } else {
            return Err(self.error(&format!("unknown gate '{name}'")));
        };

        let mut rules = vec![self.parse_expr()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    rules.push(self.parse_expr()?);
                }
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }

        let required = match required {
            Some(n) => n,
            None if name.eq_ignore_ascii_case("and") => rules.len(),
            None => 1,
        };
        Ok(EndorsementPolicy::OutOf { required, rules })
    }

    fn parse_number(&mut self) -> Result<usize> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits
            .parse()
            .map_err(|_| self.error("expected a threshold number"))
    }

    fn parse_principal(&mut self) -> Result<Principal> {
        let quote = self.peek().ok_or_else(|| self.error("expected quote"))?;
        self.pos += 1;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c != quote) {
            self.pos += 1;
        }
        if self.at_end() {
            return Err(self.error("unterminated principal"));
        }
        let body: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;

        let (msp_id, role) = body
            .rsplit_once('.')
            .ok_or_else(|| self.error(&format!("principal '{body}' must be '<MSP>.<role>'")))?;
        if msp_id.is_empty() {
            return Err(self.error("principal with empty organization"));
        }
        Ok(Principal::new(msp_id, role.parse()?))
    }
}
