// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// 版本解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version")]
    Empty,
    #[error("invalid version `{0}`")]
    Invalid(String),
    #[error("invalid constraint clause `{0}`")]
    InvalidClause(String),
    #[error("`~=` needs at least two release segments: `{0}`")]
    CompatibleTooShort(String),
}

/// 依赖库版本
///
/// 由点分隔的数字发布段组成，可带一个字母数字尾缀（如 `1.0rc1`）。
/// 比较时逐段按数值比较，缺失的段视为 0；带尾缀的版本排在同号正式版之前。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    release: Vec<u64>,
    tail: Option<String>,
    raw: String,
}

impl Version {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    fn trimmed_release(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |i| i + 1);
        &self.release[..end]
    }

    /// 判断发布段是否以给定前缀开头
    fn has_prefix(&self, prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, segment)| self.release.get(i).copied().unwrap_or(0) == *segment)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(VersionParseError::Empty);
        }
        let body = raw.strip_prefix('v').unwrap_or(raw);

        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (numeric, tail) = body.split_at(split);
        let numeric = numeric.trim_end_matches('.');
        if numeric.is_empty() {
            return Err(VersionParseError::Invalid(raw.to_string()));
        }

        let release = numeric
            .split('.')
            .map(|segment| segment.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError::Invalid(raw.to_string()))?;

        let tail = tail.trim_start_matches(['.', '-', '_', '+']);
        if !tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(VersionParseError::Invalid(raw.to_string()));
        }

        Ok(Version {
            release,
            tail: (!tail.is_empty()).then(|| tail.to_ascii_lowercase()),
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        match (&self.tail, &other.tail) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trimmed_release().hash(state);
        self.tail.hash(state);
    }
}

/// 约束运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
    Compatible,
}

impl Operator {
    fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Compatible => "~=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Operator,
    version: Version,
    wildcard: bool,
}

impl Clause {
    fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Eq if self.wildcard => candidate.has_prefix(self.version.release()),
            Operator::NotEq if self.wildcard => !candidate.has_prefix(self.version.release()),
            Operator::Eq => candidate == &self.version,
            Operator::NotEq => candidate != &self.version,
            Operator::Ge => candidate >= &self.version,
            Operator::Le => candidate <= &self.version,
            Operator::Gt => candidate > &self.version,
            Operator::Lt => candidate < &self.version,
            Operator::Compatible => {
                let release = self.version.release();
                candidate >= &self.version && candidate.has_prefix(&release[..release.len() - 1])
            }
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)?;
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

/// 版本约束
///
/// 逗号分隔的子句全部满足时约束成立；空约束或 `*` 表示任意版本
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(candidate))
    }

    /// 合并两个约束（取交集）
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut clauses = self.clauses.clone();
        for clause in &other.clauses {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        VersionConstraint { clauses }
    }

    /// 从候选版本中挑选满足约束的最高版本
    pub fn best_match<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        candidates.into_iter().filter(|v| self.matches(v)).max()
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let mut clauses = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (op, rest) = split_operator(part);
            let rest = rest.trim();
            let (rest, wildcard) = match rest.strip_suffix(".*") {
                Some(prefix) if matches!(op, Operator::Eq | Operator::NotEq) => (prefix, true),
                Some(_) => return Err(VersionParseError::InvalidClause(part.to_string())),
                None => (rest, false),
            };
            let version: Version = rest
                .parse()
                .map_err(|_| VersionParseError::InvalidClause(part.to_string()))?;
            if op == Operator::Compatible && version.release().len() < 2 {
                return Err(VersionParseError::CompatibleTooShort(part.to_string()));
            }
            clauses.push(Clause {
                op,
                version,
                wildcard,
            });
        }
        Ok(VersionConstraint { clauses })
    }
}

fn split_operator(clause: &str) -> (Operator, &str) {
    const OPERATORS: [(&str, Operator); 8] = [
        ("===", Operator::Eq),
        ("==", Operator::Eq),
        ("!=", Operator::NotEq),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("~=", Operator::Compatible),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];
    for (symbol, op) in OPERATORS {
        if let Some(rest) = clause.strip_prefix(symbol) {
            return (op, rest);
        }
    }
    // 裸版本号按精确匹配处理
    (Operator::Eq, clause)
}

impl TryFrom<String> for VersionConstraint {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionConstraint> for String {
    fn from(value: VersionConstraint) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("2.11.2") > v("2.11.0"));
        assert!(v("2.10") > v("2.9.1"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0a1") < v("1.0b1"));
    }

    #[test]
    fn test_invalid_versions() {
        assert!(matches!("".parse::<Version>(), Err(VersionParseError::Empty)));
        assert!("abc".parse::<Version>().is_err());
        assert!("1.0 beta".parse::<Version>().is_err());
    }

    #[test]
    fn test_constraint_matching() {
        assert!(c(">=2.0,<3").matches(&v("2.11.2")));
        assert!(!c(">=2.0,<3").matches(&v("3.0")));
        assert!(c("==2.11.*").matches(&v("2.11.7")));
        assert!(!c("==2.11.*").matches(&v("2.12.0")));
        assert!(c("~=2.11").matches(&v("2.99")));
        assert!(!c("~=2.11").matches(&v("3.0")));
        assert!(c("~=2.11.1").matches(&v("2.11.5")));
        assert!(!c("~=2.11.1").matches(&v("2.12.0")));
        assert!(c("!=1.5").matches(&v("1.6")));
        assert!(c("*").matches(&v("0.1")));
        assert!(c("1.2").matches(&v("1.2.0")));
    }

    #[test]
    fn test_constraint_round_trips_through_display() {
        let constraint = c(" >=2.0 , <3 ");
        assert_eq!(constraint.to_string(), ">=2.0,<3");
        assert_eq!(c("==1.2.*").to_string(), "==1.2.*");
        assert!(VersionConstraint::any().to_string().is_empty());
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(">=abc".parse::<VersionConstraint>().is_err());
        assert!(">=1.*".parse::<VersionConstraint>().is_err());
        assert!(matches!(
            "~=2".parse::<VersionConstraint>(),
            Err(VersionParseError::CompatibleTooShort(_))
        ));
    }

    #[test]
    fn test_best_match_picks_highest_satisfying() {
        let available = vec![v("2.9.0"), v("2.11.2"), v("3.0.0"), v("2.11.0")];
        assert_eq!(c("<3").best_match(&available), Some(&v("2.11.2")));
        assert_eq!(c(">=4").best_match(&available), None);
    }

    #[test]
    fn test_intersect_combines_clauses() {
        let merged = c(">=2").intersect(&c("<3"));
        assert!(merged.matches(&v("2.5")));
        assert!(!merged.matches(&v("3.1")));
    }
}
