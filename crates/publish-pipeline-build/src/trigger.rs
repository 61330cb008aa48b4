//! トリガーイベント
//!
//! CI プラットフォームから渡される ref (例: `refs/heads/master`,
//! `refs/tags/v1.2.3`, `refs/pull/42/merge`) を解析し、
//! パイプライン全体で不変のイベントとして保持します。

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fmt;

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";
const PULL_PREFIX: &str = "refs/pull/";

/// ref の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Branch,
    Tag,
    PullRequest,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefType::Branch => "branch",
            RefType::Tag => "tag",
            RefType::PullRequest => "pull_request",
        };
        f.write_str(s)
    }
}

/// セマンティックバージョン: MAJOR.MINOR.PATCH[-pre]
///
/// 先頭の `v` は許容する (`v1.2.3`)。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Semver {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.strip_prefix('v').unwrap_or(input);

        let (version_part, pre) = match input.split_once('-') {
            Some((v, p)) if !p.is_empty() && is_valid_prerelease(p) => (v, Some(p.to_string())),
            Some(_) => return None,
            None => (input, None),
        };

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| !is_numeric_identifier(p)) {
            return None;
        }

        Some(Self {
            major: parts[0].parse().ok()?,
            minor: parts[1].parse().ok()?,
            patch: parts[2].parse().ok()?,
            pre,
        })
    }

    /// "X.Y" 形式
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

fn is_numeric_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
}

fn is_valid_prerelease(s: &str) -> bool {
    s.split('.').all(|ident| {
        !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// パイプラインを起動したイベント
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    ref_type: RefType,
    /// ブランチ名、タグ名、または PR 番号
    name: String,
    pr_number: Option<u64>,
    is_semver: bool,
    sha: Option<String>,
    repository_url: Option<String>,
}

impl TriggerEvent {
    /// ref 文字列からイベントを作成
    ///
    /// - `refs/heads/<branch>` → ブランチ
    /// - `refs/tags/<tag>` → タグ
    /// - `refs/pull/<n>/merge`, `refs/pull/<n>/head` → プルリクエスト
    /// - `refs/` で始まらない名前 → ブランチとして扱う
    pub fn from_ref(git_ref: &str) -> Result<Self> {
        let git_ref = git_ref.trim();
        if git_ref.is_empty() {
            return Err(PipelineError::InvalidRef("(empty)".to_string()));
        }

        let (ref_type, name, pr_number) = if let Some(branch) = git_ref.strip_prefix(HEADS_PREFIX)
        {
            (RefType::Branch, branch.to_string(), None)
        } else if let Some(tag) = git_ref.strip_prefix(TAGS_PREFIX) {
            (RefType::Tag, tag.to_string(), None)
        } else if let Some(rest) = git_ref.strip_prefix(PULL_PREFIX) {
            let number = parse_pull_number(rest)
                .ok_or_else(|| PipelineError::InvalidRef(git_ref.to_string()))?;
            (RefType::PullRequest, number.to_string(), Some(number))
        } else if git_ref.starts_with("refs/") {
            return Err(PipelineError::InvalidRef(git_ref.to_string()));
        } else {
            (RefType::Branch, git_ref.to_string(), None)
        };

        if name.is_empty() {
            return Err(PipelineError::InvalidRef(git_ref.to_string()));
        }

        let is_semver = ref_type == RefType::Tag && Semver::parse(&name).is_some();

        Ok(Self {
            git_ref: git_ref.to_string(),
            ref_type,
            name,
            pr_number,
            is_semver,
            sha: None,
            repository_url: None,
        })
    }

    pub fn with_sha(mut self, sha: Option<String>) -> Self {
        self.sha = sha.filter(|s| !s.is_empty());
        self
    }

    pub fn with_repository_url(mut self, url: Option<String>) -> Self {
        self.repository_url = url.filter(|s| !s.is_empty());
        self
    }

    /// 完全な ref (`refs/heads/master` など)
    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub fn ref_type(&self) -> RefType {
        self.ref_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr_number
    }

    pub fn is_semver(&self) -> bool {
        self.is_semver
    }

    /// タグ ref の場合のみバージョンを返す
    pub fn semver(&self) -> Option<Semver> {
        if self.ref_type == RefType::Tag {
            Semver::parse(&self.name)
        } else {
            None
        }
    }

    pub fn sha(&self) -> Option<&str> {
        self.sha.as_deref()
    }

    pub fn repository_url(&self) -> Option<&str> {
        self.repository_url.as_deref()
    }

    /// git fetch に渡す ref
    ///
    /// ブランチ名だけが指定された場合も完全な ref に正規化する
    pub fn fetch_ref(&self) -> String {
        match self.ref_type {
            RefType::Branch if !self.git_ref.starts_with("refs/") => {
                format!("{}{}", HEADS_PREFIX, self.git_ref)
            }
            _ => self.git_ref.clone(),
        }
    }
}

/// `42/merge` → 42
fn parse_pull_number(rest: &str) -> Option<u64> {
    let (number, suffix) = rest.split_once('/')?;
    if !matches!(suffix, "merge" | "head") {
        return None;
    }
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ref_branch() {
        let event = TriggerEvent::from_ref("refs/heads/master").unwrap();
        assert_eq!(event.ref_type(), RefType::Branch);
        assert_eq!(event.name(), "master");
        assert!(!event.is_semver());
        assert_eq!(event.pr_number(), None);
    }

    #[test]
    fn test_from_ref_nested_branch() {
        let event = TriggerEvent::from_ref("refs/heads/releases/2024-q1").unwrap();
        assert_eq!(event.ref_type(), RefType::Branch);
        assert_eq!(event.name(), "releases/2024-q1");
    }

    #[test]
    fn test_from_ref_bare_name_is_branch() {
        let event = TriggerEvent::from_ref("develop").unwrap();
        assert_eq!(event.ref_type(), RefType::Branch);
        assert_eq!(event.git_ref(), "develop");
        assert_eq!(event.fetch_ref(), "refs/heads/develop");
    }

    #[test]
    fn test_from_ref_semver_tag() {
        let event = TriggerEvent::from_ref("refs/tags/v1.2.3").unwrap();
        assert_eq!(event.ref_type(), RefType::Tag);
        assert_eq!(event.name(), "v1.2.3");
        assert!(event.is_semver());
        assert_eq!(event.semver().unwrap().major_minor(), "1.2");
    }

    #[test]
    fn test_from_ref_non_semver_tag() {
        let event = TriggerEvent::from_ref("refs/tags/nightly").unwrap();
        assert_eq!(event.ref_type(), RefType::Tag);
        assert!(!event.is_semver());
        assert!(event.semver().is_none());
    }

    #[test]
    fn test_from_ref_pull_request() {
        let event = TriggerEvent::from_ref("refs/pull/42/merge").unwrap();
        assert_eq!(event.ref_type(), RefType::PullRequest);
        assert_eq!(event.pr_number(), Some(42));
        assert_eq!(event.fetch_ref(), "refs/pull/42/merge");

        let head = TriggerEvent::from_ref("refs/pull/7/head").unwrap();
        assert_eq!(head.pr_number(), Some(7));
    }

    #[test]
    fn test_from_ref_invalid() {
        assert!(TriggerEvent::from_ref("").is_err());
        assert!(TriggerEvent::from_ref("refs/heads/").is_err());
        assert!(TriggerEvent::from_ref("refs/pull/abc/merge").is_err());
        assert!(TriggerEvent::from_ref("refs/pull/42/other").is_err());
        assert!(TriggerEvent::from_ref("refs/remotes/origin/main").is_err());
    }

    #[test]
    fn test_with_sha_ignores_empty() {
        let event = TriggerEvent::from_ref("refs/heads/master")
            .unwrap()
            .with_sha(Some(String::new()));
        assert_eq!(event.sha(), None);
    }

    #[test]
    fn test_semver_parse() {
        let v = Semver::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(v.pre, None);

        let v = Semver::parse("v2.0.0-rc.1").unwrap();
        assert_eq!(v.pre.as_deref(), Some("rc.1"));
        assert_eq!(v.major_minor(), "2.0");
    }

    #[test]
    fn test_semver_parse_rejects() {
        assert!(Semver::parse("1.2").is_none());
        assert!(Semver::parse("1.2.3.4").is_none());
        assert!(Semver::parse("1.2.x").is_none());
        assert!(Semver::parse("01.2.3").is_none());
        assert!(Semver::parse("1.2.3-").is_none());
        assert!(Semver::parse("1.2.3-rc..1").is_none());
        assert!(Semver::parse("release").is_none());
    }
}
