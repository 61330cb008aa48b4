//! プッシュ可否の判定
//!
//! プッシュするかどうかは ref だけで決まり、パイプライン開始時に一度だけ計算される。

use crate::trigger::TriggerEvent;
use serde::Serialize;

const PUBLISH_BRANCH: &str = "refs/heads/master";
const RELEASE_BRANCH_PREFIX: &str = "refs/heads/releases";

/// ビルドしたイメージをレジストリにプッシュするか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PublishDecision(bool);

impl PublishDecision {
    /// `refs/heads/master` または `refs/heads/releases*` のときのみプッシュ
    pub fn evaluate(event: &TriggerEvent) -> Self {
        Self::for_ref(&event.fetch_ref())
    }

    pub fn for_ref(git_ref: &str) -> Self {
        Self(git_ref == PUBLISH_BRANCH || git_ref.starts_with(RELEASE_BRANCH_PREFIX))
    }

    pub fn should_push(self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(git_ref: &str) -> bool {
        PublishDecision::evaluate(&TriggerEvent::from_ref(git_ref).unwrap()).should_push()
    }

    #[test]
    fn test_master_is_published() {
        assert!(decide("refs/heads/master"));
    }

    #[test]
    fn test_release_branches_are_published() {
        assert!(decide("refs/heads/releases"));
        assert!(decide("refs/heads/releases/1.x"));
        assert!(decide("refs/heads/releases-2024"));
    }

    #[test]
    fn test_other_branches_are_not_published() {
        assert!(!decide("refs/heads/main"));
        assert!(!decide("refs/heads/feature/releases"));
        assert!(!decide("refs/heads/master-backup"));
    }

    #[test]
    fn test_tags_and_pull_requests_are_not_published() {
        assert!(!decide("refs/tags/v1.2.3"));
        assert!(!decide("refs/pull/42/merge"));
    }

    #[test]
    fn test_bare_branch_name_is_normalized() {
        assert!(decide("master"));
        assert!(!decide("develop"));
    }
}
