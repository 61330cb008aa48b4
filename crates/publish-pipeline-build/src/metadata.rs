//! イメージのタグ・ラベル解決
//!
//! トリガーイベントと固定のルール表だけからタグとラベルを計算します。
//! 時刻・ネットワーク・環境変数には一切アクセスしないため、
//! 同じイベントからは常に同じ結果が得られます。

use crate::trigger::{RefType, TriggerEvent};
use serde::Serialize;
use std::collections::BTreeMap;

pub const LABEL_TITLE: &str = "org.opencontainers.image.title";
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";
pub const LABEL_REVISION: &str = "org.opencontainers.image.revision";
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";
pub const LABEL_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// 重複なし・挿入順を保持するタグ列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既に含まれているタグは無視する
    pub fn push(&mut self, tag: String) {
        if !self.0.contains(&tag) {
            self.0.push(tag);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// ラベルキー順に並んだラベル集合
pub type LabelSet = BTreeMap<String, String>;

/// タグ付けルール
///
/// 各ルールは独立に評価され、マッチしたものはすべて出力される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagRule {
    /// ブランチ名
    RefBranch,
    /// `pr-<number>`
    RefPr,
    /// タグ名そのもの (`v1.2.3`)
    SemverFull,
    /// `X.Y`
    SemverMajorMinor,
}

impl TagRule {
    /// デフォルトのルール表
    pub const DEFAULT: [TagRule; 4] = [
        TagRule::RefBranch,
        TagRule::RefPr,
        TagRule::SemverFull,
        TagRule::SemverMajorMinor,
    ];

    pub fn apply(self, event: &TriggerEvent) -> Option<String> {
        match self {
            TagRule::RefBranch => (event.ref_type() == RefType::Branch)
                .then(|| sanitize_tag(event.name()))
                .filter(|tag| !tag.is_empty()),
            TagRule::RefPr => event.pr_number().map(|n| format!("pr-{}", n)),
            TagRule::SemverFull => event.semver().map(|_| event.name().to_string()),
            TagRule::SemverMajorMinor => event.semver().map(|v| v.major_minor()),
        }
    }
}

/// ブランチ名を Docker タグとして使える形に変換
///
/// 英数字・`.`・`-`・`_` 以外は `-` に置き換え、先頭の `.` と `-` を除き、128 文字に切り詰める。
pub fn sanitize_tag(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    replaced
        .trim_start_matches(['.', '-'])
        .chars()
        .take(128)
        .collect()
}

/// 解決済みのメタデータ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub tags: TagSet,
    pub labels: LabelSet,
}

/// タグ・ラベルの解決器
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    rules: Vec<TagRule>,
    image_name: String,
    static_labels: LabelSet,
}

impl MetadataResolver {
    /// デフォルトのルール表で作成
    ///
    /// `image_name` はレジストリを含まないイメージ名 (例: "org/app")
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            rules: TagRule::DEFAULT.to_vec(),
            image_name: image_name.into(),
            static_labels: LabelSet::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<TagRule>) -> Self {
        self.rules = rules;
        self
    }

    /// 設定ファイル由来の固定ラベル
    ///
    /// OCI の標準キーは上書きしない
    pub fn with_static_labels(mut self, labels: LabelSet) -> Self {
        self.static_labels = labels;
        self
    }

    pub fn resolve(&self, event: &TriggerEvent) -> ImageMetadata {
        let tags = self.resolve_tags(event);
        let labels = self.resolve_labels(event, &tags);
        ImageMetadata { tags, labels }
    }

    fn resolve_tags(&self, event: &TriggerEvent) -> TagSet {
        let mut tags = TagSet::new();
        for rule in &self.rules {
            if let Some(tag) = rule.apply(event) {
                tracing::debug!(rule = ?rule, tag = %tag, "Tag rule matched");
                tags.push(tag);
            }
        }
        tags
    }

    fn resolve_labels(&self, event: &TriggerEvent, tags: &TagSet) -> LabelSet {
        let mut labels = self.static_labels.clone();

        let title = self
            .image_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.image_name);
        if !title.is_empty() {
            labels.insert(LABEL_TITLE.to_string(), title.to_string());
        }
        if let Some(url) = event.repository_url() {
            labels.insert(LABEL_SOURCE.to_string(), url.to_string());
        }
        if let Some(sha) = event.sha() {
            labels.insert(LABEL_REVISION.to_string(), sha.to_string());
        }
        if let Some(version) = tags.first() {
            labels.insert(LABEL_VERSION.to_string(), version.to_string());
        }
        labels.insert(LABEL_REF_NAME.to_string(), event.fetch_ref());

        labels
    }
}
