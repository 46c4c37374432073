//! 主カテゴリとセカンダリタグの定義。
//!
//! タクソノミーの内容はそのままプロンプトに埋め込む静的設定で、返ってきたラベルの
//! 検証には使わない（監査ログのみ）。

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::LabelResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub description: String,
}

/// セカンダリタグの1フィールド。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagField {
    pub name: String,
    pub values: Vec<String>,
    /// 値ごとの判断基準。プロンプトに箇条書きで入る。
    #[serde(default)]
    pub guidance: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub categories: Vec<Category>,
    pub tags: Vec<TagField>,
}

impl Taxonomy {
    /// YAMLファイルからタクソノミーを読み込む。
    ///
    /// # Errors
    /// 読み込み・パースに失敗した場合、カテゴリやタグが空・重複している場合はエラーを返す。
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read taxonomy file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("invalid taxonomy file {}", path.display()))
    }

    /// # Errors
    /// YAMLとして不正、またはカテゴリ・タグ定義が不正な場合はエラーを返す。
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let taxonomy: Self = serde_yaml::from_str(raw).context("failed to parse taxonomy YAML")?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            bail!("taxonomy must define at least one category");
        }
        if self.tags.is_empty() {
            bail!("taxonomy must define at least one secondary tag");
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.name.as_str()) {
                bail!("duplicate category name: {}", category.name);
            }
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.name.as_str()) {
                bail!("duplicate tag name: {}", tag.name);
            }
            if tag.values.is_empty() {
                bail!("tag {} has no allowed values", tag.name);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn contains_category(&self, name: &str) -> bool {
        self.categories.iter().any(|category| category.name == name)
    }

    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&TagField> {
        self.tags.iter().find(|tag| tag.name == name)
    }

    /// タクソノミーから外れたラベルを列挙する。ラベル自体は変更しない。
    #[must_use]
    pub fn audit(&self, label: &LabelResult) -> Vec<String> {
        let mut violations = Vec::new();

        if !self.contains_category(&label.primary_category) {
            violations.push(format!("unknown category {:?}", label.primary_category));
        }

        let Value::Object(tags) = &label.secondary_tags else {
            violations.push("secondary tags are not an object".to_string());
            return violations;
        };

        for field in &self.tags {
            match tags.get(&field.name) {
                None => violations.push(format!("missing tag {}", field.name)),
                Some(Value::String(value)) if field.values.iter().any(|v| v == value) => {}
                Some(other) => {
                    violations.push(format!("unexpected {} value {other}", field.name));
                }
            }
        }

        violations
    }

    /// 組み込みのタクソノミー。
    #[must_use]
    pub fn builtin() -> Self {
        let categories = [
            (
                "Market / Economy / Jobs",
                "Macro economy, stock market, jobs, unemployment, growth, inflation in general.",
            ),
            (
                "Trade Policy / Tariffs / Manufacturing",
                "Trade policy, tariffs, trade wars, imports/exports, manufacturing policy.",
            ),
            (
                "Regulation / Antitrust / Legal Actions",
                "Regulation, antitrust cases, lawsuits, investigations, bans, legal threats.",
            ),
            (
                "Foreign Policy / Geopolitics / Diplomacy",
                "Foreign relations, diplomacy, allies/adversaries, treaties, high-level geopolitics.",
            ),
            (
                "Defense / Military / National Security / Veterans",
                "Military, defense spending, troops, wars, national security, veterans.",
            ),
            (
                "Energy / Oil & Gas / Climate / Environment",
                "Oil, gas, pipelines, energy prices, climate change, environmental policy.",
            ),
            (
                "Healthcare / COVID-19 / Public Health",
                "Healthcare policy, insurance, COVID-19, vaccines, public health issues.",
            ),
            (
                "Immigration / Border Security",
                "Immigration, border security, walls, migrants, visas.",
            ),
            (
                "Official Government Announcements / Executive Actions",
                "Official policy announcements, executive orders, proclamations, formal WH actions.",
            ),
            (
                "Campaign / Elections / Rallies / Political Messaging",
                "Campaign events, election talk, rallies, political branding and messaging.",
            ),
            (
                "Attacks / Criticism / Conflicts (Media, Opponents, Companies)",
                "Attacks or criticism aimed at media, political opponents, companies or individuals.",
            ),
            (
                "Personal / Social / Non-Policy Content (Congrats, Holidays, Misc)",
                "Congrats, holidays, personal thanks, sports, general social commentary.",
            ),
            (
                "Otherwise",
                "Anything that does not clearly fit the above categories.",
            ),
        ]
        .into_iter()
        .map(|(name, description)| Category {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect();

        let tags = vec![
            tag_field(
                "timing",
                &["InTradingWindow", "OutsideTradingWindow", "Unknown"],
                &[
                    "InTradingWindow = refers to or was posted during regular US stock market trading hours, or mentions intraday moves.",
                    "OutsideTradingWindow = clearly after-hours, pre-market, weekends, or not time-specific.",
                    "Unknown = timing cannot be inferred at all.",
                ],
            ),
            tag_field(
                "targets_entity",
                &["True", "False"],
                &[
                    "True = clearly directed at, attacking or praising a specific company, CEO, or corporate figure.",
                    "False = otherwise.",
                ],
            ),
            tag_field(
                "sentiment",
                &["Positive", "Negative", "Neutral", "Mixed", "Unclear"],
                &["Overall tone of the post."],
            ),
            tag_field(
                "has_action_keywords",
                &["True", "False"],
                &[
                    "True = explicitly suggests market movement or trading actions, using words like 'soar', 'crash', 'plunge', 'rally', 'bullish', 'bearish', 'buy', 'sell', 'dump', 'moon'.",
                    "False = otherwise.",
                ],
            ),
            tag_field(
                "intensity",
                &["Low", "Medium", "High"],
                &[
                    "Low = calm, descriptive language.",
                    "Medium = somewhat emotional or emphatic.",
                    "High = very emotional or intense language, often with many capital letters or exclamation marks.",
                ],
            ),
        ];

        Self { categories, tags }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

fn tag_field(name: &str, values: &[&str], guidance: &[&str]) -> TagField {
    TagField {
        name: name.to_string(),
        values: values.iter().map(ToString::to_string).collect(),
        guidance: guidance.iter().map(ToString::to_string).collect(),
    }
}
