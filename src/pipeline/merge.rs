use std::collections::HashSet;

use crate::store::{DatasetStore, LabelMap, models::encode_secondary_tags};

use super::batch::Batch;

/// 1バッチ分のマージ結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// ラベルが見つかったバッチ内の識別子数（重複は1つと数える）
    pub matched: usize,
    /// 書き換えたストアの行数
    pub rows_updated: usize,
    /// ラベルが返ってこなかったバッチ内の識別子（入力順）
    pub missing: Vec<String>,
    /// バッチ外の識別子（無視したもの、昇順）
    pub extraneous: Vec<String>,
}

impl MergeOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.extraneous.is_empty()
    }
}

/// ラベルマップをストアへ反映する。
///
/// バッチに含まれる識別子だけを対象に、その識別子を持つすべての行のラベル列を
/// 上書きする。マップに無い識別子の行は変更しない。何度適用しても結果は同じ。
pub fn merge(store: &mut DatasetStore, batch: &Batch<'_>, labels: &LabelMap) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen = HashSet::with_capacity(batch.len());

    for id in batch.ids() {
        if !seen.insert(id) {
            continue;
        }
        match labels.get(id) {
            Some(label) => {
                let tags = encode_secondary_tags(&label.secondary_tags);
                outcome.matched += 1;
                outcome.rows_updated += store.set_labels(id, &label.primary_category, &tags);
            }
            None => outcome.missing.push(id.to_string()),
        }
    }

    outcome.extraneous = labels
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    outcome.extraneous.sort();

    outcome
}
