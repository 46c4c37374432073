use std::{fmt::Write as _, sync::Arc};

use crate::store::Record;
use crate::taxonomy::Taxonomy;

use super::models::ClassificationPrompt;

/// バッチからオラクル用のプロンプトを構築する。
///
/// 同じバッチと同じタクソノミーからは常に同じプロンプトを返す。
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    taxonomy: Arc<Taxonomy>,
    system: String,
}

impl PromptBuilder {
    #[must_use]
    pub fn new(taxonomy: Arc<Taxonomy>, prompt_version: &str) -> Self {
        let system = render_system_message(&taxonomy, prompt_version);
        Self { taxonomy, system }
    }

    #[must_use]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    #[must_use]
    pub fn system_message(&self) -> &str {
        &self.system
    }

    /// バッチ1つ分のプロンプトを構築する。
    #[must_use]
    pub fn build(&self, records: &[Record]) -> ClassificationPrompt {
        ClassificationPrompt {
            system: self.system.clone(),
            user: render_user_message(records),
        }
    }
}

fn render_system_message(taxonomy: &Taxonomy, prompt_version: &str) -> String {
    let mut out = String::new();

    out.push_str("You are a classification engine.\n\n");
    out.push_str("Input: for each post you are given an ID, the text, and when available a timestamp and an existing coarse category from an earlier labeling run.\n\n");
    out.push_str("For EACH post:\n");
    out.push_str("1) Choose EXACTLY ONE primary_category, using one of these NAMES (case-sensitive):\n");
    for category in &taxonomy.categories {
        let _ = writeln!(out, "- {}: {}", category.name, category.description);
    }

    out.push_str("\n2) Produce a secondary_tags JSON object with ALL of the following fields:\n");
    for tag in &taxonomy.tags {
        let values: Vec<String> = tag.values.iter().map(|value| format!("\"{value}\"")).collect();
        let _ = writeln!(out, "- \"{}\": {}", tag.name, values.join(" | "));
        for line in &tag.guidance {
            let _ = writeln!(out, "    * {line}");
        }
    }

    out.push_str("\nOutput STRICTLY valid JSON, as a list of objects:\n");
    out.push_str(&render_example(taxonomy));

    out.push_str("\nRules:\n");
    out.push_str("- Use primary_category NAMES exactly as written above (case-sensitive).\n");
    out.push_str("- Always include ALL fields inside secondary_tags.\n");
    out.push_str("- Copy every ID exactly as given and return one object per post.\n");
    out.push_str("- The order of objects in the list must match the order of posts given.\n");
    out.push_str("- Do NOT output anything else besides the JSON list.\n");

    if let Some(timing) = taxonomy.tag("timing") {
        out.push_str("\nTimestamps:\n");
        let _ = writeln!(
            out,
            "Use the post's Timestamp, when present, to decide \"{}\".",
            timing.name
        );
        out.push_str("- Regular US trading hours are 09:30-16:00 Eastern Time; earlier is pre-market, later is after-hours.\n");
        // 値の並びは 窓内, 窓外, 不明 の順
        let value = |position: usize, fallback: &str| {
            timing
                .values
                .get(position)
                .map_or_else(|| fallback.to_string(), |value| format!("\"{value}\""))
        };
        let _ = writeln!(
            out,
            "- If the time clearly falls inside regular trading hours, use {}.",
            value(0, "the in-window value")
        );
        let _ = writeln!(
            out,
            "- If it clearly falls outside them, use {}.",
            value(1, "the out-of-window value")
        );
        let _ = writeln!(
            out,
            "- If the timezone or timing cannot be inferred, use {}.",
            value(2, "the unknown value")
        );
    }

    let _ = write!(out, "\nSystem version: {prompt_version}\n");
    out
}

fn render_example(taxonomy: &Taxonomy) -> String {
    let mut out = String::from("[\n  {\n    \"id\": \"123\",\n");
    let category = taxonomy
        .categories
        .first()
        .map_or("", |category| category.name.as_str());
    let _ = writeln!(out, "    \"primary_category\": \"{category}\",");
    out.push_str("    \"secondary_tags\": {\n");
    let fields: Vec<String> = taxonomy
        .tags
        .iter()
        .map(|tag| {
            let value = tag.values.last().map_or("", String::as_str);
            format!("      \"{}\": \"{value}\"", tag.name)
        })
        .collect();
    out.push_str(&fields.join(",\n"));
    out.push_str("\n    }\n  },\n  ...\n]\n");
    out
}

fn render_user_message(records: &[Record]) -> String {
    let mut out = String::from("Here are the posts to classify:\n");

    for (position, record) in records.iter().enumerate() {
        let _ = write!(out, "\nPost {}:\n", position + 1);
        let _ = writeln!(out, "ID: {}", flatten(&record.id));
        if let Some(timestamp) = &record.timestamp {
            let _ = writeln!(out, "Timestamp: {}", flatten(timestamp));
        }
        if let Some(category) = &record.prior_category {
            let _ = writeln!(out, "ExistingCategory: {}", flatten(category));
        }
        let _ = writeln!(out, "Text: {}", flatten(&record.text));
    }

    out
}

/// 改行を空白にして1行にする。
fn flatten(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(Arc::new(Taxonomy::builtin()), "v2")
    }

    #[test]
    fn system_message_lists_taxonomy_and_tag_schema() {
        let builder = builder();
        let system = builder.system_message();

        for category in &builder.taxonomy().categories {
            assert!(system.contains(&category.name), "missing {}", category.name);
        }
        assert!(system.contains(r#"- "sentiment": "Positive" | "Negative" | "Neutral" | "Mixed" | "Unclear""#));
        assert!(system.contains("order of objects in the list must match"));
        assert!(system.ends_with("System version: v2\n"));
    }

    #[test]
    fn user_message_renders_optional_fields_only_when_present() {
        let records = vec![
            Record::new("1", "Stocks soar!")
                .with_timestamp("2019-05-01 10:15:00")
                .with_prior_category("Economy"),
            Record::new("2", "No context here"),
        ];

        let prompt = builder().build(&records);

        assert_eq!(
            prompt.user,
            "Here are the posts to classify:\n\
             \nPost 1:\nID: 1\nTimestamp: 2019-05-01 10:15:00\nExistingCategory: Economy\nText: Stocks soar!\n\
             \nPost 2:\nID: 2\nText: No context here\n"
        );
    }

    #[test]
    fn embedded_newlines_are_flattened() {
        let records = vec![Record::new("9", "line one\nline two\r\nline three\rend")];

        let prompt = builder().build(&records);

        assert!(prompt.user.contains("Text: line one line two line three end\n"));
    }

    #[test]
    fn multiline_ids_stay_on_one_line() {
        let records = vec![Record::new("a\nb", "t")];

        let prompt = builder().build(&records);

        assert!(prompt.user.contains("ID: a b\nText: t\n"));
    }

    #[test]
    fn timing_rules_name_the_literal_values() {
        let builder = builder();
        let system = builder.system_message();

        assert!(system.contains("inside regular trading hours, use \"InTradingWindow\"."));
        assert!(system.contains("outside them, use \"OutsideTradingWindow\"."));
        assert!(system.contains("cannot be inferred, use \"Unknown\"."));
    }

    #[test]
    fn identical_batches_build_identical_prompts() {
        let records = vec![Record::new("1", "a"), Record::new("2", "b")];

        assert_eq!(builder().build(&records), builder().build(&records));
    }

    #[test]
    fn prompt_version_changes_only_the_system_message() {
        let records = vec![Record::new("1", "a")];
        let v2 = builder().build(&records);
        let v3 = PromptBuilder::new(Arc::new(Taxonomy::builtin()), "v3").build(&records);

        assert_ne!(v2.system, v3.system);
        assert_eq!(v2.user, v3.user);
    }
}
