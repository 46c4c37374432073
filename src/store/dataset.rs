//! In-memory dataset table backed by CSV files.
//!
//! The store keeps every input column verbatim and in input order, plus the two
//! label columns. Rows are addressed by identifier; several rows may share one.

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use tracing::debug;

use crate::error::DatasetError;

use super::models::Record;

pub const PRIMARY_CATEGORY_COLUMN: &str = "primary_category";
pub const SECONDARY_TAGS_COLUMN: &str = "secondary_tags";

/// 入力CSVの列名設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub id: String,
    pub text: String,
    pub timestamp: String,
    pub prior_category: String,
    /// 2段目のラベリングでは既存カテゴリ列を必須にする。
    pub require_prior_category: bool,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            text: "text".to_string(),
            timestamp: "date".to_string(),
            prior_category: "category".to_string(),
            require_prior_category: false,
        }
    }
}

/// 投稿テーブルとラベル列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStore {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    id_col: usize,
    text_col: usize,
    timestamp_col: Option<usize>,
    category_col: Option<usize>,
    primary_col: usize,
    tags_col: usize,
    row_index: HashMap<String, Vec<usize>>,
}

impl DatasetStore {
    /// CSVファイルからストアを構築する。
    ///
    /// # Errors
    /// ファイルが読めない、CSVが壊れている、必須列が無い場合は [`DatasetError`] を返す。
    pub fn from_path(path: &Path, columns: &ColumnSpec) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, columns)
    }

    /// 任意のリーダーからCSVを読み込む。
    ///
    /// # Errors
    /// CSVのパースに失敗した場合や必須列が無い場合は [`DatasetError`] を返す。
    pub fn from_reader<R: Read>(reader: R, columns: &ColumnSpec) -> Result<Self, DatasetError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let mut headers: Vec<String> = csv_reader
            .headers()
            .map_err(DatasetError::csv("header"))?
            .iter()
            .map(ToString::to_string)
            .collect();
        if headers.iter().all(|header| header.trim().is_empty()) {
            return Err(DatasetError::MissingHeader);
        }

        let id_col = required_column(&headers, &columns.id)?;
        let text_col = required_column(&headers, &columns.text)?;
        let timestamp_col = find_column(&headers, &columns.timestamp);
        let category_col = if columns.require_prior_category {
            Some(required_column(&headers, &columns.prior_category)?)
        } else {
            find_column(&headers, &columns.prior_category)
        };

        let mut rows = Vec::new();
        for (line, result) in csv_reader.records().enumerate() {
            let record = result.map_err(DatasetError::csv(format!("row {}", line + 1)))?;
            rows.push(record.iter().map(ToString::to_string).collect::<Vec<_>>());
        }

        // 既存のラベル列は再利用し、無ければ末尾に追加する
        let primary_col = ensure_column(&mut headers, &mut rows, PRIMARY_CATEGORY_COLUMN);
        let tags_col = ensure_column(&mut headers, &mut rows, SECONDARY_TAGS_COLUMN);

        let mut row_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, row) in rows.iter().enumerate() {
            row_index
                .entry(canonical_id(&row[id_col]))
                .or_default()
                .push(position);
        }

        debug!(
            rows = rows.len(),
            distinct_ids = row_index.len(),
            columns = headers.len(),
            "loaded dataset"
        );

        Ok(Self {
            headers,
            rows,
            id_col,
            text_col,
            timestamp_col,
            category_col,
            primary_col,
            tags_col,
            row_index,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 行順を保ったままレコード列を取り出す。
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| Record {
                id: canonical_id(&row[self.id_col]),
                text: row[self.text_col].clone(),
                timestamp: optional_cell(row, self.timestamp_col),
                prior_category: optional_cell(row, self.category_col),
            })
            .collect()
    }

    /// 識別子に一致する行番号。
    #[must_use]
    pub fn rows_for(&self, id: &str) -> &[usize] {
        self.row_index.get(id).map_or(&[], Vec::as_slice)
    }

    /// 識別子に一致するすべての行のラベル列を上書きし、更新した行数を返す。
    pub fn set_labels(&mut self, id: &str, primary_category: &str, secondary_tags: &str) -> usize {
        let Some(positions) = self.row_index.get(id) else {
            return 0;
        };
        for &position in positions {
            let row = &mut self.rows[position];
            row[self.primary_col] = primary_category.to_string();
            row[self.tags_col] = secondary_tags.to_string();
        }
        positions.len()
    }

    #[must_use]
    pub fn primary_category(&self, row: usize) -> Option<&str> {
        self.rows
            .get(row)
            .map(|cells| cells[self.primary_col].as_str())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn secondary_tags(&self, row: usize) -> Option<&str> {
        self.rows
            .get(row)
            .map(|cells| cells[self.tags_col].as_str())
            .filter(|value| !value.is_empty())
    }

    /// 主カテゴリが未設定の行数。
    #[must_use]
    pub fn unlabeled_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row[self.primary_col].is_empty())
            .count()
    }

    /// ストア全体をCSVとして書き出す。既存ファイルは上書きする。
    ///
    /// # Errors
    /// ファイル作成や書き込みに失敗した場合は [`DatasetError`] を返す。
    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        let file = File::create(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.write_to(file)
    }

    /// # Errors
    /// 書き込みに失敗した場合は [`DatasetError`] を返す。
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record(&self.headers)
            .map_err(DatasetError::csv("header"))?;
        for (position, row) in self.rows.iter().enumerate() {
            csv_writer
                .write_record(row)
                .map_err(DatasetError::csv(format!("row {}", position + 1)))?;
        }
        csv_writer.flush().map_err(|source| DatasetError::Io {
            path: "<writer>".to_string(),
            source,
        })?;
        Ok(())
    }
}

/// 識別子を比較用の正規形にする。改行は空白に置き換え、前後の空白を除く。
#[must_use]
pub fn canonical_id(raw: &str) -> String {
    raw.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn required_column(headers: &[String], name: &str) -> Result<usize, DatasetError> {
    find_column(headers, name).ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
}

fn ensure_column(headers: &mut Vec<String>, rows: &mut [Vec<String>], name: &str) -> usize {
    if let Some(position) = find_column(headers, name) {
        return position;
    }
    headers.push(name.to_string());
    for row in rows.iter_mut() {
        row.push(String::new());
    }
    headers.len() - 1
}

fn optional_cell(row: &[String], column: Option<usize>) -> Option<String> {
    column
        .map(|position| row[position].trim())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "id,text,date,category\n\
        1,Markets up today,2019-05-01 10:15:00,Economy\n\
        2,\"Line one\nline two\",,\n\
        3,Tariffs again,2019-05-02 18:00:00,Trade\n";

    fn load(raw: &str) -> DatasetStore {
        DatasetStore::from_reader(raw.as_bytes(), &ColumnSpec::default()).expect("dataset loads")
    }

    #[test]
    fn load_appends_unset_label_columns() {
        let store = load(SAMPLE);

        assert_eq!(store.len(), 3);
        assert_eq!(
            store.headers(),
            &["id", "text", "date", "category", "primary_category", "secondary_tags"]
        );
        assert_eq!(store.unlabeled_count(), 3);
        assert!(store.primary_category(0).is_none());
        assert!(store.secondary_tags(0).is_none());
    }

    #[test]
    fn records_keep_order_and_optional_fields() {
        let records = load(SAMPLE).records();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(records[0].timestamp.as_deref(), Some("2019-05-01 10:15:00"));
        assert_eq!(records[0].prior_category.as_deref(), Some("Economy"));
        assert_eq!(records[1].text, "Line one\nline two");
        assert!(records[1].timestamp.is_none());
        assert!(records[1].prior_category.is_none());
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let error = DatasetStore::from_reader("id,body\n1,hi\n".as_bytes(), &ColumnSpec::default())
            .expect_err("text column is required");

        assert!(matches!(error, DatasetError::MissingColumn(ref name) if name == "text"));
    }

    #[test]
    fn empty_input_has_no_header() {
        let error = DatasetStore::from_reader("".as_bytes(), &ColumnSpec::default())
            .expect_err("header row is required");

        assert!(matches!(error, DatasetError::MissingHeader));
    }

    #[test]
    fn prior_category_is_required_in_second_stage() {
        let columns = ColumnSpec {
            require_prior_category: true,
            ..ColumnSpec::default()
        };
        let error = DatasetStore::from_reader("id,text\n1,hi\n".as_bytes(), &columns)
            .expect_err("category column is required");

        assert!(matches!(error, DatasetError::MissingColumn(ref name) if name == "category"));
    }

    #[test]
    fn set_labels_updates_every_row_sharing_the_id() {
        let mut store = load("id,text\nX,first\nY,second\nX,third\n");

        let updated = store.set_labels("X", "Otherwise", "{}");

        assert_eq!(updated, 2);
        assert_eq!(store.primary_category(0), Some("Otherwise"));
        assert_eq!(store.primary_category(2), Some("Otherwise"));
        assert!(store.primary_category(1).is_none());
        assert_eq!(store.set_labels("missing", "Otherwise", "{}"), 0);
    }

    #[test]
    fn ids_are_trimmed_for_lookup() {
        let store = load("id,text\n 42 ,hello\n");

        assert_eq!(store.rows_for("42"), &[0]);
        assert_eq!(store.records()[0].id, "42");
    }

    #[test]
    fn multiline_ids_are_flattened_for_lookup() {
        let store = load("id,text\n\"a\nb\",hello\n");

        assert_eq!(store.records()[0].id, "a b");
        assert_eq!(store.rows_for("a b"), &[0]);

        let mut written = Vec::new();
        store.write_to(&mut written).expect("csv written");
        assert!(String::from_utf8(written).expect("utf8").contains("\"a\nb\""));
    }

    #[test]
    fn existing_label_columns_are_reused() {
        let store = load("id,text,primary_category,secondary_tags\n1,hi,Otherwise,{}\n2,yo,,\n");

        assert_eq!(store.headers().len(), 4);
        assert_eq!(store.primary_category(0), Some("Otherwise"));
        assert_eq!(store.secondary_tags(0), Some("{}"));
        assert_eq!(store.unlabeled_count(), 1);
    }

    #[test]
    fn written_csv_reloads_to_the_same_store() {
        let mut store = load(SAMPLE);
        store.set_labels("3", "Trade Policy / Tariffs / Manufacturing", r#"{"intensity":"Low"}"#);

        let mut buffer = Vec::new();
        store.write_to(&mut buffer).expect("write succeeds");
        let reloaded = load(std::str::from_utf8(&buffer).expect("utf-8"));

        assert_eq!(reloaded, store);
    }
}
