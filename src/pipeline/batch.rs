use std::num::NonZeroUsize;

use crate::store::Record;

/// データセットの連続した一区間。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    /// 0始まりのバッチ番号
    pub index: usize,
    /// 先頭レコードの行番号
    pub offset: usize,
    pub records: &'a [Record],
}

impl<'a> Batch<'a> {
    #[must_use]
    pub const fn new(index: usize, offset: usize, records: &'a [Record]) -> Self {
        Self {
            index,
            offset,
            records,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// バッチ内の識別子を入力順に返す。重複はそのまま。
    pub fn ids(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.records.iter().map(|record| record.id.as_str())
    }
}

/// レコード列を順序を保ったまま `batch_size` ごとに区切る。
///
/// 最後のバッチだけが短くなりうる。空の入力ではバッチを返さない。
#[must_use]
pub fn partition(records: &[Record], batch_size: NonZeroUsize) -> Vec<Batch<'_>> {
    let size = batch_size.get();
    records
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch::new(index, index * size, chunk))
        .collect()
}
