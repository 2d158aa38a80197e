use burn::data::dataset::Dataset;

use crate::domain::entry::DatasetEntry;

/// The entries one loader samples from (one side of a split).
#[derive(Debug, Clone, Default)]
pub struct PageDataset {
    entries: Vec<DatasetEntry>,
}

impl PageDataset {
    pub fn new(entries: Vec<DatasetEntry>) -> Self { Self { entries } }

    pub fn entries(&self) -> &[DatasetEntry] { &self.entries }
}

impl Dataset<DatasetEntry> for PageDataset {
    fn get(&self, index: usize) -> Option<DatasetEntry> {
        self.entries.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
