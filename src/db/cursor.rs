use std::collections::VecDeque;

use super::{
    connection::Database, error::StoreError, models::Sample, repositories::samples::SampleFilter,
};

const DEFAULT_PAGE_SIZE: usize = 256;

/// Lazy, finite and restartable view over the sample log.
///
/// Rows are fetched a page at a time by sequence number. The upper bound is pinned on
/// the first fetch, so samples appended while the cursor is being drained are not
/// picked up until [`SampleCursor::restart`] is called.
pub struct SampleCursor {
    db: Database,
    filter: SampleFilter,
    page_size: usize,
    fetched_through: i64,
    upper_seq: Option<i64>,
    buffer: VecDeque<Sample>,
    exhausted: bool,
}

impl SampleCursor {
    pub(crate) fn new(db: Database, filter: SampleFilter) -> Self {
        Self {
            db,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
            fetched_through: 0,
            upper_seq: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Next sample in append order, or `None` once the pinned range is drained.
    pub async fn try_next(&mut self) -> Result<Option<Sample>, StoreError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Rewinds to the beginning; the next read re-pins the upper bound.
    pub fn restart(&mut self) {
        self.fetched_through = 0;
        self.upper_seq = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Drains the remaining samples into a vector.
    pub async fn collect(&mut self) -> Result<Vec<Sample>, StoreError> {
        let mut samples = Vec::new();
        while let Some(sample) = self.try_next().await? {
            samples.push(sample);
        }
        Ok(samples)
    }

    async fn fill(&mut self) -> Result<(), StoreError> {
        let upper_seq = match self.upper_seq {
            Some(upper) => upper,
            None => {
                let upper = self.db.max_seq().await?;
                self.upper_seq = Some(upper);
                upper
            }
        };

        let page = self
            .db
            .fetch_page(
                self.filter.clone(),
                self.fetched_through,
                upper_seq,
                self.page_size,
            )
            .await?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((seq, _)) = page.last() {
            self.fetched_through = *seq;
        }
        self.buffer.extend(page.into_iter().map(|(_, sample)| sample));
        Ok(())
    }
}
