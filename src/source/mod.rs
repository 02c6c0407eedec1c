//! Where city records and the continent mapping come from.
//!
//! Pages are 1-based. A source answers a page past its end with an empty
//! page, never an error.

mod geojson_cities;
mod json;

pub use self::geojson_cities::GeoJsonCitySource;
pub use self::json::{JsonDatabaseSource, JsonMappingSource};

use crate::error::SourceError;
use crate::record::RawCityRecord;

/// Paginated supplier of raw city records
pub trait RecordSource: Send {
    fn fetch_page(&mut self, page_size: usize, page: usize) -> Result<Vec<RawCityRecord>, SourceError>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn fetch_page(&mut self, page_size: usize, page: usize) -> Result<Vec<RawCityRecord>, SourceError> {
        (**self).fetch_page(page_size, page)
    }
}

/// Slice `page` (1-based) of `records`
pub(crate) fn page_of<T: Clone>(records: &[T], page_size: usize, page: usize) -> Result<Vec<T>, SourceError> {
    if page == 0 || page_size == 0 {
        return Err(SourceError::Payload(format!(
            "invalid page request: page={} size={}",
            page, page_size
        )));
    }
    let start = (page - 1).saturating_mul(page_size).min(records.len());
    let end = start.saturating_add(page_size).min(records.len());
    Ok(records[start..end].to_vec())
}

/// Records held in memory, optionally failing from a given page on
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<RawCityRecord>,
    fail_from: Option<usize>,
    requested: Vec<usize>,
}

impl MemorySource {
    pub fn new(records: Vec<RawCityRecord>) -> Self {
        Self {
            records,
            fail_from: None,
            requested: Vec::new(),
        }
    }

    /// Every request for `page` or later fails with a transport error
    pub fn failing_from(mut self, page: usize) -> Self {
        self.fail_from = Some(page);
        self
    }

    /// Pages requested so far, in request order
    pub fn requested(&self) -> &[usize] {
        &self.requested
    }
}

impl RecordSource for MemorySource {
    fn fetch_page(&mut self, page_size: usize, page: usize) -> Result<Vec<RawCityRecord>, SourceError> {
        self.requested.push(page);
        if self.fail_from.is_some_and(|p| page >= p) {
            return Err(SourceError::Transport(format!("page {} unavailable", page)));
        }
        page_of(&self.records, page_size, page)
    }
}
