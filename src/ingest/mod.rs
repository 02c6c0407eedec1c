//! Sequential, deduplicating ingestion of paginated city records.
//!
//! [`IngestionPipeline`] is an iterator of [`IngestEvent`]s: one `Page` per
//! fetched page, in page order, followed by exactly one `Finished`. Page
//! `i + 1` is only requested after the batch for page `i` has been handed to
//! the consumer, so a given page size always produces the same build order.
//! No more than `total_volume` raw records are taken from the source.

mod worker;

pub use worker::{spawn, IngestHandle};

use crate::cache::{PagePlan, SharedCache};
use crate::error::SourceError;
use crate::record::{validate, RawCityRecord, RecordKey, ValidatedRecord};
use crate::source::RecordSource;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Records dropped while building a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub malformed: usize,
    pub duplicate: usize,
}

/// Validated, deduplicated records of one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageBatch {
    pub generation: u64,
    /// 1-based page number
    pub page: usize,
    pub records: Vec<ValidatedRecord>,
    pub skipped: SkipCounts,
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        pages: usize,
        records: usize,
        from_cache: bool,
    },
    /// A page fetch failed; earlier pages stay applied
    Terminated { page: usize, error: SourceError },
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Page(PageBatch),
    Finished { generation: u64, outcome: StreamOutcome },
}

impl IngestEvent {
    pub fn generation(&self) -> u64 {
        match self {
            IngestEvent::Page(batch) => batch.generation,
            IngestEvent::Finished { generation, .. } => *generation,
        }
    }
}

/// What the pipeline does with the cache this session
enum CacheMode {
    Off,
    /// Serving a complete snapshot instead of the source
    Replay(VecDeque<Vec<RawCityRecord>>),
    /// Storing each fetched page
    WriteThrough { pages_written: usize },
}

pub struct IngestionPipeline<S> {
    source: S,
    page_size: usize,
    total_volume: usize,
    total_pages: usize,
    generation: u64,
    next_page: usize,
    /// Raw records taken from the source so far
    fetched: usize,
    seen: HashSet<RecordKey>,
    accepted: usize,
    exhausted: bool,
    finished: bool,
    cancelled: Option<Arc<AtomicBool>>,
    cache: Option<SharedCache>,
    cache_mode: CacheMode,
    session_key: String,
}

impl<S: RecordSource> IngestionPipeline<S> {
    /// Plan `ceil(total_volume / page_size)` pages from `source`
    pub fn new(source: S, page_size: usize, total_volume: usize, generation: u64) -> Self {
        let page_size = page_size.max(1);
        Self {
            source,
            page_size,
            total_volume,
            total_pages: total_volume.div_ceil(page_size),
            generation,
            next_page: 1,
            fetched: 0,
            seen: HashSet::new(),
            accepted: 0,
            exhausted: false,
            finished: false,
            cancelled: None,
            cache: None,
            cache_mode: CacheMode::Off,
            session_key: String::new(),
        }
    }

    /// Serve from a complete snapshot under `session_key` if one was fetched
    /// with the same page plan, otherwise store fetched pages there
    pub fn with_cache(mut self, cache: SharedCache, session_key: impl Into<String>) -> Self {
        let session_key = session_key.into();
        let snapshot = cache.lock().load_snapshot(&session_key, self.plan());
        self.cache_mode = match snapshot {
            Some(pages) => {
                info!(session = %session_key, pages = pages.len(), "Replaying cached snapshot");
                CacheMode::Replay(pages.into())
            }
            None => CacheMode::WriteThrough { pages_written: 0 },
        };
        self.cache = Some(cache);
        self.session_key = session_key;
        self
    }

    /// Stop the stream once `flag` is set. A page fetched after that is
    /// neither cached nor emitted.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn plan(&self) -> PagePlan {
        PagePlan {
            page_size: self.page_size,
            total_volume: self.total_volume,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Is the cache still being written this session
    pub fn is_caching(&self) -> bool {
        matches!(self.cache_mode, CacheMode::WriteThrough { .. })
    }

    fn fetch_next(&mut self) -> Result<Option<Vec<RawCityRecord>>, SourceError> {
        if let CacheMode::Replay(pages) = &mut self.cache_mode {
            return Ok(pages.pop_front());
        }
        if self.exhausted || self.next_page > self.total_pages {
            return Ok(None);
        }

        let mut raw = self.source.fetch_page(self.page_size, self.next_page)?;
        if raw.len() < self.page_size {
            self.exhausted = true;
        }
        let remaining = self.total_volume.saturating_sub(self.fetched);
        if raw.len() >= remaining {
            raw.truncate(remaining);
            self.exhausted = true;
        }
        self.fetched += raw.len();
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(raw))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn write_through(&mut self, raw: &[RawCityRecord]) {
        let (CacheMode::WriteThrough { pages_written }, Some(cache)) = (&mut self.cache_mode, &self.cache) else {
            return;
        };
        let mut cache = cache.lock();
        match cache.store_page(&self.session_key, *pages_written, raw) {
            Ok(()) => *pages_written += 1,
            Err(e) => {
                warn!(session = %self.session_key, error = %e, "Page cache write failed, continuing without cache");
                cache.discard_snapshot(&self.session_key, *pages_written);
                drop(cache);
                self.cache_mode = CacheMode::Off;
            }
        }
    }

    fn build_batch(&mut self, raw: Vec<RawCityRecord>) -> PageBatch {
        let mut skipped = SkipCounts::default();
        let mut records = Vec::with_capacity(raw.len());

        for r in raw {
            match validate(r) {
                Ok(v) => {
                    if self.seen.insert(v.record.key()) {
                        records.push(v);
                    } else {
                        skipped.duplicate += 1;
                    }
                }
                Err(e) => {
                    trace!(error = %e, "Skipping malformed record");
                    skipped.malformed += 1;
                }
            }
        }
        self.accepted += records.len();

        PageBatch {
            generation: self.generation,
            page: self.next_page,
            records,
            skipped,
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) -> IngestEvent {
        self.finished = true;

        if let (Some(cache), CacheMode::WriteThrough { pages_written }) = (&self.cache, &self.cache_mode) {
            let mut cache = cache.lock();
            if outcome.is_success() && *pages_written > 0 {
                let plan = self.plan();
                if let Err(e) = cache.commit_snapshot(&self.session_key, *pages_written, plan) {
                    warn!(error = %e, "Could not commit page snapshot");
                    cache.discard_snapshot(&self.session_key, *pages_written);
                }
            } else {
                cache.discard_snapshot(&self.session_key, *pages_written);
            }
        }

        match &outcome {
            StreamOutcome::Completed { pages, records, from_cache } => {
                info!(generation = self.generation, pages, records, from_cache, "Ingestion complete");
            }
            StreamOutcome::Terminated { page, error } => {
                warn!(generation = self.generation, page, error = %error, "Ingestion terminated");
            }
        }

        IngestEvent::Finished {
            generation: self.generation,
            outcome,
        }
    }
}

impl<S: RecordSource> Iterator for IngestionPipeline<S> {
    type Item = IngestEvent;

    fn next(&mut self) -> Option<IngestEvent> {
        if self.finished {
            return None;
        }
        if self.is_cancelled() {
            self.abort();
            return None;
        }

        match self.fetch_next() {
            Ok(Some(raw)) => {
                if self.is_cancelled() {
                    self.abort();
                    return None;
                }
                self.write_through(&raw);
                let batch = self.build_batch(raw);
                debug!(
                    generation = self.generation,
                    page = batch.page,
                    accepted = batch.records.len(),
                    malformed = batch.skipped.malformed,
                    duplicate = batch.skipped.duplicate,
                    "Page ingested"
                );
                self.next_page += 1;
                Some(IngestEvent::Page(batch))
            }
            Ok(None) => {
                let outcome = StreamOutcome::Completed {
                    pages: self.next_page - 1,
                    records: self.accepted,
                    from_cache: matches!(self.cache_mode, CacheMode::Replay(_)),
                };
                Some(self.finish(outcome))
            }
            Err(error) => {
                let outcome = StreamOutcome::Terminated {
                    page: self.next_page,
                    error,
                };
                Some(self.finish(outcome))
            }
        }
    }
}

impl<S> IngestionPipeline<S> {
    /// End the stream without a terminal event, dropping any partial snapshot
    fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let (Some(cache), CacheMode::WriteThrough { pages_written }) = (&self.cache, &self.cache_mode) {
            debug!(generation = self.generation, pages = *pages_written, "Discarding partial page snapshot");
            cache.lock().discard_snapshot(&self.session_key, *pages_written);
        }
    }
}

impl<S> Drop for IngestionPipeline<S> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStorage, PersistenceCache};
    use crate::record::fixtures::raw;
    use crate::source::MemorySource;

    fn pages(events: &[IngestEvent]) -> Vec<&PageBatch> {
        events
            .iter()
            .filter_map(|e| match e {
                IngestEvent::Page(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    fn outcome(events: &[IngestEvent]) -> &StreamOutcome {
        match events.last() {
            Some(IngestEvent::Finished { outcome, .. }) => outcome,
            other => panic!("stream did not finish: {:?}", other),
        }
    }

    fn records(n: usize) -> Vec<RawCityRecord> {
        (0..n)
            .map(|i| raw(&format!("r{}", i), i as f64 * 0.25, 0.0, 100.0, "US"))
            .collect()
    }

    #[test]
    fn test_pages_are_requested_in_order() {
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(10)), 3, 10, 0);
        let events: Vec<_> = pipeline.by_ref().collect();

        let batches = pages(&events);
        assert_eq!(batches.iter().map(|b| b.page).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(pipeline.source().requested(), &[1, 2, 3, 4]);
        assert_eq!(
            outcome(&events),
            &StreamOutcome::Completed { pages: 4, records: 10, from_cache: false }
        );
        // Exactly one terminal event, nothing after it
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_volume_caps_records() {
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(100)), 10, 25, 0);
        let events: Vec<_> = pipeline.by_ref().collect();

        let sizes: Vec<_> = pages(&events).iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(pipeline.source().requested(), &[1, 2, 3]);
        assert_eq!(
            outcome(&events),
            &StreamOutcome::Completed { pages: 3, records: 25, from_cache: false }
        );
    }

    #[test]
    fn test_volume_reached_stops_requests() {
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(100)), 10, 20, 0);
        let events: Vec<_> = pipeline.by_ref().collect();
        assert_eq!(pages(&events).len(), 2);
        assert_eq!(pipeline.source().requested(), &[1, 2]);
    }

    #[test]
    fn test_short_page_ends_stream() {
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(4)), 3, 100, 0);
        let events: Vec<_> = pipeline.by_ref().collect();
        assert_eq!(pages(&events).len(), 2);
        assert_eq!(pipeline.source().requested(), &[1, 2]);
        assert!(outcome(&events).is_success());
    }

    #[test]
    fn test_duplicates_across_pages_are_dropped() {
        let source = MemorySource::new(vec![
            raw("A", 10.0, 10.0, 1000.0, "US"),
            raw("B", 12.0, 12.0, 2000.0, "US"),
            raw("A", 10.0, 10.0, 1000.0, "US"),
        ]);
        let events: Vec<_> = IngestionPipeline::new(source, 2, 3, 0).collect();
        let batches = pages(&events);

        assert_eq!(batches[0].records.len(), 2);
        assert!(batches[1].records.is_empty());
        assert_eq!(batches[1].skipped.duplicate, 1);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut bad = raw("X", 10.0, 10.0, 1.0, "US");
        bad.coordinates = None;
        let source = MemorySource::new(vec![bad, raw("A", 1.0, 1.0, 1.0, "US")]);
        let events: Vec<_> = IngestionPipeline::new(source, 10, 10, 0).collect();

        let batch = pages(&events)[0];
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped.malformed, 1);
    }

    #[test]
    fn test_failure_terminates_stream() {
        let source = MemorySource::new(records(10)).failing_from(2);
        let mut pipeline = IngestionPipeline::new(source, 3, 10, 7);
        let events: Vec<_> = pipeline.by_ref().collect();

        assert_eq!(pages(&events).len(), 1);
        match outcome(&events) {
            StreamOutcome::Terminated { page, error } => {
                assert_eq!(*page, 2);
                assert!(matches!(error, SourceError::Transport(_)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(events.iter().all(|e| e.generation() == 7));
        // No further pages requested after the failure
        assert_eq!(pipeline.source().requested(), &[1, 2]);
    }

    #[test]
    fn test_complete_snapshot_is_replayed() {
        let cache = PersistenceCache::new(Box::new(MemoryStorage::default())).shared();

        let first: Vec<_> = IngestionPipeline::new(MemorySource::new(records(5)), 2, 5, 0)
            .with_cache(cache.clone(), "cities")
            .collect();

        let failing = MemorySource::new(records(5)).failing_from(1);
        let mut replay = IngestionPipeline::new(failing, 2, 5, 1).with_cache(cache, "cities");
        let second: Vec<_> = replay.by_ref().collect();

        assert!(replay.source().requested().is_empty());
        assert_eq!(
            pages(&first).iter().map(|b| &b.records).collect::<Vec<_>>(),
            pages(&second).iter().map(|b| &b.records).collect::<Vec<_>>()
        );
        assert!(matches!(
            outcome(&second),
            StreamOutcome::Completed { from_cache: true, records: 5, .. }
        ));
    }

    #[test]
    fn test_quota_failure_disables_cache_and_rolls_back() {
        // Room for roughly one page
        let cache = PersistenceCache::new(Box::new(MemoryStorage::new(300))).shared();
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(9)), 2, 9, 0)
            .with_cache(cache.clone(), "cities");
        let events: Vec<_> = pipeline.by_ref().collect();

        // Ingestion itself is unaffected
        assert_eq!(
            outcome(&events),
            &StreamOutcome::Completed { pages: 5, records: 9, from_cache: false }
        );
        assert!(!pipeline.is_caching());

        let cache = cache.lock();
        assert!(cache.get("cities_0").is_none());
        assert!(cache.get("cities_length").is_none());
        assert!(cache.load_snapshot("cities", pipeline.plan()).is_none());
    }

    #[test]
    fn test_snapshot_of_other_volume_is_refetched() {
        let cache = PersistenceCache::new(Box::new(MemoryStorage::default())).shared();
        let _: Vec<_> = IngestionPipeline::new(MemorySource::new(records(10)), 2, 10, 0)
            .with_cache(cache.clone(), "cities")
            .collect();

        let mut smaller = IngestionPipeline::new(MemorySource::new(records(10)), 2, 4, 1).with_cache(cache, "cities");
        let events: Vec<_> = smaller.by_ref().collect();

        assert_eq!(smaller.source().requested(), &[1, 2]);
        assert_eq!(
            outcome(&events),
            &StreamOutcome::Completed { pages: 2, records: 4, from_cache: false }
        );
    }

    #[test]
    fn test_dropped_pipeline_discards_partial_snapshot() {
        let cache = PersistenceCache::new(Box::new(MemoryStorage::default())).shared();
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(10)), 2, 10, 0)
            .with_cache(cache.clone(), "cities");
        assert!(matches!(pipeline.next(), Some(IngestEvent::Page(_))));
        assert!(matches!(pipeline.next(), Some(IngestEvent::Page(_))));
        assert!(cache.lock().get("cities_1").is_some());

        drop(pipeline);
        let cache = cache.lock();
        assert!(cache.get("cities_0").is_none());
        assert!(cache.get("cities_1").is_none());
        assert!(cache.get("cities_length").is_none());
    }

    #[test]
    fn test_cancelled_pipeline_stops_and_skips_cache() {
        let cache = PersistenceCache::new(Box::new(MemoryStorage::default())).shared();
        let flag = Arc::new(AtomicBool::new(false));
        let mut pipeline = IngestionPipeline::new(MemorySource::new(records(10)), 2, 10, 0)
            .with_cache(cache.clone(), "cities")
            .with_cancel_flag(Arc::clone(&flag));
        assert!(matches!(pipeline.next(), Some(IngestEvent::Page(_))));

        flag.store(true, Ordering::Release);
        assert!(pipeline.next().is_none());
        assert!(pipeline.next().is_none());
        assert_eq!(pipeline.source().requested(), &[1]);
        assert!(cache.lock().get("cities_0").is_none());
    }

    #[test]
    fn test_failed_stream_leaves_no_snapshot() {
        let cache = PersistenceCache::new(Box::new(MemoryStorage::default())).shared();
        let source = MemorySource::new(records(10)).failing_from(3);
        let _: Vec<_> = IngestionPipeline::new(source, 2, 10, 0)
            .with_cache(cache.clone(), "cities")
            .collect();

        let cache = cache.lock();
        assert!(cache.get("cities_0").is_none());
        let plan = PagePlan {
            page_size: 2,
            total_volume: 10,
        };
        assert!(cache.load_snapshot("cities", plan).is_none());
    }
}
