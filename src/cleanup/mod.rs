//! Batch cleanup of generated 3D model assets.
//!
//! The sweep is three sequential stages per catalog page:
//! 1. select rows whose `glb_url` still points into the model bucket,
//! 2. delete the derived storage keys in sub-batches of [`STORAGE_BATCH_SIZE`],
//! 3. clear `glb_url` on the rows whose objects were actually removed.
//!
//! Rows whose deletion failed (or whose URL yields no storage key) are left
//! untouched so the database never claims an object is gone while it may
//! still exist. Because such rows keep matching the selection predicate, the
//! page loop is bounded rather than trusted to converge on its own.

pub mod confirm;
pub mod keys;
pub mod pace;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use confirm::Confirm;
use pace::Throttle;

/// Catalog rows fetched per page.
pub const BATCH_SIZE: usize = 1000;
/// Storage API per-call delete limit.
pub const STORAGE_BATCH_SIZE: usize = 100;

/// One catalog row subject to cleanup. Ids may be bigints or uuids depending
/// on the deployment, so they are carried as raw JSON values.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRow {
    pub id: Value,
    #[serde(default)]
    pub item_code: Option<String>,
    pub glb_url: Option<String>,
}

/// Selection predicate: `glb_url` non-null and matching the model path
/// pattern, optionally bounded to an `updated_at` window.
#[derive(Debug, Clone, Default)]
pub struct SweepFilter {
    /// Inclusive lower bound on `updated_at`.
    pub updated_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `updated_at`.
    pub updated_until: Option<DateTime<Utc>>,
}

impl SweepFilter {
    /// The 7-14 day old window used by the rehearsal run.
    pub fn aged_window(now: DateTime<Utc>) -> Self {
        Self {
            updated_from: Some(now - Duration::days(14)),
            updated_until: Some(now - Duration::days(7)),
        }
    }
}

/// Narrow catalog interface: filtered paged select, exact count, bulk clear.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_page(&self, filter: &SweepFilter, limit: usize) -> Result<Vec<ProductRow>>;

    async fn count_matching(&self, filter: &SweepFilter) -> Result<u64>;

    /// Clears `glb_url` on the given rows; returns how many rows actually
    /// changed. Zero changed rows (already null) is success, not failure.
    async fn clear_model_urls(&self, ids: &[Value]) -> Result<u64>;
}

/// Narrow object-store interface: one bulk delete call per sub-batch.
/// Success and failure apply to the whole call; the store does not report
/// per-key results.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn remove(&self, keys: &[String]) -> Result<usize>;
}

/// Result of the chunked storage deletion for one catalog page.
#[derive(Debug, Default)]
pub struct EraseOutcome {
    /// Keys submitted across all sub-batches.
    pub attempted: usize,
    /// Objects the store reported removed.
    pub deleted: usize,
    /// Ids whose sub-batch call succeeded; only these are reconciled.
    pub succeeded: Vec<Value>,
    /// Ids whose sub-batch call failed; their `glb_url` is left intact.
    pub failed: Vec<Value>,
}

/// Running totals threaded through the sweep loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub pages: u64,
    pub files_deleted: u64,
    pub rows_cleared: u64,
    pub delete_failures: u64,
    pub update_failures: u64,
    pub skipped_urls: u64,
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub filter: SweepFilter,
    pub page_size: usize,
    /// Process exactly one page (rehearsal mode).
    pub single_batch: bool,
    /// Literal the operator must type, compared case-sensitively.
    pub confirmation_phrase: String,
    /// Report what would be deleted without mutating anything.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum SweepReport {
    /// Zero rows matched the predicate up front.
    NothingToDo,
    /// The operator declined the confirmation gate; nothing was touched.
    Aborted,
    Completed { stats: SweepStats, remaining: u64 },
}

/// Runs one full cleanup cycle: count, confirmation gate, page loop,
/// final verification count.
///
/// Per-page storage and update failures are logged and counted but do not
/// abort the run; catalog query failures do.
pub async fn run_sweep<C, S>(
    catalog: &C,
    store: &S,
    gate: &dyn Confirm,
    storage_throttle: &dyn Throttle,
    page_throttle: &dyn Throttle,
    opts: &SweepOptions,
) -> Result<SweepReport>
where
    C: Catalog + ?Sized,
    S: ModelStore + ?Sized,
{
    let total = catalog
        .count_matching(&opts.filter)
        .await
        .context("counting products matching the cleanup predicate")?;
    info!(total, "sweep: products matching cleanup predicate");
    if total == 0 {
        return Ok(SweepReport::NothingToDo);
    }

    if opts.dry_run {
        info!("sweep: dry-run, skipping confirmation gate");
    } else {
        println!("This will PERMANENTLY delete up to {total} model files from storage.");
        let answer = gate.confirm(&format!("Type '{}' to continue: ", opts.confirmation_phrase))?;
        if answer != opts.confirmation_phrase {
            warn!("sweep: confirmation mismatch; aborting with no side effects");
            return Ok(SweepReport::Aborted);
        }
    }

    let mut stats = SweepStats::default();
    // Failed and underivable rows keep matching the predicate, so the loop is
    // bounded instead of trusted to shrink to zero.
    let max_pages = total.div_ceil(opts.page_size.max(1) as u64) + 1;

    loop {
        stats.pages += 1;
        let page = catalog
            .fetch_page(&opts.filter, opts.page_size)
            .await
            .context("fetching next catalog page")?;
        if page.is_empty() {
            info!("sweep: no more matching products");
            break;
        }
        info!(page = stats.pages, rows = page.len(), "sweep: page loaded");
        let page_full = page.len() >= opts.page_size;

        let mut ids: Vec<Value> = Vec::with_capacity(page.len());
        let mut paths: Vec<String> = Vec::with_capacity(page.len());
        for row in &page {
            match row.glb_url.as_deref().and_then(keys::storage_key) {
                Some(path) => {
                    ids.push(row.id.clone());
                    paths.push(path);
                }
                None => {
                    stats.skipped_urls += 1;
                    warn!(
                        id = %row.id,
                        item_code = row.item_code.as_deref().unwrap_or("-"),
                        "sweep: url has no derivable storage key; skipping row"
                    );
                }
            }
        }

        let deleted_before = stats.files_deleted;
        let cleared_before = stats.rows_cleared;

        if paths.is_empty() {
            info!("sweep: no derivable storage keys in this page");
        } else if opts.dry_run {
            info!(would_delete = paths.len(), "sweep: dry-run, not deleting");
        } else {
            let outcome = erase_in_chunks(store, &ids, &paths, storage_throttle).await;
            stats.files_deleted += outcome.deleted as u64;
            stats.delete_failures += outcome.failed.len() as u64;

            if !outcome.succeeded.is_empty() {
                match catalog.clear_model_urls(&outcome.succeeded).await {
                    Ok(cleared) => {
                        stats.rows_cleared += cleared;
                        info!(
                            cleared,
                            submitted = outcome.succeeded.len(),
                            "sweep: model urls cleared"
                        );
                    }
                    Err(err) => {
                        stats.update_failures += outcome.succeeded.len() as u64;
                        error!(error = %err, "sweep: database update failed; continuing");
                    }
                }
            }
            if !outcome.failed.is_empty() {
                warn!(
                    failed = outcome.failed.len(),
                    "sweep: storage deletion failed for some rows; their glb_url was left intact"
                );
            }
        }

        info!(
            deleted = stats.files_deleted,
            cleared = stats.rows_cleared,
            failed = stats.delete_failures,
            skipped = stats.skipped_urls,
            "sweep: progress"
        );

        if opts.single_batch || !page_full {
            break;
        }
        if opts.dry_run {
            info!("sweep: dry-run stops after the first page");
            break;
        }
        let progressed =
            stats.files_deleted > deleted_before || stats.rows_cleared > cleared_before;
        if !progressed {
            warn!("sweep: full page made no progress; stopping to avoid refetching the same rows");
            break;
        }
        if stats.pages >= max_pages {
            warn!(
                pages = stats.pages,
                "sweep: page bound reached without convergence; stopping"
            );
            break;
        }
        page_throttle.wait().await;
    }

    let remaining = catalog
        .count_matching(&opts.filter)
        .await
        .context("re-counting for verification")?;
    if remaining == 0 {
        info!("sweep: verification clean; no products still match");
    } else {
        warn!(remaining, "sweep: products still match after cleanup");
    }

    Ok(SweepReport::Completed { stats, remaining })
}

/// Deletes the derived keys in sub-batches, pacing between calls. A failed
/// call marks every id in that sub-batch as failed; there are no retries.
async fn erase_in_chunks<S>(
    store: &S,
    ids: &[Value],
    paths: &[String],
    throttle: &dyn Throttle,
) -> EraseOutcome
where
    S: ModelStore + ?Sized,
{
    let mut outcome = EraseOutcome {
        attempted: paths.len(),
        ..Default::default()
    };

    for (id_chunk, path_chunk) in ids
        .chunks(STORAGE_BATCH_SIZE)
        .zip(paths.chunks(STORAGE_BATCH_SIZE))
    {
        throttle.wait().await;
        match store.remove(path_chunk).await {
            Ok(removed) => {
                outcome.deleted += removed;
                outcome.succeeded.extend_from_slice(id_chunk);
            }
            Err(err) => {
                error!(
                    error = %err,
                    keys = path_chunk.len(),
                    "sweep: storage deletion failed for sub-batch"
                );
                outcome.failed.extend_from_slice(id_chunk);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use super::confirm::Scripted;
    use super::pace::NoThrottle;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeRow {
        id: i64,
        glb_url: Option<String>,
    }

    fn matches(row: &FakeRow) -> bool {
        row.glb_url
            .as_deref()
            .is_some_and(|u| u.contains("3d-models"))
    }

    #[derive(Default)]
    struct FakeCatalog {
        rows: Mutex<Vec<FakeRow>>,
        fetches: Mutex<u64>,
        /// Pretend every submitted row was already null.
        report_zero_changed: bool,
    }

    impl FakeCatalog {
        fn with_rows(rows: Vec<FakeRow>) -> Self {
            Self {
                rows: Mutex::new(rows),
                ..Default::default()
            }
        }

        fn url(&self, id: i64) -> Option<String> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .and_then(|r| r.glb_url.clone())
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn fetch_page(&self, _filter: &SweepFilter, limit: usize) -> Result<Vec<ProductRow>> {
            *self.fetches.lock().unwrap() += 1;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| matches(r))
                .take(limit)
                .map(|r| ProductRow {
                    id: json!(r.id),
                    item_code: Some(format!("ITEM-{}", r.id)),
                    glb_url: r.glb_url.clone(),
                })
                .collect())
        }

        async fn count_matching(&self, _filter: &SweepFilter) -> Result<u64> {
            Ok(self.rows.lock().unwrap().iter().filter(|r| matches(r)).count() as u64)
        }

        async fn clear_model_urls(&self, ids: &[Value]) -> Result<u64> {
            let targets: HashSet<i64> = ids.iter().filter_map(|v| v.as_i64()).collect();
            let mut changed = 0;
            for row in self.rows.lock().unwrap().iter_mut() {
                if targets.contains(&row.id) && row.glb_url.is_some() {
                    row.glb_url = None;
                    changed += 1;
                }
            }
            if self.report_zero_changed {
                return Ok(0);
            }
            Ok(changed)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        calls: Mutex<Vec<usize>>,
        fail_keys_containing: Option<String>,
    }

    #[async_trait]
    impl ModelStore for FakeStore {
        async fn remove(&self, keys: &[String]) -> Result<usize> {
            self.calls.lock().unwrap().push(keys.len());
            if let Some(marker) = &self.fail_keys_containing {
                if keys.iter().any(|k| k.contains(marker.as_str())) {
                    bail!("storage unavailable");
                }
            }
            Ok(keys.len())
        }
    }

    fn model_url(key: &str) -> String {
        format!("https://cdn.example.com/storage/v1/object/public/product-files/3d-models/{key}")
    }

    fn opts(phrase: &str) -> SweepOptions {
        SweepOptions {
            filter: SweepFilter::default(),
            page_size: BATCH_SIZE,
            single_batch: false,
            confirmation_phrase: phrase.to_string(),
            dry_run: false,
        }
    }

    async fn sweep(
        catalog: &FakeCatalog,
        store: &FakeStore,
        answer: &str,
        options: &SweepOptions,
    ) -> SweepReport {
        run_sweep(
            catalog,
            store,
            &Scripted(answer.to_string()),
            &NoThrottle,
            &NoThrottle,
            options,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sub_batches_are_sized_by_storage_limit() {
        let rows = (0..250)
            .map(|i| FakeRow {
                id: i,
                glb_url: Some(model_url(&format!("{i}.glb"))),
            })
            .collect();
        let catalog = FakeCatalog::with_rows(rows);
        let store = FakeStore::default();

        let report = sweep(&catalog, &store, "DELETE ALL", &opts("DELETE ALL")).await;

        assert_eq!(*store.calls.lock().unwrap(), vec![100, 100, 50]);
        match report {
            SweepReport::Completed { stats, remaining } => {
                assert_eq!(stats.files_deleted, 250);
                assert_eq!(stats.rows_cleared, 250);
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_confirmation_phrase_has_no_side_effects() {
        let catalog = FakeCatalog::with_rows(vec![FakeRow {
            id: 1,
            glb_url: Some(model_url("a.glb")),
        }]);
        let store = FakeStore::default();

        let report = sweep(&catalog, &store, "delete all", &opts("DELETE ALL")).await;

        assert!(matches!(report, SweepReport::Aborted));
        assert!(store.calls.lock().unwrap().is_empty());
        assert!(catalog.url(1).is_some());
    }

    #[tokio::test]
    async fn zero_matches_terminates_without_prompting() {
        let catalog = FakeCatalog::with_rows(vec![FakeRow {
            id: 1,
            glb_url: None,
        }]);
        let store = FakeStore::default();

        // Scripted answer would pass the gate; NothingToDo must win first.
        let report = sweep(&catalog, &store, "DELETE ALL", &opts("DELETE ALL")).await;

        assert!(matches!(report, SweepReport::NothingToDo));
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_null_rows_count_as_success() {
        let catalog = FakeCatalog {
            rows: Mutex::new(vec![FakeRow {
                id: 1,
                glb_url: Some(model_url("a.glb")),
            }]),
            report_zero_changed: true,
            ..Default::default()
        };
        let store = FakeStore::default();

        let report = sweep(&catalog, &store, "DELETE ALL", &opts("DELETE ALL")).await;

        match report {
            SweepReport::Completed { stats, .. } => {
                assert_eq!(stats.update_failures, 0);
                assert_eq!(stats.rows_cleared, 0);
                assert_eq!(stats.files_deleted, 1);
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconciler_clear_is_idempotent() {
        let catalog = FakeCatalog::with_rows(vec![
            FakeRow {
                id: 1,
                glb_url: Some(model_url("a.glb")),
            },
            FakeRow {
                id: 2,
                glb_url: Some(model_url("b.glb")),
            },
        ]);
        let ids = vec![json!(1), json!(2)];

        assert_eq!(catalog.clear_model_urls(&ids).await.unwrap(), 2);
        // Second run: rows are already null, reported as zero changed, no error.
        assert_eq!(catalog.clear_model_urls(&ids).await.unwrap(), 0);
        assert!(catalog.url(1).is_none());
    }

    #[tokio::test]
    async fn mixed_page_deletes_derivable_and_reports_residue() {
        // 3 derivable, 1 matching but underivable, 1 not matching at all.
        let catalog = FakeCatalog::with_rows(vec![
            FakeRow {
                id: 1,
                glb_url: Some(model_url("a.glb")),
            },
            FakeRow {
                id: 2,
                glb_url: Some(model_url("b.glb")),
            },
            FakeRow {
                id: 3,
                glb_url: Some(model_url("c.glb")),
            },
            FakeRow {
                id: 4,
                glb_url: Some("https://cdn.example.com/other/3d-models/d.glb".to_string()),
            },
            FakeRow {
                id: 5,
                glb_url: Some("https://cdn.example.com/images/e.png".to_string()),
            },
        ]);
        let store = FakeStore::default();

        let report = sweep(&catalog, &store, "DELETE ALL", &opts("DELETE ALL")).await;

        match report {
            SweepReport::Completed { stats, remaining } => {
                assert_eq!(stats.files_deleted, 3);
                assert_eq!(stats.rows_cleared, 3);
                assert_eq!(stats.skipped_urls, 1);
                assert_eq!(stats.delete_failures, 0);
                // The underivable row still matches the raw predicate.
                assert_eq!(remaining, 1);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(*store.calls.lock().unwrap(), vec![3]);
        assert!(catalog.url(4).is_some());
        assert!(catalog.url(5).is_some());
    }

    #[tokio::test]
    async fn failed_sub_batch_is_not_reconciled() {
        // 101 rows: the poisoned key lands in the first sub-batch of 100,
        // the final row goes through alone and succeeds.
        let mut rows: Vec<FakeRow> = (0..100)
            .map(|i| FakeRow {
                id: i,
                glb_url: Some(model_url(&format!(
                    "{}{i}.glb",
                    if i == 7 { "poison-" } else { "" }
                ))),
            })
            .collect();
        rows.push(FakeRow {
            id: 100,
            glb_url: Some(model_url("last.glb")),
        });
        let catalog = FakeCatalog::with_rows(rows);
        let store = FakeStore {
            fail_keys_containing: Some("poison".to_string()),
            ..Default::default()
        };

        let mut options = opts("yes");
        options.single_batch = true;
        let report = sweep(&catalog, &store, "yes", &options).await;

        match report {
            SweepReport::Completed { stats, remaining } => {
                assert_eq!(stats.delete_failures, 100);
                assert_eq!(stats.files_deleted, 1);
                assert_eq!(stats.rows_cleared, 1);
                // Every row in the failed sub-batch still matches.
                assert_eq!(remaining, 100);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(catalog.url(7).is_some());
        assert!(catalog.url(100).is_none());
    }

    #[tokio::test]
    async fn pagination_is_bounded_by_initial_count() {
        let rows = (0..5)
            .map(|i| FakeRow {
                id: i,
                glb_url: Some(model_url(&format!("{i}.glb"))),
            })
            .collect();
        let catalog = FakeCatalog::with_rows(rows);
        let store = FakeStore::default();

        let mut options = opts("DELETE ALL");
        options.page_size = 2;
        let report = sweep(&catalog, &store, "DELETE ALL", &options).await;

        match report {
            SweepReport::Completed { stats, remaining } => {
                // ceil(5 / 2) = 3 pages for a predicate that shrinks as rows
                // are reconciled.
                assert!(stats.pages <= 3, "took {} pages", stats.pages);
                assert_eq!(stats.rows_cleared, 5);
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_full_page_stops_instead_of_spinning() {
        // Every delete fails, so the matched set never shrinks.
        let rows = (0..4)
            .map(|i| FakeRow {
                id: i,
                glb_url: Some(model_url(&format!("poison-{i}.glb"))),
            })
            .collect();
        let catalog = FakeCatalog::with_rows(rows);
        let store = FakeStore {
            fail_keys_containing: Some("poison".to_string()),
            ..Default::default()
        };

        let mut options = opts("DELETE ALL");
        options.page_size = 2;
        let report = sweep(&catalog, &store, "DELETE ALL", &options).await;

        match report {
            SweepReport::Completed { stats, remaining } => {
                assert_eq!(stats.pages, 1);
                assert_eq!(stats.rows_cleared, 0);
                assert_eq!(remaining, 4);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(*catalog.fetches.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let catalog = FakeCatalog::with_rows(vec![FakeRow {
            id: 1,
            glb_url: Some(model_url("a.glb")),
        }]);
        let store = FakeStore::default();

        let mut options = opts("DELETE ALL");
        options.dry_run = true;
        // Deliberately wrong answer: dry-run must not even prompt.
        let report = sweep(&catalog, &store, "no", &options).await;

        match report {
            SweepReport::Completed { stats, remaining } => {
                assert_eq!(stats.files_deleted, 0);
                assert_eq!(stats.rows_cleared, 0);
                assert_eq!(remaining, 1);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(store.calls.lock().unwrap().is_empty());
        assert!(catalog.url(1).is_some());
    }
}
