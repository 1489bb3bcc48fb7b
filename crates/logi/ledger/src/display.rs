//! Dashboard reconciliation against an external display surface.
//!
//! The ledger is the source of truth; rendered dashboards are a projection
//! that converges on the next pass. Each pass edits the content behind the
//! stored handle, recreates it when it has vanished, and hands the new
//! handle back to the ledger for immediate persistence. All surface I/O
//! runs outside the ledger lock and under a timeout.
//!
//! Passes over the same dashboard are serialized by a per-binding lock, and
//! the result is only stored if the binding is still the one the pass
//! started from. Content created by a pass that loses is deleted again.

use crate::error::{DisplayError, LedgerError, LedgerResult};
use crate::ledger::Ledger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logi_types::{
    BindingKey, ContentId, DashboardPage, DisplayBinding, DisplayHandle, Nav, PageState,
    SurfaceId, TunnelRow,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Rows per dashboard page
pub const DEFAULT_PAGE_SIZE: usize = 8;

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Where rendered dashboards are shown
#[async_trait]
pub trait DisplaySurface: Send + Sync {
    /// Post a new dashboard on `surface`
    async fn create(
        &self,
        surface: &SurfaceId,
        page: &DashboardPage,
    ) -> Result<DisplayHandle, DisplayError>;

    /// Replace the content behind `handle`. Fails with
    /// [`DisplayError::ContentMissing`] when it no longer exists.
    async fn edit(&self, handle: &DisplayHandle, page: &DashboardPage) -> Result<(), DisplayError>;

    /// Read back what `handle` currently shows
    async fn fetch(&self, handle: &DisplayHandle) -> Result<DashboardPage, DisplayError>;

    /// Remove the content behind `handle`. Content that is already gone
    /// counts as removed.
    async fn delete(&self, handle: &DisplayHandle) -> Result<(), DisplayError>;
}

/// In-memory surface for development and testing
#[derive(Debug, Default)]
pub struct MemorySurface {
    contents: Mutex<HashMap<DisplayHandle, DashboardPage>>,
    failure: Mutex<Option<DisplayError>>,
    delay: Mutex<Option<Duration>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete content as a user or moderator would
    pub fn remove(&self, handle: &DisplayHandle) -> bool {
        self.contents.lock().remove(handle).is_some()
    }

    pub fn content(&self, handle: &DisplayHandle) -> Option<DashboardPage> {
        self.contents.lock().get(handle).cloned()
    }

    /// Number of live content items
    pub fn len(&self) -> usize {
        self.contents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail with `error` until cleared
    pub fn fail_with(&self, error: Option<DisplayError>) {
        *self.failure.lock() = error;
    }

    /// Stall every call for `delay`
    pub fn stall(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    async fn gate(&self) -> Result<(), DisplayError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DisplaySurface for MemorySurface {
    async fn create(
        &self,
        surface: &SurfaceId,
        page: &DashboardPage,
    ) -> Result<DisplayHandle, DisplayError> {
        self.gate().await?;
        let handle = DisplayHandle {
            surface_id: surface.clone(),
            content_id: ContentId::new(Uuid::new_v4().to_string()),
        };
        self.contents.lock().insert(handle.clone(), page.clone());
        Ok(handle)
    }

    async fn edit(&self, handle: &DisplayHandle, page: &DashboardPage) -> Result<(), DisplayError> {
        self.gate().await?;
        match self.contents.lock().get_mut(handle) {
            Some(content) => {
                *content = page.clone();
                Ok(())
            }
            None => Err(DisplayError::ContentMissing(handle.content_id.to_string())),
        }
    }

    async fn fetch(&self, handle: &DisplayHandle) -> Result<DashboardPage, DisplayError> {
        self.gate().await?;
        self.content(handle)
            .ok_or_else(|| DisplayError::ContentMissing(handle.content_id.to_string()))
    }

    async fn delete(&self, handle: &DisplayHandle) -> Result<(), DisplayError> {
        self.gate().await?;
        self.remove(handle);
        Ok(())
    }
}

/// Outcome counts of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Bindings whose content was edited or created
    pub reconciled: usize,
    /// Bindings that needed new content (first render or stale handle)
    pub created: usize,
    /// Bindings left as they were because the surface failed
    pub failed: usize,
}

/// Converges bound dashboards on the current ledger state
pub struct Reconciler {
    surface: Arc<dyn DisplaySurface>,
    page_size: usize,
    io_timeout: Duration,
    locks: Mutex<HashMap<BindingKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            surface,
            page_size: DEFAULT_PAGE_SIZE,
            io_timeout: DEFAULT_IO_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Slice `rows` into the page selected by `view`, resizing `view` to
    /// the current row count first
    pub fn render(
        &self,
        facility: &str,
        rows: &[TunnelRow],
        view: &mut PageState,
        now: DateTime<Utc>,
    ) -> DashboardPage {
        view.set_total_pages(PageState::pages_for(rows.len(), self.page_size));
        let page_rows = rows
            .iter()
            .skip(view.page * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect();

        DashboardPage {
            facility: facility.to_string(),
            rows: page_rows,
            page: view.page,
            total_pages: view.total_pages,
            tunnel_count: rows.len(),
            generated_at: now,
        }
    }

    /// Bring one dashboard up to date.
    ///
    /// Returns the binding with its new view state and, when content had to
    /// be created, its new handle. The caller must persist the result.
    pub async fn reconcile(
        &self,
        binding: &DisplayBinding,
        rows: &[TunnelRow],
    ) -> Result<DisplayBinding, DisplayError> {
        let mut next = binding.clone();
        let page = self.render(&binding.facility, rows, &mut next.view, Utc::now());

        if let Some(handle) = &binding.handle {
            match self.bounded(self.surface.edit(handle, &page)).await {
                Ok(()) => return Ok(next),
                Err(DisplayError::ContentMissing(_)) => {
                    let stale = LedgerError::StaleDisplayHandle(format!(
                        "{}/{}",
                        handle.surface_id, handle.content_id
                    ));
                    warn!(binding = %binding.key(), error = %stale, "Recreating dashboard");
                }
                Err(e) => return Err(e),
            }
        }

        let handle = self
            .bounded(self.surface.create(&binding.surface, &page))
            .await?;
        debug!(binding = %binding.key(), content = %handle.content_id, "Dashboard created");
        next.handle = Some(handle);
        Ok(next)
    }

    /// Reconcile every bound dashboard.
    ///
    /// Each binding and its rows are read under the ledger lock; surface
    /// I/O happens after it is released. Each dashboard is handled on its
    /// own so one failing surface does not hold back the others.
    pub async fn sync_all(&self, ledger: &Ledger) -> SyncReport {
        let mut report = SyncReport::default();
        for key in ledger.bindings().await.iter().map(DisplayBinding::key) {
            let _guard = self.lock(&key).await;
            let Ok((binding, rows)) = ledger.binding_view(&key, Utc::now()).await else {
                // unbound since the listing
                continue;
            };
            match self.reconcile(&binding, &rows).await {
                Ok(updated) => {
                    report.reconciled += 1;
                    if updated.handle != binding.handle {
                        report.created += 1;
                    }
                    self.commit(ledger, &binding, &updated).await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(binding = %binding.key(), error = %e, "Dashboard sync failed");
                }
            }
        }

        if report.reconciled > 0 || report.failed > 0 {
            info!(
                reconciled = report.reconciled,
                created = report.created,
                failed = report.failed,
                "Dashboards synced"
            );
        }
        report
    }

    /// Re-render a single dashboard right away, e.g. after a command that
    /// changed its facility. Display failures are logged, not returned.
    pub async fn refresh(&self, ledger: &Ledger, key: &BindingKey) -> LedgerResult<DisplayBinding> {
        let _guard = self.lock(key).await;
        let (binding, rows) = ledger.binding_view(key, Utc::now()).await?;
        match self.reconcile(&binding, &rows).await {
            Ok(updated) => {
                if self.commit(ledger, &binding, &updated).await {
                    Ok(updated)
                } else {
                    ledger.binding(key).await
                }
            }
            Err(e) => {
                warn!(binding = %key, error = %e, "Dashboard refresh failed");
                Ok(binding)
            }
        }
    }

    /// Move a dashboard to another page.
    ///
    /// Navigation that would leave the valid range is acknowledged and
    /// changes nothing. Returns the resulting view.
    pub async fn navigate(&self, ledger: &Ledger, key: &BindingKey, nav: Nav) -> LedgerResult<PageState> {
        let _guard = self.lock(key).await;
        let (before, rows) = ledger.binding_view(key, Utc::now()).await?;

        let mut view = before.view;
        view.set_total_pages(PageState::pages_for(rows.len(), self.page_size));
        if !view.navigate(nav) {
            debug!(binding = %key, ?nav, page = view.page, "Navigation at boundary");
            return Ok(view);
        }

        let mut moved = before.clone();
        moved.view = view;
        match self.reconcile(&moved, &rows).await {
            Ok(updated) => self.commit(ledger, &before, &updated).await,
            Err(e) => {
                warn!(binding = %key, error = %e, "Dashboard render after navigation failed");
                self.commit(ledger, &before, &moved).await
            }
        };
        Ok(view)
    }

    /// Store the outcome of a pass that started from `expected`. When the
    /// store is refused, content the pass created is deleted so it does not
    /// linger beside the content the binding points at.
    async fn commit(
        &self,
        ledger: &Ledger,
        expected: &DisplayBinding,
        updated: &DisplayBinding,
    ) -> bool {
        let stored = match ledger.store_binding(expected, updated).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(binding = %updated.key(), error = %e, "Failed to persist display binding");
                false
            }
        };
        if stored {
            return true;
        }

        let created = updated
            .handle
            .as_ref()
            .filter(|handle| expected.handle.as_ref() != Some(*handle));
        if let Some(handle) = created {
            match self.bounded(self.surface.delete(handle)).await {
                Ok(()) => debug!(
                    binding = %updated.key(),
                    content = %handle.content_id,
                    "Discarded superseded dashboard"
                ),
                Err(e) => warn!(
                    binding = %updated.key(),
                    error = %e,
                    "Failed to discard superseded dashboard"
                ),
            }
        }
        false
    }

    async fn lock(&self, key: &BindingKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, DisplayError>>,
    ) -> Result<T, DisplayError> {
        tokio::time::timeout(self.io_timeout, call)
            .await
            .map_err(|_| DisplayError::Timeout(self.io_timeout))?
    }
}
