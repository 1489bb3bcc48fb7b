//! Dashboard bindings and render snapshots

use super::{require_officer, Ledger};
use crate::decay;
use crate::error::{LedgerError, LedgerResult};
use crate::store::Table;
use chrono::{DateTime, Utc};
use logi_types::{BindingKey, Caller, DisplayBinding, Facility, GuildId, SurfaceId, TunnelRow};
use tracing::{debug, info, instrument};

fn rows_of(facility: Option<&Facility>, now: DateTime<Utc>) -> Vec<TunnelRow> {
    let Some(facility) = facility else {
        return Vec::new();
    };
    facility
        .tunnels
        .values()
        .map(|tunnel| {
            let mut tunnel = tunnel.clone();
            decay::apply_decay(&mut tunnel, now);
            TunnelRow::from(&tunnel)
        })
        .collect()
}

impl Ledger {
    /// Bind a facility dashboard to a surface. The binding starts without
    /// content; the next reconciliation renders it.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn bind_display(
        &self,
        caller: &Caller,
        guild: GuildId,
        facility: &str,
        surface: SurfaceId,
    ) -> LedgerResult<DisplayBinding> {
        require_officer(caller, "binding a dashboard")?;

        let mut state = self.state.lock().await;
        if !state.facilities.facilities.contains_key(facility) {
            return Err(LedgerError::NotFound(format!("facility '{}'", facility)));
        }

        let binding = DisplayBinding::new(guild, facility, surface);
        let key = binding.key().to_string();
        if let Some(existing) = state.bindings.bindings.get(&key) {
            if existing.surface == binding.surface {
                return Ok(existing.clone());
            }
        }

        let mut bindings = state.bindings.clone();
        bindings.bindings.insert(key.clone(), binding.clone());
        self.persist(Table::DisplayBindings, &bindings).await?;
        state.bindings = bindings;

        info!(binding = %key, surface = %binding.surface, "Dashboard bound");
        Ok(binding)
    }

    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn unbind_display(
        &self,
        caller: &Caller,
        key: &BindingKey,
    ) -> LedgerResult<DisplayBinding> {
        require_officer(caller, "unbinding a dashboard")?;

        let mut state = self.state.lock().await;
        let mut bindings = state.bindings.clone();
        let removed = bindings
            .bindings
            .remove(&key.to_string())
            .ok_or_else(|| LedgerError::NotFound(format!("binding '{}'", key)))?;
        self.persist(Table::DisplayBindings, &bindings).await?;
        state.bindings = bindings;

        info!(binding = %key, "Dashboard unbound");
        Ok(removed)
    }

    /// Store the handle and view state produced by reconciliation.
    ///
    /// The write only happens while the stored binding still equals
    /// `expected`, the binding the reconciliation started from. Returns
    /// false without writing when it was unbound, moved, or updated by
    /// another pass in the meantime.
    pub async fn store_binding(
        &self,
        expected: &DisplayBinding,
        updated: &DisplayBinding,
    ) -> LedgerResult<bool> {
        let key = updated.key().to_string();
        let mut state = self.state.lock().await;
        match state.bindings.bindings.get(&key) {
            Some(current) if current == expected => {
                if current == updated {
                    return Ok(true);
                }
            }
            _ => {
                debug!(binding = %key, "Binding changed during reconciliation, dropping update");
                return Ok(false);
            }
        }

        let mut bindings = state.bindings.clone();
        bindings.bindings.insert(key, updated.clone());
        self.persist(Table::DisplayBindings, &bindings).await?;
        state.bindings = bindings;
        Ok(true)
    }

    pub async fn binding(&self, key: &BindingKey) -> LedgerResult<DisplayBinding> {
        self.state
            .lock()
            .await
            .bindings
            .bindings
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("binding '{}'", key)))
    }

    pub async fn bindings(&self) -> Vec<DisplayBinding> {
        self.state
            .lock()
            .await
            .bindings
            .bindings
            .values()
            .cloned()
            .collect()
    }

    /// Facility whose dashboard lives on `surface`, if any
    pub async fn facility_for_surface(&self, surface: &SurfaceId) -> Option<String> {
        self.state
            .lock()
            .await
            .bindings
            .bindings
            .values()
            .find(|binding| &binding.surface == surface)
            .map(|binding| binding.facility.clone())
    }

    /// Render rows of one facility decayed to `now`. A facility removed by
    /// a war reset renders as empty.
    pub async fn dashboard_rows(&self, facility: &str, now: DateTime<Utc>) -> Vec<TunnelRow> {
        let state = self.state.lock().await;
        rows_of(state.facilities.facilities.get(facility), now)
    }

    /// One binding with its rows, taken under one lock acquisition
    pub async fn binding_view(
        &self,
        key: &BindingKey,
        now: DateTime<Utc>,
    ) -> LedgerResult<(DisplayBinding, Vec<TunnelRow>)> {
        let state = self.state.lock().await;
        let binding = state
            .bindings
            .bindings
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("binding '{}'", key)))?;
        let rows = rows_of(state.facilities.facilities.get(&binding.facility), now);
        Ok((binding, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use logi_types::{ContentId, DisplayHandle};

    async fn bound() -> (Harness, BindingKey) {
        let h = harness().await;
        h.ledger
            .add_tunnel(&officer(), "North", "T1", 100.0, 0.0, "")
            .await
            .unwrap();
        let binding = h
            .ledger
            .bind_display(&officer(), GuildId::new("g1"), "North", SurfaceId::new("chan-1"))
            .await
            .unwrap();
        (h, binding.key())
    }

    #[tokio::test]
    async fn test_bind_requires_existing_facility() {
        let h = harness().await;
        assert!(matches!(
            h.ledger
                .bind_display(&officer(), GuildId::new("g1"), "Nowhere", SurfaceId::new("c"))
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_surface_lookup_and_unbind() {
        let (h, key) = bound().await;
        assert_eq!(
            h.ledger.facility_for_surface(&SurfaceId::new("chan-1")).await,
            Some("North".to_string())
        );
        assert_eq!(
            h.ledger.facility_for_surface(&SurfaceId::new("chan-2")).await,
            None
        );

        h.ledger.unbind_display(&officer(), &key).await.unwrap();
        assert!(h.ledger.bindings().await.is_empty());
        assert!(matches!(
            h.ledger.unbind_display(&officer(), &key).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_store_binding_ignores_moved_binding() {
        let (h, key) = bound().await;
        let before = h.ledger.binding(&key).await.unwrap();
        let mut stale = before.clone();
        stale.handle = Some(DisplayHandle {
            surface_id: SurfaceId::new("chan-1"),
            content_id: ContentId::new("m1"),
        });

        h.ledger
            .bind_display(&officer(), GuildId::new("g1"), "North", SurfaceId::new("chan-9"))
            .await
            .unwrap();
        assert!(!h.ledger.store_binding(&before, &stale).await.unwrap());
        assert_eq!(h.ledger.binding(&key).await.unwrap().handle, None);
    }

    #[tokio::test]
    async fn test_store_binding_rejects_superseded_start() {
        let (h, key) = bound().await;
        let before = h.ledger.binding(&key).await.unwrap();

        let mut navigated = before.clone();
        navigated.view.page = 1;
        navigated.view.total_pages = 2;
        assert!(h.ledger.store_binding(&before, &navigated).await.unwrap());

        let mut synced = before.clone();
        synced.handle = Some(DisplayHandle {
            surface_id: SurfaceId::new("chan-1"),
            content_id: ContentId::new("m2"),
        });
        assert!(!h.ledger.store_binding(&before, &synced).await.unwrap());
        assert_eq!(h.ledger.binding(&key).await.unwrap(), navigated);
    }

    #[tokio::test]
    async fn test_store_binding_persists_handle() {
        let (h, key) = bound().await;
        let before = h.ledger.binding(&key).await.unwrap();
        let mut updated = before.clone();
        updated.handle = Some(DisplayHandle {
            surface_id: SurfaceId::new("chan-1"),
            content_id: ContentId::new("m1"),
        });

        assert!(h.ledger.store_binding(&before, &updated).await.unwrap());
        let doc = h.store.document(Table::DisplayBindings).unwrap();
        assert_eq!(
            doc["bindings"]["g1/North"]["handle"]["content_id"],
            serde_json::json!("m1")
        );
    }

    #[tokio::test]
    async fn test_binding_view_contains_rows() {
        let (h, key) = bound().await;
        let (binding, rows) = h.ledger.binding_view(&key, Utc::now()).await.unwrap();
        assert_eq!(binding.facility, "North");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "T1");
        assert_eq!(rows[0].supplies, 100);

        h.ledger.unbind_display(&officer(), &key).await.unwrap();
        assert!(matches!(
            h.ledger.binding_view(&key, Utc::now()).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
