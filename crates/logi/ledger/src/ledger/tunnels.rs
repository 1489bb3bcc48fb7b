//! Facility and tunnel management

use super::{non_negative, require_officer, Ledger, LedgerState};
use crate::audit::AuditEvent;
use crate::decay;
use crate::error::{LedgerError, LedgerResult};
use crate::store::Table;
use chrono::{DateTime, Utc};
use logi_types::{ActionKind, Caller, Facility, Tunnel, TunnelUpdate};
use tracing::{info, instrument};

impl LedgerState {
    /// Facility owning `tunnel`, searched across every facility
    pub(crate) fn owner_of(&self, tunnel: &str) -> Option<&str> {
        self.facilities
            .facilities
            .values()
            .find(|facility| facility.tunnels.contains_key(tunnel))
            .map(|facility| facility.name.as_str())
    }

    /// Facility holding `tunnel`, preferring the caller's bound facility
    pub(crate) fn resolve(&self, tunnel: &str, context: Option<&str>) -> LedgerResult<String> {
        if let Some(bound) = context {
            if let Some(facility) = self.facilities.facilities.get(bound) {
                if facility.tunnels.contains_key(tunnel) {
                    return Ok(facility.name.clone());
                }
            }
        }

        self.owner_of(tunnel)
            .map(str::to_string)
            .ok_or_else(|| LedgerError::NotFound(format!("tunnel '{}'", tunnel)))
    }
}

impl Ledger {
    /// Get or create a facility by name
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn create_or_update_facility(
        &self,
        caller: &Caller,
        name: &str,
    ) -> LedgerResult<Facility> {
        require_officer(caller, "creating a facility")?;
        let name = checked_name("facility", name)?;

        let mut state = self.state.lock().await;
        if let Some(existing) = state.facilities.facilities.get(name) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let facility = Facility::new(name, caller.user.clone(), now);
        let mut facilities = state.facilities.clone();
        facilities
            .facilities
            .insert(name.to_string(), facility.clone());
        self.persist(Table::Facilities, &facilities).await?;
        state.facilities = facilities;
        drop(state);

        info!(facility = %name, "Facility created");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::FacilityCreated,
            name,
        )])
        .await;
        Ok(facility)
    }

    /// Register a tunnel, creating the facility on first use.
    ///
    /// Tunnel names are unique across all facilities; a collision reports
    /// the facility that already owns the name.
    #[instrument(skip(self, caller, location), fields(user = %caller.user))]
    pub async fn add_tunnel(
        &self,
        caller: &Caller,
        facility: &str,
        name: &str,
        total_supplies: f64,
        usage_rate: f64,
        location: &str,
    ) -> LedgerResult<Tunnel> {
        require_officer(caller, "adding a tunnel")?;
        let facility = checked_name("facility", facility)?;
        let name = checked_name("tunnel", name)?;
        let total_supplies = non_negative("total_supplies", total_supplies)?;
        let usage_rate = non_negative("usage_rate", usage_rate)?;

        let mut state = self.state.lock().await;
        if let Some(owner) = state.owner_of(name) {
            return Err(LedgerError::DuplicateTunnel {
                tunnel: name.to_string(),
                facility: owner.to_string(),
            });
        }

        let now = Utc::now();
        let mut facilities = state.facilities.clone();
        let created = !facilities.facilities.contains_key(facility);
        let tunnel = Tunnel::new(name, total_supplies, usage_rate, location.trim(), now);
        facilities
            .facilities
            .entry(facility.to_string())
            .or_insert_with(|| Facility::new(facility, caller.user.clone(), now))
            .tunnels
            .insert(name.to_string(), tunnel.clone());
        self.persist(Table::Facilities, &facilities).await?;
        state.facilities = facilities;
        drop(state);

        info!(facility = %facility, tunnel = %name, total_supplies, usage_rate, "Tunnel added");

        let mut events = Vec::new();
        if created {
            events.push(AuditEvent::new(
                caller.user.clone(),
                ActionKind::FacilityCreated,
                facility,
            ));
        }
        events.push(
            AuditEvent::new(caller.user.clone(), ActionKind::TunnelAdded, name)
                .with_detail(format!("{} supplies, {}/h", total_supplies, usage_rate)),
        );
        self.record(events).await;
        Ok(tunnel)
    }

    /// Change only the provided fields of a tunnel.
    ///
    /// Decay up to now is settled first, so a new usage rate applies from
    /// this moment on and not retroactively.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn update_tunnel(
        &self,
        caller: &Caller,
        name: &str,
        update: TunnelUpdate,
    ) -> LedgerResult<Tunnel> {
        require_officer(caller, "updating a tunnel")?;
        let name = checked_name("tunnel", name)?;
        if let Some(supplies) = update.total_supplies {
            non_negative("total_supplies", supplies)?;
        }
        if let Some(rate) = update.usage_rate {
            non_negative("usage_rate", rate)?;
        }

        let mut state = self.state.lock().await;
        let owner = state.resolve(name, None)?;

        let now = Utc::now();
        let mut facilities = state.facilities.clone();
        let tunnel = facilities
            .facilities
            .get_mut(&owner)
            .and_then(|facility| facility.tunnels.get_mut(name))
            .ok_or_else(|| LedgerError::NotFound(format!("tunnel '{}'", name)))?;

        decay::apply_decay(tunnel, now);
        if let Some(supplies) = update.total_supplies {
            tunnel.total_supplies = supplies;
        }
        if let Some(rate) = update.usage_rate {
            tunnel.usage_rate = rate;
        }
        if let Some(location) = &update.location {
            tunnel.location = location.trim().to_string();
        }
        tunnel.last_updated = tunnel.last_updated.max(now);
        let updated = tunnel.clone();

        self.persist(Table::Facilities, &facilities).await?;
        state.facilities = facilities;
        drop(state);

        info!(facility = %owner, tunnel = %name, "Tunnel updated");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::TunnelUpdated,
            name,
        )
        .with_detail(describe_update(&update))])
        .await;
        Ok(updated)
    }

    /// Remove a tunnel. Its facility stays even when it becomes empty.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn delete_tunnel(&self, caller: &Caller, name: &str) -> LedgerResult<Tunnel> {
        require_officer(caller, "deleting a tunnel")?;
        let name = checked_name("tunnel", name)?;

        let mut state = self.state.lock().await;
        let owner = state.resolve(name, None)?;

        let mut facilities = state.facilities.clone();
        let removed = facilities
            .facilities
            .get_mut(&owner)
            .and_then(|facility| facility.tunnels.remove(name))
            .ok_or_else(|| LedgerError::NotFound(format!("tunnel '{}'", name)))?;
        self.persist(Table::Facilities, &facilities).await?;
        state.facilities = facilities;
        drop(state);

        info!(facility = %owner, tunnel = %name, "Tunnel deleted");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::TunnelDeleted,
            name,
        )])
        .await;
        Ok(removed)
    }

    /// Global tunnel lookup. Returns the owning facility name and the
    /// tunnel decayed to the current time.
    pub async fn find_tunnel(&self, name: &str) -> LedgerResult<(String, Tunnel)> {
        self.resolve_tunnel(name, None).await
    }

    /// Tunnel lookup that prefers the facility bound to the caller's
    /// surface and falls back to a global search
    pub async fn resolve_tunnel(
        &self,
        name: &str,
        context: Option<&str>,
    ) -> LedgerResult<(String, Tunnel)> {
        let name = checked_name("tunnel", name)?;
        let state = self.state.lock().await;
        let owner = state.resolve(name, context)?;
        let mut tunnel = state.facilities.facilities[&owner].tunnels[name].clone();
        drop(state);

        decay::apply_decay(&mut tunnel, Utc::now());
        Ok((owner, tunnel))
    }

    /// One facility decayed to the current time
    pub async fn facility(&self, name: &str) -> LedgerResult<Facility> {
        let name = checked_name("facility", name)?;
        let mut facility = self
            .state
            .lock()
            .await
            .facilities
            .facilities
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("facility '{}'", name)))?;

        decay::apply_facility_decay(&mut facility, Utc::now());
        Ok(facility)
    }

    /// Every facility decayed to `now`, sorted by name. Nothing is
    /// persisted; the periodic tick owns that.
    pub async fn facilities_at(&self, now: DateTime<Utc>) -> Vec<Facility> {
        let mut facilities = self.state.lock().await.facilities.facilities.clone();
        decay::apply_decay_all(&mut facilities, now);
        facilities.into_values().collect()
    }
}

pub(super) fn checked_name<'a>(kind: &str, name: &'a str) -> LedgerResult<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidRange(format!(
            "{} name must not be empty",
            kind
        )));
    }
    Ok(trimmed)
}

fn describe_update(update: &TunnelUpdate) -> String {
    let mut parts = Vec::new();
    if let Some(supplies) = update.total_supplies {
        parts.push(format!("supplies={}", supplies));
    }
    if let Some(rate) = update.usage_rate {
        parts.push(format!("rate={}/h", rate));
    }
    if let Some(location) = &update.location {
        parts.push(format!("location={}", location.trim()));
    }
    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}
