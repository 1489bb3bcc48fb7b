//! Dashboard render models and display bindings

use crate::facility::Tunnel;
use crate::ids::{ContentId, GuildId, SurfaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hours below which a tunnel is shown as critical
pub const CRITICAL_HOURS: f64 = 12.0;

/// Hours below which a tunnel is shown as running low
pub const LOW_HOURS: f64 = 24.0;

/// Coarse supply outlook shown next to each tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusTier {
    Empty,
    Critical,
    Low,
    Stable,
}

impl StatusTier {
    pub fn classify(total_supplies: f64, hours_remaining: Option<f64>) -> Self {
        if total_supplies <= 0.0 {
            return StatusTier::Empty;
        }
        match hours_remaining {
            Some(hours) if hours < CRITICAL_HOURS => StatusTier::Critical,
            Some(hours) if hours < LOW_HOURS => StatusTier::Low,
            _ => StatusTier::Stable,
        }
    }
}

impl fmt::Display for StatusTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusTier::Empty => write!(f, "empty"),
            StatusTier::Critical => write!(f, "critical"),
            StatusTier::Low => write!(f, "low"),
            StatusTier::Stable => write!(f, "stable"),
        }
    }
}

/// Where a rendered projection currently lives on the chat platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayHandle {
    pub surface_id: SurfaceId,
    pub content_id: ContentId,
}

/// Pagination navigation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nav {
    First,
    Prev,
    Next,
    Last,
}

/// Pagination state travelling with a display binding.
///
/// `page` always stays within `[0, total_pages - 1]` and `total_pages`
/// is at least one, so an empty dashboard still has a page to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub page: usize,
    pub total_pages: usize,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            page: 0,
            total_pages: 1,
        }
    }
}

impl PageState {
    /// Number of pages needed for `rows` rows
    pub fn pages_for(rows: usize, page_size: usize) -> usize {
        let page_size = page_size.max(1);
        rows.div_ceil(page_size).max(1)
    }

    /// Resize to `total_pages`, pulling the current page back in range
    pub fn set_total_pages(&mut self, total_pages: usize) {
        self.total_pages = total_pages.max(1);
        if self.page >= self.total_pages {
            self.page = self.total_pages - 1;
        }
    }

    /// Apply a navigation request. Returns false when the page did not
    /// move (prev on the first page, next on the last).
    pub fn navigate(&mut self, nav: Nav) -> bool {
        let last = self.total_pages.max(1) - 1;
        let target = match nav {
            Nav::First => 0,
            Nav::Prev => self.page.saturating_sub(1),
            Nav::Next => (self.page + 1).min(last),
            Nav::Last => last,
        };
        let changed = target != self.page;
        self.page = target;
        changed
    }
}

/// Identifies one dashboard: a facility shown inside a guild
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    pub guild: GuildId,
    pub facility: String,
}

impl BindingKey {
    pub fn new(guild: GuildId, facility: impl Into<String>) -> Self {
        Self {
            guild,
            facility: facility.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild, self.facility)
    }
}

/// Persisted link between a facility dashboard and its rendered content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBinding {
    pub guild: GuildId,
    pub facility: String,
    pub surface: SurfaceId,
    /// Content currently showing the dashboard, if it was rendered yet
    pub handle: Option<DisplayHandle>,
    #[serde(default)]
    pub view: PageState,
}

impl DisplayBinding {
    pub fn new(guild: GuildId, facility: impl Into<String>, surface: SurfaceId) -> Self {
        Self {
            guild,
            facility: facility.into(),
            surface,
            handle: None,
            view: PageState::default(),
        }
    }

    pub fn key(&self) -> BindingKey {
        BindingKey::new(self.guild.clone(), self.facility.clone())
    }
}

/// One dashboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelRow {
    pub name: String,
    pub location: String,
    /// Whole units remaining
    pub supplies: u64,
    pub usage_rate: f64,
    pub hours_remaining: Option<f64>,
    pub tier: StatusTier,
}

impl From<&Tunnel> for TunnelRow {
    fn from(tunnel: &Tunnel) -> Self {
        Self {
            name: tunnel.name.clone(),
            location: tunnel.location.clone(),
            supplies: tunnel.total_supplies.max(0.0).floor() as u64,
            usage_rate: tunnel.usage_rate,
            hours_remaining: tunnel.hours_remaining(),
            tier: tunnel.status_tier(),
        }
    }
}

/// A page-sliced dashboard ready for the transport to format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardPage {
    pub facility: String,
    pub rows: Vec<TunnelRow>,
    pub page: usize,
    pub total_pages: usize,
    pub tunnel_count: usize,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_for() {
        assert_eq!(PageState::pages_for(0, 8), 1);
        assert_eq!(PageState::pages_for(8, 8), 1);
        assert_eq!(PageState::pages_for(9, 8), 2);
        assert_eq!(PageState::pages_for(17, 8), 3);
    }

    #[test]
    fn test_navigation_stays_in_bounds() {
        let mut view = PageState::default();
        view.set_total_pages(3);

        assert!(!view.navigate(Nav::Prev));
        assert_eq!(view.page, 0);

        assert!(view.navigate(Nav::Next));
        assert!(view.navigate(Nav::Last));
        assert_eq!(view.page, 2);

        assert!(!view.navigate(Nav::Next));
        assert_eq!(view.page, 2);

        assert!(view.navigate(Nav::First));
        assert_eq!(view.page, 0);
    }

    #[test]
    fn test_shrinking_pulls_page_back() {
        let mut view = PageState {
            page: 4,
            total_pages: 5,
        };
        view.set_total_pages(2);
        assert_eq!(view.page, 1);

        view.set_total_pages(0);
        assert_eq!(view.total_pages, 1);
        assert_eq!(view.page, 0);
    }

    #[test]
    fn test_status_tiers() {
        assert_eq!(StatusTier::classify(0.0, Some(0.0)), StatusTier::Empty);
        assert_eq!(StatusTier::classify(100.0, Some(2.0)), StatusTier::Critical);
        assert_eq!(StatusTier::classify(100.0, Some(18.0)), StatusTier::Low);
        assert_eq!(StatusTier::classify(100.0, Some(48.0)), StatusTier::Stable);
        assert_eq!(StatusTier::classify(100.0, None), StatusTier::Stable);
    }
}
