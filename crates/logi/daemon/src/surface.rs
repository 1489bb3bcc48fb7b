//! File-backed display surface.
//!
//! Each surface is a directory; each dashboard is one JSON file named by
//! its content id. Deleting a file from outside is treated exactly like a
//! chat message deleted by a moderator: the next edit reports the content
//! as missing and the reconciler recreates it.
//!
//! Surface and content ids become path segments, so ids that could escape
//! the root directory are refused.

use async_trait::async_trait;
use logi_ledger::{DisplayError, DisplaySurface};
use logi_types::{ContentId, DashboardPage, DisplayHandle, SurfaceId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Display surface rendering dashboards to files
#[derive(Debug, Clone)]
pub struct FileSurface {
    root: PathBuf,
}

impl FileSurface {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn surface_dir(&self, surface: &SurfaceId) -> Result<PathBuf, DisplayError> {
        Ok(self.root.join(segment(surface.as_str())?))
    }

    fn path_of(&self, handle: &DisplayHandle) -> Result<PathBuf, DisplayError> {
        let content = segment(handle.content_id.as_str())?;
        Ok(self
            .surface_dir(&handle.surface_id)?
            .join(format!("{}.json", content)))
    }

    async fn write_page(path: &Path, page: &DashboardPage) -> Result<(), DisplayError> {
        let bytes = serde_json::to_vec_pretty(page)
            .map_err(|e| DisplayError::Transport(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(transport)?;
        tokio::fs::rename(&tmp, path).await.map_err(transport)
    }
}

/// A single normal path component
fn segment(id: &str) -> Result<&str, DisplayError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(DisplayError::Transport(format!("invalid id '{}'", id)));
    }
    Ok(id)
}

fn transport(error: std::io::Error) -> DisplayError {
    DisplayError::Transport(error.to_string())
}

#[async_trait]
impl DisplaySurface for FileSurface {
    async fn create(
        &self,
        surface: &SurfaceId,
        page: &DashboardPage,
    ) -> Result<DisplayHandle, DisplayError> {
        tokio::fs::create_dir_all(self.surface_dir(surface)?)
            .await
            .map_err(transport)?;

        let handle = DisplayHandle {
            surface_id: surface.clone(),
            content_id: ContentId::new(Uuid::new_v4().to_string()),
        };
        Self::write_page(&self.path_of(&handle)?, page).await?;
        Ok(handle)
    }

    async fn edit(&self, handle: &DisplayHandle, page: &DashboardPage) -> Result<(), DisplayError> {
        let path = self.path_of(handle)?;
        if !tokio::fs::try_exists(&path).await.map_err(transport)? {
            return Err(DisplayError::ContentMissing(handle.content_id.to_string()));
        }
        Self::write_page(&path, page).await
    }

    async fn fetch(&self, handle: &DisplayHandle) -> Result<DashboardPage, DisplayError> {
        let bytes = match tokio::fs::read(self.path_of(handle)?).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DisplayError::ContentMissing(handle.content_id.to_string()))
            }
            Err(e) => return Err(transport(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| DisplayError::Transport(e.to_string()))
    }

    async fn delete(&self, handle: &DisplayHandle) -> Result<(), DisplayError> {
        match tokio::fs::remove_file(self.path_of(handle)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(facility: &str) -> DashboardPage {
        DashboardPage {
            facility: facility.to_string(),
            rows: Vec::new(),
            page: 0,
            total_pages: 1,
            tunnel_count: 0,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_edit_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path());

        let handle = surface
            .create(&SurfaceId::new("chan-1"), &page("North"))
            .await
            .unwrap();
        surface.edit(&handle, &page("North v2")).await.unwrap();

        let shown = surface.fetch(&handle).await.unwrap();
        assert_eq!(shown.facility, "North v2");
    }

    #[tokio::test]
    async fn test_deleted_file_reports_missing_content() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path());
        let handle = surface
            .create(&SurfaceId::new("chan-1"), &page("North"))
            .await
            .unwrap();

        std::fs::remove_file(surface.path_of(&handle).unwrap()).unwrap();
        assert!(matches!(
            surface.edit(&handle, &page("North")).await,
            Err(DisplayError::ContentMissing(_))
        ));
        assert!(matches!(
            surface.fetch(&handle).await,
            Err(DisplayError::ContentMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path());
        let handle = surface
            .create(&SurfaceId::new("chan-1"), &page("North"))
            .await
            .unwrap();

        surface.delete(&handle).await.unwrap();
        assert!(!surface.path_of(&handle).unwrap().exists());
        surface.delete(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_cannot_leave_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("surfaces");
        let surface = FileSurface::new(&root);

        for id in ["..", "../outside", "a/b", "a\\b", ""] {
            assert!(matches!(
                surface.create(&SurfaceId::new(id), &page("North")).await,
                Err(DisplayError::Transport(_))
            ));
        }

        let escaping = DisplayHandle {
            surface_id: SurfaceId::new("chan-1"),
            content_id: ContentId::new("../../victim"),
        };
        std::fs::write(dir.path().join("victim.json"), "{}").unwrap();
        assert!(surface.edit(&escaping, &page("North")).await.is_err());
        assert!(surface.delete(&escaping).await.is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("victim.json")).unwrap(), "{}");
        assert!(!dir.path().join("outside").exists());
    }
}
