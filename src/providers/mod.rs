//! Built-in provider adapters.
//!
//! Each adapter is constants plus pure mappings; all token and request
//! behavior lives in the generic engine.

use std::sync::Arc;

use crate::provider::CloudProvider;

pub mod box_;
pub mod dropbox;
pub mod google_drive;
pub mod onedrive;

pub use box_::BoxStorage;
pub use dropbox::Dropbox;
pub use google_drive::GoogleDrive;
pub use onedrive::OneDrive;

/// All built-in providers.
pub fn all() -> Vec<Arc<dyn CloudProvider>> {
    vec![
        Arc::new(BoxStorage),
        Arc::new(Dropbox),
        Arc::new(GoogleDrive),
        Arc::new(OneDrive),
    ]
}

/// Looks up a built-in provider by its stable name.
pub fn by_name(name: &str) -> Option<Arc<dyn CloudProvider>> {
    all().into_iter().find(|p| p.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name() {
        assert!(by_name("box").is_some());
        assert!(by_name("dropbox").is_some());
        assert!(by_name("google_drive").is_some());
        assert!(by_name("onedrive").is_some());
        assert!(by_name("smb").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let providers = all();
        let mut names: Vec<_> = providers.iter().map(|p| p.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), providers.len());
    }
}
