//! JSON file storage for configuration lists (automations, seeded devices)
//!
//! Only configuration is stored. Deadlines and armed timers are rebuilt from
//! live events after a restart.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Load a list from a JSON file. Missing or unreadable files yield an empty list.
pub async fn load_list<T: DeserializeOwned>(path: &Path, what: &str) -> Vec<T> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} file at {:?}, starting empty", what, path);
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read {} file {:?}: {}", what, path, e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<T>>(&contents) {
        Ok(items) => {
            tracing::info!("Loaded {} {} from {:?}", items.len(), what, path);
            items
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} file {:?}: {}", what, path, e);
            Vec::new()
        }
    }
}

/// Save a list to a JSON file, replacing it atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(items)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} entries to {:?}", items.len(), path);
    Ok(())
}
