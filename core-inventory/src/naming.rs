//! Collision-free local names for newly mirrored resources.
//!
//! Callers must hold the `(keyword, "name")` lock while generating and
//! inserting, otherwise two workers can pick the same name.

use bridge_traits::persistence::{Filter, Record, RecordStore};
use std::collections::HashSet;

use crate::error::Result;

/// Return `base` if unused, else the first free `base-N` (N = 1, 2, ...).
pub async fn generate_name<T: Record>(store: &dyn RecordStore<T>, base: &str) -> Result<String> {
    let base = name_base::<T>(base);
    let taken = taken_names(store, base, None).await?;
    Ok(first_free(base, &taken))
}

/// Name `record` should carry once its remote counterpart is called `base`.
///
/// `base` itself when no other record uses it, else the current name if it
/// is already a free name derived from `base`, else the first free `base-N`.
/// Callers hold the naming lock, as for [`generate_name`].
pub async fn rename_target<T: Record>(store: &dyn RecordStore<T>, record: &T, base: &str) -> Result<String> {
    let base = name_base::<T>(base);
    let taken = taken_names(store, base, Some(record.id())).await?;

    if !taken.contains(base) {
        return Ok(base.to_string());
    }
    if is_derived_name(record.name(), base) && !taken.contains(record.name()) {
        return Ok(record.name().to_string());
    }
    Ok(first_free(base, &taken))
}

fn name_base<T: Record>(base: &str) -> &str {
    if base.trim().is_empty() {
        T::KEYWORD
    } else {
        base.trim()
    }
}

async fn taken_names<T: Record>(
    store: &dyn RecordStore<T>,
    base: &str,
    skip_id: Option<&str>,
) -> Result<HashSet<String>> {
    Ok(store
        .list(&Filter::new().starts_with("name", base))
        .await?
        .into_iter()
        .filter(|record| Some(record.id()) != skip_id)
        .map(|record| record.name().to_string())
        .collect())
}

fn first_free(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{}-{}", base, suffix);
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Whether `current` is `base` itself or a name generated from it.
///
pub fn is_derived_name(current: &str, base: &str) -> bool {
    if current == base {
        return true;
    }
    current
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('-'))
        .map(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Zone;
    use bridge_local::MemoryRecordStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::persistence::{Mutator, Updated};
    use mockall::mock;

    fn zone(id: &str, name: &str) -> Zone {
        Zone {
            id: id.to_string(),
            name: name.to_string(),
            external_id: None,
            cloudregion_id: "r1".to_string(),
            status: "enable".to_string(),
            is_emulated: false,
            i18n: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_unused_name_is_kept() {
        let store = MemoryRecordStore::<Zone>::new();
        assert_eq!(generate_name::<Zone>(&store, "zone-a").await.unwrap(), "zone-a");
    }

    #[tokio::test]
    async fn test_collisions_get_numeric_suffix() {
        let store = MemoryRecordStore::with_rows(vec![
            zone("1", "zone-a"),
            zone("2", "zone-a-1"),
            zone("3", "zone-ab"),
        ]);
        assert_eq!(generate_name::<Zone>(&store, "zone-a").await.unwrap(), "zone-a-2");
    }

    #[tokio::test]
    async fn test_blank_base_falls_back_to_keyword() {
        let store = MemoryRecordStore::<Zone>::new();
        assert_eq!(generate_name::<Zone>(&store, "  ").await.unwrap(), "zone");
    }

    #[test]
    fn test_is_derived_name() {
        assert!(is_derived_name("zone-a", "zone-a"));
        assert!(is_derived_name("zone-a-3", "zone-a"));
        assert!(!is_derived_name("zone-a-", "zone-a"));
        assert!(!is_derived_name("zone-ab", "zone-a"));
        assert!(!is_derived_name("zone-a-x1", "zone-a"));
    }

    #[tokio::test]
    async fn test_rename_takes_free_base_name() {
        let store = MemoryRecordStore::with_rows(vec![zone("1", "web-2"), zone("2", "web-1")]);
        let record = store.fetch_by_id("1").await.unwrap();
        assert_eq!(rename_target::<Zone>(&store, &record, "web").await.unwrap(), "web");
    }

    #[tokio::test]
    async fn test_rename_keeps_free_derived_name() {
        let store = MemoryRecordStore::with_rows(vec![zone("1", "web"), zone("2", "web-3")]);
        let record = store.fetch_by_id("2").await.unwrap();
        assert_eq!(rename_target::<Zone>(&store, &record, "web").await.unwrap(), "web-3");
    }

    #[tokio::test]
    async fn test_rename_onto_used_name_gets_suffix() {
        let store = MemoryRecordStore::with_rows(vec![
            zone("1", "web"),
            zone("2", "web-1"),
            zone("3", "db"),
        ]);
        let record = store.fetch_by_id("3").await.unwrap();
        assert_eq!(rename_target::<Zone>(&store, &record, "web").await.unwrap(), "web-2");
    }

    mock! {
        ZoneStore {}

        #[async_trait::async_trait]
        impl RecordStore<Zone> for ZoneStore {
            async fn find_by_id(&self, id: &str) -> BridgeResult<Option<Zone>>;
            async fn list(&self, filter: &Filter) -> BridgeResult<Vec<Zone>>;
            async fn insert(&self, record: Zone) -> BridgeResult<Zone>;
            async fn update(&self, id: &str, mutator: Mutator<Zone>) -> BridgeResult<Updated<Zone>>;
            async fn delete(&self, id: &str) -> BridgeResult<()>;
        }
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let mut store = MockZoneStore::new();
        store
            .expect_list()
            .returning(|_| Err(BridgeError::Storage("connection reset".to_string())));

        let err = generate_name::<Zone>(&store, "zone-a").await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
