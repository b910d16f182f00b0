//! In-memory record store

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    persistence::{Filter, Mutator, Record, RecordStore, Updated},
};
use tokio::sync::RwLock;

/// `RecordStore` keeping rows in insertion order inside a `Vec`.
///
/// Intended for tests and single-process deployments; every operation is a
/// linear scan.
pub struct MemoryRecordStore<T: Record> {
    rows: RwLock<Vec<T>>,
}

impl<T: Record> MemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Create a store pre-populated with `rows`.
    pub fn with_rows(rows: Vec<T>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Snapshot of every row.
    pub async fn all(&self) -> Vec<T> {
        self.rows.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl<T: Record> Default for MemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> RecordStore<T> for MemoryRecordStore<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|row| row.id() == id).cloned())
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<T>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|row| filter.matches(*row)).cloned().collect())
    }

    async fn insert(&self, record: T) -> Result<T> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|row| row.id() == record.id()) {
            return Err(BridgeError::Conflict(format!(
                "{} {} already exists",
                T::KEYWORD,
                record.id()
            )));
        }
        rows.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, mutator: Mutator<T>) -> Result<Updated<T>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id() == id)
            .ok_or_else(|| BridgeError::not_found(T::KEYWORD, id))?;

        let before = row.clone();
        let mut after = row.clone();
        mutator(&mut after);

        if after.id() != before.id() {
            return Err(BridgeError::Conflict(format!(
                "{} {} update attempted to change the id",
                T::KEYWORD,
                id
            )));
        }

        *row = after.clone();
        Ok(Updated { before, after })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let index = rows
            .iter()
            .position(|row| row.id() == id)
            .ok_or_else(|| BridgeError::not_found(T::KEYWORD, id))?;
        rows.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        name: String,
        owner: String,
    }

    impl Record for Item {
        const KEYWORD: &'static str = "item";

        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn set_name(&mut self, name: String) {
            self.name = name;
        }

        fn field(&self, field: &str) -> Option<String> {
            match field {
                "id" => Some(self.id.clone()),
                "name" => Some(self.name.clone()),
                "owner" => Some(self.owner.clone()),
                _ => None,
            }
        }
    }

    fn item(id: &str, name: &str, owner: &str) -> Item {
        Item {
            id: id.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = MemoryRecordStore::new();
        store.insert(item("1", "alpha", "o1")).await.unwrap();

        assert_eq!(store.fetch_by_id("1").await.unwrap().name, "alpha");
        assert_eq!(store.fetch_by_id_or_name("alpha").await.unwrap().id, "1");
        assert!(matches!(
            store.fetch_by_id("2").await,
            Err(BridgeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = MemoryRecordStore::new();
        store.insert(item("1", "alpha", "o1")).await.unwrap();
        let err = store.insert(item("1", "beta", "o1")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ambiguous_name_conflicts() {
        let store = MemoryRecordStore::with_rows(vec![
            item("1", "dup", "o1"),
            item("2", "dup", "o2"),
        ]);
        let err = store.fetch_by_id_or_name("dup").await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_returns_before_and_after() {
        let store = MemoryRecordStore::with_rows(vec![item("1", "alpha", "o1")]);

        let updated = store
            .update("1", Box::new(|row: &mut Item| row.name = "renamed".to_string()))
            .await
            .unwrap();

        assert_eq!(updated.before.name, "alpha");
        assert_eq!(updated.after.name, "renamed");
        assert_eq!(store.fetch_by_id("1").await.unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let store = MemoryRecordStore::with_rows(vec![item("1", "alpha", "o1")]);

        let err = store
            .update("1", Box::new(|row: &mut Item| row.id = "9".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Conflict(_)));
        assert!(store.find_by_id("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_count_and_delete() {
        let store = MemoryRecordStore::with_rows(vec![
            item("1", "a", "o1"),
            item("2", "b", "o1"),
            item("3", "c", "o2"),
        ]);

        let filter = Filter::new().equals("owner", "o1");
        assert_eq!(store.count(&filter).await.unwrap(), 2);

        store.delete("1").await.unwrap();
        assert_eq!(store.count(&filter).await.unwrap(), 1);
        assert!(store.delete("1").await.is_err());
        assert_eq!(store.len().await, 2);
    }
}
