//! Persistence Gateway Abstractions
//!
//! The sync engine never talks to a database directly. Every model it touches
//! implements [`Record`] and is stored behind a [`RecordStore`], which hosts
//! back with their own storage (SQL, KV store, or the in-memory store shipped
//! in `bridge-local`).

use async_trait::async_trait;

use crate::error::{BridgeError, Result};

/// A persisted model row.
pub trait Record: Clone + Send + Sync + 'static {
    /// Keyword of the model (`"zone"`, `"cloudprovider"`, ...). Used for lock
    /// scopes, audit entries and error messages.
    const KEYWORD: &'static str;

    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    /// Look up a filterable column. Booleans render as `"true"`/`"false"`,
    /// unset optional columns as `None`.
    fn field(&self, field: &str) -> Option<String>;
}

/// A single filter predicate over [`Record::field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    StartsWith(String, String),
}

impl Condition {
    fn matches<R: Record>(&self, record: &R) -> bool {
        match self {
            Condition::Equals(field, value) => record.field(field).as_deref() == Some(value),
            Condition::NotEquals(field, value) => record.field(field).as_deref() != Some(value),
            Condition::In(field, values) => record
                .field(field)
                .map(|v| values.iter().any(|candidate| candidate == &v))
                .unwrap_or(false),
            Condition::StartsWith(field, prefix) => record
                .field(field)
                .map(|v| v.starts_with(prefix.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Conjunction of [`Condition`]s. An empty filter matches every record.
///
/// # Example
///
/// ```ignore
/// let filter = Filter::new()
///     .equals("cloudprovider_id", provider_id)
///     .is_true("enabled");
/// let bindings = store.list(&filter).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::Equals(field.into(), value.into()));
        self
    }

    pub fn not_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::NotEquals(field.into(), value.into()));
        self
    }

    pub fn in_values<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.push(Condition::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn starts_with(mut self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::StartsWith(field.into(), prefix.into()));
        self
    }

    pub fn is_true(self, field: impl Into<String>) -> Self {
        self.equals(field, "true")
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Record state before and after an [`RecordStore::update`].
#[derive(Debug, Clone)]
pub struct Updated<T> {
    pub before: T,
    pub after: T,
}

/// In-place modification applied atomically by [`RecordStore::update`].
pub type Mutator<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Typed persistence gateway for one model.
///
/// Implementations must apply `update` atomically with respect to other
/// writers of the same row, and must never change a record's id.
#[async_trait]
pub trait RecordStore<T: Record>: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    async fn list(&self, filter: &Filter) -> Result<Vec<T>>;

    async fn insert(&self, record: T) -> Result<T>;

    async fn update(&self, id: &str, mutator: Mutator<T>) -> Result<Updated<T>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Like [`find_by_id`](Self::find_by_id) but a missing row is an error.
    async fn fetch_by_id(&self, id: &str) -> Result<T> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| BridgeError::not_found(T::KEYWORD, id))
    }

    /// Resolve an identifier that may be either an id or a unique name.
    async fn fetch_by_id_or_name(&self, ident: &str) -> Result<T> {
        if let Some(record) = self.find_by_id(ident).await? {
            return Ok(record);
        }
        let mut matches = self.list(&Filter::new().equals("name", ident)).await?;
        match matches.len() {
            0 => Err(BridgeError::not_found(T::KEYWORD, ident)),
            1 => Ok(matches.remove(0)),
            n => Err(BridgeError::Conflict(format!(
                "{} name {} is ambiguous ({} matches)",
                T::KEYWORD,
                ident,
                n
            ))),
        }
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self.list(filter).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        id: String,
        name: String,
        parent: Option<String>,
        enabled: bool,
    }

    impl Record for Row {
        const KEYWORD: &'static str = "row";

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
                "parent" => self.parent.clone(),
                "enabled" => Some(self.enabled.to_string()),
                _ => None,
            }
        }
    }

    fn row(id: &str, parent: Option<&str>, enabled: bool) -> Row {
        Row {
            id: id.to_string(),
            name: format!("name-{}", id),
            parent: parent.map(str::to_string),
            enabled,
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(Filter::new().matches(&row("a", None, false)));
    }

    #[test]
    fn test_filter_conjunction() {
        let filter = Filter::new().equals("parent", "p1").is_true("enabled");

        assert!(filter.matches(&row("a", Some("p1"), true)));
        assert!(!filter.matches(&row("b", Some("p1"), false)));
        assert!(!filter.matches(&row("c", Some("p2"), true)));
        assert!(!filter.matches(&row("d", None, true)));
    }

    #[test]
    fn test_filter_in_and_prefix() {
        let filter = Filter::new().in_values("id", ["a", "b"]);
        assert!(filter.matches(&row("a", None, true)));
        assert!(!filter.matches(&row("z", None, true)));

        let filter = Filter::new().starts_with("name", "name-a");
        assert!(filter.matches(&row("abc", None, true)));
        assert!(!filter.matches(&row("b", None, true)));
    }

    #[test]
    fn test_not_equals_matches_unset_field() {
        let filter = Filter::new().not_equals("parent", "p1");
        assert!(filter.matches(&row("a", None, true)));
        assert!(!filter.matches(&row("b", Some("p1"), true)));
    }
}
