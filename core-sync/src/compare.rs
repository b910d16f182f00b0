//! # Set Comparator
//!
//! Pairs local records with remote records by a stable key.
//!
//! ## Overview
//!
//! [`compare_sets`] partitions the two inputs into four collections:
//!
//! - `removed`: local records with no remote counterpart
//! - `common_local` / `common_remote`: matched pairs, index-aligned
//! - `added`: remote records with no local counterpart
//!
//! Matching uses exact key equality. If any element yields no key (or an
//! empty key) the whole comparison fails, so a malformed remote record can
//! never cause its local twin to be deleted and recreated.
//!
//! Duplicate keys are paired first-come; surplus duplicates fall into
//! `removed` or `added`, so every input element lands in exactly one output.

use bridge_traits::cloud::{
    RemoteInterVpcNetwork, RemoteProject, RemoteRegion, RemoteVpc, RemoteZone,
};
use core_inventory::models::{Cloudregion, ExternalProject, InterVpcNetwork, Vpc, Zone};
use std::collections::{HashMap, VecDeque};

use crate::error::{Result, SyncError};

/// Default matching key of a record: the external id of a local row, the
/// global id of a remote record.
pub trait Keyed {
    fn sync_key(&self) -> Option<&str>;
}

macro_rules! keyed_by_external_id {
    ($($ty:ty),*) => {
        $(impl Keyed for $ty {
            fn sync_key(&self) -> Option<&str> {
                self.external_id.as_deref()
            }
        })*
    };
}

macro_rules! keyed_by_global_id {
    ($($ty:ty),*) => {
        $(impl Keyed for $ty {
            fn sync_key(&self) -> Option<&str> {
                Some(self.global_id.as_str())
            }
        })*
    };
}

keyed_by_external_id!(Cloudregion, Zone, Vpc, InterVpcNetwork, ExternalProject);
keyed_by_global_id!(RemoteRegion, RemoteZone, RemoteVpc, RemoteInterVpcNetwork, RemoteProject);

/// Partition produced by [`compare_sets`].
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison<L, R> {
    pub removed: Vec<L>,
    pub common_local: Vec<L>,
    pub common_remote: Vec<R>,
    pub added: Vec<R>,
}

impl<L, R> Comparison<L, R> {
    /// Matched pairs, consuming the common partitions.
    pub fn take_pairs(&mut self) -> Vec<(L, R)> {
        std::mem::take(&mut self.common_local)
            .into_iter()
            .zip(std::mem::take(&mut self.common_remote))
            .collect()
    }
}

fn collect_keys<T, F>(items: &[T], side: &str, key: F) -> Result<Vec<String>>
where
    F: Fn(&T) -> Option<String>,
{
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match key(item) {
            Some(k) if !k.is_empty() => Ok(k),
            _ => Err(SyncError::Comparison(format!(
                "{} record at position {} has no matching key",
                side, index
            ))),
        })
        .collect()
}

/// Compare `locals` against `remotes` using the given key extractors.
///
/// `common_local` and `common_remote` follow the order of `remotes`;
/// `removed` keeps the order of `locals`.
pub fn compare_sets<L, R, KL, KR>(
    locals: Vec<L>,
    remotes: Vec<R>,
    local_key: KL,
    remote_key: KR,
) -> Result<Comparison<L, R>>
where
    KL: Fn(&L) -> Option<String>,
    KR: Fn(&R) -> Option<String>,
{
    let local_keys = collect_keys(&locals, "local", local_key)?;
    let remote_keys = collect_keys(&remotes, "remote", remote_key)?;

    let mut by_key: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (index, key) in local_keys.iter().enumerate() {
        by_key.entry(key.as_str()).or_default().push_back(index);
    }

    let mut locals: Vec<Option<L>> = locals.into_iter().map(Some).collect();
    let mut comparison = Comparison {
        removed: Vec::new(),
        common_local: Vec::new(),
        common_remote: Vec::new(),
        added: Vec::new(),
    };

    for (remote, key) in remotes.into_iter().zip(remote_keys.iter()) {
        let matched = by_key
            .get_mut(key.as_str())
            .and_then(|queue| queue.pop_front())
            .and_then(|index| locals[index].take());

        match matched {
            Some(local) => {
                comparison.common_local.push(local);
                comparison.common_remote.push(remote);
            }
            None => comparison.added.push(remote),
        }
    }

    comparison.removed = locals.into_iter().flatten().collect();
    Ok(comparison)
}

/// [`compare_sets`] with the [`Keyed`] default keys.
pub fn compare_keyed<L: Keyed, R: Keyed>(
    locals: Vec<L>,
    remotes: Vec<R>,
) -> Result<Comparison<L, R>> {
    compare_sets(
        locals,
        remotes,
        |l| l.sync_key().map(str::to_string),
        |r| r.sync_key().map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: Option<&'static str>,
        tag: &'static str,
    }

    impl Keyed for Item {
        fn sync_key(&self) -> Option<&str> {
            self.key
        }
    }

    fn item(key: &'static str, tag: &'static str) -> Item {
        Item {
            key: Some(key),
            tag,
        }
    }

    #[test]
    fn test_partitions_and_alignment() {
        let locals = vec![item("z1", "zoneA"), item("z2", "zoneB")];
        let remotes = vec![item("z3", "new"), item("z1", "Zone-A2")];

        let mut cmp = compare_keyed(locals, remotes).unwrap();

        assert_eq!(cmp.removed, vec![item("z2", "zoneB")]);
        assert_eq!(cmp.added, vec![item("z3", "new")]);
        let pairs = cmp.take_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.tag, "zoneA");
        assert_eq!(pairs[0].1.tag, "Zone-A2");
    }

    #[test]
    fn test_totality_with_duplicates() {
        let locals = vec![item("a", "l1"), item("a", "l2"), item("b", "l3")];
        let remotes = vec![item("a", "r1"), item("c", "r2"), item("c", "r3")];

        let cmp = compare_keyed(locals, remotes).unwrap();

        assert_eq!(cmp.removed.len() + cmp.common_local.len(), 3);
        assert_eq!(cmp.added.len() + cmp.common_remote.len(), 3);
        assert_eq!(cmp.common_local[0].tag, "l1");
        let removed: Vec<&str> = cmp.removed.iter().map(|i| i.tag).collect();
        assert_eq!(removed, vec!["l2", "l3"]);
    }

    #[test]
    fn test_empty_remote_marks_everything_removed() {
        let cmp = compare_keyed(vec![item("a", "l1"), item("b", "l2")], Vec::<Item>::new()).unwrap();
        assert_eq!(cmp.removed.len(), 2);
        assert!(cmp.common_local.is_empty());
        assert!(cmp.added.is_empty());
    }

    #[test]
    fn test_missing_key_fails_whole_comparison() {
        let broken = Item { key: None, tag: "x" };
        let err = compare_keyed(vec![item("a", "l1")], vec![item("a", "r1"), broken]).unwrap_err();
        assert!(matches!(err, SyncError::Comparison(msg) if msg.contains("remote record at position 1")));

        let empty = Item {
            key: Some(""),
            tag: "y",
        };
        assert!(compare_keyed(vec![empty], Vec::<Item>::new()).is_err());
    }

    #[test]
    fn test_custom_key_extractors() {
        let locals = vec!["aliyun/cn-hangzhou".to_string()];
        let remotes = vec!["cn-hangzhou".to_string(), "cn-beijing".to_string()];

        let cmp = compare_sets(
            locals,
            remotes,
            |l: &String| Some(l.clone()),
            |r: &String| Some(format!("aliyun/{}", r)),
        )
        .unwrap();

        assert_eq!(cmp.common_remote, vec!["cn-hangzhou".to_string()]);
        assert_eq!(cmp.added, vec!["cn-beijing".to_string()]);
        assert!(cmp.removed.is_empty());
    }
}
