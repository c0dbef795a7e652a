//! In-memory slices the UI renders, and the watch-backed handle that owns them.
//!
//! A [`Projection`] is the single owner of one slice. Writers go through it,
//! one at a time, and every write wakes the receivers returned by
//! [`Projection::watch`].

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use db::models::entity::{Entity, EntityId};
use tokio::sync::watch;

struct ProjectionInner<S> {
    name: String,
    tx: watch::Sender<S>,
    writer: Mutex<()>,
}

pub struct Projection<S> {
    inner: Arc<ProjectionInner<S>>,
}

impl<S> Clone for Projection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Projection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<S: Clone + Send + Sync + 'static> Projection<S> {
    pub fn new(name: impl Into<String>, initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(ProjectionInner {
                name: name.into(),
                tx,
                writer: Mutex::new(()),
            }),
        }
    }

    /// Slice name, e.g. `checklist:<task_id>`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> S {
        self.inner.tx.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.tx.borrow())
    }

    /// Replace the slice wholesale and return what was there.
    pub fn replace(&self, value: S) -> S {
        let _writer = self.write_lock();
        self.inner.tx.send_replace(value)
    }

    /// Derive the next slice from the current one in a single step and return
    /// the previous slice.
    pub fn apply(&self, change: impl FnOnce(&S) -> S) -> S {
        let _writer = self.write_lock();
        let next = change(&self.inner.tx.borrow());
        self.inner.tx.send_replace(next)
    }

    pub fn update(&self, f: impl FnOnce(&mut S)) {
        let _writer = self.write_lock();
        self.inner.tx.send_modify(f);
    }

    /// Like [`Projection::update`], but only notifies when `f` returns true.
    pub fn update_if(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
        let _writer = self.write_lock();
        self.inner.tx.send_if_modified(f)
    }

    pub fn watch(&self) -> watch::Receiver<S> {
        self.inner.tx.subscribe()
    }
}

/// Ordered list of entities with unique ids. Inserting an id that is already
/// present replaces that entry where it stands.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSlice<T> {
    items: Vec<T>,
}

impl<T> Default for ListSlice<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Entity> ListSlice<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut slice = Self::new();
        for item in items {
            slice.push(item);
        }
        slice
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.position(id).is_some()
    }

    pub fn push(&mut self, item: T) {
        match self.position(item.id()) {
            Some(index) => self.items[index] = item,
            None => self.items.push(item),
        }
    }

    pub fn prepend(&mut self, item: T) {
        match self.position(item.id()) {
            Some(index) => self.items[index] = item,
            None => self.items.insert(0, item),
        }
    }

    /// Place `item` at `index` (clamped), moving it if it is already present.
    pub fn insert_at(&mut self, index: usize, item: T) {
        if let Some(existing) = self.position(item.id()) {
            self.items.remove(existing);
        }
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    pub fn update(&mut self, id: &EntityId, f: impl FnOnce(&mut T)) -> bool {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    pub fn update_all(&mut self, mut f: impl FnMut(&mut T)) {
        self.items.iter_mut().for_each(|item| f(item));
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<T> {
        let index = self.position(id)?;
        Some(self.items.remove(index))
    }

    pub fn has_provisional(&self) -> bool {
        self.items.iter().any(|item| item.id().is_provisional())
    }

    /// Swap a provisional entry for the authoritative one.
    ///
    /// If the authoritative row is already present (its change event won the
    /// race against the create response) the provisional entry is dropped and
    /// the existing entry is refreshed, so the id appears exactly once.
    pub fn replace_provisional(&mut self, provisional: &EntityId, authoritative: T) {
        if self.contains(authoritative.id()) {
            self.remove(provisional);
            self.push(authoritative);
            return;
        }
        match self.position(provisional) {
            Some(index) => self.items[index] = authoritative,
            None => self.items.push(authoritative),
        }
    }
}

impl<'a, T> IntoIterator for &'a ListSlice<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Entities split into ordered groups by a status-like key. Every id appears
/// in at most one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSlice<K, T> {
    groups: BTreeMap<K, ListSlice<T>>,
}

impl<K, T> Default for GroupedSlice<K, T> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, T: Entity> GroupedSlice<K, T> {
    /// Empty slice with one (possibly empty) group per key.
    pub fn with_groups(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            groups: keys.into_iter().map(|k| (k, ListSlice::new())).collect(),
        }
    }

    /// Group `items` by `key_of`, keeping their relative order.
    pub fn regroup(
        keys: impl IntoIterator<Item = K>,
        items: impl IntoIterator<Item = T>,
        key_of: impl Fn(&T) -> K,
    ) -> Self {
        let mut slice = Self::with_groups(keys);
        for item in items {
            let key = key_of(&item);
            slice.upsert(&key, item);
        }
        slice
    }

    pub fn group(&self, key: &K) -> Option<&ListSlice<T>> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&K, &ListSlice<T>)> {
        self.groups.iter()
    }

    /// Group key and index of `id`.
    pub fn locate(&self, id: &EntityId) -> Option<(K, usize)> {
        self.groups
            .iter()
            .find_map(|(key, list)| list.position(id).map(|index| (key.clone(), index)))
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.groups.values().find_map(|list| list.get(id))
    }

    /// Remove `id` from its group, apply `edit`, and insert it into `to` at
    /// `index`. Both groups change in the same step.
    pub fn move_entity(
        &mut self,
        id: &EntityId,
        to: &K,
        index: usize,
        edit: impl FnOnce(&mut T),
    ) -> bool {
        let Some(mut item) = self.remove(id) else {
            return false;
        };
        edit(&mut item);
        self.groups
            .entry(to.clone())
            .or_default()
            .insert_at(index, item);
        true
    }

    /// Insert or refresh `item` in `key`, taking it out of any other group.
    pub fn upsert(&mut self, key: &K, item: T) {
        if let Some((current, _)) = self.locate(item.id()) {
            if &current != key {
                self.remove(item.id());
            }
        }
        self.groups.entry(key.clone()).or_default().push(item);
    }

    pub fn insert_at(&mut self, key: &K, index: usize, item: T) {
        if let Some((current, _)) = self.locate(item.id()) {
            if &current != key {
                self.remove(item.id());
            }
        }
        self.groups
            .entry(key.clone())
            .or_default()
            .insert_at(index, item);
    }

    pub fn update(&mut self, id: &EntityId, f: impl FnOnce(&mut T)) -> bool {
        match self.groups.values_mut().find(|list| list.contains(id)) {
            Some(list) => list.update(id, f),
            None => false,
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<T> {
        self.groups.values_mut().find_map(|list| list.remove(id))
    }

    /// Group-aware counterpart of [`ListSlice::replace_provisional`].
    pub fn replace_provisional(&mut self, key: &K, provisional: &EntityId, authoritative: T) {
        if let Some((current, _)) = self.locate(authoritative.id()) {
            self.remove(provisional);
            if let Some(list) = self.groups.get_mut(&current) {
                list.push(authoritative);
            }
            return;
        }
        match self.locate(provisional) {
            Some((current, _)) => {
                if let Some(list) = self.groups.get_mut(&current) {
                    list.replace_provisional(provisional, authoritative);
                }
            }
            None => self.groups.entry(key.clone()).or_default().push(authoritative),
        }
    }

    pub fn total_len(&self) -> usize {
        self.groups.values().map(ListSlice::len).sum()
    }

    pub fn has_provisional(&self) -> bool {
        self.groups.values().any(ListSlice::has_provisional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Card {
        id: EntityId,
        column: u8,
        label: &'static str,
    }

    impl Entity for Card {
        const COLLECTION: &'static str = "cards";

        fn id(&self) -> &EntityId {
            &self.id
        }
    }

    fn card(id: &str, column: u8) -> Card {
        Card {
            id: EntityId::from(id),
            column,
            label: "",
        }
    }

    fn ids(list: &ListSlice<Card>) -> Vec<&str> {
        list.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn list_keeps_ids_unique() {
        let mut list = ListSlice::from_items([card("a", 0), card("b", 0), card("a", 1)]);
        assert_eq!(ids(&list), ["a", "b"]);
        assert_eq!(list.get(&"a".into()).map(|c| c.column), Some(1));

        list.prepend(card("c", 0));
        list.prepend(card("b", 9));
        assert_eq!(ids(&list), ["c", "a", "b"]);

        list.insert_at(0, card("b", 9));
        list.insert_at(99, card("c", 0));
        assert_eq!(ids(&list), ["b", "a", "c"]);
    }

    #[test]
    fn provisional_is_replaced_in_place() {
        let temp = EntityId::provisional();
        let mut list = ListSlice::from_items([card("a", 0), card(temp.as_str(), 0), card("b", 0)]);
        list.replace_provisional(&temp, card("real", 0));
        assert_eq!(ids(&list), ["a", "real", "b"]);
        assert!(!list.has_provisional());
    }

    #[test]
    fn provisional_is_dropped_when_echo_arrived_first() {
        let temp = EntityId::provisional();
        let mut list = ListSlice::from_items([card(temp.as_str(), 0), card("a", 0)]);
        list.push(Card {
            label: "from feed",
            ..card("real", 0)
        });

        list.replace_provisional(&temp, card("real", 0));
        assert_eq!(ids(&list), ["a", "real"]);
        assert_eq!(list.iter().filter(|c| c.id.as_str() == "real").count(), 1);
    }

    #[test]
    fn grouped_move_touches_both_groups() {
        let mut grouped = GroupedSlice::regroup(
            [0u8, 1, 2],
            [card("a", 0), card("b", 0), card("c", 1)],
            |c| c.column,
        );
        assert!(grouped.group(&2).unwrap().is_empty());

        assert!(grouped.move_entity(&"a".into(), &1, 0, |c| c.column = 1));
        assert_eq!(ids(grouped.group(&0).unwrap()), ["b"]);
        assert_eq!(ids(grouped.group(&1).unwrap()), ["a", "c"]);
        assert_eq!(grouped.locate(&"a".into()), Some((1, 0)));
        assert!(!grouped.move_entity(&"zzz".into(), &1, 0, |_| {}));
        assert_eq!(grouped.total_len(), 3);
    }

    #[test]
    fn grouped_upsert_moves_between_groups() {
        let mut grouped = GroupedSlice::regroup([0u8, 1], [card("a", 0)], |c| c.column);
        grouped.upsert(&1, card("a", 1));
        assert!(grouped.group(&0).unwrap().is_empty());
        assert_eq!(grouped.get(&"a".into()).map(|c| c.column), Some(1));
    }

    #[test]
    fn grouped_provisional_replacement_dedups_echo() {
        let temp = EntityId::provisional();
        let mut grouped = GroupedSlice::regroup([0u8], [card(temp.as_str(), 0)], |c| c.column);
        grouped.upsert(&0, card("real", 0));
        grouped.replace_provisional(&0, &temp, card("real", 0));
        assert_eq!(ids(grouped.group(&0).unwrap()), ["real"]);
    }

    #[tokio::test]
    async fn projection_notifies_watchers() {
        let projection = Projection::new("cards", ListSlice::<Card>::new());
        let mut rx = projection.watch();

        let previous = projection.apply(|list| {
            let mut next = list.clone();
            next.push(card("a", 0));
            next
        });
        assert!(previous.is_empty());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        assert!(!projection.update_if(|list| list.remove(&"missing".into()).is_some()));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(projection.name(), "cards");
    }
}
