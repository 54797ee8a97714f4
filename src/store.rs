use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::item::{Handler, Item, ItemId};
use crate::storage::PersistedState;

/// Owns every tracked item. Insertion happens at the head, so iteration order
/// is newest first.
#[derive(Debug)]
pub struct ItemStore {
    items: HashMap<ItemId, Item>,
    order: VecDeque<ItemId>,
    next_id: u64,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            order: VecDeque::new(),
            next_id: 1,
        }
    }
}

impl ItemStore {
    pub fn from_state(state: PersistedState) -> Self {
        let mut store = Self {
            next_id: state.next_id.max(1),
            ..Self::default()
        };
        for item in state.items {
            store.next_id = store.next_id.max(item.id.0 + 1);
            if store.items.contains_key(&item.id) {
                continue;
            }
            store.order.push_back(item.id);
            store.items.insert(item.id, item);
        }
        store
    }

    pub fn to_state(&self) -> PersistedState {
        PersistedState {
            next_id: self.next_id,
            items: self.list().into_iter().cloned().collect(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        handler: Option<Handler>,
        directory: &str,
        start_time: DateTime<Utc>,
    ) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        self.items
            .insert(id, Item::new(id, name, handler, directory, start_time));
        self.order.push_front(id);
        id
    }

    /// Records the end of an item. A second call for the same item is a no-op
    /// and returns false.
    pub fn finalize(&mut self, id: ItemId, at: DateTime<Utc>, exit_status: Option<i32>) -> bool {
        self.items
            .get_mut(&id)
            .is_some_and(|item| item.finalize(at, exit_status))
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn list(&self) -> Vec<&Item> {
        self.all().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Item> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Folds another writer's history into this store. Items in `owned` keep
    /// their local state; every other item takes the persisted version.
    /// Nothing is ever dropped.
    pub fn merge_from(&mut self, state: PersistedState, owned: &HashSet<ItemId>) {
        self.next_id = self.next_id.max(state.next_id);
        for item in state.items {
            self.next_id = self.next_id.max(item.id.0 + 1);
            if owned.contains(&item.id) {
                continue;
            }
            self.items.insert(item.id, item);
        }

        let mut ids: Vec<ItemId> = self.items.keys().copied().collect();
        ids.sort_unstable_by(|left, right| right.cmp(left));
        self.order = ids.into();
    }
}
