use std::collections::VecDeque;

use uuid::Uuid;

use crate::{db::Change, records::Record};

/// Where new items land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Newest first, like the feed.
    Prepend,
    /// Oldest first, like chat.
    Append,
}

/// What changed in a [`LocalList`] after applying a change.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T> {
    Placed(T),
    Replaced(T),
    Removed(Uuid),
}

/// A view's local copy of a collection, kept in step with change events.
///
/// Applying the same change twice leaves the list as applying it once.
#[derive(Debug, Clone)]
pub struct LocalList<T> {
    placement: Placement,
    items: VecDeque<T>,
}

impl<T: Record> LocalList<T> {
    pub fn new(placement: Placement, snapshot: Vec<T>) -> Self {
        Self {
            placement,
            items: snapshot.into(),
        }
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Returns `None` when the list is unchanged.
    pub fn apply(&mut self, change: Change<T>) -> Option<Applied<T>> {
        match change {
            Change::Insert(item) => {
                if self.position(item.id()).is_some() {
                    return None;
                }
                match self.placement {
                    Placement::Prepend => self.items.push_front(item.clone()),
                    Placement::Append => self.items.push_back(item.clone()),
                }
                Some(Applied::Placed(item))
            }
            Change::Update(item) => {
                let index = self.position(item.id())?;
                self.items[index] = item.clone();
                Some(Applied::Replaced(item))
            }
            Change::Delete { id } => {
                let index = self.position(id)?;
                self.items.remove(index);
                Some(Applied::Removed(id))
            }
        }
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    #[cfg(test)]
    fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(Record::id).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.len()
    }
}
