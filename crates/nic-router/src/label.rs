//! Session-label matching.

/// Values keyed by session-label prefix, kept in insertion order.
///
/// [`find_by_label`](Self::find_by_label) picks the entry whose key equals
/// the label, or else the longest key that is a prefix of the label.
#[derive(Debug, Clone)]
pub struct LabelTree<T> {
    entries: Vec<(String, T)>,
}

impl<T> LabelTree<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts an entry. A duplicate key is rejected and `value` is
    /// handed back.
    pub fn insert(&mut self, label_prefix: &str, value: T) -> Result<(), T> {
        if self.get(label_prefix).is_some() {
            return Err(value);
        }
        self.entries.push((label_prefix.to_string(), value));
        Ok(())
    }

    /// Returns the entry stored under exactly `label_prefix`.
    pub fn get(&self, label_prefix: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(key, _)| key == label_prefix)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, label_prefix: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == label_prefix)
            .map(|(_, value)| value)
    }

    /// Returns the entry stored under exactly `label_prefix`, appending one
    /// built by `f` if there is none.
    pub fn get_or_insert_with<F>(&mut self, label_prefix: &str, f: F) -> &mut T
    where
        F: FnOnce() -> T,
    {
        let index = match self.entries.iter().position(|(key, _)| key == label_prefix) {
            Some(index) => index,
            None => {
                self.entries.push((label_prefix.to_string(), f()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    /// Returns the best match for a session label.
    pub fn find_by_label(&self, label: &str) -> Option<&T> {
        if let Some(exact) = self.get(label) {
            return Some(exact);
        }
        self.entries
            .iter()
            .filter(|(key, _)| label.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<T> Default for LabelTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
