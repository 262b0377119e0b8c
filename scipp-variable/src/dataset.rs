use indexmap::IndexMap;

use crate::data_array::DataArray;

/// Named data arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    items: IndexMap<String, DataArray>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, item: DataArray) {
        self.items.insert(name.into(), item);
    }

    pub fn get(&self, name: &str) -> Option<&DataArray> {
        self.items.get(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataArray)> {
        self.items.iter()
    }
}

impl<S: Into<String>> FromIterator<(S, DataArray)> for Dataset {
    fn from_iter<I: IntoIterator<Item = (S, DataArray)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(|(name, item)| (name.into(), item)).collect(),
        }
    }
}

impl IntoIterator for Dataset {
    type Item = (String, DataArray);
    type IntoIter = indexmap::map::IntoIter<String, DataArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
