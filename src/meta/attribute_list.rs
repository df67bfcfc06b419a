
//! The attributes of a single part, unique by name.
//! Iterates in creation order, which is also the order in which they are written.
//! Lookups use a second index sorted by name.

use crate::error::*;
use crate::meta::attribute::*;


/// Unique-by-name attribute storage.
/// `entries` holds the attributes in creation order,
/// `sorted` holds indices into `entries`, ordered by attribute name.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeList {
    entries: Vec<Attribute>,
    sorted: Vec<usize>,
    max_name_length: usize,
}

impl Default for AttributeList {
    fn default() -> Self {
        Self::with_max_name_length(crate::meta::LONG_NAME_LENGTH)
    }
}

impl AttributeList {

    /// An empty list that rejects names longer than the specified number of bytes.
    pub fn with_max_name_length(max_name_length: usize) -> Self {
        AttributeList { entries: Vec::new(), sorted: Vec::new(), max_name_length }
    }

    /// The longest name that may be inserted.
    pub fn max_name_length(&self) -> usize { self.max_name_length }

    /// Number of attributes.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no attributes exist.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// The attribute at the specified creation index.
    pub fn get(&self, index: usize) -> Option<&Attribute> { self.entries.get(index) }

    /// Iterate in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> { self.entries.iter() }

    /// Modify values in creation order. Names must not change.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut AttributeValue> + '_ {
        self.entries.iter_mut().map(|attribute| &mut attribute.value)
    }

    /// Iterate in name order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.sorted.iter().map(move |&index| &self.entries[index])
    }

    fn search(&self, name: &TextSlice) -> std::result::Result<usize, usize> {
        self.sorted.binary_search_by(|&index| self.entries[index].name.as_slice().cmp(name))
    }

    /// The creation index of the attribute with that name.
    pub fn index_of(&self, name: &TextSlice) -> Option<usize> {
        self.search(name).ok().map(|sorted_index| self.sorted[sorted_index])
    }

    /// Look up an attribute by name. Absence is not an error.
    pub fn find_by_name(&self, name: &TextSlice) -> Option<&Attribute> {
        self.index_of(name).map(|index| &self.entries[index])
    }

    /// Look up an attribute by name for modification.
    /// The type of the value must not be changed through this reference.
    pub(crate) fn find_by_name_mut(&mut self, name: &TextSlice) -> Option<&mut Attribute> {
        let index = self.index_of(name)?;
        Some(&mut self.entries[index])
    }

    /// Add a default valued attribute of the specified type.
    /// Succeeds without changes if an attribute with the same name and type exists.
    /// `extra_bytes` reserves space for variable size values.
    pub fn add_by_type(&mut self, name: &TextSlice, type_name: &TextSlice, extra_bytes: usize) -> Result<&mut Attribute> {
        Text::validate_name_bytes(name, self.max_name_length)?;
        Text::validate_name_bytes(type_name, self.max_name_length)?;

        match self.search(name) {
            Ok(sorted_index) => {
                let index = self.sorted[sorted_index];
                let existing = &mut self.entries[index];

                if existing.type_name() != type_name {
                    return Err(Error::type_mismatch(format!(
                        "attribute `{}` already exists with type `{}`",
                        existing.name, String::from_utf8_lossy(existing.type_name())
                    )));
                }

                Ok(existing)
            },

            Err(sorted_index) => {
                let value = AttributeValue::default_for_type(type_name, extra_bytes);
                Ok(self.push(sorted_index, Attribute { name: Text::from_slice_unchecked(name), value }))
            }
        }
    }

    /// Insert a new attribute, or replace the value of an existing attribute with the same type.
    pub fn insert(&mut self, name: impl Into<Text>, value: AttributeValue) -> Result<&mut Attribute> {
        let name = name.into();
        name.validate_name(self.max_name_length)?;
        Text::validate_name_bytes(value.kind_name(), self.max_name_length)?;

        match self.search(name.as_slice()) {
            Ok(sorted_index) => {
                let index = self.sorted[sorted_index];
                let existing = &mut self.entries[index];

                if existing.type_name() != value.kind_name() {
                    return Err(Error::type_mismatch(format!(
                        "attribute `{}` has type `{}`, cannot assign `{}`",
                        existing.name,
                        String::from_utf8_lossy(existing.type_name()),
                        String::from_utf8_lossy(value.kind_name()),
                    )));
                }

                existing.value = value;
                Ok(existing)
            },

            Err(sorted_index) => Ok(self.push(sorted_index, Attribute { name, value })),
        }
    }

    /// Append without checking the name. Used by the parser,
    /// which validates names itself and must report duplicates differently.
    pub(crate) fn insert_new(&mut self, attribute: Attribute) -> Result<usize> {
        match self.search(attribute.name.as_slice()) {
            Ok(_) => Err(Error::invalid_attribute(format!("duplicate attribute `{}`", attribute.name))),
            Err(sorted_index) => {
                self.push(sorted_index, attribute);
                Ok(self.entries.len() - 1)
            }
        }
    }

    fn push(&mut self, sorted_index: usize, attribute: Attribute) -> &mut Attribute {
        let index = self.entries.len();
        self.entries.push(attribute);
        self.sorted.insert(sorted_index, index);
        &mut self.entries[index]
    }

    /// Remove the attribute with the specified name, returning it.
    pub fn remove(&mut self, name: &TextSlice) -> Option<Attribute> {
        let index = self.entries.iter().position(|attribute| attribute.name.as_slice() == name)?;
        let attribute = self.entries.remove(index);

        self.sorted.retain(|&sorted| sorted != index);
        for sorted in &mut self.sorted {
            if *sorted > index { *sorted -= 1; }
        }

        Some(attribute)
    }
}

impl<'l> IntoIterator for &'l AttributeList {
    type Item = &'l Attribute;
    type IntoIter = std::slice::Iter<'l, Attribute>;
    fn into_iter(self) -> Self::IntoIter { self.iter() }
}


#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use crate::meta::attribute::type_names;

    fn assert_consistent(list: &AttributeList) {
        let mut creation: Vec<&Text> = list.iter().map(|attribute| &attribute.name).collect();
        let sorted: Vec<&Text> = list.iter_sorted().map(|attribute| &attribute.name).collect();

        assert!(sorted.windows(2).all(|pair| pair[0] < pair[1]), "strictly sorted: {:?}", sorted);

        creation.sort();
        assert_eq!(creation, sorted, "same set of attributes");
    }

    #[test]
    fn creation_order_is_kept(){
        let mut list = AttributeList::default();
        list.insert("zeta", AttributeValue::I32(1)).unwrap();
        list.insert("alpha", AttributeValue::F32(2.0)).unwrap();
        list.insert("mid", AttributeValue::Text(Text::from("x"))).unwrap();

        let names: Vec<String> = list.iter().map(|attribute| attribute.name.to_string()).collect();
        assert_eq!(names, vec![ "zeta", "alpha", "mid" ]);

        let names: Vec<String> = list.iter_sorted().map(|attribute| attribute.name.to_string()).collect();
        assert_eq!(names, vec![ "alpha", "mid", "zeta" ]);

        assert_eq!(list.find_by_name(b"alpha").unwrap().value, AttributeValue::F32(2.0));
        assert!(list.find_by_name(b"beta").is_none());
    }

    #[test]
    fn add_by_type_is_idempotent(){
        let mut list = AttributeList::default();
        list.add_by_type(b"comment", type_names::TEXT, 16).unwrap();
        list.add_by_type(b"comment", type_names::TEXT, 0).unwrap();
        assert_eq!(list.len(), 1);

        let error = list.add_by_type(b"comment", type_names::I32, 0).unwrap_err();
        assert_eq!(error.code(), ErrorCode::TypeMismatch);
        assert_eq!(list.len(), 1);

        let opaque = list.add_by_type(b"blob", b"customType", 3).unwrap();
        assert_eq!(opaque.value, AttributeValue::Opaque(OpaqueValue::new("customType", vec![0; 3])));
    }

    #[test]
    fn name_limits(){
        let mut list = AttributeList::with_max_name_length(31);
        let long = "n".repeat(32);
        assert_eq!(list.insert(long.as_str(), AttributeValue::I32(0)).unwrap_err().code(), ErrorCode::NameTooLong);
        assert_eq!(list.add_by_type(b"", type_names::I32, 0).unwrap_err().code(), ErrorCode::InvalidArgument);
        assert!(list.is_empty());
    }

    #[test]
    fn insert_replaces_same_type(){
        let mut list = AttributeList::default();
        list.insert("owner", AttributeValue::Text(Text::from("a"))).unwrap();
        list.insert("owner", AttributeValue::Text(Text::from("b"))).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.find_by_name(b"owner").unwrap().value, AttributeValue::Text(Text::from("b")));

        let error = list.insert("owner", AttributeValue::I32(3)).unwrap_err();
        assert_eq!(error.code(), ErrorCode::TypeMismatch);
        assert_eq!(list.find_by_name(b"owner").unwrap().value, AttributeValue::Text(Text::from("b")));
    }

    #[test]
    fn remove_keeps_indices(){
        let mut list = AttributeList::default();
        for name in [ "d", "b", "a", "c" ] {
            list.insert(name, AttributeValue::I32(name.as_bytes()[0] as i32)).unwrap();
        }

        let removed = list.remove(b"b").unwrap();
        assert_eq!(removed.value, AttributeValue::I32(b'b' as i32));
        assert!(list.remove(b"b").is_none());
        assert_consistent(&list);

        for name in [ "a", "c", "d" ] {
            assert_eq!(list.find_by_name(name.as_bytes()).unwrap().value, AttributeValue::I32(name.as_bytes()[0] as i32));
        }

        let names: Vec<String> = list.iter().map(|attribute| attribute.name.to_string()).collect();
        assert_eq!(names, vec![ "d", "a", "c" ]);
    }

    #[test]
    fn random_add_remove_sequences(){
        let mut rng = rand::rng();
        let mut list = AttributeList::default();

        for _ in 0..2000 {
            let name = format!("attr{}", rng.random_range(0 .. 40));

            if rng.random_bool(0.6) {
                list.insert(name.as_str(), AttributeValue::I32(7)).unwrap();
            }
            else {
                let existed = list.find_by_name(name.as_bytes()).is_some();
                assert_eq!(list.remove(name.as_bytes()).is_some(), existed);
            }

            assert_consistent(&list);
        }
    }
}
