
//! Unpack and pack hooks for attribute types that are not built in.

use std::any::Any;
use std::sync::Arc;
use crate::error::{Result, UnitResult};
use crate::meta::attribute::{OpaqueValue, Text, TextSlice};


/// Converts the raw bytes of a custom attribute type into a value and back.
/// Register one per type name in the context options.
pub trait OpaqueHandler: Send + Sync {

    /// Interpret the little-endian bytes of an attribute.
    fn unpack(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>>;

    /// Serialize a value previously produced by `unpack`, or set by the user.
    fn pack(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>>;
}

/// Handlers for custom attribute types, keyed by type name.
#[derive(Clone, Default)]
pub struct OpaqueRegistry {
    handlers: Vec<(Text, Arc<dyn OpaqueHandler>)>,
}

impl OpaqueRegistry {

    /// Register a handler for a type name, replacing any previous handler for that name.
    pub fn register(&mut self, type_name: impl Into<Text>, handler: Arc<dyn OpaqueHandler>) {
        let type_name = type_name.into();
        self.handlers.retain(|(existing, _)| *existing != type_name);
        self.handlers.push((type_name, handler));
    }

    /// The handler for the type name, if any.
    pub fn find(&self, type_name: &TextSlice) -> Option<&Arc<dyn OpaqueHandler>> {
        self.handlers.iter()
            .find(|(name, _)| name.as_slice() == type_name)
            .map(|(_, handler)| handler)
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    /// Attach an unpacked value, if a handler exists for this type.
    pub fn unpack(&self, value: &mut OpaqueValue) -> UnitResult {
        if let Some(handler) = self.find(value.kind.as_slice()) {
            value.unpacked = Some(handler.unpack(&value.bytes)?);
        }

        Ok(())
    }

    /// Replace the raw bytes with the serialized unpacked value, if both a handler and a value exist.
    pub fn pack(&self, value: &mut OpaqueValue) -> UnitResult {
        if let (Some(handler), Some(unpacked)) = (self.find(value.kind.as_slice()), value.unpacked.as_ref()) {
            value.bytes = handler.pack(unpacked.as_ref())?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for OpaqueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.iter().map(|(name, _)| name)).finish()
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    /// Stores a single little-endian u16.
    struct Short;

    impl OpaqueHandler for Short {
        fn unpack(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>> {
            match bytes {
                [a, b] => Ok(Arc::new(u16::from_le_bytes([*a, *b]))),
                _ => Err(Error::size_mismatch("short")),
            }
        }

        fn pack(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
            value.downcast_ref::<u16>()
                .map(|short| short.to_le_bytes().to_vec())
                .ok_or_else(|| Error::type_mismatch("short"))
        }
    }

    #[test]
    fn unpack_then_pack(){
        let mut registry = OpaqueRegistry::default();
        registry.register("short", Arc::new(Short));

        let mut value = OpaqueValue::new("short", vec![ 1, 2 ]);
        registry.unpack(&mut value).unwrap();
        assert_eq!(value.unpacked::<u16>(), Some(&0x0201));

        value.unpacked = Some(Arc::new(7_u16));
        registry.pack(&mut value).unwrap();
        assert_eq!(value.bytes, vec![ 7, 0 ]);
    }

    #[test]
    fn unknown_types_stay_raw(){
        let registry = OpaqueRegistry::default();
        let mut value = OpaqueValue::new("other", vec![ 1, 2, 3 ]);
        registry.unpack(&mut value).unwrap();
        assert!(value.unpacked.is_none());
        registry.pack(&mut value).unwrap();
        assert_eq!(value.bytes, vec![ 1, 2, 3 ]);
    }
}
