//! Host-side values and capabilities seen by the dispatcher
//!
//! The bridge turns JVM references into [`ObjectRef`]s before calling the
//! dispatcher, so nothing here depends on a particular FFI binding.

use crate::domain::HostError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque reference to a host object
///
/// Equality is identity: two refs are equal when they point at the same
/// object, like JNI's `IsSameObject`.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.addr())
    }
}

/// One argument slot; Java `null` is `None`
pub type Arg = Option<ObjectRef>;

/// An exception leaving an instrumented method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    /// Dotted class name of the exception
    pub class_name: String,
    pub message: Option<String>,
}

impl Thrown {
    pub fn new(class_name: impl Into<String>, message: Option<String>) -> Self {
        Self { class_name: class_name.into(), message }
    }

    /// The message, or the exception class name when there is none
    pub fn describe(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.class_name)
    }
}

/// "Get named value" on an inbound request object
pub trait HeaderAccessor: Send + Sync {
    /// Value of header `name` on `request`, `Ok(None)` if absent
    ///
    /// # Errors
    ///
    /// Returns `HostError::Lookup` if the host call itself fails, for
    /// example because `request` is not a request object.
    fn header(&self, request: &ObjectRef, name: &str) -> Result<Option<String>, HostError>;
}

/// Capabilities the agent looks up once at startup
pub trait HostRuntime {
    /// # Errors
    ///
    /// Returns `HostError::Unavailable` when the host has no request type
    /// with a header accessor (for example no servlet API on the class path).
    fn resolve_header_accessor(&self) -> Result<Arc<dyn HeaderAccessor>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_identity() {
        let a = ObjectRef::new(String::from("x"));
        let b = ObjectRef::new(String::from("x"));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<String>().map(String::as_str), Some("x"));
        assert!(a.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_thrown_falls_back_to_class_name() {
        assert_eq!(Thrown::new("java.lang.NullPointerException", None).describe(), "java.lang.NullPointerException");
        assert_eq!(Thrown::new("java.io.IOException", Some("disk".into())).describe(), "disk");
    }
}
