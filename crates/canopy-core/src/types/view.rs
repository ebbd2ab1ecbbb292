//! Typed views over classifier instances.
//!
//! A view borrows a `ClassifierInstance` and exposes the features of one
//! classifier by name. Views never own storage; every accessor reads the
//! instance's meta-pointer-keyed lists.

use super::{ClassifierInstance, HasProperties, MetaPointer};

/// A thin typed accessor over an instance of a known classifier.
pub trait InstanceView<'a>: Sized {
    /// Wrap `instance` if it has the shape this view expects.
    fn view(instance: &'a ClassifierInstance) -> Option<Self>;

    /// The underlying instance.
    fn instance(&self) -> &'a ClassifierInstance;

    fn id(&self) -> &'a str {
        &self.instance().id
    }

    fn classifier(&self) -> &'a MetaPointer {
        &self.instance().classifier
    }
}

/// View over any instance carrying the LionCore `INamed.name` property.
#[derive(Debug, Clone, Copy)]
pub struct NamedView<'a> {
    instance: &'a ClassifierInstance,
}

/// Key of the builtin `INamed.name` property.
pub const INAMED_NAME_KEY: &str = "LionCore-builtins-INamed-name";

impl<'a> NamedView<'a> {
    /// The `name` property value.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.instance.property_by_key(INAMED_NAME_KEY).unwrap_or("")
    }
}

impl<'a> InstanceView<'a> for NamedView<'a> {
    fn view(instance: &'a ClassifierInstance) -> Option<Self> {
        instance
            .property_by_key(INAMED_NAME_KEY)
            .map(|_| Self { instance })
    }

    fn instance(&self) -> &'a ClassifierInstance {
        self.instance
    }
}
