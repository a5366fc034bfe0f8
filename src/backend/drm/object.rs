use indexmap::IndexMap;
use tracing::trace;

use super::{access_error, Error, KmsDevice, ObjectType};

/// A cached property of a [`DrmObject`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property id
    pub id: u32,
    /// Name as reported by the kernel
    pub name: String,
    /// Whether the kernel rejects changes to this property
    pub immutable: bool,
    /// Value at the time of the last query
    pub value: u64,
}

/// A kernel mode object together with its property list
///
/// The list is fetched once on creation and only updated by [`DrmObject::refresh`].
/// Lookups by name are case-insensitive.
#[derive(Debug, Clone)]
pub struct DrmObject {
    id: u32,
    kind: ObjectType,
    props: IndexMap<String, Property>,
}

impl DrmObject {
    /// Queries the properties of the object `id`
    pub fn new<D: KmsDevice + ?Sized>(dev: &D, id: u32, kind: ObjectType) -> Result<DrmObject, Error> {
        let mut object = DrmObject {
            id,
            kind,
            props: IndexMap::new(),
        };
        object.refresh(dev)?;
        Ok(object)
    }

    /// Re-queries the property list and values
    pub fn refresh<D: KmsDevice + ?Sized>(&mut self, dev: &D) -> Result<(), Error> {
        let props = dev
            .properties(self.id, self.kind)
            .map_err(access_error(dev, "Error loading object properties"))?;
        self.props = props
            .into_iter()
            .map(|(info, value)| {
                (
                    info.name.to_ascii_lowercase(),
                    Property {
                        id: info.id,
                        name: info.name,
                        immutable: info.immutable,
                        value,
                    },
                )
            })
            .collect();
        trace!(object = self.id, kind = ?self.kind, "Loaded {} properties", self.props.len());
        Ok(())
    }

    /// Kernel id of the object
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Type of the object
    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    /// Looks up a property by name
    pub fn property(&self, name: &str) -> Result<&Property, Error> {
        self.props
            .get(name.to_ascii_lowercase().as_str())
            .ok_or_else(|| Error::UnknownProperty {
                handle: self.id,
                kind: self.kind,
                name: name.to_owned(),
            })
    }

    /// Cached value of a property
    pub fn get(&self, name: &str) -> Result<u64, Error> {
        self.property(name).map(|prop| prop.value)
    }

    /// Whether the object has a property with this name
    pub fn has(&self, name: &str) -> bool {
        self.property(name).is_ok()
    }

    /// Adds a property change to `request`
    ///
    /// Immutable properties are rejected and the request is left untouched.
    pub fn set(&self, request: &mut AtomicRequest, name: &str, value: u64) -> Result<(), Error> {
        let prop = self.property(name)?;
        if prop.immutable {
            return Err(Error::ImmutableProperty {
                handle: self.id,
                kind: self.kind,
                name: prop.name.clone(),
            });
        }
        request.add(self.id, prop.id, value);
        Ok(())
    }

    /// Iterates over the cached properties in kernel order
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.props.values()
    }
}

/// An ordered set of property changes to be committed atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicRequest {
    entries: Vec<(u32, u32, u64)>,
}

impl AtomicRequest {
    /// An empty request
    pub fn new() -> Self {
        AtomicRequest::default()
    }

    /// Adds a raw `(object, property, value)` triple
    pub fn add(&mut self, object: u32, property: u32, value: u64) {
        self.entries.push((object, property, value));
    }

    /// Number of property changes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the request carries no change
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the `(object, property, value)` triples
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, u64)> + '_ {
        self.entries.iter().copied()
    }
}
