//! Remote → local attribute mapping

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::models::{Attributes, RemoteRecord};

/// Translates one remote record into local attribute values.
///
/// Implementations must be pure: the same record and allow-list always
/// produce the same attributes. Returning `Err` skips the record (or aborts
/// the run when mapping errors are configured as fatal).
pub trait Mapper: fmt::Debug + Send + Sync {
    fn map(&self, remote: &RemoteRecord, local_attributes: &[String]) -> Result<Attributes>;
}

/// Copies each allow-listed attribute that the remote record carries
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMapper;

impl Mapper for DefaultMapper {
    fn map(&self, remote: &RemoteRecord, local_attributes: &[String]) -> Result<Attributes> {
        Ok(copy_allowed(remote, local_attributes))
    }
}

/// Default mapping plus renamed fields (`remote name → local name`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameMapper {
    renames: BTreeMap<String, String>,
}

impl RenameMapper {
    pub fn new<I, R, L>(renames: I) -> Self
    where
        I: IntoIterator<Item = (R, L)>,
        R: Into<String>,
        L: Into<String>,
    {
        Self {
            renames: renames
                .into_iter()
                .map(|(remote, local)| (remote.into(), local.into()))
                .collect(),
        }
    }
}

impl Mapper for RenameMapper {
    fn map(&self, remote: &RemoteRecord, local_attributes: &[String]) -> Result<Attributes> {
        let mut attributes = copy_allowed(remote, local_attributes);
        for (remote_name, local_name) in &self.renames {
            if let Some(value) = remote.attribute(remote_name) {
                attributes.insert(local_name.clone(), value.clone());
            }
        }
        Ok(attributes)
    }
}

/// Mapper backed by a closure, for computed fields and coercions
pub struct FnMapper<F> {
    name: &'static str,
    map: F,
}

impl<F> FnMapper<F>
where
    F: Fn(&RemoteRecord, &[String]) -> Result<Attributes> + Send + Sync,
{
    pub const fn new(name: &'static str, map: F) -> Self {
        Self { name, map }
    }
}

impl<F> fmt::Debug for FnMapper<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMapper").field("name", &self.name).finish()
    }
}

impl<F> Mapper for FnMapper<F>
where
    F: Fn(&RemoteRecord, &[String]) -> Result<Attributes> + Send + Sync,
{
    fn map(&self, remote: &RemoteRecord, local_attributes: &[String]) -> Result<Attributes> {
        (self.map)(remote, local_attributes)
    }
}

/// Allow-listed attributes present on the remote record, under the same names
pub fn copy_allowed(remote: &RemoteRecord, local_attributes: &[String]) -> Attributes {
    local_attributes
        .iter()
        .filter_map(|name| {
            remote
                .attribute(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}
