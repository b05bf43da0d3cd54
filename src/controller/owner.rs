//! Ownership resolution
//!
//! Follows controller owner references one hop at a time, always by key
//! through the object store.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, warn};

use super::OwnerKind;
use crate::crd::{Cluster, Machine, CAPI_GROUP};
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Result of following a controller owner reference
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<T> {
    /// The owner exists
    Found(T),
    /// No controller reference of that kind, or its target does not exist yet
    NotSet,
}

/// Group part of an `apiVersion`, or None when it cannot be parsed
///
/// `v1` is the core group (empty string).
fn api_group(api_version: &str) -> Option<&str> {
    match api_version.split_once('/') {
        None if !api_version.is_empty() => Some(""),
        Some((group, version))
            if !group.is_empty() && !version.is_empty() && !version.contains('/') =>
        {
            Some(group)
        }
        _ => None,
    }
}

/// Key of the controller owner of kind `owner` for the object `child`
///
/// Only references in the Cluster API group with `controller: true` count.
/// When several qualify the first one wins. A qualifying reference that cannot
/// be followed is a [`Error::MalformedReference`].
pub fn controller_owner_key(
    child: &ObjectKey,
    owner_references: &[OwnerReference],
    owner: OwnerKind,
) -> Result<Option<ObjectKey>, Error> {
    let mut found: Option<ObjectKey> = None;
    let mut ignored = 0usize;

    let candidates = owner_references
        .iter()
        .filter(|r| r.kind == owner.as_str() && r.controller == Some(true));

    for reference in candidates {
        let group = api_group(&reference.api_version).ok_or_else(|| {
            Error::malformed_reference(
                owner.as_str(),
                format!(
                    "{child}: unparseable apiVersion '{}'",
                    reference.api_version
                ),
            )
        })?;
        if group != CAPI_GROUP {
            debug!(%child, api_version = %reference.api_version, "skipping owner from foreign group");
            continue;
        }
        if reference.name.is_empty() {
            return Err(Error::malformed_reference(
                owner.as_str(),
                format!("{child}: owner reference has no name"),
            ));
        }
        if found.is_none() {
            found = Some(child.sibling(reference.name.clone()));
        } else {
            ignored += 1;
        }
    }

    if ignored > 0 {
        warn!(%child, owner = %owner, ignored, "multiple controller owners, using the first");
    }
    Ok(found)
}

/// Resolve the Cluster that controls an object
pub async fn resolve_owner_cluster(
    store: &dyn ObjectStore,
    child: &ObjectKey,
    owner_references: &[OwnerReference],
) -> Result<Resolution<Cluster>, Error> {
    let Some(key) = controller_owner_key(child, owner_references, OwnerKind::Cluster)? else {
        return Ok(Resolution::NotSet);
    };
    match store.get_cluster(&key).await? {
        Some(cluster) => Ok(Resolution::Found(cluster)),
        None => {
            debug!(%child, owner = %key, "owning Cluster not found");
            Ok(Resolution::NotSet)
        }
    }
}

/// Resolve the Machine that controls an object
pub async fn resolve_owner_machine(
    store: &dyn ObjectStore,
    child: &ObjectKey,
    owner_references: &[OwnerReference],
) -> Result<Resolution<Machine>, Error> {
    let Some(key) = controller_owner_key(child, owner_references, OwnerKind::Machine)? else {
        return Ok(Resolution::NotSet);
    };
    match store.get_machine(&key).await? {
        Some(machine) => Ok(Resolution::Found(machine)),
        None => {
            debug!(%child, owner = %key, "owning Machine not found");
            Ok(Resolution::NotSet)
        }
    }
}
