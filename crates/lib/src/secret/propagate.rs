//! Copies a managed resource's connection secret to its claim.
//!
//! Propagation is idempotent: identical content is never rewritten. A
//! destination whose content differs is only overwritten when its recorded
//! provenance names the same source and owner, its content still matches the
//! recorded checksum, and the source has since moved to a newer version.
//! Anything else is surfaced as a conflict.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::binding::BindingPhase;
use crate::resource::{Bindable, ClaimReferencer, GenericClaim, GenericManaged, ManagedResourceReferencer, ObjectMetaAccessor};
use crate::util::hash::{HashError, hash_json};

use super::{ConnectionSecret, SecretKey, SecretProvenance, SecretStore, SecretStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationOutcome {
  /// The destination did not exist and was created.
  Written,
  /// A stale copy from the same source was refreshed.
  Updated,
  /// The destination already holds the source content.
  Unchanged,
  /// The managed resource is not ready or has not published its secret yet.
  SourceNotReady,
  /// The pair is not mutually bound; nothing to propagate.
  NotBound,
}

#[derive(Debug, Error)]
pub enum SecretPropagationError {
  #[error("secret {target} holds differing content: {detail}")]
  Conflict { target: SecretKey, detail: String },

  #[error("failed to checksum secret {key}: {source}")]
  Checksum {
    key: SecretKey,
    #[source]
    source: HashError,
  },

  #[error(transparent)]
  Store(#[from] SecretStoreError),
}

fn mutually_bound(claim: &GenericClaim, managed: &GenericManaged) -> bool {
  claim.binding_phase() == BindingPhase::Bound
    && managed.binding_phase() == BindingPhase::Bound
    && claim
      .resource_reference()
      .is_some_and(|r| r.refers_to(&managed.kind, &managed.metadata))
    && managed
      .claim_reference()
      .is_some_and(|r| r.refers_to(&claim.kind, &claim.metadata))
}

pub async fn propagate_connection_secret(
  secrets: &dyn SecretStore,
  claim: &GenericClaim,
  managed: &GenericManaged,
) -> Result<PropagationOutcome, SecretPropagationError> {
  if !mutually_bound(claim, managed) {
    return Ok(PropagationOutcome::NotBound);
  }
  if !managed.status.conditioned.is_ready() {
    return Ok(PropagationOutcome::SourceNotReady);
  }

  let source_key = SecretKey::source_of(managed);
  let Some(source) = secrets.get(&source_key).await? else {
    debug!(resource = %managed.key(), secret = %source_key, "connection secret not published yet");
    return Ok(PropagationOutcome::SourceNotReady);
  };
  let checksum = hash_json(&source.data).map_err(|source| SecretPropagationError::Checksum {
    key: source_key.clone(),
    source,
  })?;

  let target = SecretKey::target_of(claim);
  let provenance = SecretProvenance {
    source: source_key.clone(),
    owner: managed.reference(),
    source_version: source.version,
    checksum,
  };

  let Some(existing) = secrets.get(&target).await? else {
    let copy = ConnectionSecret {
      data: source.data,
      version: 0,
      provenance: Some(provenance),
    };
    secrets.put(&target, copy).await?;
    info!(claim = %claim.key(), secret = %target, source = %source_key, "connection secret written");
    return Ok(PropagationOutcome::Written);
  };

  if existing.data == source.data {
    return Ok(PropagationOutcome::Unchanged);
  }

  let detail = match &existing.provenance {
    Some(p) if p.source == source_key && p.owner.refers_to(&managed.kind, &managed.metadata) => {
      let current = hash_json(&existing.data).map_err(|source| SecretPropagationError::Checksum {
        key: target.clone(),
        source,
      })?;
      if current != p.checksum {
        format!("copy of version {} was edited after it was written", p.source_version)
      } else if source.version > p.source_version {
        let copy = ConnectionSecret {
          data: source.data,
          version: existing.version,
          provenance: Some(provenance),
        };
        secrets.put(&target, copy).await?;
        info!(
          claim = %claim.key(),
          secret = %target,
          from_version = p.source_version,
          to_version = source.version,
          "connection secret refreshed"
        );
        return Ok(PropagationOutcome::Updated);
      } else {
        format!(
          "copy of version {} differs, source is still at version {}",
          p.source_version, source.version
        )
      }
    }
    Some(p) => format!("written from {} for {}", p.source, p.owner),
    None => "no provenance recorded".to_string(),
  };

  warn!(claim = %claim.key(), secret = %target, detail = %detail, "refusing to overwrite connection secret");
  Err(SecretPropagationError::Conflict { target, detail })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::meta::{Kind, ObjectReference};
  use crate::secret::MemorySecretStore;

  fn bound_pair() -> (GenericClaim, GenericManaged) {
    let mut claim = GenericClaim::new(Kind::new("MySQLInstance"), "app", "db").with_connection_secret("db-conn");
    claim.metadata.uid = Some("c-1".to_string());
    let mut managed = GenericManaged::new(Kind::new("CloudSQLInstance"), None, "sql-1")
      .with_class(ObjectReference {
        kind: Kind::new("CloudSQLInstanceClass"),
        namespace: None,
        name: "fast".to_string(),
        uid: None,
      })
      .ready();
    managed.metadata.uid = Some("m-1".to_string());

    claim.spec.resource_ref = Some(managed.reference());
    claim.status.binding_phase = BindingPhase::Bound;
    managed.spec.claim_ref = Some(claim.reference());
    managed.status.binding_phase = BindingPhase::Bound;
    (claim, managed)
  }

  async fn publish(secrets: &MemorySecretStore, managed: &GenericManaged, password: &str) {
    let key = SecretKey::source_of(managed);
    let mut secret = secrets
      .get(&key)
      .await
      .unwrap()
      .unwrap_or_default();
    secret.data.insert("password".to_string(), password.to_string());
    secrets.put(&key, secret).await.unwrap();
  }

  #[tokio::test]
  async fn writes_then_is_idempotent() {
    let secrets = MemorySecretStore::new();
    let (claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;

    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::Written);

    let target = SecretKey::new("app", "db-conn");
    let written = secrets.get(&target).await.unwrap().unwrap();
    assert_eq!(written.data["password"], "one");
    let provenance = written.provenance.as_ref().unwrap();
    assert_eq!(provenance.source, SecretKey::new("claimbind-system", "sql-1"));
    assert_eq!(provenance.source_version, 1);

    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::Unchanged);
    assert_eq!(secrets.get(&target).await.unwrap().unwrap().version, written.version);
  }

  #[tokio::test]
  async fn newer_source_refreshes_copy() {
    let secrets = MemorySecretStore::new();
    let (claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;
    propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();

    publish(&secrets, &managed, "two").await;
    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::Updated);

    let copy = secrets.get(&SecretKey::new("app", "db-conn")).await.unwrap().unwrap();
    assert_eq!(copy.data["password"], "two");
    assert_eq!(copy.provenance.unwrap().source_version, 2);
  }

  #[tokio::test]
  async fn foreign_secret_is_not_overwritten() {
    let secrets = MemorySecretStore::new();
    let (claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;
    let target = SecretKey::new("app", "db-conn");
    secrets
      .put(&target, ConnectionSecret::with_data([("password", "hand-written")]))
      .await
      .unwrap();

    let err = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap_err();
    assert!(matches!(err, SecretPropagationError::Conflict { .. }));
    assert_eq!(secrets.get(&target).await.unwrap().unwrap().data["password"], "hand-written");
  }

  #[tokio::test]
  async fn edited_copy_is_a_conflict() {
    let secrets = MemorySecretStore::new();
    let (claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;
    propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();

    let target = SecretKey::new("app", "db-conn");
    let mut copy = secrets.get(&target).await.unwrap().unwrap();
    copy.data.insert("password".to_string(), "edited".to_string());
    secrets.put(&target, copy).await.unwrap();

    let err = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap_err();
    assert!(matches!(err, SecretPropagationError::Conflict { .. }));
  }

  #[tokio::test]
  async fn edited_copy_survives_newer_source() {
    let secrets = MemorySecretStore::new();
    let (claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;
    propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();

    let target = SecretKey::new("app", "db-conn");
    let mut copy = secrets.get(&target).await.unwrap().unwrap();
    copy.data.insert("password".to_string(), "operator-edit".to_string());
    secrets.put(&target, copy).await.unwrap();

    publish(&secrets, &managed, "two").await;
    let err = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap_err();
    assert!(matches!(err, SecretPropagationError::Conflict { .. }));
    assert_eq!(secrets.get(&target).await.unwrap().unwrap().data["password"], "operator-edit");
  }

  #[tokio::test]
  async fn unpublished_or_unready_source_waits() {
    let secrets = MemorySecretStore::new();
    let (claim, mut managed) = bound_pair();
    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::SourceNotReady);

    publish(&secrets, &managed, "one").await;
    managed.status.conditioned.conditions.clear();
    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::SourceNotReady);
  }

  #[tokio::test]
  async fn unbound_pair_is_skipped() {
    let secrets = MemorySecretStore::new();
    let (mut claim, managed) = bound_pair();
    publish(&secrets, &managed, "one").await;
    claim.status.binding_phase = BindingPhase::Unbound;

    let outcome = propagate_connection_secret(&secrets, &claim, &managed).await.unwrap();
    assert_eq!(outcome, PropagationOutcome::NotBound);
    assert!(secrets.get(&SecretKey::new("app", "db-conn")).await.unwrap().is_none());
  }
}
