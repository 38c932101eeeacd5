//! Record registry for CAs, pending requests, certificates and stamps.
//!
//! All records live in one [`RegistryState`] arena behind a single lock.
//! Mutations go through [`Registry::transaction`], which runs against a
//! working copy and swaps it in only when the closure succeeds, so readers
//! never observe a partially applied change. When opened on a directory, every
//! committed transaction is written to `registry.json` before it becomes
//! visible.

// Guards are held for the whole read or transaction on purpose.
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{
    CaId, CaPendingRequest, CertificateAuthority, CertificateId, Countersignature,
    IssuedCertificate, PendingRequestId, StampId, StampStatus,
};

const SNAPSHOT_FILE: &str = "registry.json";

/// The in-memory arena of records and their secondary indexes.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    cas: BTreeMap<CaId, CertificateAuthority>,
    children: HashMap<CaId, Vec<CaId>>,
    pending: BTreeMap<PendingRequestId, CaPendingRequest>,
    certificates: BTreeMap<CertificateId, IssuedCertificate>,
    serials: HashMap<String, CertificateId>,
    stamps: BTreeMap<StampId, Countersignature>,
    active_stamps: HashMap<(String, String), StampId>,
}

impl RegistryState {
    /// Returns a CA by id.
    #[must_use]
    pub fn ca(&self, id: CaId) -> Option<&CertificateAuthority> {
        self.cas.get(&id)
    }

    /// Returns a mutable CA by id.
    pub fn ca_mut(&mut self, id: CaId) -> Option<&mut CertificateAuthority> {
        self.cas.get_mut(&id)
    }

    /// Iterates over all CAs.
    pub fn cas(&self) -> impl Iterator<Item = &CertificateAuthority> {
        self.cas.values()
    }

    /// Returns the direct children of a CA.
    #[must_use]
    pub fn children_of(&self, id: CaId) -> &[CaId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Inserts a CA, maintaining the parent index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the id is taken or the parent
    /// link breaks the tree invariants.
    pub fn insert_ca(&mut self, ca: CertificateAuthority) -> Result<()> {
        if self.cas.contains_key(&ca.id) {
            return Err(Error::StateConflict(format!("CA {} already exists", ca.id)));
        }
        if let Some(parent_id) = ca.parent_ca {
            let parent = self
                .cas
                .get(&parent_id)
                .ok_or_else(|| Error::NotFound(format!("parent CA {parent_id}")))?;
            if !parent.kind.can_have_subordinates() {
                return Err(Error::StateConflict(format!(
                    "{} cannot have subordinates",
                    parent.kind
                )));
            }
            if ca.hierarchy_level != parent.hierarchy_level + 1 {
                return Err(Error::StateConflict(format!(
                    "hierarchy level {} does not follow parent level {}",
                    ca.hierarchy_level, parent.hierarchy_level
                )));
            }
            self.children.entry(parent_id).or_default().push(ca.id);
        }
        self.cas.insert(ca.id, ca);
        Ok(())
    }

    /// Returns a pending CA request by id.
    #[must_use]
    pub fn pending(&self, id: PendingRequestId) -> Option<&CaPendingRequest> {
        self.pending.get(&id)
    }

    /// Returns a mutable pending CA request by id.
    pub fn pending_mut(&mut self, id: PendingRequestId) -> Option<&mut CaPendingRequest> {
        self.pending.get_mut(&id)
    }

    /// Iterates over all pending CA requests, decided or not.
    pub fn pending_requests(&self) -> impl Iterator<Item = &CaPendingRequest> {
        self.pending.values()
    }

    /// Inserts a pending CA request.
    pub fn insert_pending(&mut self, request: CaPendingRequest) {
        self.pending.insert(request.id, request);
    }

    /// Returns a certificate by id.
    #[must_use]
    pub fn certificate(&self, id: CertificateId) -> Option<&IssuedCertificate> {
        self.certificates.get(&id)
    }

    /// Returns a mutable certificate by id.
    pub fn certificate_mut(&mut self, id: CertificateId) -> Option<&mut IssuedCertificate> {
        self.certificates.get_mut(&id)
    }

    /// Iterates over all certificates.
    pub fn certificates(&self) -> impl Iterator<Item = &IssuedCertificate> {
        self.certificates.values()
    }

    /// Iterates over the certificates issued by one CA.
    pub fn certificates_of(&self, ca: CaId) -> impl Iterator<Item = &IssuedCertificate> {
        self.certificates.values().filter(move |c| c.issuing_ca == ca)
    }

    /// Looks a certificate up by serial number.
    #[must_use]
    pub fn find_by_serial(&self, serial: &str) -> Option<&IssuedCertificate> {
        self.serials.get(serial).and_then(|id| self.certificates.get(id))
    }

    /// Inserts a certificate record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the serial number is already used.
    pub fn insert_certificate(&mut self, cert: IssuedCertificate) -> Result<()> {
        if let Some(serial) = &cert.serial_number {
            self.claim_serial(serial, cert.id)?;
        }
        self.certificates.insert(cert.id, cert);
        Ok(())
    }

    /// Reserves a serial number for a certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if another certificate holds it.
    pub fn claim_serial(&mut self, serial: &str, id: CertificateId) -> Result<()> {
        match self.serials.get(serial) {
            Some(holder) if *holder != id => Err(Error::StateConflict(format!(
                "serial number {serial} already issued"
            ))),
            _ => {
                self.serials.insert(serial.to_string(), id);
                Ok(())
            }
        }
    }

    /// Returns a stamp by id.
    #[must_use]
    pub fn stamp(&self, id: StampId) -> Option<&Countersignature> {
        self.stamps.get(&id)
    }

    /// Iterates over all stamps.
    pub fn stamps(&self) -> impl Iterator<Item = &Countersignature> {
        self.stamps.values()
    }

    /// Returns the active stamp over a document and citizen signature.
    #[must_use]
    pub fn active_stamp_for(
        &self,
        document_hash: &str,
        user_signature: &str,
    ) -> Option<&Countersignature> {
        self.active_stamps
            .get(&(document_hash.to_string(), user_signature.to_string()))
            .and_then(|id| self.stamps.get(id))
    }

    /// Inserts a stamp, enforcing one active stamp per document and signature.
    ///
    /// Stamps no longer in force never take the slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] if the stamp is active and another
    /// active stamp already exists.
    pub fn insert_stamp(&mut self, stamp: Countersignature) -> Result<()> {
        if stamp.status == StampStatus::Active {
            let key = (stamp.document_hash.clone(), stamp.user_signature.clone());
            if self.active_stamps.contains_key(&key) {
                return Err(Error::StateConflict("document already stamped".into()));
            }
            self.active_stamps.insert(key, stamp.id);
        }
        self.stamps.insert(stamp.id, stamp);
        Ok(())
    }

    /// Moves an active stamp out of force, releasing its dedup slot.
    ///
    /// Returns `false` if the stamp was not active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the stamp does not exist.
    pub fn retire_stamp(
        &mut self,
        id: StampId,
        status: StampStatus,
        at: chrono::DateTime<chrono::Utc>,
        by: &str,
    ) -> Result<bool> {
        let stamp = self
            .stamps
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("stamp {id}")))?;
        if stamp.status != StampStatus::Active {
            return Ok(false);
        }
        stamp.status = status;
        stamp.revoked_at = Some(at);
        stamp.revoked_by = Some(by.to_string());
        self.active_stamps
            .remove(&(stamp.document_hash.clone(), stamp.user_signature.clone()));
        Ok(true)
    }

    fn snapshot_view(&self) -> SnapshotView<'_> {
        SnapshotView {
            certificate_authorities: self.cas.values().collect(),
            pending_requests: self.pending.values().collect(),
            certificates: self.certificates.values().collect(),
            stamps: self.stamps.values().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut state = Self::default();
        // Parents before children so the tree checks in insert_ca hold.
        let mut cas = snapshot.certificate_authorities;
        cas.sort_by_key(|ca| ca.hierarchy_level);
        for ca in cas {
            state.insert_ca(ca)?;
        }
        for request in snapshot.pending_requests {
            state.insert_pending(request);
        }
        for cert in snapshot.certificates {
            state.insert_certificate(cert)?;
        }
        for stamp in snapshot.stamps {
            state.insert_stamp(stamp)?;
        }
        Ok(state)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    certificate_authorities: Vec<CertificateAuthority>,
    pending_requests: Vec<CaPendingRequest>,
    certificates: Vec<IssuedCertificate>,
    stamps: Vec<Countersignature>,
}

/// Borrowed form of [`Snapshot`] written on every commit.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotView<'a> {
    certificate_authorities: Vec<&'a CertificateAuthority>,
    pending_requests: Vec<&'a CaPendingRequest>,
    certificates: Vec<&'a IssuedCertificate>,
    stamps: Vec<&'a Countersignature>,
}

/// Shared, transactional record store.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    snapshot_dir: Option<PathBuf>,
}

impl Registry {
    /// Creates a registry that keeps records in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a registry persisted under `dir`, loading an existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory or snapshot cannot be read.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("{}: {e}", dir.display())))?;

        let path = dir.join(SNAPSHOT_FILE);
        let state = match fs::read_to_string(&path) {
            Ok(json) => {
                let snapshot: Snapshot = serde_json::from_str(&json)
                    .map_err(|e| Error::Storage(format!("corrupt registry snapshot: {e}")))?;
                RegistryState::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
        };

        info!(
            path = %path.display(),
            cas = state.cas.len(),
            certificates = state.certificates.len(),
            "opened registry"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot_dir: Some(dir),
        })
    }

    /// Runs `f` against a consistent view of the records.
    pub fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        f(&self.state.read())
    }

    /// Runs `f` against a working copy and commits it only if `f` succeeds.
    ///
    /// Transactions are serialised; concurrent readers see either the state
    /// before or after the whole transaction.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or [`Error::Storage`] if the snapshot
    /// cannot be written. In both cases nothing is committed.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut RegistryState) -> Result<R>) -> Result<R> {
        let mut guard = self.state.write();
        let mut working = guard.clone();
        let value = f(&mut working)?;
        if let Some(dir) = &self.snapshot_dir {
            persist(dir, &working)?;
        }
        *guard = working;
        Ok(value)
    }
}

fn persist(dir: &Path, state: &RegistryState) -> Result<()> {
    let json = serde_json::to_vec_pretty(&state.snapshot_view())
        .map_err(|e| Error::Storage(format!("failed to serialize registry: {e}")))?;
    let tmp = dir.join(format!(".{SNAPSHOT_FILE}.tmp"));
    let path = dir.join(SNAPSHOT_FILE);
    fs::write(&tmp, json).map_err(|e| Error::Storage(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, &path).map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "wrote registry snapshot");
    Ok(())
}

/// Collects every CA in the subtree rooted at `root`, root first.
///
/// Uses an explicit worklist; a repeated id ends that branch.
#[must_use]
pub fn subtree(state: &RegistryState, root: CaId) -> Vec<CaId> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut worklist = vec![root];
    while let Some(id) = worklist.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        worklist.extend(state.children_of(id).iter().rev().copied());
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaKind, CaStatus, CertificateStatus, PendingStatus, StampPurpose};
    use chrono::{Duration, Utc};
    use pqc_crypto::SecurityLevel;
    use pqc_custody::KeyHandle;
    use uuid::Uuid;

    fn ca(parent: Option<&CertificateAuthority>, kind: CaKind) -> CertificateAuthority {
        let now = Utc::now();
        CertificateAuthority {
            id: CaId::new(),
            name: "test".into(),
            kind,
            hierarchy_level: parent.map_or(0, |p| p.hierarchy_level + 1),
            label: "Test CA".into(),
            parent_ca: parent.map(|p| p.id),
            algorithm: SecurityLevel::MlDsa65,
            public_key_pem: String::new(),
            certificate_pem: format!("cert-{}", parent.map_or(0, |p| p.hierarchy_level + 1)),
            private_key_handle: None,
            valid_from: now,
            valid_until: now + Duration::days(1),
            status: CaStatus::Active,
            subject_dn: "CN=test".into(),
            province: None,
            organization_id: None,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    fn cert(issuer: CaId, serial: &str) -> IssuedCertificate {
        IssuedCertificate {
            id: CertificateId::new(),
            issuing_ca: issuer,
            subject_dn: "CN=user".into(),
            serial_number: Some(serial.into()),
            certificate_pem: Some("pem".into()),
            public_key_pem: String::new(),
            csr_pem: None,
            valid_from: None,
            valid_until: None,
            status: CertificateStatus::Active,
            revoked_at: None,
            revocation_reason: None,
            requested_by: None,
            rejection_reason: None,
            created_at: Utc::now(),
        }
    }

    fn stamp(hash: &str, sig: &str) -> Countersignature {
        Countersignature {
            id: StampId::new(),
            document_hash: hash.into(),
            user_signature: sig.into(),
            user_cert_pem: String::new(),
            officer_signature: String::new(),
            officer_cert_pem: String::new(),
            officer_id: "officer".into(),
            officer_ca: CaId::new(),
            timestamp_token: None,
            stamped_at: Utc::now(),
            purpose: StampPurpose::default(),
            status: StampStatus::Active,
            revoked_at: None,
            revoked_by: None,
        }
    }

    #[test]
    fn tree_invariants_enforced() {
        let mut state = RegistryState::default();
        let root = ca(None, CaKind::IssuingCa);
        let ra = ca(Some(&root), CaKind::RegistrationAuthority);
        state.insert_ca(root.clone()).unwrap();
        state.insert_ca(ra.clone()).unwrap();
        assert_eq!(state.children_of(root.id), [ra.id]);

        // RAs cannot have children.
        let under_ra = ca(Some(&ra), CaKind::IssuingCa);
        assert!(matches!(state.insert_ca(under_ra), Err(Error::StateConflict(_))));

        // Level must be parent + 1.
        let mut skipped = ca(Some(&root), CaKind::IssuingCa);
        skipped.hierarchy_level = 5;
        assert!(state.insert_ca(skipped).is_err());
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let registry = Registry::in_memory();
        let root = ca(None, CaKind::IssuingCa);
        let result: Result<()> = registry.transaction(|state| {
            state.insert_ca(root.clone())?;
            Err(Error::CascadeFailure("boom".into()))
        });
        assert!(result.is_err());
        assert!(registry.read(|s| s.ca(root.id).is_none()));
    }

    #[test]
    fn duplicate_serials_rejected() {
        let mut state = RegistryState::default();
        let issuer = CaId::new();
        state.insert_certificate(cert(issuer, "0A")).unwrap();
        assert!(matches!(
            state.insert_certificate(cert(issuer, "0A")),
            Err(Error::StateConflict(_))
        ));
        assert!(state.find_by_serial("0A").is_some());
    }

    #[test]
    fn stamp_dedup_slot_released_on_retire() {
        let mut state = RegistryState::default();
        let first = stamp("YWJj", "c2lnMQ==");
        let first_id = first.id;
        state.insert_stamp(first).unwrap();
        assert!(matches!(
            state.insert_stamp(stamp("YWJj", "c2lnMQ==")),
            Err(Error::StateConflict(_))
        ));

        assert!(state.retire_stamp(first_id, StampStatus::Revoked, Utc::now(), "admin").unwrap());
        assert!(!state.retire_stamp(first_id, StampStatus::Revoked, Utc::now(), "admin").unwrap());
        state.insert_stamp(stamp("YWJj", "c2lnMQ==")).unwrap();
    }

    #[test]
    fn subtree_walks_every_descendant() {
        let mut state = RegistryState::default();
        let root = ca(None, CaKind::IssuingCa);
        let a = ca(Some(&root), CaKind::IssuingCa);
        let b = ca(Some(&root), CaKind::RegistrationAuthority);
        let a1 = ca(Some(&a), CaKind::RegistrationAuthority);
        for node in [&root, &a, &b, &a1] {
            state.insert_ca(node.clone()).unwrap();
        }
        let order = subtree(&state, root.id);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], root.id);
        assert_eq!(subtree(&state, a.id), vec![a.id, a1.id]);
    }

    fn pending(parent: Option<CaId>, status: PendingStatus) -> CaPendingRequest {
        CaPendingRequest {
            id: PendingRequestId::new(),
            name: "pending".into(),
            algorithm: SecurityLevel::MlDsa65,
            csr_pem: "csr".into(),
            private_key_handle: KeyHandle::new("pending-key").unwrap(),
            parent_ca: parent,
            requested_by: "officer".into(),
            status,
            requested_at: Utc::now(),
            processed_at: None,
            processed_by: None,
            rejection_reason: None,
            activated_ca: None,
        }
    }

    fn stamp_with_id(id: u128, status: StampStatus) -> Countersignature {
        let mut s = stamp("YWJj", "c2lnMQ==");
        s.id = StampId::from_uuid(Uuid::from_u128(id));
        s.status = status;
        if status != StampStatus::Active {
            s.revoked_at = Some(Utc::now());
            s.revoked_by = Some("admin".into());
        }
        s
    }

    #[test]
    fn retired_stamps_never_hold_the_slot() {
        let mut state = RegistryState::default();
        state.insert_stamp(stamp_with_id(1, StampStatus::Active)).unwrap();
        state.insert_stamp(stamp_with_id(2, StampStatus::Revoked)).unwrap();
        assert_eq!(
            state.active_stamp_for("YWJj", "c2lnMQ==").map(|s| s.id),
            Some(StampId::from_uuid(Uuid::from_u128(1)))
        );
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = ca(None, CaKind::IssuingCa);
        let child = ca(Some(&root), CaKind::IssuingCa);
        // Activated from an external certificate: no parent, level 1.
        let mut offline = ca(None, CaKind::IssuingCa);
        offline.hierarchy_level = 1;
        let offline_child = ca(Some(&offline), CaKind::RegistrationAuthority);
        let issued = cert(child.id, "7F");

        let mut approved = pending(Some(root.id), PendingStatus::Approved);
        approved.processed_at = Some(Utc::now());
        approved.processed_by = Some("admin".into());
        approved.activated_ca = Some(child.id);
        let mut rejected = pending(Some(root.id), PendingStatus::Rejected);
        rejected.rejection_reason = Some("wrong province".into());
        let waiting = pending(None, PendingStatus::Pending);

        // The active stamp sorts before the revoked one it replaced.
        let revoked = stamp_with_id(u128::MAX, StampStatus::Revoked);
        let restamped = stamp_with_id(1, StampStatus::Active);
        {
            let registry = Registry::open(dir.path()).unwrap();
            registry
                .transaction(|state| {
                    for node in [&root, &offline, &child, &offline_child] {
                        state.insert_ca(node.clone())?;
                    }
                    state.insert_certificate(issued.clone())?;
                    for request in [&approved, &rejected, &waiting] {
                        state.insert_pending(request.clone());
                    }
                    state.insert_stamp(stamp_with_id(u128::MAX, StampStatus::Active))
                })
                .unwrap();
            registry
                .transaction(|state| {
                    state.retire_stamp(revoked.id, StampStatus::Revoked, Utc::now(), "admin")?;
                    state.insert_stamp(restamped.clone())
                })
                .unwrap();
        }

        let reopened = Registry::open(dir.path()).unwrap();
        reopened.read(|state| {
            assert_eq!(state.ca(child.id), Some(&child));
            assert_eq!(state.children_of(root.id), [child.id]);
            assert_eq!(state.ca(offline.id).map(|c| c.hierarchy_level), Some(1));
            assert_eq!(state.children_of(offline.id), [offline_child.id]);
            assert_eq!(state.find_by_serial("7F").map(|c| c.id), Some(issued.id));

            assert_eq!(state.pending(approved.id), Some(&approved));
            assert_eq!(state.pending(rejected.id), Some(&rejected));
            assert_eq!(state.pending(waiting.id), Some(&waiting));

            assert_eq!(
                state.active_stamp_for("YWJj", "c2lnMQ==").map(|s| s.id),
                Some(restamped.id)
            );
            assert_eq!(
                state.stamp(revoked.id).map(|s| s.status),
                Some(StampStatus::Revoked)
            );
        });
    }

    #[test]
    fn corrupt_snapshot_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), "{not json").unwrap();
        assert!(matches!(Registry::open(dir.path()), Err(Error::Storage(_))));
    }
}
