//! In-memory snapshot of enrolled identities.

use crate::store::{IdentityRow, IdentityStore, StoreError};
use crate::types::{ByteOrder, Embedding, Identity, IdentityId};

/// Immutable set of known identities, shared behind an `Arc` by readers.
///
/// Rows whose embedding blob does not decode to a full-length vector are
/// dropped during construction; the gallery never holds a malformed entry.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
    skipped: usize,
}

impl Gallery {
    /// Load every identity from the store, skipping malformed rows.
    pub fn load<S: IdentityStore + ?Sized>(store: &S, order: ByteOrder) -> Result<Self, StoreError> {
        let rows = store.load_identities()?;
        let gallery = Self::from_rows(rows, order);
        tracing::info!(
            identities = gallery.len(),
            skipped = gallery.skipped,
            "gallery loaded"
        );
        Ok(gallery)
    }

    pub fn from_rows(rows: impl IntoIterator<Item = IdentityRow>, order: ByteOrder) -> Self {
        let mut identities = Vec::new();
        let mut skipped = 0;

        for row in rows {
            match Embedding::from_bytes(&row.embedding, order) {
                Ok(embedding) => identities.push(Identity {
                    id: row.id,
                    name: row.name,
                    embedding,
                }),
                Err(e) => {
                    tracing::warn!(
                        identity_id = row.id,
                        name = %row.name,
                        bytes = row.embedding.len(),
                        error = %e,
                        "skipping gallery entry with malformed embedding"
                    );
                    skipped += 1;
                }
            }
        }

        Self { identities, skipped }
    }

    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities, skipped: 0 }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of rows rejected at load time.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
