//! Nearest-neighbor identity matching under an occlusion-adjusted tolerance.

use crate::gallery::Gallery;
use crate::types::{Embedding, EmbeddingError, Identity, IdentityId};
use serde::Serialize;
use thiserror::Error;

/// Default maximum Euclidean distance for an unobstructed face.
pub const DEFAULT_BASE_TOLERANCE: f64 = 0.6;
/// Default maximum distance when the face is partially covered.
pub const DEFAULT_RELAXED_TOLERANCE: f64 = 0.9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid query embedding: {0}")]
    InvalidEmbedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedIdentity {
    pub id: IdentityId,
    pub name: String,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// The accepted identity, if the nearest candidate was within tolerance.
    pub identity: Option<MatchedIdentity>,
    /// Distance to the nearest candidate, accepted or not. `None` for an empty gallery.
    pub distance: Option<f64>,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            distance: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for comparing a query embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[Identity], tolerance: f64) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher.
///
/// Always visits every gallery entry; the answer never depends on where in
/// the gallery the winner sits. Equal distances resolve to the lower id.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, gallery: &[Identity], tolerance: f64) -> MatchResult {
        let mut best: Option<(f64, &Identity)> = None;

        for identity in gallery {
            let dist = query.euclidean_distance(&identity.embedding);
            let is_better = match best {
                None => true,
                Some((best_dist, best_identity)) => {
                    dist < best_dist || (dist == best_dist && identity.id < best_identity.id)
                }
            };
            if is_better {
                best = Some((dist, identity));
            }
        }

        match best {
            Some((dist, identity)) if dist <= tolerance => MatchResult {
                identity: Some(MatchedIdentity {
                    id: identity.id,
                    name: identity.name.clone(),
                }),
                distance: Some(dist),
            },
            Some((dist, _)) => MatchResult {
                identity: None,
                distance: Some(dist),
            },
            None => MatchResult::unknown(),
        }
    }
}

/// Resolves a query embedding to a gallery identity, choosing the tolerance
/// from the occlusion verdict.
pub struct IdentityMatcher<M = EuclideanMatcher> {
    matcher: M,
    base_tolerance: f64,
    relaxed_tolerance: f64,
}

impl IdentityMatcher<EuclideanMatcher> {
    pub fn new(base_tolerance: f64, relaxed_tolerance: f64) -> Self {
        Self::with_matcher(EuclideanMatcher, base_tolerance, relaxed_tolerance)
    }
}

impl Default for IdentityMatcher<EuclideanMatcher> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOLERANCE, DEFAULT_RELAXED_TOLERANCE)
    }
}

impl<M: Matcher> IdentityMatcher<M> {
    pub fn with_matcher(matcher: M, base_tolerance: f64, relaxed_tolerance: f64) -> Self {
        // Relaxed must never be stricter than base.
        let relaxed = if relaxed_tolerance < base_tolerance {
            tracing::warn!(
                base_tolerance,
                relaxed_tolerance,
                "relaxed tolerance below base tolerance; using base for occluded faces"
            );
            base_tolerance
        } else {
            relaxed_tolerance
        };

        Self {
            matcher,
            base_tolerance,
            relaxed_tolerance: relaxed,
        }
    }

    pub fn tolerance(&self, occluded: bool) -> f64 {
        if occluded {
            self.relaxed_tolerance
        } else {
            self.base_tolerance
        }
    }

    /// Match `query` against the gallery snapshot.
    pub fn identify(
        &self,
        gallery: &Gallery,
        query: &Embedding,
        occluded: bool,
    ) -> Result<MatchResult, MatchError> {
        query.validate()?;
        Ok(self
            .matcher
            .compare(query, gallery.identities(), self.tolerance(occluded)))
    }
}
