//! Bidirectional cross-source mapping registry
//!
//! A mapping `(source_a, id_a) <-> (source_b, id_b)` is visible from either
//! side. Auto-matched mappings are unverified and age out after a TTL;
//! confirmed mappings are verified and only go away through
//! [`MappingRegistry::invalidate_entity`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::MetadataSource;

/// One side of a mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub source: MetadataSource,
    pub id: String,
}

impl EntityRef {
    pub fn new(source: MetadataSource, id: impl Into<String>) -> Self {
        Self { source, id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub a: EntityRef,
    pub b: EntityRef,
    pub confidence: f64,
    pub verified: bool,
    pub updated_at: DateTime<Utc>,
}

impl SourceMapping {
    /// The side of the mapping that is not `entity`
    pub fn other_side(&self, entity: &EntityRef) -> Option<&EntityRef> {
        if &self.a == entity {
            Some(&self.b)
        } else if &self.b == entity {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Unordered pair key so both directions land on one record
fn pair_key(x: &EntityRef, y: &EntityRef) -> (EntityRef, EntityRef) {
    if x <= y {
        (x.clone(), y.clone())
    } else {
        (y.clone(), x.clone())
    }
}

/// How long an unverified mapping stays usable
pub const DEFAULT_UNVERIFIED_TTL_DAYS: i64 = 30;

#[derive(Debug)]
pub struct MappingRegistry {
    mappings: RwLock<HashMap<(EntityRef, EntityRef), SourceMapping>>,
    unverified_ttl: Duration,
}

impl Default for MappingRegistry {
    fn default() -> Self {
        Self::with_ttl(Duration::days(DEFAULT_UNVERIFIED_TTL_DAYS))
    }
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(unverified_ttl: Duration) -> Self {
        Self {
            mappings: RwLock::new(HashMap::new()),
            unverified_ttl,
        }
    }

    /// Unverified mappings updated at or before this are stale
    ///
    /// `None` when the TTL reaches past the representable range.
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        Utc::now().checked_sub_signed(self.unverified_ttl)
    }

    fn is_live(mapping: &SourceMapping, cutoff: Option<DateTime<Utc>>) -> bool {
        mapping.verified || cutoff.map_or(true, |cutoff| mapping.updated_at > cutoff)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<(EntityRef, EntityRef), SourceMapping>> {
        self.mappings.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<(EntityRef, EntityRef), SourceMapping>> {
        self.mappings.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an automatic match
    ///
    /// Never downgrades a verified mapping between the same pair. Stale
    /// unverified mappings are pruned on the way.
    pub fn record(&self, a: EntityRef, b: EntityRef, confidence: f64) {
        let key = pair_key(&a, &b);
        let cutoff = self.cutoff();
        let mut mappings = self.write();
        mappings.retain(|_, m| Self::is_live(m, cutoff));
        match mappings.get_mut(&key) {
            Some(existing) if existing.verified => {}
            Some(existing) => {
                existing.confidence = confidence;
                existing.updated_at = Utc::now();
            }
            None => {
                mappings.insert(
                    key,
                    SourceMapping {
                        a,
                        b,
                        confidence,
                        verified: false,
                        updated_at: Utc::now(),
                    },
                );
            }
        }
    }

    /// Record a user-confirmed match
    pub fn confirm(&self, a: EntityRef, b: EntityRef) {
        let key = pair_key(&a, &b);
        self.write().insert(
            key,
            SourceMapping {
                a,
                b,
                confidence: 1.0,
                verified: true,
                updated_at: Utc::now(),
            },
        );
    }

    /// Mapping from `entity` into `target`, looked up from either direction
    ///
    /// Stale unverified mappings are ignored.
    pub fn lookup(&self, entity: &EntityRef, target: MetadataSource) -> Option<SourceMapping> {
        let cutoff = self.cutoff();
        self.read()
            .values()
            .filter(|m| Self::is_live(m, cutoff))
            .filter(|m| m.other_side(entity).map_or(false, |other| other.source == target))
            // Prefer verified, then higher confidence
            .max_by(|x, y| {
                x.verified
                    .cmp(&y.verified)
                    .then(x.confidence.total_cmp(&y.confidence))
            })
            .cloned()
    }

    /// Every live mapping touching `entity`
    pub fn mappings_for(&self, entity: &EntityRef) -> Vec<SourceMapping> {
        let cutoff = self.cutoff();
        self.read()
            .values()
            .filter(|m| Self::is_live(m, cutoff))
            .filter(|m| m.other_side(entity).is_some())
            .cloned()
            .collect()
    }

    /// Delete every mapping referencing `entity`, on either side
    ///
    /// Used when the entity's source data is refreshed; removes verified
    /// mappings too. Returns how many were deleted.
    pub fn invalidate_entity(&self, entity: &EntityRef) -> usize {
        let mut mappings = self.write();
        let before = mappings.len();
        mappings.retain(|_, m| m.other_side(entity).is_none());
        before - mappings.len()
    }

    /// Drop unverified mappings older than the TTL
    pub fn expire_unverified(&self) -> usize {
        let cutoff = self.cutoff();
        let mut mappings = self.write();
        let before = mappings.len();
        mappings.retain(|_, m| Self::is_live(m, cutoff));
        before - mappings.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
