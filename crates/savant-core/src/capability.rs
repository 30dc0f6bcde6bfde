//! Capability registry: the static-at-boot table of worker capability
//! profiles and the least-privilege lookup over it.
//!
//! Loaded once from a TOML manifest (or built in code) and read-only
//! afterwards, so concurrent lookups need no locking. Two profiles with the
//! same id are a boot-time fatal error.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;
use crate::shared::OperationSet;

/// Relative execution cost of a worker type. Cheaper tiers are preferred
/// when tag matches tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Low,
    Mid,
    High,
}

impl CostTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostTier::Low => "low",
            CostTier::Mid => "mid",
            CostTier::High => "high",
        }
    }
}

/// Declared allowance of one worker type: which operations it may perform
/// and which domain tags it serves. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Worker type name; unique within the registry.
    pub id: String,
    pub allowed_operations: OperationSet,
    #[serde(default)]
    pub domain_tags: BTreeSet<String>,
    pub cost_tier: CostTier,
}

impl CapabilityProfile {
    /// True iff every required operation is within this profile's allowance.
    #[inline]
    pub fn allows(&self, required: OperationSet) -> bool {
        required.is_subset_of(self.allowed_operations)
    }

    fn matching_tags(&self, tags: &BTreeSet<String>) -> usize {
        self.domain_tags.intersection(tags).count()
    }
}

/// On-disk registry manifest (TOML): a `[[profiles]]` array of
/// [`CapabilityProfile`] entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryManifest {
    pub profiles: Vec<CapabilityProfile>,
}

/// Static table of capability profiles with ranked domain lookup.
#[derive(Debug)]
pub struct CapabilityRegistry {
    profiles: Vec<CapabilityProfile>,
}

impl CapabilityRegistry {
    /// Builds a registry, rejecting duplicate profile ids.
    pub fn from_profiles(profiles: Vec<CapabilityProfile>) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        for profile in &profiles {
            if !seen.insert(profile.id.clone()) {
                return Err(CoreError::DuplicateProfile(profile.id.clone()));
            }
        }
        info!(profile_count = profiles.len(), "capability registry loaded");
        Ok(Self { profiles })
    }

    /// Parses a TOML manifest string.
    pub fn from_toml_str(manifest: &str) -> Result<Self, CoreError> {
        let manifest: RegistryManifest = toml::from_str(manifest)?;
        Self::from_profiles(manifest.profiles)
    }

    /// Loads the manifest file at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn get(&self, id: &str) -> Option<&CapabilityProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profiles able to serve `domain_tags`, ordered by matching tag count
    /// descending, then cost tier ascending, then id (the deterministic
    /// tie-break).
    ///
    /// When the query carries tags, profiles serving none of them are
    /// excluded; a tagless query ranks every profile purely by cost and id.
    pub fn lookup(&self, domain_tags: &BTreeSet<String>) -> Vec<&CapabilityProfile> {
        let mut candidates: Vec<(usize, &CapabilityProfile)> = self
            .profiles
            .iter()
            .map(|p| (p.matching_tags(domain_tags), p))
            .filter(|(matches, _)| domain_tags.is_empty() || *matches > 0)
            .collect();

        candidates.sort_by(|(ma, pa), (mb, pb)| {
            mb.cmp(ma)
                .then(pa.cost_tier.cmp(&pb.cost_tier))
                .then(pa.id.cmp(&pb.id))
        });
        candidates.into_iter().map(|(_, p)| p).collect()
    }

    /// Subset check between a profile's allowance and a task's requirement.
    /// The scheduler calls this at routing time; the executor repeats it at
    /// invocation time.
    pub fn validate(profile: &CapabilityProfile, required: OperationSet) -> bool {
        profile.allows(required)
    }
}
