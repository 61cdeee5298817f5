//! Channel groups and their reconciliation against the reported module count.
//!
//! Every MPPT module is exposed as one channel group named `module<N>`. The
//! number of modules a device reports may change between polls, so the set
//! of groups is reconciled on every poll: [`compute_delta`] yields the groups
//! to add or remove and [`Reconciler`] applies them with one
//! [`ChannelSchema::replace`] call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Template id of the channels owned by one module group.
pub const MODULE_TEMPLATE_ID: &str = "sunspec-mppt-module";

const GROUP_PREFIX: &str = "module";

/// Identifies one module channel group, rendered as `module<N>`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(u16);

impl GroupId {
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Zero based index of the module this group belongs to.
    pub const fn index(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GROUP_PREFIX}{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(GROUP_PREFIX)
            .filter(|index| !index.starts_with('+'))
            .and_then(|index| index.parse().ok())
            .map(Self)
            .ok_or_else(|| Error::InvalidGroupId(s.to_string()))
    }
}

/// Physical unit of a quantity channel.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ampere,
    Volt,
    Watt,
    WattHour,
    DegreeCelsius,
    Second,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Ampere => "A",
            Unit::Volt => "V",
            Unit::Watt => "W",
            Unit::WattHour => "Wh",
            Unit::DegreeCelsius => "°C",
            Unit::Second => "s",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The item type a channel carries.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Number,
    Quantity(Unit),
    Text,
}

/// Composite channel id: the owning group plus the channel name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelUid {
    pub group: GroupId,
    pub channel: String,
}

impl ChannelUid {
    pub fn new(group: GroupId, channel: impl Into<String>) -> Self {
        Self {
            group,
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.channel)
    }
}

/// Definition of a single channel inside a group.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub uid: ChannelUid,
    pub kind: ChannelKind,
    pub label: String,
}

/// Errors of the channel reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The template provider could not supply the definitions of a group.
    /// Reconciliation is skipped and retried with the next poll.
    #[error("channel template '{template}' unavailable for group {group}")]
    TemplateUnavailable { group: GroupId, template: String },

    #[error("invalid channel group id '{0}'")]
    InvalidGroupId(String),
}

/// Supplies the channel definitions of newly added groups.
pub trait TemplateProvider {
    fn channel_definitions(
        &self,
        group: GroupId,
        template_id: &str,
    ) -> Result<Vec<ChannelDefinition>, Error>;
}

/// The live channel set mutated by the [`Reconciler`].
pub trait ChannelSchema {
    /// Whether a channel with this composite id already exists.
    fn contains(&self, uid: &ChannelUid) -> bool;

    /// Ids of all groups that currently own at least one channel.
    fn groups(&self) -> BTreeSet<GroupId>;

    /// Removes all channels of `removals` and adds `additions` in one step.
    ///
    /// Observers must see either the previous or the next channel set,
    /// never an intermediate one.
    fn replace(&mut self, removals: &BTreeSet<GroupId>, additions: Vec<ChannelDefinition>);
}

/// Groups to add and remove so that the schema matches the module count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDelta {
    pub to_add: BTreeSet<GroupId>,
    pub to_remove: BTreeSet<GroupId>,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

fn contiguous_groups(count: u16) -> BTreeSet<GroupId> {
    (0..count).map(GroupId::new).collect()
}

/// Computes the groups to add or remove to go from `current` to `desired`
/// contiguous module groups.
pub fn compute_delta(desired: u16, current: u16) -> SchemaDelta {
    groups_delta(desired, &contiguous_groups(current))
}

/// Computes the groups to add or remove so that `existing` becomes exactly
/// `module0 .. module(desired - 1)`.
///
/// `existing` need not be contiguous; every group at or above `desired` is
/// removed and every missing group below it is added.
pub fn groups_delta(desired: u16, existing: &BTreeSet<GroupId>) -> SchemaDelta {
    let wanted = contiguous_groups(desired);
    SchemaDelta {
        to_add: wanted.difference(existing).copied().collect(),
        to_remove: existing.difference(&wanted).copied().collect(),
    }
}

/// Keeps the channel groups of one device in line with its module count.
///
/// The groups present are always read from the schema, so a schema that
/// already holds groups when the reconciler first sees it is brought to the
/// reported count as well. Polls must be serialized by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    /// Brings `schema` to exactly `desired` module groups.
    ///
    /// Returns the applied delta, which is empty if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateUnavailable`] if the provider fails for any
    /// added group. The schema is then left untouched so the next call
    /// retries the same delta.
    pub fn reconcile<P, S>(
        &self,
        desired: u16,
        provider: &P,
        schema: &mut S,
    ) -> Result<SchemaDelta, Error>
    where
        P: TemplateProvider + ?Sized,
        S: ChannelSchema + ?Sized,
    {
        let existing = schema.groups();
        let delta = groups_delta(desired, &existing);
        if delta.is_empty() {
            return Ok(delta);
        }

        let mut additions = Vec::new();
        for group in &delta.to_add {
            let definitions = provider
                .channel_definitions(*group, MODULE_TEMPLATE_ID)
                .inspect_err(|err| log::warn!("Skipping channel reconciliation: {err}"))?;
            additions.extend(
                definitions
                    .into_iter()
                    .filter(|definition| !schema.contains(&definition.uid)),
            );
        }

        log::debug!(
            "Updating channel groups from {} to {desired}: adding {}, removing {}",
            existing.len(),
            delta.to_add.len(),
            delta.to_remove.len()
        );
        schema.replace(&delta.to_remove, additions);
        Ok(delta)
    }
}

/// Channel names of the module template, in publication order.
pub mod names {
    pub const MODULE_ID: &str = "module-id";
    pub const ID_STRING: &str = "id-string";
    pub const CURRENT: &str = "current";
    pub const VOLTAGE: &str = "voltage";
    pub const POWER: &str = "power";
    pub const LIFETIME_ENERGY: &str = "lifetime-energy";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TEMPERATURE: &str = "temperature";
    pub const OPERATING_STATE: &str = "operating-state";
    pub const EVENTS: &str = "events";
}

/// The built-in template of module channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleTemplate;

impl ModuleTemplate {
    const CHANNELS: [(&'static str, ChannelKind, &'static str); 10] = [
        (names::MODULE_ID, ChannelKind::Number, "Module ID"),
        (names::ID_STRING, ChannelKind::Text, "Module ID String"),
        (names::CURRENT, ChannelKind::Quantity(Unit::Ampere), "DC Current"),
        (names::VOLTAGE, ChannelKind::Quantity(Unit::Volt), "DC Voltage"),
        (names::POWER, ChannelKind::Quantity(Unit::Watt), "DC Power"),
        (
            names::LIFETIME_ENERGY,
            ChannelKind::Quantity(Unit::WattHour),
            "Lifetime Energy",
        ),
        (names::TIMESTAMP, ChannelKind::Quantity(Unit::Second), "Timestamp"),
        (
            names::TEMPERATURE,
            ChannelKind::Quantity(Unit::DegreeCelsius),
            "Temperature",
        ),
        (names::OPERATING_STATE, ChannelKind::Text, "Operating State"),
        (names::EVENTS, ChannelKind::Number, "Module Events"),
    ];
}

impl TemplateProvider for ModuleTemplate {
    fn channel_definitions(
        &self,
        group: GroupId,
        template_id: &str,
    ) -> Result<Vec<ChannelDefinition>, Error> {
        if template_id != MODULE_TEMPLATE_ID {
            return Err(Error::TemplateUnavailable {
                group,
                template: template_id.to_string(),
            });
        }
        Ok(Self::CHANNELS
            .iter()
            .map(|(name, kind, label)| ChannelDefinition {
                uid: ChannelUid::new(group, *name),
                kind: *kind,
                label: format!("Module {} {label}", group.index()),
            })
            .collect())
    }
}

type ChannelMap = BTreeMap<ChannelUid, ChannelDefinition>;

/// In-process, shareable channel set.
///
/// Clones share the same channels. [`ChannelSchema::replace`] builds the next
/// map completely before swapping it in, so [`ChannelRegistry::snapshot`]
/// always returns a consistent set.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<Arc<ChannelMap>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current channel set.
    pub fn snapshot(&self) -> Arc<ChannelMap> {
        match self.channels.read() {
            Ok(channels) => channels.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ChannelSchema for ChannelRegistry {
    fn contains(&self, uid: &ChannelUid) -> bool {
        self.snapshot().contains_key(uid)
    }

    fn groups(&self) -> BTreeSet<GroupId> {
        self.snapshot().keys().map(|uid| uid.group).collect()
    }

    fn replace(&mut self, removals: &BTreeSet<GroupId>, additions: Vec<ChannelDefinition>) {
        let mut guard = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next: ChannelMap = guard
            .iter()
            .filter(|(uid, _)| !removals.contains(&uid.group))
            .map(|(uid, definition)| (uid.clone(), definition.clone()))
            .collect();
        for definition in additions {
            next.entry(definition.uid.clone()).or_insert(definition);
        }
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::cell::Cell;

    fn groups(indices: impl IntoIterator<Item = u16>) -> BTreeSet<GroupId> {
        indices.into_iter().map(GroupId::new).collect()
    }

    /// Counts `replace` calls on top of a registry.
    #[derive(Default)]
    struct CountingSchema {
        registry: ChannelRegistry,
        replace_calls: usize,
    }

    impl ChannelSchema for CountingSchema {
        fn contains(&self, uid: &ChannelUid) -> bool {
            self.registry.contains(uid)
        }

        fn groups(&self) -> BTreeSet<GroupId> {
            self.registry.groups()
        }

        fn replace(&mut self, removals: &BTreeSet<GroupId>, additions: Vec<ChannelDefinition>) {
            self.replace_calls += 1;
            self.registry.replace(removals, additions);
        }
    }

    /// Fails while `available` is false.
    struct FlakyTemplate {
        available: Cell<bool>,
    }

    impl TemplateProvider for FlakyTemplate {
        fn channel_definitions(
            &self,
            group: GroupId,
            template_id: &str,
        ) -> Result<Vec<ChannelDefinition>, Error> {
            if self.available.get() {
                ModuleTemplate.channel_definitions(group, template_id)
            } else {
                Err(Error::TemplateUnavailable {
                    group,
                    template: template_id.to_string(),
                })
            }
        }
    }

    #[test]
    fn group_id_format() {
        assert_eq!(GroupId::new(0).to_string(), "module0");
        assert_eq!(GroupId::new(12).to_string(), "module12");
        assert_eq!("module7".parse::<GroupId>(), Ok(GroupId::new(7)));
        assert_matches!("module".parse::<GroupId>(), Err(Error::InvalidGroupId(..)));
        assert_matches!("module+1".parse::<GroupId>(), Err(Error::InvalidGroupId(..)));
        assert_matches!("string1".parse::<GroupId>(), Err(Error::InvalidGroupId(..)));
        assert_eq!(
            ChannelUid::new(GroupId::new(3), names::CURRENT).to_string(),
            "module3#current"
        );
    }

    #[test]
    fn delta_grow() {
        let delta = compute_delta(5, 3);
        assert_eq!(delta.to_add, groups([3, 4]));
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn delta_shrink() {
        let delta = compute_delta(1, 5);
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.to_remove, groups([1, 2, 3, 4]));
    }

    #[test]
    fn delta_unchanged() {
        assert!(compute_delta(4, 4).is_empty());
        assert!(compute_delta(0, 0).is_empty());
        assert_eq!(compute_delta(0, 2).to_remove, groups([0, 1]));
    }

    #[test]
    fn delta_from_existing_groups() {
        let delta = groups_delta(2, &groups(0..5));
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.to_remove, groups(2..5));

        let delta = groups_delta(3, &groups([1, 4]));
        assert_eq!(delta.to_add, groups([0, 2]));
        assert_eq!(delta.to_remove, groups([4]));

        assert!(groups_delta(3, &groups(0..3)).is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut schema = CountingSchema::default();
        let reconciler = Reconciler::new();

        let delta = reconciler.reconcile(2, &ModuleTemplate, &mut schema).unwrap();
        assert_eq!(delta.to_add, groups([0, 1]));
        assert_eq!(schema.replace_calls, 1);

        let delta = reconciler.reconcile(2, &ModuleTemplate, &mut schema).unwrap();
        assert!(delta.is_empty());
        assert_eq!(schema.replace_calls, 1);
        assert_eq!(schema.groups(), groups([0, 1]));
    }

    #[test]
    fn reconcile_grow_and_shrink() {
        let mut registry = ChannelRegistry::new();
        let reconciler = Reconciler::new();

        reconciler.reconcile(3, &ModuleTemplate, &mut registry).unwrap();
        assert_eq!(registry.groups(), groups(0..3));
        assert_eq!(registry.snapshot().len(), 3 * ModuleTemplate::CHANNELS.len());

        let delta = reconciler.reconcile(5, &ModuleTemplate, &mut registry).unwrap();
        assert_eq!(delta.to_add, groups([3, 4]));
        assert_eq!(registry.groups(), groups(0..5));

        let delta = reconciler.reconcile(1, &ModuleTemplate, &mut registry).unwrap();
        assert_eq!(delta.to_remove, groups(1..5));
        assert_eq!(registry.groups(), groups([0]));

        reconciler.reconcile(0, &ModuleTemplate, &mut registry).unwrap();
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn reconcile_applies_once_per_change() {
        let mut schema = CountingSchema::default();
        let reconciler = Reconciler::new();
        reconciler.reconcile(4, &ModuleTemplate, &mut schema).unwrap();
        reconciler.reconcile(2, &ModuleTemplate, &mut schema).unwrap();
        reconciler.reconcile(2, &ModuleTemplate, &mut schema).unwrap();
        assert_eq!(schema.replace_calls, 2);
    }

    #[test]
    fn reconcile_removes_groups_of_prefilled_schema() {
        let mut registry = ChannelRegistry::new();
        Reconciler::new()
            .reconcile(5, &ModuleTemplate, &mut registry)
            .unwrap();

        // A new reconciler on the same channels, as after a restart.
        let delta = Reconciler::new()
            .reconcile(2, &ModuleTemplate, &mut registry)
            .unwrap();
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.to_remove, groups(2..5));
        assert_eq!(registry.groups(), groups([0, 1]));
        assert_eq!(registry.snapshot().len(), 2 * ModuleTemplate::CHANNELS.len());
    }

    #[test]
    fn reconcile_fills_gaps_and_drops_strays() {
        let mut registry = ChannelRegistry::new();
        for index in [1, 4] {
            let definitions = ModuleTemplate
                .channel_definitions(GroupId::new(index), MODULE_TEMPLATE_ID)
                .unwrap();
            registry.replace(&BTreeSet::new(), definitions);
        }

        let delta = Reconciler::new()
            .reconcile(3, &ModuleTemplate, &mut registry)
            .unwrap();
        assert_eq!(delta.to_add, groups([0, 2]));
        assert_eq!(delta.to_remove, groups([4]));
        assert_eq!(registry.groups(), groups(0..3));
        assert_eq!(registry.snapshot().len(), 3 * ModuleTemplate::CHANNELS.len());
    }

    #[test]
    fn reconcile_retries_after_template_failure() {
        let provider = FlakyTemplate {
            available: Cell::new(true),
        };
        let mut schema = CountingSchema::default();
        let reconciler = Reconciler::new();
        reconciler.reconcile(1, &provider, &mut schema).unwrap();

        provider.available.set(false);
        assert_matches!(
            reconciler.reconcile(3, &provider, &mut schema),
            Err(Error::TemplateUnavailable { .. })
        );
        assert_eq!(schema.replace_calls, 1);
        assert_eq!(schema.groups(), groups([0]));

        // An unchanged count needs no template.
        assert!(reconciler.reconcile(1, &provider, &mut schema).unwrap().is_empty());

        provider.available.set(true);
        let delta = reconciler.reconcile(3, &provider, &mut schema).unwrap();
        assert_eq!(delta.to_add, groups([1, 2]));
        assert_eq!(schema.groups(), groups(0..3));
    }

    #[test]
    fn template_rejects_unknown_id() {
        assert_matches!(
            ModuleTemplate.channel_definitions(GroupId::new(0), "inverter"),
            Err(Error::TemplateUnavailable { .. })
        );
    }

    #[test]
    fn snapshot_is_unaffected_by_replace() {
        let mut registry = ChannelRegistry::new();
        let reconciler = Reconciler::new();
        reconciler.reconcile(2, &ModuleTemplate, &mut registry).unwrap();

        let before = registry.snapshot();
        let reader = registry.clone();
        reconciler.reconcile(1, &ModuleTemplate, &mut registry).unwrap();

        assert_eq!(before.len(), 2 * ModuleTemplate::CHANNELS.len());
        assert_eq!(reader.groups(), groups([0]));
    }
}
