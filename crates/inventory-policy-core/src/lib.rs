use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Annotation recording which inventory last claimed a live object.
pub const OWNING_INVENTORY_KEY: &str = "config.kubernetes.io/owning-inventory";

pub type Annotations = BTreeMap<String, String>;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PolicyError {
    #[error(
        "can't {operation} resource under inventory policy {policy}: resource {} (annotation {key})",
        denial_reason(.status),
        key = OWNING_INVENTORY_KEY
    )]
    PreventedActuation { operation: Operation, policy: InventoryPolicy, status: Option<MatchStatus> },
    #[error("unknown inventory policy `{0}` (expected one of: strict, adopt-if-no-inventory, adopt-all)")]
    UnknownPolicy(String),
}

fn denial_reason(status: &Option<MatchStatus>) -> &'static str {
    match status {
        None => "does not exist",
        Some(MatchStatus::Empty) => "has no owning inventory",
        Some(MatchStatus::Match) => "is owned by this inventory",
        Some(MatchStatus::Unmatch) => "is owned by a different inventory",
    }
}

/// Anything that can name the inventory an apply or prune runs on behalf of.
pub trait Inventory {
    fn id(&self) -> &str;
}

impl Inventory for str {
    fn id(&self) -> &str {
        self
    }
}

impl Inventory for String {
    fn id(&self) -> &str {
        self
    }
}

impl<T: Inventory + ?Sized> Inventory for &T {
    fn id(&self) -> &str {
        (**self).id()
    }
}

/// Identity of an inventory object as the surrounding tooling tracks it.
///
/// Only `id` takes part in ownership decisions. `name` and `namespace` locate
/// the inventory object itself and are carried for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct InventoryInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub id: String,
}

impl Inventory for InventoryInfo {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A live or about-to-be-applied object. `None` and an empty map are equivalent.
pub trait Resource {
    fn annotations(&self) -> Option<&Annotations>;

    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations()?.get(key).map(String::as_str)
    }
}

impl Resource for Annotations {
    fn annotations(&self) -> Option<&Annotations> {
        Some(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Resource for ObjectMeta {
    fn annotations(&self) -> Option<&Annotations> {
        self.annotations.as_ref()
    }
}

/// Manifest view holding only the fields ownership decisions read. Everything
/// else in the document is ignored on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl Object {
    #[must_use]
    pub fn owning_inventory(&self) -> Option<&str> {
        self.annotation(OWNING_INVENTORY_KEY)
    }
}

impl Resource for Object {
    fn annotations(&self) -> Option<&Annotations> {
        self.metadata.annotations()
    }
}

impl<T: Resource + ?Sized> Resource for &T {
    fn annotations(&self) -> Option<&Annotations> {
        (**self).annotations()
    }
}

/// Whether an inventory may take over objects that belong to another
/// inventory, or to none.
///
/// Variants are ordered from strictest to most permissive. Prune is never
/// relaxed by the policy: only an object owned by the current inventory can
/// be pruned.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryPolicy {
    /// Apply only to objects that do not exist yet or are already owned by
    /// this inventory.
    #[default]
    #[serde(rename = "strict", alias = "must-match")]
    MustMatch,
    /// Additionally adopt live objects carrying no owning inventory.
    AdoptIfNoInventory,
    /// Apply over any live object, including ones owned by another inventory.
    AdoptAll,
}

impl InventoryPolicy {
    pub const ALL: [Self; 3] = [Self::MustMatch, Self::AdoptIfNoInventory, Self::AdoptAll];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MustMatch => "strict",
            Self::AdoptIfNoInventory => "adopt-if-no-inventory",
            Self::AdoptAll => "adopt-all",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" | "must-match" => Some(Self::MustMatch),
            "adopt-if-no-inventory" => Some(Self::AdoptIfNoInventory),
            "adopt-all" => Some(Self::AdoptAll),
            _ => None,
        }
    }
}

impl Display for InventoryPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryPolicy {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value.trim()).ok_or_else(|| PolicyError::UnknownPolicy(value.to_string()))
    }
}

/// Relationship between an inventory and the owning-inventory annotation of
/// a live object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Empty,
    Match,
    Unmatch,
}

impl MatchStatus {
    pub const ALL: [Self; 3] = [Self::Empty, Self::Match, Self::Unmatch];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Match => "match",
            Self::Unmatch => "unmatch",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "empty" => Some(Self::Empty),
            "match" => Some(Self::Match),
            "unmatch" => Some(Self::Unmatch),
            _ => None,
        }
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Apply,
    Prune,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Prune => "prune",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn inventory_id_match<I, R>(inventory: &I, resource: &R) -> MatchStatus
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    match resource.annotation(OWNING_INVENTORY_KEY) {
        None => MatchStatus::Empty,
        Some(value) if value == inventory.id() => MatchStatus::Match,
        Some(_) => MatchStatus::Unmatch,
    }
}

#[must_use]
pub fn apply_permitted(status: MatchStatus, policy: InventoryPolicy) -> bool {
    match status {
        MatchStatus::Empty => policy != InventoryPolicy::MustMatch,
        MatchStatus::Match => true,
        MatchStatus::Unmatch => policy == InventoryPolicy::AdoptAll,
    }
}

/// Prune ignores the policy: deletion is only allowed for objects this
/// inventory owns.
#[must_use]
pub fn prune_permitted(status: MatchStatus, _policy: InventoryPolicy) -> bool {
    match status {
        MatchStatus::Match => true,
        MatchStatus::Empty | MatchStatus::Unmatch => false,
    }
}

/// Decide whether `resource` may be applied on behalf of `inventory`.
///
/// `resource` is `None` when the object does not exist live yet.
///
/// # Errors
/// Returns [`PolicyError::PreventedActuation`] when the live object's owning
/// inventory rules out the apply under `policy`.
pub fn check_apply<I, R>(
    inventory: &I,
    resource: Option<&R>,
    policy: InventoryPolicy,
) -> Result<Option<MatchStatus>, PolicyError>
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    let Some(resource) = resource else {
        return Ok(None);
    };
    let status = inventory_id_match(inventory, resource);
    if apply_permitted(status, policy) {
        return Ok(Some(status));
    }
    tracing::debug!(
        inventory_id = inventory.id(),
        %policy,
        %status,
        "inventory policy prevented apply"
    );
    Err(PolicyError::PreventedActuation { operation: Operation::Apply, policy, status: Some(status) })
}

/// Decide whether `resource` may be pruned on behalf of `inventory`.
///
/// # Errors
/// Returns [`PolicyError::PreventedActuation`] when the object does not exist
/// live or is not owned by `inventory`.
pub fn check_prune<I, R>(
    inventory: &I,
    resource: Option<&R>,
    policy: InventoryPolicy,
) -> Result<MatchStatus, PolicyError>
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    let status = resource.map(|resource| inventory_id_match(inventory, resource));
    match status {
        Some(status) if prune_permitted(status, policy) => Ok(status),
        _ => {
            tracing::debug!(
                inventory_id = inventory.id(),
                %policy,
                status = status.map_or("absent", MatchStatus::as_str),
                "inventory policy prevented prune"
            );
            Err(PolicyError::PreventedActuation { operation: Operation::Prune, policy, status })
        }
    }
}

#[must_use]
pub fn can_apply<I, R>(inventory: &I, resource: Option<&R>, policy: InventoryPolicy) -> bool
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    check_apply(inventory, resource, policy).is_ok()
}

#[must_use]
pub fn can_prune<I, R>(inventory: &I, resource: Option<&R>, policy: InventoryPolicy) -> bool
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    check_prune(inventory, resource, policy).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Decision {
    pub operation: Operation,
    pub policy: InventoryPolicy,
    pub status: Option<MatchStatus>,
    pub allowed: bool,
    pub reason: String,
}

fn decision_reason(status: Option<MatchStatus>) -> &'static str {
    match status {
        None => "resource-absent",
        Some(MatchStatus::Match) => "owned-by-inventory",
        Some(MatchStatus::Empty) => "unowned",
        Some(MatchStatus::Unmatch) => "owned-by-other",
    }
}

/// Evaluate one operation and keep the classification alongside the verdict.
#[must_use]
pub fn evaluate<I, R>(
    operation: Operation,
    inventory: &I,
    resource: Option<&R>,
    policy: InventoryPolicy,
) -> Decision
where
    I: Inventory + ?Sized,
    R: Resource + ?Sized,
{
    let status = resource.map(|resource| inventory_id_match(inventory, resource));
    let allowed = match operation {
        Operation::Apply => can_apply(inventory, resource, policy),
        Operation::Prune => can_prune(inventory, resource, policy),
    };
    Decision { operation, policy, status, allowed, reason: decision_reason(status).to_string() }
}
