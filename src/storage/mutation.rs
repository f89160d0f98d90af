//! Storage mutation verification between two deployments.
//!
//! Storage of a module survives upgrades, so the layout of every namespace
//! may only ever grow at its end. [`compare_dumps`] walks the previous and
//! the current [`StorageDump`] side by side and grades every difference:
//!
//! * `log`: safe and expected, e.g. a member appended to a struct.
//! * `warn`: safe for the storage but worth a look, e.g. a member removed
//!   from the end of a struct leaves its data behind.
//! * `error`: existing data would be read back wrong, deployment must be
//!   blocked.

use std::fmt;

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    ArraySlot, EnumSlot, MappingSlot, StorageDump, StorageLayout, StorageSlot, StructSlot,
    packing,
};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Log,
    Warn,
    Error,
}

impl Severity {
    /// Prefix of report lines.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Log => "+",
            Self::Warn => "+-",
            Self::Error => "-",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("log"),
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Update,
    Del,
}

/// Single difference between two storage dumps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMutation {
    #[serde(rename = "type")]
    severity: Severity,
    kind: MutationKind,
    message: String,
}

impl StorageMutation {
    pub fn new(severity: Severity, kind: MutationKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the mutation must block the deployment.
    pub fn is_breaking(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for StorageMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.severity.prefix(), self.message)
    }
}

/// Mutations in a human readable form, one line per mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageReport {
    mutations: Vec<StorageMutation>,
}

impl StorageReport {
    pub fn new(mutations: Vec<StorageMutation>) -> Self {
        Self { mutations }
    }

    pub fn mutations(&self) -> &[StorageMutation] {
        &self.mutations
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.mutations
            .iter()
            .filter(|m| m.severity == severity)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.mutations.iter().any(StorageMutation::is_breaking)
    }
}

impl fmt::Display for StorageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mutation in &self.mutations {
            writeln!(f, "{mutation}")?;
        }
        Ok(())
    }
}

/// Compares the current storage dump against the previous deployment's.
///
/// Without a previous dump there is nothing to break and the result is
/// empty. Mutations follow the declaration order of `current`, removals
/// come last in the order of `previous`.
pub fn compare_dumps(previous: Option<&StorageDump>, current: &StorageDump) -> Vec<StorageMutation> {
    let Some(previous) = previous else {
        return vec![];
    };

    let mut diff = Diff::default();
    for layout in current.iter() {
        match previous.get(&layout.name) {
            Some(old) => diff.layout(old, layout),
            None => diff.log(
                MutationKind::Add,
                format!("namespace {} ({}) added", layout.name, layout.kind),
            ),
        }
    }
    for old in previous.iter().filter(|old| current.get(&old.name).is_none()) {
        diff.warn(MutationKind::Del, format!("namespace {} removed", old.name));
    }
    diff.mutations
}

/// Fails if any of the mutations is breaking.
///
/// # Errors
///
/// [`Error::BreakingStorageMutations`] listing every `error` mutation.
pub fn ensure_compatible(mutations: &[StorageMutation]) -> Result<()> {
    let breaking = mutations
        .iter()
        .filter(|m| m.is_breaking())
        .cloned()
        .collect_vec();
    if breaking.is_empty() {
        return Ok(());
    }
    for mutation in &breaking {
        warn!(%mutation, "Breaking storage mutation");
    }
    Err(Error::BreakingStorageMutations(breaking))
}

#[derive(Default)]
struct Diff {
    mutations: Vec<StorageMutation>,
}

impl Diff {
    fn push(&mut self, severity: Severity, kind: MutationKind, message: String) {
        self.mutations.push(StorageMutation::new(severity, kind, message));
    }

    fn log(&mut self, kind: MutationKind, message: String) {
        self.push(Severity::Log, kind, message);
    }

    fn warn(&mut self, kind: MutationKind, message: String) {
        self.push(Severity::Warn, kind, message);
    }

    fn error(&mut self, kind: MutationKind, message: String) {
        self.push(Severity::Error, kind, message);
    }

    fn layout(&mut self, old: &StorageLayout, new: &StorageLayout) {
        if old.kind != new.kind {
            self.log(
                MutationKind::Update,
                format!("namespace {} changed from {} to {}", new.name, old.kind, new.kind),
            );
        }
        for layout in &new.structs {
            let path = format!("{}.{}", new.name, layout.name);
            match old.get_struct(&layout.name) {
                Some(previous) => self.members(&path, &previous.members, &layout.members),
                None => self.log(MutationKind::Add, format!("struct {path} added")),
            }
        }
        for layout in &old.structs {
            if new.get_struct(&layout.name).is_none() {
                self.warn(
                    MutationKind::Del,
                    format!("struct {}.{} removed", old.name, layout.name),
                );
            }
        }
    }

    /// Compares struct members index by index.
    fn members(&mut self, path: &str, old: &[StorageSlot], new: &[StorageSlot]) {
        let old_positions = packing(old).positions;
        let new_positions = packing(new).positions;

        for (index, pair) in old.iter().zip_longest(new).enumerate() {
            match pair {
                EitherOrBoth::Both(previous, current) => {
                    let member_path = format!("{path}.{}", member_name(current, index));
                    self.rename(path, index, previous, current, old);

                    let (from, to) = (old_positions[index], new_positions[index]);
                    if from != to {
                        self.error(
                            MutationKind::Update,
                            format!(
                                "{member_path} moved from slot {} offset {} to slot {} offset {}",
                                from.slot, from.offset, to.slot, to.offset
                            ),
                        );
                    }
                    self.slot(&member_path, previous, current);
                }
                EitherOrBoth::Right(current) => self.log(
                    MutationKind::Add,
                    format!("{path}.{} added as {}", member_name(current, index), current.type_label()),
                ),
                EitherOrBoth::Left(previous) => self.warn(
                    MutationKind::Del,
                    format!("{path}.{} removed", member_name(previous, index)),
                ),
            }
        }
    }

    fn rename(
        &mut self,
        path: &str,
        index: usize,
        previous: &StorageSlot,
        current: &StorageSlot,
        old: &[StorageSlot],
    ) {
        let (Some(from), Some(to)) = (previous.name(), current.name()) else {
            return;
        };
        if from == to {
            return;
        }
        match old.iter().position(|member| member.name() == Some(to)) {
            Some(declared) => self.error(
                MutationKind::Update,
                format!(
                    "{path}.{from} replaced by {to}, previously declared at index {declared} instead of {index}"
                ),
            ),
            None => self.log(
                MutationKind::Update,
                format!("{path}.{from} renamed to {to}"),
            ),
        }
    }

    /// Compares the shape of two values stored at the same position.
    fn slot(&mut self, path: &str, old: &StorageSlot, new: &StorageSlot) {
        match (old, new) {
            (StorageSlot::Builtin(old), StorageSlot::Builtin(new)) => {
                if old.value_type == new.value_type {
                    return;
                }
                let message = format!(
                    "{path} type changed from {} to {}",
                    old.value_type, new.value_type
                );
                let (old_size, new_size) = (old.footprint(), new.footprint());
                if old_size == new_size {
                    self.warn(MutationKind::Update, message);
                } else {
                    self.error(
                        MutationKind::Update,
                        format!("{message}, size changed from {old_size} to {new_size}"),
                    );
                }
            }
            (StorageSlot::Struct(old), StorageSlot::Struct(new)) => self.nested_struct(path, old, new),
            (StorageSlot::Mapping(old), StorageSlot::Mapping(new)) => self.mapping(path, old, new),
            (StorageSlot::Array(old), StorageSlot::Array(new)) => self.array(path, old, new),
            (StorageSlot::Enum(old), StorageSlot::Enum(new)) => self.enumeration(path, old, new),
            (old, new) => self.error(
                MutationKind::Update,
                format!(
                    "{path} changed from {} {} to {} {}",
                    old.variant(),
                    old.type_label(),
                    new.variant(),
                    new.type_label()
                ),
            ),
        }
    }

    fn nested_struct(&mut self, path: &str, old: &StructSlot, new: &StructSlot) {
        if old.struct_name != new.struct_name {
            self.log(
                MutationKind::Update,
                format!(
                    "{path} struct type renamed from {} to {}",
                    old.struct_name, new.struct_name
                ),
            );
        }
        self.members(path, &old.members, &new.members);
    }

    fn mapping(&mut self, path: &str, old: &MappingSlot, new: &MappingSlot) {
        if old.key.value_type != new.key.value_type {
            let message = format!(
                "{path} key type changed from {} to {}",
                old.key.value_type, new.key.value_type
            );
            if old.key.footprint() == new.key.footprint() {
                self.warn(MutationKind::Update, message);
            } else {
                self.error(MutationKind::Update, message);
            }
        }
        self.slot(&format!("{path}[]"), &old.value, &new.value);
    }

    fn array(&mut self, path: &str, old: &ArraySlot, new: &ArraySlot) {
        if old.length != new.length {
            self.error(
                MutationKind::Update,
                format!(
                    "{path} length changed from {} to {}",
                    array_length(old),
                    array_length(new)
                ),
            );
            return;
        }
        let (old_element, new_element) = (old.value.footprint(), new.value.footprint());
        if old_element != new_element && !unmeasured(&old.value) && !unmeasured(&new.value) {
            self.error(
                MutationKind::Update,
                format!(
                    "{path} element size changed from {old_element} to {new_element}"
                ),
            );
            return;
        }
        self.slot(&format!("{path}[]"), &old.value, &new.value);
    }

    fn enumeration(&mut self, path: &str, old: &EnumSlot, new: &EnumSlot) {
        if old.enum_name != new.enum_name {
            self.log(
                MutationKind::Update,
                format!("{path} enum type renamed from {} to {}", old.enum_name, new.enum_name),
            );
        }
        if old.members == new.members {
            return;
        }
        if new.members.starts_with(&old.members) && old.size() == new.size() {
            self.log(
                MutationKind::Update,
                format!(
                    "{path} enum members appended: {}",
                    new.members[old.members.len()..].join(", ")
                ),
            );
        } else {
            self.error(
                MutationKind::Update,
                format!(
                    "{path} enum members changed from [{}] to [{}]",
                    old.members.join(", "),
                    new.members.join(", ")
                ),
            );
        }
    }
}

/// Self-referencing struct dumped without its slot count.
fn unmeasured(slot: &StorageSlot) -> bool {
    matches!(
        slot,
        StorageSlot::Struct(StructSlot { members, slots: None, .. }) if members.is_empty()
    )
}

fn member_name(slot: &StorageSlot, index: usize) -> String {
    slot.name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"))
}

fn array_length(array: &ArraySlot) -> String {
    array
        .length
        .map(|length| length.to_string())
        .unwrap_or_else(|| "dynamic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BuiltinValue, ElementaryType, LayoutKind, StructLayout};

    fn builtin(ty: &str, name: &str) -> StorageSlot {
        StorageSlot::Builtin(BuiltinValue::new(ElementaryType::parse(ty).unwrap())).named(name)
    }

    fn enumeration(name: &str, members: &[&str]) -> StorageSlot {
        StorageSlot::Enum(EnumSlot {
            enum_name: "Status".to_string(),
            name: Some(name.to_string()),
            members: members.iter().map(|m| m.to_string()).collect(),
        })
    }

    fn dump(members: Vec<StorageSlot>) -> StorageDump {
        StorageDump::from_iter([StorageLayout::new(
            LayoutKind::Library,
            "Account",
            vec![StructLayout::new("Data", members)],
        )])
    }

    fn diff(old: Vec<StorageSlot>, new: Vec<StorageSlot>) -> Vec<StorageMutation> {
        compare_dumps(Some(&dump(old)), &dump(new))
    }

    fn severities(mutations: &[StorageMutation]) -> Vec<(Severity, MutationKind)> {
        mutations.iter().map(|m| (m.severity(), m.kind())).collect()
    }

    #[test]
    fn test_without_previous_dump() {
        assert!(compare_dumps(None, &dump(vec![builtin("uint256", "a")])).is_empty());
    }

    #[test]
    fn test_self_diff_is_empty() {
        let members = vec![
            builtin("uint256", "a"),
            builtin("address", "b"),
            enumeration("status", &["Active", "Closed"]),
        ];

        assert!(diff(members.clone(), members).is_empty());
    }

    #[test]
    fn test_type_change_with_size_change() {
        let mutations = diff(
            vec![builtin("uint256", "a"), builtin("address", "b")],
            vec![builtin("uint256", "a"), builtin("uint256", "b")],
        );

        assert_eq!(severities(&mutations), vec![(Severity::Error, MutationKind::Update)]);
        assert_eq!(
            mutations[0].message(),
            "Account.Data.b type changed from address to uint256, size changed from 20 bytes to 32 bytes"
        );
    }

    #[test]
    fn test_type_change_same_size() {
        let mutations = diff(vec![builtin("uint256", "a")], vec![builtin("int256", "a")]);

        assert_eq!(severities(&mutations), vec![(Severity::Warn, MutationKind::Update)]);
    }

    #[test]
    fn test_trailing_append_and_removal() {
        let appended = diff(
            vec![builtin("uint256", "a"), builtin("address", "b")],
            vec![
                builtin("uint256", "a"),
                builtin("address", "b"),
                builtin("uint256", "c"),
            ],
        );
        let removed = diff(
            vec![builtin("uint256", "a"), builtin("address", "b")],
            vec![builtin("uint256", "a")],
        );

        assert_eq!(severities(&appended), vec![(Severity::Log, MutationKind::Add)]);
        assert_eq!(appended[0].message(), "Account.Data.c added as uint256");
        assert_eq!(severities(&removed), vec![(Severity::Warn, MutationKind::Del)]);
    }

    #[test]
    fn test_rename() {
        let mutations = diff(vec![builtin("uint256", "a")], vec![builtin("uint256", "total")]);

        assert_eq!(severities(&mutations), vec![(Severity::Log, MutationKind::Update)]);
        assert_eq!(mutations[0].message(), "Account.Data.a renamed to total");
    }

    #[test]
    fn test_reorder_is_breaking() {
        let mutations = diff(
            vec![builtin("uint256", "a"), builtin("uint256", "b")],
            vec![builtin("uint256", "b"), builtin("uint256", "a")],
        );

        assert_eq!(
            severities(&mutations),
            vec![
                (Severity::Error, MutationKind::Update),
                (Severity::Error, MutationKind::Update)
            ]
        );
    }

    #[test]
    fn test_packing_shift_is_breaking() {
        // Growing `a` pushes `b` out of the first slot.
        let mutations = diff(
            vec![builtin("uint128", "a"), builtin("uint128", "b")],
            vec![builtin("uint256", "a"), builtin("uint128", "b")],
        );

        assert_eq!(
            mutations.iter().map(StorageMutation::message).collect::<Vec<_>>(),
            vec![
                "Account.Data.a type changed from uint128 to uint256, size changed from 16 bytes to 32 bytes",
                "Account.Data.b moved from slot 0 offset 16 to slot 1 offset 0",
            ]
        );
        assert!(mutations.iter().all(StorageMutation::is_breaking));
    }

    #[test]
    fn test_variant_change() {
        let mapping = StorageSlot::Mapping(MappingSlot {
            name: Some("a".to_string()),
            key: BuiltinValue::new(ElementaryType::Address),
            value: Box::new(StorageSlot::Builtin(BuiltinValue::new(ElementaryType::Uint(256)))),
        });

        let mutations = diff(vec![mapping], vec![builtin("uint256", "a")]);

        assert_eq!(severities(&mutations), vec![(Severity::Error, MutationKind::Update)]);
    }

    #[test]
    fn test_mapping_key_change() {
        let mapping = |key: ElementaryType| {
            StorageSlot::Mapping(MappingSlot {
                name: Some("balances".to_string()),
                key: BuiltinValue::new(key),
                value: Box::new(StorageSlot::Builtin(BuiltinValue::new(ElementaryType::Uint(256)))),
            })
        };

        let same_size = diff(
            vec![mapping(ElementaryType::Uint(256))],
            vec![mapping(ElementaryType::FixedBytes(32))],
        );
        let resized = diff(
            vec![mapping(ElementaryType::Uint(256))],
            vec![mapping(ElementaryType::Address)],
        );

        assert_eq!(severities(&same_size), vec![(Severity::Warn, MutationKind::Update)]);
        assert_eq!(severities(&resized), vec![(Severity::Error, MutationKind::Update)]);
    }

    #[test]
    fn test_array_changes() {
        let array = |ty: &str, length: Option<u64>| {
            StorageSlot::Array(ArraySlot {
                name: Some("values".to_string()),
                value: Box::new(StorageSlot::Builtin(BuiltinValue::new(
                    ElementaryType::parse(ty).unwrap(),
                ))),
                length,
            })
        };

        let length = diff(vec![array("uint256", None)], vec![array("uint256", Some(2))]);
        let element = diff(vec![array("uint256", None)], vec![array("uint128", None)]);

        assert_eq!(severities(&length), vec![(Severity::Error, MutationKind::Update)]);
        assert_eq!(severities(&element), vec![(Severity::Error, MutationKind::Update)]);
    }

    #[test]
    fn test_enum_changes() {
        let appended = diff(
            vec![enumeration("status", &["Active", "Closed"])],
            vec![enumeration("status", &["Active", "Closed", "Frozen"])],
        );
        let renamed = diff(
            vec![enumeration("status", &["Active", "Closed"])],
            vec![enumeration("status", &["Open", "Closed"])],
        );

        assert_eq!(severities(&appended), vec![(Severity::Log, MutationKind::Update)]);
        assert_eq!(severities(&renamed), vec![(Severity::Error, MutationKind::Update)]);
    }

    #[test]
    fn test_nested_struct() {
        let nested = |struct_name: &str, members: Vec<StorageSlot>| {
            StorageSlot::Struct(StructSlot {
                struct_name: struct_name.to_string(),
                name: Some("config".to_string()),
                members,
                slots: None,
            })
        };

        let renamed = diff(
            vec![nested("Config", vec![builtin("uint256", "fee")])],
            vec![nested("Settings", vec![builtin("uint256", "fee")])],
        );
        let changed = diff(
            vec![nested("Config", vec![builtin("uint256", "fee")])],
            vec![nested("Config", vec![builtin("address", "fee")])],
        );

        assert_eq!(severities(&renamed), vec![(Severity::Log, MutationKind::Update)]);
        assert_eq!(severities(&changed), vec![(Severity::Error, MutationKind::Update)]);
        assert_eq!(
            changed[0].message(),
            "Account.Data.config.fee type changed from uint256 to address, size changed from 32 bytes to 20 bytes"
        );
    }

    #[test]
    fn test_namespace_changes() {
        let previous = StorageDump::from_iter([
            StorageLayout::new(LayoutKind::Library, "Kept", vec![]),
            StorageLayout::new(LayoutKind::Library, "Dropped", vec![]),
        ]);
        let current = StorageDump::from_iter([
            StorageLayout::new(LayoutKind::Contract, "Kept", vec![]),
            StorageLayout::new(LayoutKind::Library, "Added", vec![]),
        ]);

        let mutations = compare_dumps(Some(&previous), &current);

        assert_eq!(
            mutations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "+ namespace Kept changed from library to contract",
                "+ namespace Added (library) added",
                "+- namespace Dropped removed",
            ]
        );
    }

    #[test]
    fn test_ensure_compatible() {
        let ok = vec![StorageMutation::new(Severity::Warn, MutationKind::Del, "gone")];
        let breaking = vec![
            StorageMutation::new(Severity::Log, MutationKind::Add, "added"),
            StorageMutation::new(Severity::Error, MutationKind::Update, "moved"),
        ];

        assert!(ensure_compatible(&ok).is_ok());
        assert!(matches!(
            ensure_compatible(&breaking),
            Err(Error::BreakingStorageMutations(ref m)) if m.len() == 1 && m[0].message() == "moved"
        ));
    }

    #[test]
    fn test_report() {
        let report = StorageReport::new(vec![
            StorageMutation::new(Severity::Log, MutationKind::Add, "a"),
            StorageMutation::new(Severity::Warn, MutationKind::Del, "b"),
            StorageMutation::new(Severity::Error, MutationKind::Update, "c"),
        ]);

        assert_eq!(report.to_string(), "+ a\n+- b\n- c\n");
        assert_eq!(report.count(Severity::Warn), 1);
        assert!(report.has_errors());
    }
}
