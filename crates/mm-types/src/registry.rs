use std::collections::HashMap;

use crate::core_types::{
    Connect, FailSubscribe, FailedMessage, ForceDisconnect, ModuleReady, SaveMessageLog,
    SubscriptionControl, TimingMessage, ids,
};
use crate::descriptor::{RegistryError, TypeDescriptor};
use crate::limits::CORE_TYPE_ID_THRESHOLD;

/// Append-only `type_id → descriptor` mapping, as specified in §4.A.
///
/// Construct with [`Registry::with_core_types`] to get every id in
/// `SPEC_FULL.md` §6 pre-registered; use [`Registry::register`] to add user
/// types before first use.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    by_id: HashMap<i32, TypeDescriptor>,
    by_name: HashMap<String, i32>,
    threshold: i32,
}

impl Registry {
    /// Empty registry with the default core/user id threshold.
    pub fn new() -> Self {
        Registry { by_id: HashMap::new(), by_name: HashMap::new(), threshold: CORE_TYPE_ID_THRESHOLD }
    }

    /// Like [`Self::new`] but with every core type from `SPEC_FULL.md` §6
    /// already registered.
    pub fn with_core_types() -> Self {
        let mut reg = Self::new();
        for d in core_descriptors() {
            reg.register(d).expect("core type table has no duplicate ids");
        }
        reg
    }

    /// Sets the core/user id threshold. Must be called before registering
    /// any type, since it only affects future `is_core` queries, not
    /// already-registered entries.
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&descriptor.type_id) {
            return Err(RegistryError::DuplicateType(descriptor.type_id));
        }
        self.by_name.insert(descriptor.type_name.as_str().to_owned(), descriptor.type_id);
        self.by_id.insert(descriptor.type_id, descriptor);
        Ok(())
    }

    pub fn lookup(&self, type_id: i32) -> Option<&TypeDescriptor> {
        self.by_id.get(&type_id)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn is_core(&self, type_id: i32) -> bool {
        type_id < self.threshold
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Descriptors for every id in `SPEC_FULL.md` §6, including the five
/// supplemented logger-control signals absent from the distilled spec table.
pub fn core_descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new(ids::EXIT, "EXIT", 0),
        TypeDescriptor::new(ids::KILL, "KILL", 0),
        TypeDescriptor::new(ids::ACKNOWLEDGE, "ACKNOWLEDGE", 0),
        TypeDescriptor::new(ids::FAIL_SUBSCRIBE, "FAIL_SUBSCRIBE", FailSubscribe::WIRE_SIZE),
        // FailedMessage is variable-size across header kinds; the registry
        // records the Standard-header size, matching the header variant a
        // deployment runs unless overridden after construction.
        TypeDescriptor::new(
            ids::FAILED_MESSAGE,
            "FAILED_MESSAGE",
            FailedMessage::wire_size(crate::HeaderKind::Standard),
        ),
        TypeDescriptor::new(ids::CONNECT, "CONNECT", Connect::WIRE_SIZE),
        TypeDescriptor::new(ids::DISCONNECT, "DISCONNECT", 0),
        TypeDescriptor::new(ids::SUBSCRIBE, "SUBSCRIBE", SubscriptionControl::WIRE_SIZE),
        TypeDescriptor::new(ids::UNSUBSCRIBE, "UNSUBSCRIBE", SubscriptionControl::WIRE_SIZE),
        TypeDescriptor::new(ids::MODULE_READY, "MODULE_READY", ModuleReady::WIRE_SIZE),
        TypeDescriptor::new(ids::SAVE_MESSAGE_LOG, "SAVE_MESSAGE_LOG", SaveMessageLog::WIRE_SIZE),
        TypeDescriptor::new(ids::MESSAGE_LOG_SAVED, "MESSAGE_LOG_SAVED", 0),
        TypeDescriptor::new(ids::PAUSE_MESSAGE_LOGGING, "PAUSE_MESSAGE_LOGGING", 0),
        TypeDescriptor::new(ids::RESUME_MESSAGE_LOGGING, "RESUME_MESSAGE_LOGGING", 0),
        TypeDescriptor::new(ids::RESET_MESSAGE_LOG, "RESET_MESSAGE_LOG", 0),
        TypeDescriptor::new(ids::DUMP_MESSAGE_LOG, "DUMP_MESSAGE_LOG", 0),
        TypeDescriptor::new(ids::TIMING_MESSAGE, "TIMING_MESSAGE", TimingMessage::WIRE_SIZE),
        TypeDescriptor::new(ids::FORCE_DISCONNECT, "FORCE_DISCONNECT", ForceDisconnect::WIRE_SIZE),
        TypeDescriptor::new(
            ids::PAUSE_SUBSCRIPTION,
            "PAUSE_SUBSCRIPTION",
            SubscriptionControl::WIRE_SIZE,
        ),
        TypeDescriptor::new(
            ids::RESUME_SUBSCRIPTION,
            "RESUME_SUBSCRIPTION",
            SubscriptionControl::WIRE_SIZE,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_core_types_registers_every_core_id() {
        let reg = Registry::with_core_types();
        assert_eq!(reg.len(), core_descriptors().len());
        assert!(reg.lookup(ids::CONNECT).is_some());
        assert!(reg.lookup(ids::TIMING_MESSAGE).is_some());
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let mut reg = Registry::with_core_types();
        let dup = TypeDescriptor::new(ids::CONNECT, "SOMETHING_ELSE", 4);
        assert_eq!(reg.register(dup), Err(RegistryError::DuplicateType(ids::CONNECT)));
    }

    #[test]
    fn user_type_above_threshold_is_not_core() {
        let mut reg = Registry::with_core_types();
        reg.register(TypeDescriptor::new(1234, "MY_EVENT", 80)).unwrap();
        assert!(!reg.is_core(1234));
        assert!(reg.is_core(ids::CONNECT));
    }

    #[test]
    fn lookup_by_name_matches_lookup_by_id() {
        let reg = Registry::with_core_types();
        let by_id = reg.lookup(ids::SUBSCRIBE).unwrap();
        let by_name = reg.lookup_by_name("SUBSCRIBE").unwrap();
        assert_eq!(by_id.type_id, by_name.type_id);
    }
}
