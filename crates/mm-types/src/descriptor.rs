use mm_utils::ArrayStr;

/// Describes a registered message type: its wire id, display name, and
/// fixed payload size. `fixed_size == 0` marks a signal (no payload).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_id: i32,
    pub type_name: ArrayStr<32>,
    pub fixed_size: usize,
}

impl TypeDescriptor {
    pub fn new(type_id: i32, type_name: &str, fixed_size: usize) -> Self {
        TypeDescriptor { type_id, type_name: ArrayStr::from_str_truncate(type_name), fixed_size }
    }

    pub fn is_signal(&self) -> bool {
        self.fixed_size == 0
    }
}

/// Errors produced by [`crate::Registry`] mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("type id {0} is already registered")]
    DuplicateType(i32),
}
