mod core_types;
mod descriptor;
mod header;
pub mod limits;
mod registry;

pub use core_types::{
    Connect, FailSubscribe, FailedMessage, ForceDisconnect, ModuleReady, SaveMessageLog,
    SubscriptionControl, TimingMessage, ids,
};
pub use descriptor::{RegistryError, TypeDescriptor};
pub use header::{Header, HeaderKind};
pub use registry::{Registry, core_descriptors};
