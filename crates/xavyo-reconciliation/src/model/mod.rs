//! Domain model: identities, resources and task definitions.

pub mod any;
pub mod resource;
pub mod task;

pub use any::{
    Any, AnyDraft, AnyKind, AnyType, Attributes, Derived, Plain, SchemaKind, SchemaType, Virtual,
};
pub use resource::{ExternalResource, Item, ItemPurpose, MandatoryCondition, Provision};
pub use task::{
    ActionChain, ConflictAction, ConflictPolicy, PullMode, PullTask, PushTask, TaskDirection,
    TaskFlags,
};
