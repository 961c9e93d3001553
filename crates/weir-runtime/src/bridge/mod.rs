//! The bridge between the host and script value domains.
//!
//! Three pieces: the [`Value`] marshaller, the host-object
//! [`registry`](registry) keyed by opaque ids, and the per-call
//! [share record](share) installed as the `__yao_data` global.

mod registry;
mod share;
mod value;

pub use registry::{
    ConstructorFactory, HostObject, HostRef, ObjectRegistry, constructor_table,
    register_constructor, registry,
};
pub use share::{ShareData, clear_share, set_share, share_from_context, SHARE_GLOBAL};
pub use value::{FunctionRef, Value, marshal, unmarshal};
