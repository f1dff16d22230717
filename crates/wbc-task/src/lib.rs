//! Task layer of the whole-body controller.
//!
//! Translates feature and dynamics signals into the linear models the
//! solver consumes, one [`Task`](task::Task) per controlled quantity, and
//! manages each task's registrations over its lifecycle. Force tasks own a
//! [`FrictionCone`](friction::FrictionCone) and the contact-state protocol
//! around it.

pub mod friction;
pub mod task;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::friction::FrictionCone;
    pub use crate::task::Task;
}
