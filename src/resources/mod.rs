//! Resource lifecycle adapters.
//!
//! Each adapter glues the host's create/read/update/delete/import callbacks
//! to the object codecs and the GPO security store. Absence is not an error
//! at this level: `read` returns `None` and `delete` succeeds when the
//! directory no longer has the object.

pub mod gpo_security;
pub mod object;

pub use gpo_security::{GpoSecurityResource, GpoSecurityState};
pub use object::ObjectResource;

use adp_core::AdResult;

#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// Desired and observed state share one shape.
    type State: Send + Sync;

    /// Host-facing type name, e.g. `ad_user`.
    fn type_name(&self) -> String;

    /// Create the object and return its observed state, id included.
    async fn create(&self, desired: &Self::State) -> AdResult<Self::State>;

    /// Observe the object `current` identifies; `None` when it is gone.
    async fn read(&self, current: &Self::State) -> AdResult<Option<Self::State>>;

    /// Turn `prior` (last observed) into `desired`; `None` when the object
    /// disappeared underneath.
    async fn update(&self, prior: &Self::State, desired: &Self::State) -> AdResult<Option<Self::State>>;

    /// Remove the object; an already absent object is fine.
    async fn delete(&self, current: &Self::State) -> AdResult<()>;

    /// A minimal state for `id`, suitable for a following `read`. Malformed
    /// ids are rejected.
    fn import(&self, id: &str) -> AdResult<Self::State>;
}
