//! Interception of guarded operations.
//!
//! An [`Interceptor`] sits in front of arbitrary async operations identified
//! by name. Policies are attached either per operation or by pattern, and
//! every selected call is keyed and checked against the shared gate before
//! the operation runs.

mod binding;
mod interceptor;

pub use binding::{Binding, OperationPattern};
pub use interceptor::{Interceptor, Invocation, Selection};
