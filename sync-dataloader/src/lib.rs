//! Batched data loading for synchronous GraphQL execution.
//!
//! Resolvers return [`Deferred`] values from [`BatchLoader::load`]; the [`Executor`] walks the
//! whole query on one call stack and lets the [`BatchScope`] dispatch every queued load at once
//! before resuming the fields that waited on them.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]
#![warn(unreachable_pub)]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

pub mod configuration;
mod deferred;
mod error;
mod execution;
pub mod graphql;
mod json_ext;
mod loader;
mod scope;
pub mod spec;

pub use crate::configuration::Configuration;
pub use crate::deferred::Callback;
pub use crate::deferred::Deferred;
pub use crate::deferred::DispatchHint;
pub use crate::deferred::Resolution;
pub use crate::error::ExecutionError;
pub use crate::error::FieldError;
pub use crate::error::SpecError;
pub use crate::execution::default_resolver;
pub use crate::execution::Executor;
pub use crate::execution::ResolveInfo;
pub use crate::execution::Resolved;
pub use crate::execution::Resolver;
pub use crate::json_ext::Object;
pub use crate::json_ext::Path;
pub use crate::json_ext::PathElement;
pub use crate::json_ext::Value;
pub use crate::json_ext::ValueExt;
pub use crate::loader::BatchFn;
pub use crate::loader::BatchLoader;
pub use crate::loader::BatchResult;
pub use crate::scope::BatchScope;
pub use crate::scope::ScopeGuard;
