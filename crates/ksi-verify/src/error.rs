use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Execution failures of the policy engine itself — distinct from a
/// verification *failure*, which is never an `Err` here but a value inside
/// a [`crate::policy::PolicyResult`] (spec.md §7: "verification failures
/// never propagate as hard errors").
#[derive(Debug, Error)]
pub enum Error {
    #[error("policy {0:?} has no rules")]
    EmptyPolicy(&'static str),
}
