//! Effects
//!
//! Handlers describe world mutations as data ([`Effects`]); the
//! [`EffectInterpreter`] turns that description into action once the handler
//! has returned successfully. A handler that fails therefore never leaves
//! the state half-updated.

mod effects;
mod interpreter;

pub use effects::{Effects, DB, DISPATCH, DISPATCH_LATER, DISPATCH_N};
pub use interpreter::{EffectFn, EffectInterpreter};
