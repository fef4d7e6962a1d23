//! Metavariable environment and suspended-substitution calculus for a
//! proof-assistant kernel.
//!
//! Terms are immutable, `Arc`-shared trees over de Bruijn indices. A
//! metavariable reference carries a chain of pending lift/lower/subst
//! operations instead of being rewritten in place, so moving a placeholder
//! under binders costs per chain entry rather than per eventual value. Once
//! the elaborator assigns values, [instantiate_metavars] replays the chains
//! and collapses everything into a concrete term.
//!
//! ```
//! use metasubst::{instantiate, instantiate_metavars, mk_app, mk_const, mk_var, MetavarEnv, Name};
//!
//! let mut env = MetavarEnv::new();
//! let m = env.mk_metavar();
//! let f = mk_const(Name::intern("f")?);
//! let t = mk_app(f.clone(), vec![m.clone(), mk_var(0)]);
//! let a = mk_const(Name::intern("a")?);
//! let r = instantiate(&t, std::slice::from_ref(&a))?;
//! let g = mk_const(Name::intern("g")?);
//! env.assign(m.metavar_id().unwrap(), mk_app(g.clone(), vec![mk_var(0)]))?;
//! assert_eq!(
//!     instantiate_metavars(&r, &env)?,
//!     mk_app(f, vec![mk_app(g, vec![a.clone()]), a]),
//! );
//! # anyhow::Ok(())
//! ```

mod error;
mod metavar;
mod subst;
mod term;

pub use crate::error::Error;
pub use crate::metavar::{
    instantiate_metavars, Context, MetavarEnv, NullCollector, UnificationCollector,
};
pub use crate::subst::{add_lift, add_lower, add_subst, instantiate, lift_free_vars, lower_free_vars};
pub use crate::term::{
    mk_app, mk_binder, mk_const, mk_lambda, mk_metavar, mk_pi, mk_var, BinderKind, InvalidNameError,
    MetavarId, Name, PendingOp, Term, TermApp, TermBinder, TermConst, TermMetavar,
};
