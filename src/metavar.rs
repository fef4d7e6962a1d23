//! The metavariable environment and the resolution pass that collapses
//! assigned metavariables into concrete terms.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;

use crate::error::Error;
use crate::subst::{lift_free_vars, lower_free_vars, replace_free_var};
use crate::term::{mk_metavar, MetavarId, Name, PendingOp, Term};

/// An opaque scope token: the telescope of binders enclosing the point where
/// a constraint is emitted. The environment threads it through to the
/// collector unmodified.
#[derive(Debug, Clone, Default)]
pub struct Context {
    binders: Vec<(Name, Term)>,
}

impl Context {
    pub fn push(&mut self, name: Name, ty: Term) {
        self.binders.push((name, ty));
    }

    pub fn depth(&self) -> usize {
        self.binders.len()
    }
}

/// Sink for equality obligations the environment cannot discharge itself.
/// The environment only ever emits; it never inspects what the collector
/// does with an obligation.
pub trait UnificationCollector {
    fn add_eq(&mut self, ctx: &Context, lhs: Term, rhs: Term);
    fn add_type_of_eq(&mut self, ctx: &Context, term: Term, ty: Term);
}

/// Collector for callers that have no constraint store, e.g. when the
/// calculus is exercised on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCollector;

impl UnificationCollector for NullCollector {
    fn add_eq(&mut self, _ctx: &Context, _lhs: Term, _rhs: Term) {}

    fn add_type_of_eq(&mut self, _ctx: &Context, _term: Term, _ty: Term) {}
}

#[derive(Debug, Clone, Default)]
struct MetaSlot {
    ty: Option<Term>,
    value: Option<Term>,
}

/// Append-only store of metavariable slots. Ids are slot indices and are
/// never reused. Cloning the environment is a cheap snapshot: the terms in
/// the slots are `Arc`-shared, and assignments made to one copy are not
/// visible in the other.
#[derive(Debug, Clone, Default)]
pub struct MetavarEnv {
    slots: Vec<MetaSlot>,
}

impl MetavarEnv {
    pub fn new() -> Self {
        Default::default()
    }

    /// Allocates a fresh metavariable and returns a reference to it with an
    /// empty chain. The type slot stays empty until [Self::get_type] asks
    /// for it.
    pub fn mk_metavar(&mut self) -> Term {
        let id = MetavarId::from(self.slots.len());
        self.slots.push(MetaSlot::default());
        log::trace!("allocated metavariable {id}");
        mk_metavar(id, vec![])
    }

    pub fn contains(&self, id: MetavarId) -> bool {
        id.index() < self.slots.len()
    }

    /// Like [Self::contains], for callers holding the reference term rather
    /// than the bare id. `false` for non-metavariable terms.
    pub fn contains_term(&self, m: &Term) -> bool {
        m.metavar_id().is_some_and(|id| self.contains(id))
    }

    pub fn is_assigned(&self, id: MetavarId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.value.is_some())
    }

    fn slot(&self, id: MetavarId) -> anyhow::Result<&MetaSlot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| Error::UnknownMetavar(id).into())
    }

    /// The type of metavariable reference `m`, created lazily: the first call
    /// allocates a fresh metavariable to stand for the type, stores it, and
    /// emits `add_type_of_eq(ctx, m, ty)` to `collector`. Later calls return
    /// a clone of the stored handle, so repeated queries are pointer-equal.
    pub fn get_type(
        &mut self,
        m: &Term,
        ctx: &Context,
        collector: &mut impl UnificationCollector,
    ) -> anyhow::Result<Term> {
        let Some(id) = m.metavar_id() else {
            bail!("get_type called on a non-metavariable term: {m}");
        };
        if !self.contains(id) {
            return Err(Error::UnknownMetavar(id).into());
        }
        if let Some(ty) = &self.slots[id.index()].ty {
            return Ok(ty.clone());
        }
        let ty = self.mk_metavar();
        self.slots[id.index()].ty = Some(ty.clone());
        log::debug!("type of {id} set to fresh metavariable {ty}");
        collector.add_type_of_eq(ctx, m.clone(), ty.clone());
        Ok(ty)
    }

    /// Records `value` for `id`, exactly as given. The suspended chains of
    /// the references to `id` are replayed against it at resolution time,
    /// not here.
    pub fn assign(&mut self, id: MetavarId, value: Term) -> anyhow::Result<()> {
        if !self.contains(id) {
            return Err(Error::UnknownMetavar(id).into());
        }
        let slot = &mut self.slots[id.index()];
        if slot.value.is_some() {
            return Err(Error::AlreadyAssigned(id).into());
        }
        log::debug!("{id} := {value}");
        slot.value = Some(value);
        Ok(())
    }

    /// The assigned value of `id`, verbatim, or [None] if unassigned.
    pub fn get_subst(&self, id: MetavarId) -> anyhow::Result<Option<Term>> {
        Ok(self.slot(id)?.value.clone())
    }
}

/// Replaces every assigned metavariable in `m` by its value with the
/// suspended chain replayed on top, recursively, until only unassigned
/// metavariables remain. Unassigned references keep their chains intact.
///
/// The result is a pure function of `m` and the environment snapshot. A
/// value that mentions its own metavariable, directly or through other
/// assignments, is reported as [Error::CyclicMetavar] instead of looping.
pub fn instantiate_metavars(m: &Term, env: &MetavarEnv) -> anyhow::Result<Term> {
    let mut m = m.clone();
    m.resolve_against(env, &mut HashSet::new())?;
    Ok(m)
}

impl Term {
    fn resolve_against(
        &mut self,
        env: &MetavarEnv,
        in_progress: &mut HashSet<MetavarId>,
    ) -> anyhow::Result<()> {
        match self {
            Term::Var(_) | Term::Const(_) => Ok(()),
            Term::App(inner) => {
                let inner = Arc::make_mut(inner);
                inner.fun.resolve_against(env, in_progress)?;
                for arg in &mut inner.args {
                    arg.resolve_against(env, in_progress)?;
                }
                Ok(())
            }
            Term::Binder(inner) => {
                let inner = Arc::make_mut(inner);
                inner.binder_type.resolve_against(env, in_progress)?;
                inner.body.resolve_against(env, in_progress)
            }
            Term::Metavar(inner) => {
                let id = inner.id;
                let Some(value) = env.get_subst(id)? else {
                    return Ok(());
                };
                if !in_progress.insert(id) {
                    return Err(Error::CyclicMetavar(id).into());
                }
                let mut t = value;
                for op in &inner.chain {
                    t = match op {
                        &PendingOp::Lift { cutoff, amount } => lift_free_vars(&t, cutoff, amount),
                        &PendingOp::Lower { cutoff, amount } => {
                            lower_free_vars(&t, cutoff, amount)?
                        }
                        PendingOp::Subst { cutoff, value } => {
                            replace_free_var(&t, *cutoff, value)
                        }
                    };
                }
                // The value may mention further metavariables, as may the
                // terms spliced in by `Subst` entries.
                t.resolve_against(env, in_progress)?;
                in_progress.remove(&id);
                log::trace!("{id} resolved to {t}");
                *self = t;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{mk_app, mk_const, mk_var};

    #[derive(Default)]
    struct RecordingCollector {
        type_of_eqs: Vec<(Term, Term)>,
    }

    impl UnificationCollector for RecordingCollector {
        fn add_eq(&mut self, _ctx: &Context, _lhs: Term, _rhs: Term) {
            panic!("the environment must never emit add_eq");
        }

        fn add_type_of_eq(&mut self, _ctx: &Context, term: Term, ty: Term) {
            self.type_of_eqs.push((term, ty));
        }
    }

    fn name(value: &str) -> Name {
        Name::intern(value).unwrap()
    }

    #[test]
    fn get_type_is_identity_cached() {
        let mut env = MetavarEnv::new();
        let ctx = Context::default();
        let mut collector = RecordingCollector::default();
        let m1 = env.mk_metavar();
        let m2 = env.mk_metavar();
        let t1 = env.get_type(&m1, &ctx, &mut collector).unwrap();
        let t1_again = env.get_type(&m1, &ctx, &mut collector).unwrap();
        assert!(t1.ptr_eq(&t1_again));
        let t2 = env.get_type(&m2, &ctx, &mut collector).unwrap();
        assert!(!t1.ptr_eq(&t2));
        assert_ne!(t1, t2);
        // One obligation per freshly created type, none for the cached call.
        assert_eq!(collector.type_of_eqs.len(), 2);
        assert_eq!(collector.type_of_eqs[0].0, m1);
        assert_eq!(collector.type_of_eqs[0].1, t1);
    }

    #[test]
    fn get_type_survives_assignment() {
        let mut env = MetavarEnv::new();
        let ctx = Context::default();
        let m = env.mk_metavar();
        let ty = env.get_type(&m, &ctx, &mut NullCollector).unwrap();
        env.assign(m.metavar_id().unwrap(), mk_const(name("a")))
            .unwrap();
        let ty_again = env.get_type(&m, &ctx, &mut NullCollector).unwrap();
        assert!(ty.ptr_eq(&ty_again));
    }

    #[test]
    fn assignment_is_exclusive() {
        let mut env = MetavarEnv::new();
        let m = env.mk_metavar();
        let id = m.metavar_id().unwrap();
        assert!(!env.is_assigned(id));
        env.assign(id, mk_const(name("a"))).unwrap();
        assert!(env.is_assigned(id));
        let err = env.assign(id, mk_const(name("b"))).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::AlreadyAssigned(id))
        );
        // The first assignment stands.
        assert_eq!(env.get_subst(id).unwrap(), Some(mk_const(name("a"))));
    }

    #[test]
    fn unknown_ids_fail_fast() {
        let mut env = MetavarEnv::new();
        let known = env.mk_metavar();
        assert!(env.contains_term(&known));
        assert!(!env.contains_term(&mk_const(name("a"))));
        let bogus = MetavarId::from(7);
        assert!(!env.contains(bogus));
        assert!(!env.contains_term(&mk_metavar(bogus, vec![])));
        assert!(!env.is_assigned(bogus));
        let err = env.assign(bogus, mk_var(0)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::UnknownMetavar(bogus))
        );
        let err = env.get_subst(bogus).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::UnknownMetavar(bogus))
        );
    }

    #[test]
    fn snapshots_are_independent() {
        let mut env = MetavarEnv::new();
        let m = env.mk_metavar();
        let id = m.metavar_id().unwrap();
        let mut branch = env.clone();
        branch.assign(id, mk_const(name("a"))).unwrap();
        assert!(branch.is_assigned(id));
        assert!(!env.is_assigned(id));
        assert_eq!(instantiate_metavars(&m, &env).unwrap(), m);
        assert_eq!(
            instantiate_metavars(&m, &branch).unwrap(),
            mk_const(name("a"))
        );
    }

    #[test]
    fn resolution_follows_assignment_chains() {
        let mut env = MetavarEnv::new();
        let m1 = env.mk_metavar();
        let m2 = env.mk_metavar();
        env.assign(
            m1.metavar_id().unwrap(),
            mk_app(mk_const(name("g")), vec![m2.clone()]),
        )
        .unwrap();
        env.assign(m2.metavar_id().unwrap(), mk_var(0)).unwrap();
        let t = mk_app(mk_const(name("f")), vec![m1]);
        assert_eq!(
            instantiate_metavars(&t, &env).unwrap(),
            mk_app(
                mk_const(name("f")),
                vec![mk_app(mk_const(name("g")), vec![mk_var(0)])]
            )
        );
    }

    #[test]
    fn self_referential_assignment_is_detected() {
        let mut env = MetavarEnv::new();
        let m = env.mk_metavar();
        let id = m.metavar_id().unwrap();
        env.assign(id, mk_app(mk_const(name("f")), vec![m.clone()]))
            .unwrap();
        let err = instantiate_metavars(&m, &env).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::CyclicMetavar(id))
        );
    }
}
