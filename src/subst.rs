//! The instantiation engine and the suspended-substitution algebra.
//!
//! Concrete subtrees are rewritten eagerly; a metavariable reference is never
//! descended into. Instead the operation that would have applied to its
//! eventual value is appended to the reference's chain via [add_lift],
//! [add_lower] and [add_subst], which normalize on append so that chains
//! built along different but equivalent routes compare equal.

use std::sync::Arc;

use crate::error::Error;
use crate::term::{mk_metavar, MetavarId, PendingOp, Term};

/// Shifts every free variable with index `>= cutoff` up by `amount`.
/// On a metavariable this defers to [add_lift].
pub fn lift_free_vars(m: &Term, cutoff: usize, amount: usize) -> Term {
    let mut m = m.clone();
    m.lift_at(cutoff, amount);
    m
}

/// Shifts every free variable with index `>= cutoff` down by `amount`.
///
/// A free variable in `[cutoff - amount, cutoff)` has no well-defined image;
/// encountering one is a [Error::MalformedChain] failure. On a metavariable
/// this defers to [add_lower], whose legality is re-checked once the
/// metavariable resolves.
pub fn lower_free_vars(m: &Term, cutoff: usize, amount: usize) -> anyhow::Result<Term> {
    let mut m = m.clone();
    m.lower_at(cutoff, amount)?;
    Ok(m)
}

/// Simultaneously substitutes `substs[0], substs[1], …` (innermost-first) for
/// the outermost bound variables `#0, #1, …` of `m`, lowering the remaining
/// free variables by `substs.len()`.
///
/// Replacements are shifted by the binder depth at each occurrence. A
/// metavariable is wrapped, not descended into: it receives one `Subst` entry
/// per replacement followed by a single `Lower` entry, so the cost is
/// proportional to the chain, not to the eventual value.
pub fn instantiate(m: &Term, substs: &[Term]) -> anyhow::Result<Term> {
    if substs.is_empty() {
        return Err(Error::ArityMismatch.into());
    }
    let mut m = m.clone();
    m.instantiate_at(substs, 0);
    Ok(m)
}

/// Replaces free occurrences of `#cutoff` by `value`, shifting nothing else.
/// This is the concrete reading of a single `Subst` chain entry.
pub(crate) fn replace_free_var(m: &Term, cutoff: usize, value: &Term) -> Term {
    let mut m = m.clone();
    m.replace_at(cutoff, 0, value);
    m
}

impl Term {
    fn lift_at(&mut self, cutoff: usize, amount: usize) {
        if amount == 0 {
            return;
        }
        match self {
            Term::Var(i) => {
                if *i >= cutoff {
                    *i += amount;
                }
            }
            Term::Const(_) => {}
            Term::App(inner) => {
                let inner = Arc::make_mut(inner);
                inner.fun.lift_at(cutoff, amount);
                for arg in &mut inner.args {
                    arg.lift_at(cutoff, amount);
                }
            }
            Term::Binder(inner) => {
                let inner = Arc::make_mut(inner);
                inner.binder_type.lift_at(cutoff, amount);
                inner.body.lift_at(cutoff + 1, amount);
            }
            Term::Metavar(_) => {
                let m = add_lift(self, cutoff, amount);
                *self = m;
            }
        }
    }

    fn lower_at(&mut self, cutoff: usize, amount: usize) -> anyhow::Result<()> {
        if amount == 0 {
            return Ok(());
        }
        match self {
            Term::Var(i) => {
                if *i >= cutoff {
                    // An index below `amount` has no image above zero.
                    if *i < amount {
                        return Err(Error::MalformedChain {
                            index: *i,
                            cutoff,
                            amount,
                        }
                        .into());
                    }
                    *i -= amount;
                } else if *i + amount >= cutoff {
                    return Err(Error::MalformedChain {
                        index: *i,
                        cutoff,
                        amount,
                    }
                    .into());
                }
            }
            Term::Const(_) => {}
            Term::App(inner) => {
                let inner = Arc::make_mut(inner);
                inner.fun.lower_at(cutoff, amount)?;
                for arg in &mut inner.args {
                    arg.lower_at(cutoff, amount)?;
                }
            }
            Term::Binder(inner) => {
                let inner = Arc::make_mut(inner);
                inner.binder_type.lower_at(cutoff, amount)?;
                inner.body.lower_at(cutoff + 1, amount)?;
            }
            Term::Metavar(_) => {
                let m = add_lower(self, cutoff, amount);
                *self = m;
            }
        }
        Ok(())
    }

    fn instantiate_at(&mut self, substs: &[Term], depth: usize) {
        let count = substs.len();
        match self {
            Term::Var(i) => {
                let i = *i;
                if i < depth {
                    return;
                }
                if i - depth < count {
                    *self = lift_free_vars(&substs[i - depth], 0, depth);
                } else {
                    *self = Term::Var(i - count);
                }
            }
            Term::Const(_) => {}
            Term::App(inner) => {
                let inner = Arc::make_mut(inner);
                inner.fun.instantiate_at(substs, depth);
                for arg in &mut inner.args {
                    arg.instantiate_at(substs, depth);
                }
            }
            Term::Binder(inner) => {
                let inner = Arc::make_mut(inner);
                inner.binder_type.instantiate_at(substs, depth);
                inner.body.instantiate_at(substs, depth + 1);
            }
            Term::Metavar(_) => {
                let mut m = self.clone();
                for (j, value) in substs.iter().enumerate() {
                    // The extra `count` shields the replacement's free
                    // variables from the trailing lower.
                    let value = lift_free_vars(value, 0, depth + count);
                    m = add_subst(&m, depth + j, &value);
                }
                *self = add_lower(&m, depth + count, count);
            }
        }
    }

    fn replace_at(&mut self, cutoff: usize, depth: usize, value: &Term) {
        match self {
            Term::Var(i) => {
                if *i == cutoff + depth {
                    *self = lift_free_vars(value, 0, depth);
                }
            }
            Term::Const(_) => {}
            Term::App(inner) => {
                let inner = Arc::make_mut(inner);
                inner.fun.replace_at(cutoff, depth, value);
                for arg in &mut inner.args {
                    arg.replace_at(cutoff, depth, value);
                }
            }
            Term::Binder(inner) => {
                let inner = Arc::make_mut(inner);
                inner.binder_type.replace_at(cutoff, depth, value);
                inner.body.replace_at(cutoff, depth + 1, value);
            }
            Term::Metavar(_) => {
                let m = add_subst(self, cutoff + depth, &lift_free_vars(value, 0, depth));
                *self = m;
            }
        }
    }
}

fn metavar_parts(m: &Term) -> (MetavarId, Vec<PendingOp>) {
    let Term::Metavar(inner) = m else {
        panic!("suspended substitution on a non-metavariable term: {m}");
    };
    (inner.id, inner.chain.clone())
}

/// Appends `Lift(cutoff, amount)` to the chain of metavariable reference `m`.
///
/// A trailing `Subst` entry commutes with the lift: the lift moves before it
/// and the substituted term (and its target index) are shifted accordingly,
/// keeping chains in a canonical entry order.
pub fn add_lift(m: &Term, cutoff: usize, amount: usize) -> Term {
    if amount == 0 {
        return m.clone();
    }
    let (id, mut chain) = metavar_parts(m);
    match chain.last() {
        Some(PendingOp::Subst { .. }) => {
            let Some(PendingOp::Subst { cutoff: c, value }) = chain.pop() else {
                unreachable!()
            };
            let lifted = add_lift(&mk_metavar(id, chain), cutoff, amount);
            let c = if c >= cutoff { c + amount } else { c };
            add_subst(&lifted, c, &lift_free_vars(&value, cutoff, amount))
        }
        _ => {
            chain.push(PendingOp::Lift { cutoff, amount });
            mk_metavar(id, chain)
        }
    }
}

/// Appends `Lower(cutoff, amount)` to the chain of metavariable reference `m`.
///
/// A trailing `Lift` whose range covers the lowered band cancels against it:
/// `Lift(s, n)` followed by `Lower(s', n')` with `s <= s' <= s + n` and
/// `n' <= n` is `Lift(s, n - n')`, which disappears entirely when `n == n'`.
pub fn add_lower(m: &Term, cutoff: usize, amount: usize) -> Term {
    if amount == 0 {
        return m.clone();
    }
    let (id, mut chain) = metavar_parts(m);
    match chain.last() {
        Some(&PendingOp::Lift {
            cutoff: lift_cutoff,
            amount: lift_amount,
        }) if lift_cutoff <= cutoff
            && cutoff <= lift_cutoff + lift_amount
            && amount <= lift_amount =>
        {
            chain.pop();
            if lift_amount > amount {
                chain.push(PendingOp::Lift {
                    cutoff: lift_cutoff,
                    amount: lift_amount - amount,
                });
            }
            mk_metavar(id, chain)
        }
        _ => {
            chain.push(PendingOp::Lower { cutoff, amount });
            mk_metavar(id, chain)
        }
    }
}

/// Appends `Subst(cutoff, value)` to the chain of metavariable reference `m`.
///
/// Two normalizations keep chains canonical:
/// - a substitution targeting a variable inside the band vacated by a
///   trailing `Lift` can never fire and is dropped;
/// - a substitution appended after a `Lower` is pushed underneath it, with
///   its target index and the free variables of `value` re-expressed in the
///   pre-lower indexing.
pub fn add_subst(m: &Term, cutoff: usize, value: &Term) -> Term {
    let (id, mut chain) = metavar_parts(m);
    match chain.last() {
        Some(&PendingOp::Lift {
            cutoff: lift_cutoff,
            amount: lift_amount,
        }) if lift_cutoff <= cutoff && cutoff < lift_cutoff + lift_amount => m.clone(),
        Some(PendingOp::Lower { .. }) => {
            let Some(PendingOp::Lower {
                cutoff: lower_cutoff,
                amount: lower_amount,
            }) = chain.pop()
            else {
                unreachable!()
            };
            let cutoff = if cutoff >= lower_cutoff {
                cutoff + lower_amount
            } else {
                cutoff
            };
            let value = lift_free_vars(value, lower_cutoff, lower_amount);
            let inner = add_subst(&mk_metavar(id, chain), cutoff, &value);
            add_lower(&inner, lower_cutoff, lower_amount)
        }
        _ => {
            chain.push(PendingOp::Subst {
                cutoff,
                value: value.clone(),
            });
            mk_metavar(id, chain)
        }
    }
}
