//! The term model: immutable, `Arc`-shared expression trees with de Bruijn
//! variables and metavariable references carrying suspended substitutions.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Name(usize);

static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);
static NAME_TABLE: Lazy<RwLock<HashMap<String, Name>>> = Lazy::new(Default::default);
static NAME_REV_TABLE: Lazy<Mutex<HashMap<Name, String>>> = Lazy::new(Default::default);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            NAME_REV_TABLE
                .lock()
                .unwrap()
                .get(self)
                .unwrap_or(&self.0.to_string())
        )
    }
}

#[derive(Error, Debug, Clone)]
#[error("invalid name")]
pub struct InvalidNameError;

impl TryFrom<&str> for Name {
    type Error = InvalidNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Name::intern(value)
    }
}

impl Name {
    pub fn fresh() -> Self {
        let id = NAME_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Name(id)
    }

    pub fn intern(value: &str) -> Result<Name, InvalidNameError> {
        static RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"\A[\p{Cased_Letter}_][\p{Cased_Letter}\p{Number}_]*\z").unwrap()
        });
        if !RE.is_match(value) {
            return Err(InvalidNameError);
        }
        let mut name_table = NAME_TABLE.write().unwrap();
        if let Some(&name) = name_table.get(value) {
            return Ok(name);
        }
        let name = Name::fresh();
        name_table.insert(value.to_owned(), name);
        drop(name_table);
        // This can be put here outside the critical section of NAME_TABLE
        // because no one but this function knows of the value of `name`.
        NAME_REV_TABLE
            .lock()
            .unwrap()
            .insert(name, value.to_owned());
        Ok(name)
    }
}

/// Identity of a metavariable inside a [crate::MetavarEnv]. Ids are allocated
/// monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct MetavarId(usize);

impl From<usize> for MetavarId {
    fn from(value: usize) -> Self {
        MetavarId(value)
    }
}

impl MetavarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for MetavarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "?m{}", self.0)
    }
}

/// A substitution suspended on an unassigned metavariable, to be replayed
/// against the value the metavariable eventually receives.
///
/// A `Subst` entry is a pure replacement of one free variable; the index
/// lowering performed by [crate::instantiate] is recorded as a separate
/// `Lower` entry so that entries compose by plain sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Ord, PartialOrd)]
pub enum PendingOp {
    Lift { cutoff: usize, amount: usize },
    Lower { cutoff: usize, amount: usize },
    Subst { cutoff: usize, value: Term },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
pub enum BinderKind {
    Lambda,
    Pi,
}

/// de Bruijn representation: `Var(0)` refers to the innermost binder.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub enum Term {
    Var(usize),
    Const(Arc<TermConst>),
    App(Arc<TermApp>),
    Binder(Arc<TermBinder>),
    Metavar(Arc<TermMetavar>),
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Ord, PartialOrd)]
pub struct TermConst {
    pub name: Name,
}

#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct TermApp {
    pub fun: Term,
    pub args: Vec<Term>,
}

#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct TermBinder {
    pub kind: BinderKind,
    // for pretty-printing
    pub binder_name: Name,
    pub binder_type: Term,
    pub body: Term,
}

#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct TermMetavar {
    pub id: MetavarId,
    pub chain: Vec<PendingOp>,
}

pub fn mk_var(i: usize) -> Term {
    Term::Var(i)
}

pub fn mk_const(name: Name) -> Term {
    Term::Const(Arc::new(TermConst { name }))
}

pub fn mk_app(fun: Term, args: Vec<Term>) -> Term {
    assert!(!args.is_empty());
    Term::App(Arc::new(TermApp { fun, args }))
}

pub fn mk_lambda(binder_name: Name, binder_type: Term, body: Term) -> Term {
    mk_binder(BinderKind::Lambda, binder_name, binder_type, body)
}

pub fn mk_pi(binder_name: Name, binder_type: Term, body: Term) -> Term {
    mk_binder(BinderKind::Pi, binder_name, binder_type, body)
}

pub fn mk_binder(kind: BinderKind, binder_name: Name, binder_type: Term, body: Term) -> Term {
    Term::Binder(Arc::new(TermBinder {
        kind,
        binder_name,
        binder_type,
        body,
    }))
}

pub fn mk_metavar(id: MetavarId, chain: Vec<PendingOp>) -> Term {
    Term::Metavar(Arc::new(TermMetavar { id, chain }))
}

impl Term {
    pub fn is_metavar(&self) -> bool {
        matches!(self, Term::Metavar(_))
    }

    /// The id of the referenced metavariable, regardless of its chain.
    pub fn metavar_id(&self) -> Option<MetavarId> {
        match self {
            Term::Metavar(inner) => Some(inner.id),
            _ => None,
        }
    }

    /// Pointer identity on the shared inner node. Stronger than `==`; used by
    /// callers that rely on the identity-caching guarantee of
    /// [crate::MetavarEnv::get_type].
    pub fn ptr_eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Var(i), Term::Var(j)) => i == j,
            (Term::Const(a), Term::Const(b)) => Arc::ptr_eq(a, b),
            (Term::App(a), Term::App(b)) => Arc::ptr_eq(a, b),
            (Term::Binder(a), Term::Binder(b)) => Arc::ptr_eq(a, b),
            (Term::Metavar(a), Term::Metavar(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns [true] if no metavariable occurs in [self].
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) | Term::Const(_) => true,
            Term::App(inner) => inner.fun.is_ground() && inner.args.iter().all(Term::is_ground),
            Term::Binder(inner) => inner.binder_type.is_ground() && inner.body.is_ground(),
            Term::Metavar(_) => false,
        }
    }
}

const TERM_PREC_BINDER: u8 = 0;
const TERM_PREC_APP: u8 = 1;
const TERM_PREC_ATOM: u8 = 2;

fn fmt_term(term: &Term, f: &mut std::fmt::Formatter<'_>, prec: u8) -> std::fmt::Result {
    match term {
        Term::Var(i) => write!(f, "#{i}"),
        Term::Const(inner) => write!(f, "{}", inner.name),
        Term::App(inner) => {
            let needs_paren = prec > TERM_PREC_APP;
            if needs_paren {
                write!(f, "(")?;
            }
            fmt_term(&inner.fun, f, TERM_PREC_APP)?;
            for arg in &inner.args {
                write!(f, " ")?;
                fmt_term(arg, f, TERM_PREC_ATOM)?;
            }
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
        Term::Binder(inner) => {
            let needs_paren = prec > TERM_PREC_BINDER;
            if needs_paren {
                write!(f, "(")?;
            }
            let head = match inner.kind {
                BinderKind::Lambda => "λ",
                BinderKind::Pi => "Π",
            };
            write!(f, "{head}{}:", inner.binder_name)?;
            fmt_term(&inner.binder_type, f, TERM_PREC_ATOM)?;
            write!(f, ". ")?;
            fmt_term(&inner.body, f, TERM_PREC_BINDER)?;
            if needs_paren {
                write!(f, ")")?;
            }
            Ok(())
        }
        Term::Metavar(inner) => {
            write!(f, "{}", inner.id)?;
            if !inner.chain.is_empty() {
                write!(f, "[")?;
                for (idx, op) in inner.chain.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{op}")?;
                }
                write!(f, "]")?;
            }
            Ok(())
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_term(self, f, TERM_PREC_BINDER)
    }
}

impl Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingOp::Lift { cutoff, amount } => write!(f, "lift {cutoff} {amount}"),
            PendingOp::Lower { cutoff, amount } => write!(f, "lower {cutoff} {amount}"),
            PendingOp::Subst { cutoff, value } => {
                write!(f, "subst {cutoff} ")?;
                fmt_term(value, f, TERM_PREC_ATOM)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> Name {
        Name::intern(value).unwrap()
    }

    #[test]
    fn intern_is_idempotent() {
        assert_eq!(name("f"), name("f"));
        assert_ne!(name("f"), name("g"));
        assert_eq!(name("f").to_string(), "f");
    }

    #[test]
    fn intern_rejects_malformed_identifiers() {
        assert!(Name::intern("").is_err());
        assert!(Name::intern("0abc").is_err());
    }

    #[test]
    fn structural_equality_covers_chains() {
        let m = mk_metavar(MetavarId::from(0), vec![]);
        let lifted = mk_metavar(
            MetavarId::from(0),
            vec![PendingOp::Lift {
                cutoff: 1,
                amount: 1,
            }],
        );
        assert_ne!(m, lifted);
        assert_eq!(m, mk_metavar(MetavarId::from(0), vec![]));
        assert!(!m.ptr_eq(&mk_metavar(MetavarId::from(0), vec![])));
        let shared = m.clone();
        assert!(m.ptr_eq(&shared));
    }

    #[test]
    fn display_renders_binders_and_metavars() {
        let f = mk_const(name("f"));
        let n = mk_const(name("N"));
        let t = mk_lambda(name("x"), n, mk_app(f.clone(), vec![mk_var(0), mk_var(1)]));
        assert_eq!(t.to_string(), "λx:N. f #0 #1");
        let m = mk_metavar(
            MetavarId::from(3),
            vec![
                PendingOp::Lower {
                    cutoff: 2,
                    amount: 1,
                },
                PendingOp::Subst {
                    cutoff: 1,
                    value: mk_app(f, vec![mk_var(0)]),
                },
            ],
        );
        assert_eq!(m.to_string(), "?m3[lower 2 1, subst 1 (f #0)]");
    }
}
