//! Stamps: abstract type/value-range tags on nodes.
//!
//! Every node carries a stamp describing what its value can be. Stamps form
//! a lattice:
//! - `join` (intersection) refines a stamp and is the only way a stamp may
//!   change during canonicalization — stamps are never widened without
//!   cause.
//! - `meet` (union) combines stamps at merge points (phi inputs).
//!
//! Besides value stamps there are token stamps (`Control`, `Memory`,
//! `Void`) for nodes that do not produce a value, and `Empty` as the
//! unreachable bottom.

use std::fmt;

/// Identifier of a resolved class in the metadata provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Whether an object value can be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullness {
    MaybeNull,
    NonNull,
    AlwaysNull,
}

/// Integer value-range stamp, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntStamp {
    pub lo: i64,
    pub hi: i64,
}

impl IntStamp {
    pub const FULL: IntStamp = IntStamp {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    #[inline]
    pub const fn constant(v: i64) -> Self {
        IntStamp { lo: v, hi: v }
    }

    #[inline]
    pub const fn range(lo: i64, hi: i64) -> Self {
        IntStamp { lo, hi }
    }

    /// The single value this stamp admits, if any.
    #[inline]
    pub fn as_constant(&self) -> Option<i64> {
        (self.lo == self.hi).then_some(self.lo)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    fn join(&self, other: &IntStamp) -> IntStamp {
        IntStamp {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    fn meet(&self, other: &IntStamp) -> IntStamp {
        IntStamp {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }
}

/// Object reference stamp: nullness plus an optional exact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    pub nullness: Nullness,
    /// Exact class when statically known; `None` means any class.
    pub exact_class: Option<ClassId>,
}

impl ObjectStamp {
    pub const ANY: ObjectStamp = ObjectStamp {
        nullness: Nullness::MaybeNull,
        exact_class: None,
    };

    pub const NULL: ObjectStamp = ObjectStamp {
        nullness: Nullness::AlwaysNull,
        exact_class: None,
    };
}

/// Abstract type/value tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// Any value at all. Used where observed types must not be trusted
    /// (e.g. OSR entry locals).
    Unrestricted,
    /// Integer with a known inclusive range.
    Int(IntStamp),
    /// Floating-point value (no range tracking).
    Float,
    /// Outcome of a comparison; input to `If` and guards.
    Condition,
    /// Object reference.
    Object(ObjectStamp),
    /// Control token; produced by fixed control nodes.
    Control,
    /// Memory effect token.
    Memory,
    /// No value (stores, barriers, frame states).
    Void,
    /// Unreachable (bottom).
    Empty,
}

impl Stamp {
    #[inline]
    pub const fn int_constant(v: i64) -> Self {
        Stamp::Int(IntStamp::constant(v))
    }

    #[inline]
    pub const fn full_int() -> Self {
        Stamp::Int(IntStamp::FULL)
    }

    #[inline]
    pub const fn any_object() -> Self {
        Stamp::Object(ObjectStamp::ANY)
    }

    #[inline]
    pub const fn null() -> Self {
        Stamp::Object(ObjectStamp::NULL)
    }

    /// Whether this stamp describes a value (as opposed to a token).
    #[inline]
    pub fn is_value(&self) -> bool {
        !matches!(
            self,
            Stamp::Control | Stamp::Memory | Stamp::Void | Stamp::Empty
        )
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Stamp::Object(_) | Stamp::Unrestricted)
    }

    /// Whether every value admitted by this stamp is the null reference.
    #[inline]
    pub fn is_always_null(&self) -> bool {
        matches!(
            self,
            Stamp::Object(ObjectStamp {
                nullness: Nullness::AlwaysNull,
                ..
            })
        )
    }

    /// The single integer this stamp admits, if any.
    #[inline]
    pub fn as_int_constant(&self) -> Option<i64> {
        match self {
            Stamp::Int(s) => s.as_constant(),
            _ => None,
        }
    }

    /// Intersection: the stamp admitting only values both admit. This is
    /// the refinement direction; canonicalization only ever moves stamps
    /// down the lattice through here.
    pub fn join(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Unrestricted, s) | (s, Stamp::Unrestricted) => *s,
            (Stamp::Int(a), Stamp::Int(b)) => {
                let j = a.join(b);
                if j.is_empty() {
                    Stamp::Empty
                } else {
                    Stamp::Int(j)
                }
            }
            (Stamp::Object(a), Stamp::Object(b)) => {
                let nullness = match (a.nullness, b.nullness) {
                    (x, y) if x == y => x,
                    (Nullness::MaybeNull, y) => y,
                    (x, Nullness::MaybeNull) => x,
                    // NonNull ∩ AlwaysNull admits nothing.
                    _ => return Stamp::Empty,
                };
                let exact_class = match (a.exact_class, b.exact_class) {
                    (Some(x), Some(y)) if x != y => return Stamp::Empty,
                    (x, y) => x.or(y),
                };
                Stamp::Object(ObjectStamp {
                    nullness,
                    exact_class,
                })
            }
            (a, b) if a == b => *a,
            _ => Stamp::Empty,
        }
    }

    /// Union: the stamp admitting values either admits. Used at merges.
    pub fn meet(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Empty, s) | (s, Stamp::Empty) => *s,
            (Stamp::Int(a), Stamp::Int(b)) => Stamp::Int(a.meet(b)),
            (Stamp::Object(a), Stamp::Object(b)) => {
                let nullness = match (a.nullness, b.nullness) {
                    (x, y) if x == y => x,
                    _ => Nullness::MaybeNull,
                };
                let exact_class = match (a.exact_class, b.exact_class) {
                    (Some(x), Some(y)) if x == y => Some(x),
                    _ => None,
                };
                Stamp::Object(ObjectStamp {
                    nullness,
                    exact_class,
                })
            }
            (a, b) if a == b => *a,
            _ => Stamp::Unrestricted,
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Unrestricted => write!(f, "*"),
            Stamp::Int(s) if s.as_constant().is_some() => write!(f, "i64={}", s.lo),
            Stamp::Int(s) => write!(f, "i64[{}..{}]", s.lo, s.hi),
            Stamp::Float => write!(f, "f64"),
            Stamp::Condition => write!(f, "cond"),
            Stamp::Object(o) => {
                write!(f, "obj")?;
                match o.nullness {
                    Nullness::NonNull => write!(f, "!")?,
                    Nullness::AlwaysNull => write!(f, "=null")?,
                    Nullness::MaybeNull => {}
                }
                if let Some(c) = o.exact_class {
                    write!(f, "#{}", c.0)?;
                }
                Ok(())
            }
            Stamp::Control => write!(f, "ctrl"),
            Stamp::Memory => write!(f, "mem"),
            Stamp::Void => write!(f, "void"),
            Stamp::Empty => write!(f, "empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_join_narrows() {
        let a = Stamp::Int(IntStamp::range(0, 100));
        let b = Stamp::Int(IntStamp::range(50, 200));
        assert_eq!(a.join(&b), Stamp::Int(IntStamp::range(50, 100)));
    }

    #[test]
    fn test_int_join_disjoint_is_empty() {
        let a = Stamp::Int(IntStamp::range(0, 10));
        let b = Stamp::Int(IntStamp::range(20, 30));
        assert_eq!(a.join(&b), Stamp::Empty);
    }

    #[test]
    fn test_int_meet_widens() {
        let a = Stamp::Int(IntStamp::constant(1));
        let b = Stamp::Int(IntStamp::constant(9));
        assert_eq!(a.meet(&b), Stamp::Int(IntStamp::range(1, 9)));
    }

    #[test]
    fn test_unrestricted_is_join_identity() {
        let s = Stamp::Int(IntStamp::range(3, 7));
        assert_eq!(Stamp::Unrestricted.join(&s), s);
        assert_eq!(s.join(&Stamp::Unrestricted), s);
    }

    #[test]
    fn test_object_nullness() {
        let null = Stamp::null();
        assert!(null.is_always_null());
        assert!(null.is_object());

        let nonnull = Stamp::Object(ObjectStamp {
            nullness: Nullness::NonNull,
            exact_class: None,
        });
        assert_eq!(null.join(&nonnull), Stamp::Empty);
        assert_eq!(
            null.meet(&nonnull),
            Stamp::Object(ObjectStamp::ANY)
        );
    }

    #[test]
    fn test_constant_stamp() {
        let c = Stamp::int_constant(42);
        assert_eq!(c.as_int_constant(), Some(42));
        assert_eq!(Stamp::full_int().as_int_constant(), None);
    }
}
