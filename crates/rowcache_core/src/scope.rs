//! Scope predicates for partial indexes.

use crate::record::RecordChange;
use crate::value::FieldValue;
use std::collections::BTreeMap;

/// A static predicate restricting which records an index covers.
///
/// A scope maps field names to accepted values; a field absent from
/// the scope is unconstrained. Matching is exact equality (or set
/// membership) per field, conjunctive across fields. Side-effect free.
///
/// # Example
///
/// ```rust
/// use rowcache_core::Scope;
///
/// // sex = 'm'
/// let males = Scope::none().eq("sex", "m");
/// // sex IN ('m', 'f')
/// let either = Scope::none().any("sex", ["m", "f"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    constraints: BTreeMap<String, Vec<FieldValue>>,
}

impl Scope {
    /// The empty scope, which matches every record.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Constrains a field to a single value.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.constraints.insert(field.into(), vec![value.into()]);
        self
    }

    /// Constrains a field to a set of accepted values.
    #[must_use]
    pub fn any(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<FieldValue>>,
    ) -> Self {
        self.constraints
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// True if this scope places no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// The fields this scope constrains.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.constraints.keys().map(String::as_str)
    }

    /// Decides whether a record's field values satisfy the scope.
    ///
    /// A field missing from the record counts as null, which satisfies
    /// no constraint.
    #[must_use]
    pub fn matches(&self, fields: &BTreeMap<String, FieldValue>) -> bool {
        self.constraints.iter().all(|(field, accepted)| {
            let value = fields.get(field).cloned().unwrap_or(FieldValue::Null);
            accepted.contains(&value)
        })
    }

    /// Decides membership against a change's current (pending) values.
    #[must_use]
    pub fn matches_current(&self, change: &RecordChange) -> bool {
        self.matches(change.current_fields())
    }

    /// Decides membership against a change's prior committed values.
    ///
    /// A freshly created record had no prior position, so it never
    /// matches on the prior side.
    #[must_use]
    pub fn matches_prior(&self, change: &RecordChange) -> bool {
        match change.prior_fields() {
            Some(prior) => self.matches(prior),
            None => false,
        }
    }
}
