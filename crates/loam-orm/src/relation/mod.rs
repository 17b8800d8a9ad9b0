//! Relation resolution between row-mapped entities.
//!
//! Every variant shares one contract: `get_results` (fetch-or-reuse
//! against the bound parent), `eager_load` (one batched query for a
//! whole parent set), `persist`, and `on_delete`. Relations are built
//! unbound as templates, then bound to a concrete parent with
//! `for_parent`; eager loading uses the unbound template directly.

mod foreign;
mod has_many;
mod many_to_many;

pub use foreign::{BelongsToMany, HasForeign};
pub use has_many::{HasMany, HasOne};
pub use many_to_many::ManyToMany;

/// What happens to dependent rows when their parent is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Refuse the delete while dependent rows exist.
    #[default]
    Restrict,
    /// Delete the dependent rows first.
    Cascade,
    /// NULL out the foreign key on dependent rows.
    SetNull,
    /// Leave dependent rows untouched.
    DoNothing,
}
