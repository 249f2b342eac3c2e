pub mod allowlist;
pub mod coref;
pub mod intervals;
pub mod merger;
pub mod repeats;
pub mod safe_harbor;

pub use allowlist::{apply_allowlist, apply_allowlist_with_extra};
pub use coref::resolve_coreferences;
pub use intervals::IntervalSet;
pub use merger::merge_spans;
pub use repeats::expand_repeated_values;
pub use safe_harbor::apply_safe_harbor;
