// Entity Models - Regional units mirrored from the external authority
//
// RegionalUnit: locally stored version (append-only history)
// ExternalUnit: one row of the authority's snapshot (input only)

pub mod external_unit;
pub mod regional_unit;

pub use external_unit::ExternalUnit;
pub use regional_unit::RegionalUnit;
