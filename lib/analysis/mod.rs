//! Static analysis over Chiron IL.
//!
//! Every analysis here is a `fixed_point::TransferFunction` over an
//! `AbstractValue` domain, run to a fixed point by `fixed_point::run`:
//!
//! * `reaching_definitions`: forward, join, over `DefSet`.
//! * `liveness`: backward, join, over `Flag`.
//! * `definite_assignment`: forward, meet, over `Flag`.
//! * `constant_propagation`: forward, join, over `FlatConstant`.
//! * `numeric`: forward, join, over `Interval` or the reduced product
//! `Numeric`, with widening, narrowing and branch refinement.
//!
//! `PathProfile` numbers the acyclic paths of a graph for coverage.

pub mod constant_propagation;
mod definite_assignment;
pub mod fixed_point;
mod interval;
mod kset;
mod lattice;
pub mod liveness;
pub mod numeric;
mod path_profile;
mod reaching_definitions;

pub use self::constant_propagation::constant_propagation;
pub use self::definite_assignment::definite_assignment;
pub use self::fixed_point::{Direction, FixedPoint, FixedPointOptions, Merge, TransferFunction};
pub use self::interval::{Bound, Interval};
pub use self::kset::{KSet, Numeric, MAX_CARDINALITY};
pub use self::lattice::{AbstractState, AbstractValue, FlatConstant, Flag};
pub use self::liveness::liveness;
pub use self::numeric::{numeric, NumericValue};
pub use self::path_profile::{PathEdge, PathProfile};
pub use self::reaching_definitions::{reaching_definitions, DefSet, Definition};

#[cfg(test)]
mod lattice_laws;
