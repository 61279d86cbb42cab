//! Error classes reported by the resolver/inference layers. Codes are
//! stable; the minimum strict level decides which files surface them.

use core_errors::ErrorClass;
use core_loc::StrictLevel;

/// Receiver type is known and has no such method.
pub const UNKNOWN_METHOD: ErrorClass = ErrorClass::new(7003, StrictLevel::True);
/// Wrong number of positional arguments.
pub const ARITY_MISMATCH: ErrorClass = ErrorClass::new(7004, StrictLevel::True);
/// Argument value does not match the declared parameter type.
pub const ARGUMENT_MISMATCH: ErrorClass = ErrorClass::new(7002, StrictLevel::True);
/// Returned value does not match the declared result type.
pub const RETURN_TYPE_MISMATCH: ErrorClass = ErrorClass::new(7005, StrictLevel::True);
/// A value reached `T.absurd` with an inhabited type.
pub const NOT_ABSURD: ErrorClass = ErrorClass::new(7018, StrictLevel::True);
/// A loop-carried variable changed its type across iterations.
pub const PINNED_TYPE_CHANGED: ErrorClass = ErrorClass::new(7001, StrictLevel::True);
/// Unresolved constant reference.
pub const UNRESOLVED_CONSTANT: ErrorClass = ErrorClass::new(5002, StrictLevel::False);
