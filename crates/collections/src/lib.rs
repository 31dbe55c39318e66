//! Container types shared by the upload engine and the job board.
//!
//! [`OrderedDict`] keeps insertion (or sorted) order while giving O(1)
//! lookup and removal by key.

pub mod ordered_dict;

pub use ordered_dict::OrderedDict;
