pub use self::{error::*, helpers::*, structs_and_traits::*, table::*};

mod error;
mod helpers;
mod structs_and_traits;
mod table;
