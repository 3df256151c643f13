pub use self::{grid::*, output::*};

mod grid;
mod output;
