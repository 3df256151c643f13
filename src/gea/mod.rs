pub use self::{association::*, correlation_test::*, fdr::*};

mod association;
mod fdr;
