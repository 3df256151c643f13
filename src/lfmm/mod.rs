pub use self::ridge::*;

mod ridge;
