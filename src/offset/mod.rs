pub use self::geometric::*;

mod geometric;
