pub mod descriptor;
pub mod live;
pub mod policy;

pub use descriptor::*;
pub use live::*;
pub use policy::*;
